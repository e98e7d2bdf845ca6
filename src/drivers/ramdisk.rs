//! RAM-disk: dispositivo de bloco em memória.
//!
//! Backend de armazenamento inicial (e alvo de teste do cache de blocos):
//! um buffer no heap falando o contrato de setores de 512 bytes.

use crate::blk::{BlkError, BlockOps, SECTOR_SIZE};
use crate::sync::Spinlock;
use alloc::vec;
use alloc::vec::Vec;

pub struct RamDisk {
    data: Spinlock<Vec<u8>>,
}

impl RamDisk {
    /// Cria um disco zerado com `n_sectors` setores.
    pub fn new(n_sectors: usize) -> Self {
        Self {
            data: Spinlock::new(vec![0u8; n_sectors * SECTOR_SIZE]),
        }
    }

    /// Cria um disco com conteúdo pronto (imagens embutidas, testes).
    /// O tamanho é arredondado para cima para um setor inteiro.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Self {
        let rounded = bytes.len().div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
        bytes.resize(rounded, 0);
        Self {
            data: Spinlock::new(bytes),
        }
    }
}

impl BlockOps for RamDisk {
    fn n_sectors(&self) -> u64 {
        (self.data.lock().len() / SECTOR_SIZE) as u64
    }

    fn read_sectors(&self, lba: u64, count: usize, buf: &mut [u8]) -> Result<(), BlkError> {
        let data = self.data.lock();
        let start = lba as usize * SECTOR_SIZE;
        let end = start + count * SECTOR_SIZE;
        if end > data.len() || buf.len() < count * SECTOR_SIZE {
            return Err(BlkError::OutOfRange);
        }
        buf[..count * SECTOR_SIZE].copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_sectors(&self, lba: u64, count: usize, buf: &[u8]) -> Result<(), BlkError> {
        let mut data = self.data.lock();
        let start = lba as usize * SECTOR_SIZE;
        let end = start + count * SECTOR_SIZE;
        if end > data.len() || buf.len() < count * SECTOR_SIZE {
            return Err(BlkError::OutOfRange);
        }
        data[start..end].copy_from_slice(&buf[..count * SECTOR_SIZE]);
        Ok(())
    }

    fn flush(&self) -> Result<(), BlkError> {
        // Memória pura: nada pendente
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_roundtrip() {
        let disk = RamDisk::new(8);
        let tx = [0xC3u8; SECTOR_SIZE * 2];
        disk.write_sectors(2, 2, &tx).unwrap();
        let mut rx = [0u8; SECTOR_SIZE * 2];
        disk.read_sectors(2, 2, &mut rx).unwrap();
        assert_eq!(tx, rx);
    }

    #[test]
    fn test_bounds() {
        let disk = RamDisk::new(4);
        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(disk.read_sectors(4, 1, &mut buf), Err(BlkError::OutOfRange));
        assert_eq!(disk.n_sectors(), 4);
    }
}
