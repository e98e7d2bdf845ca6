//! Dispositivos de bloco.
//!
//! Cada dispositivo expõe a tripla `{read_sectors, write_sectors, flush}`
//! sobre setores de 512 bytes. O registro devolve o id inteiro que o
//! resto do kernel usa. Todo I/O de cima passa pelo cache (`cache`).

pub mod cache;

use crate::sync::Spinlock;
use alloc::sync::Arc;
use alloc::vec::Vec;

pub const SECTOR_SIZE: usize = 512;

/// Erros da camada de bloco.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlkError {
    /// Falha reportada pelo hardware/backend (timeout de barramento etc).
    Io,
    BadDevice,
    OutOfRange,
}

impl From<BlkError> for crate::syscall::error::SysError {
    fn from(e: BlkError) -> Self {
        use crate::syscall::error::SysError;
        match e {
            BlkError::BadDevice => SysError::NoDevice,
            BlkError::OutOfRange => SysError::InvalidArgument,
            BlkError::Io => SysError::Unknown,
        }
    }
}

/// Tripla de operações de um dispositivo de setores.
pub trait BlockOps: Send + Sync {
    /// Capacidade em setores.
    fn n_sectors(&self) -> u64;

    fn read_sectors(&self, lba: u64, count: usize, buf: &mut [u8]) -> Result<(), BlkError>;

    fn write_sectors(&self, lba: u64, count: usize, buf: &[u8]) -> Result<(), BlkError>;

    fn flush(&self) -> Result<(), BlkError>;
}

static DEVICES: Spinlock<Vec<Arc<dyn BlockOps>>> = Spinlock::new(Vec::new());

/// Registra um dispositivo; devolve o id.
pub fn register(dev: Arc<dyn BlockOps>) -> usize {
    let mut devs = DEVICES.lock();
    devs.push(dev);
    let id = devs.len() - 1;
    crate::kinfo!("(BLK) Dispositivo registrado, id=", id as u64);
    id
}

/// Resolve um id para o dispositivo.
pub fn device(id: usize) -> Result<Arc<dyn BlockOps>, BlkError> {
    DEVICES
        .lock()
        .get(id)
        .cloned()
        .ok_or(BlkError::BadDevice)
}

#[cfg(test)]
pub(crate) fn test_reset_devices() {
    DEVICES.lock().clear();
}
