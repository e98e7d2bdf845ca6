//! Cache de blocos LRU com write-back.
//!
//! Blocos de 8 setores (4 KiB). Pedidos são decompostos por bloco; hit
//! copia direto, miss ocupa um slot livre ou despeja o LRU (escrevendo
//! antes se estiver sujo). Falha de alocação do buffer do bloco NÃO falha
//! o I/O: o pedido passa direto para o dispositivo (bypass).
//!
//! Invariante: um `(dispositivo, lba inicial)` válido aparece em no
//! máximo um slot.

use super::{BlkError, SECTOR_SIZE};
use crate::sync::Spinlock;
use alloc::vec::Vec;

pub const SECTORS_PER_BLOCK: usize = 8;
pub const BLOCK_SIZE: usize = SECTORS_PER_BLOCK * SECTOR_SIZE;
pub const CACHE_ENTRIES: usize = 64;

struct Entry {
    dev: usize,
    /// LBA inicial, alinhado a SECTORS_PER_BLOCK.
    lba: u64,
    dirty: bool,
    /// Carimbo de acesso (LRU).
    stamp: u64,
    data: Vec<u8>,
}

struct BlockCache {
    entries: [Option<Entry>; CACHE_ENTRIES],
    counter: u64,
}

static CACHE: Spinlock<BlockCache> = Spinlock::new(BlockCache {
    entries: [const { None }; CACHE_ENTRIES],
    counter: 0,
});

/// Setores realmente cobertos por um bloco (o último bloco de um
/// dispositivo pequeno pode ser parcial).
fn block_span(dev_sectors: u64, block_lba: u64) -> usize {
    ((dev_sectors - block_lba) as usize).min(SECTORS_PER_BLOCK)
}

fn try_alloc_block() -> Option<Vec<u8>> {
    let mut v = Vec::new();
    if v.try_reserve_exact(BLOCK_SIZE).is_err() {
        return None;
    }
    v.resize(BLOCK_SIZE, 0);
    Some(v)
}

/// Escreve de volta uma entrada suja no dispositivo dela.
fn writeback(entry: &mut Entry) -> Result<(), BlkError> {
    if !entry.dirty {
        return Ok(());
    }
    let dev = super::device(entry.dev)?;
    let span = block_span(dev.n_sectors(), entry.lba);
    dev.write_sectors(entry.lba, span, &entry.data[..span * SECTOR_SIZE])?;
    entry.dirty = false;
    Ok(())
}

/// Localiza (ou materializa) o slot do bloco e entrega `f` a entrada.
fn with_block<R>(
    dev_id: usize,
    block_lba: u64,
    f: impl FnOnce(&mut Entry) -> R,
) -> Result<Option<R>, BlkError> {
    let dev = super::device(dev_id)?;
    if block_lba >= dev.n_sectors() {
        return Err(BlkError::OutOfRange);
    }

    let mut cache = CACHE.lock();
    cache.counter += 1;
    let stamp = cache.counter;

    // Hit?
    for slot in cache.entries.iter_mut() {
        if let Some(e) = slot {
            if e.dev == dev_id && e.lba == block_lba {
                e.stamp = stamp;
                return Ok(Some(f(e)));
            }
        }
    }

    // Miss: buffer novo; sem memória → bypass (chamador faz I/O direto)
    let Some(mut data) = try_alloc_block() else {
        return Ok(None);
    };

    // Slot: livre, ou o LRU: o write-back do despejado acontece ANTES da
    // leitura do bloco novo
    let slot_idx = match cache.entries.iter().position(|s| s.is_none()) {
        Some(i) => i,
        None => {
            let lru = cache
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| s.as_ref().map(|e| e.stamp).unwrap_or(0))
                .map(|(i, _)| i)
                .unwrap();
            if let Some(victim) = cache.entries[lru].as_mut() {
                writeback(victim)?;
            }
            lru
        }
    };

    let span = block_span(dev.n_sectors(), block_lba);
    dev.read_sectors(block_lba, span, &mut data[..span * SECTOR_SIZE])?;

    cache.entries[slot_idx] = Some(Entry {
        dev: dev_id,
        lba: block_lba,
        dirty: false,
        stamp,
        data,
    });
    Ok(Some(f(cache.entries[slot_idx].as_mut().unwrap())))
}

/// Lê `count` setores a partir de `lba` via cache.
pub fn read(dev_id: usize, lba: u64, count: usize, buf: &mut [u8]) -> Result<(), BlkError> {
    if buf.len() < count * SECTOR_SIZE {
        return Err(BlkError::OutOfRange);
    }
    let mut done = 0usize;
    while done < count {
        let sector = lba + done as u64;
        let block_lba = sector & !(SECTORS_PER_BLOCK as u64 - 1);
        let in_block = (sector - block_lba) as usize;
        let n = (SECTORS_PER_BLOCK - in_block).min(count - done);

        let copied = with_block(dev_id, block_lba, |e| {
            let from = in_block * SECTOR_SIZE;
            let to = from + n * SECTOR_SIZE;
            buf[done * SECTOR_SIZE..done * SECTOR_SIZE + (to - from)]
                .copy_from_slice(&e.data[from..to]);
        })?;

        if copied.is_none() {
            // Bypass: direto do dispositivo
            let dev = super::device(dev_id)?;
            dev.read_sectors(
                sector,
                n,
                &mut buf[done * SECTOR_SIZE..(done + n) * SECTOR_SIZE],
            )?;
        }
        done += n;
    }
    Ok(())
}

/// Escreve `count` setores a partir de `lba` via cache (write-back).
pub fn write(dev_id: usize, lba: u64, count: usize, buf: &[u8]) -> Result<(), BlkError> {
    if buf.len() < count * SECTOR_SIZE {
        return Err(BlkError::OutOfRange);
    }
    let mut done = 0usize;
    while done < count {
        let sector = lba + done as u64;
        let block_lba = sector & !(SECTORS_PER_BLOCK as u64 - 1);
        let in_block = (sector - block_lba) as usize;
        let n = (SECTORS_PER_BLOCK - in_block).min(count - done);

        let cached = with_block(dev_id, block_lba, |e| {
            let from = in_block * SECTOR_SIZE;
            e.data[from..from + n * SECTOR_SIZE]
                .copy_from_slice(&buf[done * SECTOR_SIZE..(done + n) * SECTOR_SIZE]);
            e.dirty = true;
        })?;

        if cached.is_none() {
            let dev = super::device(dev_id)?;
            dev.write_sectors(
                sector,
                n,
                &buf[done * SECTOR_SIZE..(done + n) * SECTOR_SIZE],
            )?;
        }
        done += n;
    }
    Ok(())
}

/// Escreve todas as entradas sujas do dispositivo e chama o flush dele.
pub fn flush_device(dev_id: usize) -> Result<(), BlkError> {
    let mut cache = CACHE.lock();
    for slot in cache.entries.iter_mut() {
        if let Some(e) = slot {
            if e.dev == dev_id {
                writeback(e)?;
            }
        }
    }
    drop(cache);
    super::device(dev_id)?.flush()
}

/// Flush de todos os dispositivos com entradas no cache.
pub fn sync_all() {
    let mut cache = CACHE.lock();
    for slot in cache.entries.iter_mut() {
        if let Some(e) = slot {
            let _ = writeback(e);
        }
    }
}

/// Reduz o cache a `n` slots (testes de eviction) descartando o resto.
#[cfg(test)]
fn test_shrink_to(n: usize) {
    let mut cache = CACHE.lock();
    for i in n..CACHE_ENTRIES {
        cache.entries[i] = Some(Entry {
            dev: usize::MAX,
            lba: u64::MAX,
            dirty: false,
            stamp: u64::MAX,
            data: Vec::new(),
        });
    }
}

#[cfg(test)]
pub(crate) fn test_reset() {
    let mut cache = CACHE.lock();
    for slot in cache.entries.iter_mut() {
        *slot = None;
    }
    cache.counter = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blk::{self, BlockOps};
    use alloc::sync::Arc;
    use alloc::vec;
    use alloc::vec::Vec;
    use crate::sync::Spinlock;

    struct MockInner {
        data: Vec<u8>,
        reads: Vec<(u64, usize)>,
        writes: Vec<(u64, usize, Vec<u8>)>,
        flushes: usize,
    }

    struct MockDev {
        inner: Spinlock<MockInner>,
    }

    impl MockDev {
        fn new(n_sectors: usize) -> Self {
            Self {
                inner: Spinlock::new(MockInner {
                    data: vec![0; n_sectors * SECTOR_SIZE],
                    reads: Vec::new(),
                    writes: Vec::new(),
                    flushes: 0,
                }),
            }
        }
    }

    impl BlockOps for MockDev {
        fn n_sectors(&self) -> u64 {
            (self.inner.lock().data.len() / SECTOR_SIZE) as u64
        }

        fn read_sectors(&self, lba: u64, count: usize, buf: &mut [u8]) -> Result<(), BlkError> {
            let mut inner = self.inner.lock();
            let start = lba as usize * SECTOR_SIZE;
            let end = start + count * SECTOR_SIZE;
            if end > inner.data.len() {
                return Err(BlkError::OutOfRange);
            }
            buf[..count * SECTOR_SIZE].copy_from_slice(&inner.data[start..end]);
            inner.reads.push((lba, count));
            Ok(())
        }

        fn write_sectors(&self, lba: u64, count: usize, buf: &[u8]) -> Result<(), BlkError> {
            let mut inner = self.inner.lock();
            let start = lba as usize * SECTOR_SIZE;
            let end = start + count * SECTOR_SIZE;
            if end > inner.data.len() {
                return Err(BlkError::OutOfRange);
            }
            let src = buf[..count * SECTOR_SIZE].to_vec();
            inner.data[start..end].copy_from_slice(&src);
            inner.writes.push((lba, count, src));
            Ok(())
        }

        fn flush(&self) -> Result<(), BlkError> {
            self.inner.lock().flushes += 1;
            Ok(())
        }
    }

    fn setup(n_sectors: usize) -> (usize, Arc<MockDev>) {
        blk::test_reset_devices();
        test_reset();
        let dev = Arc::new(MockDev::new(n_sectors));
        let id = blk::register(dev.clone());
        (id, dev)
    }

    #[test]
    fn test_read_hits_after_first_miss() {
        let _g = crate::sched::task::test_guard();
        let (id, dev) = setup(16);
        let mut buf = [0u8; SECTOR_SIZE];
        read(id, 0, 1, &mut buf).unwrap();
        read(id, 1, 1, &mut buf).unwrap();
        read(id, 7, 1, &mut buf).unwrap();
        // Um único read de dispositivo cobriu o bloco inteiro
        assert_eq!(dev.inner.lock().reads.len(), 1);
    }

    #[test]
    fn test_write_read_roundtrip_via_cache() {
        let _g = crate::sched::task::test_guard();
        let (id, dev) = setup(16);
        let payload = [0x5Au8; SECTOR_SIZE];
        write(id, 3, 1, &payload).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        read(id, 3, 1, &mut buf).unwrap();
        assert_eq!(buf, payload);
        // Write-back: nada foi ao dispositivo ainda
        assert_eq!(dev.inner.lock().writes.len(), 0);
        flush_device(id).unwrap();
        let inner = dev.inner.lock();
        assert_eq!(inner.writes.len(), 1);
        assert_eq!(inner.flushes, 1);
        // Dados corretos no backend
        assert_eq!(
            &inner.data[3 * SECTOR_SIZE..4 * SECTOR_SIZE],
            &payload[..]
        );
    }

    #[test]
    fn test_lru_eviction_writes_back_dirty_block() {
        let _g = crate::sched::task::test_guard();
        // Dispositivo de 32 setores = 4 blocos; cache de 2 slots
        let (id, dev) = setup(32);
        test_shrink_to(2);

        let mark = |v: u8| [v; SECTOR_SIZE];
        // Bloco 0 sujo
        write(id, 0, 1, &mark(0xAA)).unwrap();
        // Bloco 1 sujo
        write(id, 8, 1, &mark(0xBB)).unwrap();
        assert_eq!(dev.inner.lock().writes.len(), 0);

        // Bloco 2: despeja o LRU (bloco 0): write-back ANTES da leitura
        let mut buf = [0u8; SECTOR_SIZE];
        read(id, 16, 1, &mut buf).unwrap();

        let inner = dev.inner.lock();
        assert_eq!(inner.writes.len(), 1);
        let (lba, count, data) = &inner.writes[0];
        assert_eq!(*lba, 0);
        assert_eq!(*count, SECTORS_PER_BLOCK);
        assert_eq!(data[0], 0xAA);
        // O write-back aconteceu antes do read do bloco novo
        assert_eq!(*inner.reads.last().unwrap(), (16, SECTORS_PER_BLOCK));
    }

    #[test]
    fn test_partial_tail_block_device_smaller_than_block() {
        let _g = crate::sched::task::test_guard();
        // 4 setores: menor que um bloco de cache
        let (id, dev) = setup(4);
        let payload = [7u8; SECTOR_SIZE];
        write(id, 3, 1, &payload).unwrap();
        flush_device(id).unwrap();
        let inner = dev.inner.lock();
        // Write-back limitado ao span real do dispositivo
        assert_eq!(inner.writes.len(), 1);
        assert_eq!(inner.writes[0].0, 0);
        assert_eq!(inner.writes[0].1, 4);
        assert_eq!(&inner.data[3 * SECTOR_SIZE..4 * SECTOR_SIZE], &payload[..]);
    }

    #[test]
    fn test_multi_block_request_decomposition() {
        let _g = crate::sched::task::test_guard();
        let (id, dev) = setup(32);
        // 12 setores a partir do 4: blocos 0, 1 (e parte do 1)
        let payload = vec![9u8; 12 * SECTOR_SIZE];
        write(id, 4, 12, &payload).unwrap();
        let mut buf = vec![0u8; 12 * SECTOR_SIZE];
        read(id, 4, 12, &mut buf).unwrap();
        assert_eq!(buf, payload);
        // Dois blocos tocados = dois reads de materialização
        assert_eq!(dev.inner.lock().reads.len(), 2);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let _g = crate::sched::task::test_guard();
        let (id, _dev) = setup(8);
        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(read(id, 64, 1, &mut buf), Err(BlkError::OutOfRange));
    }
}
