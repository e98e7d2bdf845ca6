//! Pipes unidirecionais.
//!
//! Buffer circular fixo de 4 KiB com contagens separadas de leitores e
//! escritores. Leitura e escrita NÃO bloqueiam: devolvem o que couber (ou
//! 0); quem quiser semântica bloqueante monta em cima com `poll` na libc.
//!
//! Invariantes: `head = (tail + count) % tamanho`, `count ≤ tamanho`;
//! quando as duas contagens zeram o pipe é liberado antes da próxima
//! alocação.

use crate::sync::Spinlock;
use crate::syscall::error::SysError;
use alloc::boxed::Box;

pub const PIPE_BUF_SIZE: usize = 4096;
pub const MAX_PIPES: usize = 32;

struct Pipe {
    data: [u8; PIPE_BUF_SIZE],
    /// Posição de escrita.
    head: usize,
    /// Posição de leitura.
    tail: usize,
    count: usize,
    readers: usize,
    writers: usize,
}

impl Pipe {
    fn new() -> Self {
        Self {
            data: [0; PIPE_BUF_SIZE],
            head: 0,
            tail: 0,
            count: 0,
            readers: 1,
            writers: 1,
        }
    }
}

static PIPES: Spinlock<[Option<Box<Pipe>>; MAX_PIPES]> =
    Spinlock::new([const { None }; MAX_PIPES]);

/// Aloca um pipe com uma ponta de cada lado. Retorna o índice.
pub fn create() -> Result<usize, SysError> {
    let mut pipes = PIPES.lock();
    for (i, slot) in pipes.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(Box::new(Pipe::new()));
            return Ok(i);
        }
    }
    Err(SysError::TooManyFiles)
}

/// Incrementa a contagem de uma ponta (dup/fork).
pub fn ref_end(idx: usize, write_end: bool) {
    let mut pipes = PIPES.lock();
    if let Some(Some(p)) = pipes.get_mut(idx) {
        if write_end {
            p.writers += 1;
        } else {
            p.readers += 1;
        }
    }
}

/// Fecha uma ponta; libera o pipe quando as duas contagens zeram.
pub fn close(idx: usize, write_end: bool) -> Result<(), SysError> {
    let mut pipes = PIPES.lock();
    let p = pipes
        .get_mut(idx)
        .and_then(|s| s.as_mut())
        .ok_or(SysError::BadDescriptor)?;
    if write_end {
        p.writers = p.writers.saturating_sub(1);
    } else {
        p.readers = p.readers.saturating_sub(1);
    }
    if p.readers == 0 && p.writers == 0 {
        pipes[idx] = None;
    }
    Ok(())
}

/// Lê até `buf.len()` bytes.
///
/// Vazio com escritores vivos → 0 (non-blocking); vazio sem escritores →
/// 0 (EOF). A distinção fica com o chamador via `poll`.
pub fn read(idx: usize, buf: &mut [u8]) -> Result<usize, SysError> {
    let mut pipes = PIPES.lock();
    let p = pipes
        .get_mut(idx)
        .and_then(|s| s.as_mut())
        .ok_or(SysError::BadDescriptor)?;

    let n = buf.len().min(p.count);
    for byte in buf.iter_mut().take(n) {
        *byte = p.data[p.tail];
        p.tail = (p.tail + 1) % PIPE_BUF_SIZE;
    }
    p.count -= n;
    Ok(n)
}

/// Escreve até `buf.len()` bytes; erro de pipe quebrado sem leitores.
pub fn write(idx: usize, buf: &[u8]) -> Result<usize, SysError> {
    let mut pipes = PIPES.lock();
    let p = pipes
        .get_mut(idx)
        .and_then(|s| s.as_mut())
        .ok_or(SysError::BadDescriptor)?;

    if p.readers == 0 {
        return Err(SysError::BrokenPipe);
    }

    let space = PIPE_BUF_SIZE - p.count;
    let n = buf.len().min(space);
    for &byte in buf.iter().take(n) {
        p.data[p.head] = byte;
        p.head = (p.head + 1) % PIPE_BUF_SIZE;
    }
    p.count += n;
    Ok(n)
}

/// Bytes prontos para leitura (para `poll`).
pub fn available(idx: usize) -> Result<usize, SysError> {
    let pipes = PIPES.lock();
    pipes
        .get(idx)
        .and_then(|s| s.as_ref())
        .map(|p| p.count)
        .ok_or(SysError::BadDescriptor)
}

/// Há escritores vivos? (EOF detection para `poll`/read)
pub fn has_writers(idx: usize) -> Result<bool, SysError> {
    let pipes = PIPES.lock();
    pipes
        .get(idx)
        .and_then(|s| s.as_ref())
        .map(|p| p.writers > 0)
        .ok_or(SysError::BadDescriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset() {
        let mut pipes = PIPES.lock();
        for s in pipes.iter_mut() {
            *s = None;
        }
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let _g = crate::sched::task::test_guard();
        reset();
        let p = create().unwrap();
        assert_eq!(write(p, b"hello").unwrap(), 5);
        let mut buf = [0u8; 16];
        assert_eq!(read(p, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        // Buffer drenado
        assert_eq!(read(p, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_eof_after_writer_close() {
        let _g = crate::sched::task::test_guard();
        reset();
        let p = create().unwrap();
        assert_eq!(write(p, b"abc").unwrap(), 3);
        close(p, true).unwrap();
        let mut buf = [0u8; 10];
        // Primeiro read entrega o que sobrou; segundo devolve 0 (EOF)
        assert_eq!(read(p, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(read(p, &mut buf).unwrap(), 0);
        assert!(!has_writers(p).unwrap());
    }

    #[test]
    fn test_broken_pipe_without_readers() {
        let _g = crate::sched::task::test_guard();
        reset();
        let p = create().unwrap();
        close(p, false).unwrap();
        assert_eq!(write(p, b"x"), Err(SysError::BrokenPipe));
    }

    #[test]
    fn test_short_write_when_full() {
        let _g = crate::sched::task::test_guard();
        reset();
        let p = create().unwrap();
        let big = [7u8; PIPE_BUF_SIZE + 100];
        assert_eq!(write(p, &big).unwrap(), PIPE_BUF_SIZE);
        // Cheio: próxima escrita devolve 0
        assert_eq!(write(p, b"zz").unwrap(), 0);
        let mut buf = [0u8; 100];
        assert_eq!(read(p, &mut buf).unwrap(), 100);
        // Espaço reciclado no buffer circular
        assert_eq!(write(p, b"zz").unwrap(), 2);
    }

    #[test]
    fn test_freed_when_both_ends_close() {
        let _g = crate::sched::task::test_guard();
        reset();
        let p = create().unwrap();
        ref_end(p, false); // fork duplicou o leitor
        close(p, false).unwrap();
        close(p, true).unwrap();
        // Ainda vivo: resta um leitor
        assert!(available(p).is_ok());
        close(p, false).unwrap();
        assert_eq!(available(p), Err(SysError::BadDescriptor));
        // Slot reciclado pela próxima alocação
        assert_eq!(create().unwrap(), p);
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let _g = crate::sched::task::test_guard();
        reset();
        let p = create().unwrap();
        // Avança head/tail até perto do fim
        let chunk = [1u8; PIPE_BUF_SIZE - 3];
        assert_eq!(write(p, &chunk).unwrap(), chunk.len());
        let mut sink = [0u8; PIPE_BUF_SIZE - 3];
        assert_eq!(read(p, &mut sink).unwrap(), chunk.len());
        // Escrita que cruza a borda
        assert_eq!(write(p, b"abcdef").unwrap(), 6);
        let mut buf = [0u8; 6];
        assert_eq!(read(p, &mut buf).unwrap(), 6);
        assert_eq!(&buf, b"abcdef");
    }
}
