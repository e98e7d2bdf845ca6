//! Virtual File System.
//!
//! Tabela de mounts com roteamento por prefixo mais longo: a parte do
//! caminho depois do ponto de montagem segue para o backend. Em cima disso
//! fica a camada de arquivos abertos (handle global → {mount, nó, flags,
//! offset}), que as tabelas de fd por processo referenciam.

pub mod ops;
pub mod path;

use crate::sync::Spinlock;
use crate::syscall::error::SysError;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
pub use ops::{DirEntry, FileType, FsError, FsOps, OpenFlags, Stat};

/// Um filesystem montado.
struct Mount {
    mount_point: String,
    ops: Box<dyn FsOps>,
}

static MOUNTS: Spinlock<Vec<Mount>> = Spinlock::new(Vec::new());

/// Arquivo aberto (compartilhável entre processos via fork/dup).
#[derive(Clone, Copy)]
struct OpenFile {
    mount: usize,
    node: usize,
    flags: OpenFlags,
    offset: u64,
    refs: usize,
}

pub const MAX_OPEN_FILES: usize = 128;

static OPEN_FILES: Spinlock<[Option<OpenFile>; MAX_OPEN_FILES]> =
    Spinlock::new([None; MAX_OPEN_FILES]);

/// Instala um backend em `mount_point`.
pub fn mount(mount_point: &str, ops: Box<dyn FsOps>) -> Result<(), SysError> {
    let normalized = path::normalize(mount_point);
    let mut mounts = MOUNTS.lock();
    if mounts.iter().any(|m| m.mount_point == normalized) {
        return Err(SysError::AlreadyExists);
    }
    crate::kinfo!("(VFS) Mount em preparo");
    mounts.push(Mount {
        mount_point: normalized,
        ops,
    });
    Ok(())
}

/// Resolve o mount de `abs_path` (prefixo mais longo) e executa `f` com o
/// backend e o caminho relativo.
fn with_backend<R>(
    abs_path: &str,
    f: impl FnOnce(&dyn FsOps, &str) -> Result<R, FsError>,
) -> Result<R, SysError> {
    let mounts = MOUNTS.lock();
    let mut best: Option<(usize, usize)> = None; // (idx, prefix_len)
    for (i, m) in mounts.iter().enumerate() {
        let mp = m.mount_point.as_str();
        let matches = if mp == "/" {
            true
        } else {
            abs_path == mp || abs_path.starts_with(mp) && abs_path.as_bytes()[mp.len()] == b'/'
        };
        if matches {
            let plen = if mp == "/" { 0 } else { mp.len() };
            if best.map_or(true, |(_, blen)| plen > blen) {
                best = Some((i, plen));
            }
        }
    }
    let (idx, plen) = best.ok_or(SysError::NotFound)?;
    let rel = &abs_path[plen..];
    let rel = if rel.is_empty() { "/" } else { rel };
    f(mounts[idx].ops.as_ref(), rel).map_err(SysError::from)
}

/// Índice do mount de um caminho (para associar handles abertos).
fn mount_index(abs_path: &str) -> Result<(usize, String), SysError> {
    let mounts = MOUNTS.lock();
    let mut best: Option<(usize, usize)> = None;
    for (i, m) in mounts.iter().enumerate() {
        let mp = m.mount_point.as_str();
        let matches = if mp == "/" {
            true
        } else {
            abs_path == mp || abs_path.starts_with(mp) && abs_path.as_bytes()[mp.len()] == b'/'
        };
        if matches {
            let plen = if mp == "/" { 0 } else { mp.len() };
            if best.map_or(true, |(_, blen)| plen > blen) {
                best = Some((i, plen));
            }
        }
    }
    let (idx, plen) = best.ok_or(SysError::NotFound)?;
    let rel = &abs_path[plen..];
    Ok((idx, String::from(if rel.is_empty() { "/" } else { rel })))
}

/// Abre um arquivo; devolve o handle global.
pub fn open(cwd: &str, raw_path: &str, flags: OpenFlags) -> Result<usize, SysError> {
    let abs = path::absolutize(cwd, raw_path);
    let (mount_idx, rel) = mount_index(&abs)?;

    let node = {
        let mounts = MOUNTS.lock();
        mounts[mount_idx]
            .ops
            .open(&rel, flags)
            .map_err(SysError::from)?
    };

    let mut offset = 0u64;
    if flags.contains(OpenFlags::APPEND) {
        let mounts = MOUNTS.lock();
        let st = mounts[mount_idx].ops.fstat(node).map_err(SysError::from)?;
        offset = st.size;
    }

    let mut files = OPEN_FILES.lock();
    let slot = files
        .iter()
        .position(|f| f.is_none())
        .ok_or(SysError::TooManyFiles)?;
    files[slot] = Some(OpenFile {
        mount: mount_idx,
        node,
        flags,
        offset,
        refs: 1,
    });
    Ok(slot)
}

fn get_file(handle: usize) -> Result<OpenFile, SysError> {
    OPEN_FILES
        .lock()
        .get(handle)
        .and_then(|f| *f)
        .ok_or(SysError::BadDescriptor)
}

/// Incrementa a contagem de referências (dup/fork).
pub fn dup_handle(handle: usize) {
    let mut files = OPEN_FILES.lock();
    if let Some(Some(f)) = files.get_mut(handle) {
        f.refs += 1;
    }
}

/// Fecha uma referência; o backend só é avisado na última.
pub fn close(handle: usize) -> Result<(), SysError> {
    let mut files = OPEN_FILES.lock();
    let f = files
        .get_mut(handle)
        .and_then(|f| f.as_mut())
        .ok_or(SysError::BadDescriptor)?;
    f.refs -= 1;
    if f.refs == 0 {
        let (mount, node) = (f.mount, f.node);
        files[handle] = None;
        drop(files);
        let mounts = MOUNTS.lock();
        let _ = mounts[mount].ops.close(node);
    }
    Ok(())
}

/// Lê a partir do offset corrente, avançando-o.
pub fn read(handle: usize, buf: &mut [u8]) -> Result<usize, SysError> {
    let f = get_file(handle)?;
    if !f.flags.readable() {
        return Err(SysError::BadDescriptor);
    }
    let n = {
        let mounts = MOUNTS.lock();
        mounts[f.mount]
            .ops
            .read(f.node, f.offset, buf)
            .map_err(SysError::from)?
    };
    let mut files = OPEN_FILES.lock();
    if let Some(Some(of)) = files.get_mut(handle) {
        of.offset += n as u64;
    }
    Ok(n)
}

/// Escreve a partir do offset corrente (fim do arquivo com O_APPEND).
pub fn write(handle: usize, buf: &[u8]) -> Result<usize, SysError> {
    let f = get_file(handle)?;
    if !f.flags.writable() {
        return Err(SysError::BadDescriptor);
    }

    let mut offset = f.offset;
    if f.flags.contains(OpenFlags::APPEND) {
        let mounts = MOUNTS.lock();
        offset = mounts[f.mount]
            .ops
            .fstat(f.node)
            .map_err(SysError::from)?
            .size;
    }

    let n = {
        let mounts = MOUNTS.lock();
        mounts[f.mount]
            .ops
            .write(f.node, offset, buf)
            .map_err(SysError::from)?
    };
    let mut files = OPEN_FILES.lock();
    if let Some(Some(of)) = files.get_mut(handle) {
        of.offset = offset + n as u64;
    }
    Ok(n)
}

/// Whence do lseek.
pub const SEEK_SET: usize = 0;
pub const SEEK_CUR: usize = 1;
pub const SEEK_END: usize = 2;

/// Reposiciona o offset, preso ao intervalo `[0, size]`.
pub fn lseek(handle: usize, offset: i64, whence: usize) -> Result<u64, SysError> {
    let f = get_file(handle)?;
    let size = {
        let mounts = MOUNTS.lock();
        mounts[f.mount]
            .ops
            .fstat(f.node)
            .map_err(SysError::from)?
            .size
    };
    let base = match whence {
        SEEK_SET => 0i64,
        SEEK_CUR => f.offset as i64,
        SEEK_END => size as i64,
        _ => return Err(SysError::InvalidArgument),
    };
    let target = base.checked_add(offset).ok_or(SysError::InvalidArgument)?;
    if target < 0 {
        return Err(SysError::InvalidArgument);
    }
    let clamped = (target as u64).min(size);
    let mut files = OPEN_FILES.lock();
    if let Some(Some(of)) = files.get_mut(handle) {
        of.offset = clamped;
    }
    Ok(clamped)
}

/// Flags de abertura de um handle (fcntl F_GETFL).
pub fn flags_of(handle: usize) -> Result<u32, SysError> {
    get_file(handle).map(|f| f.flags.bits())
}

pub fn fstat(handle: usize) -> Result<Stat, SysError> {
    let f = get_file(handle)?;
    let mounts = MOUNTS.lock();
    mounts[f.mount].ops.fstat(f.node).map_err(SysError::from)
}

pub fn stat(cwd: &str, raw_path: &str) -> Result<Stat, SysError> {
    let abs = path::absolutize(cwd, raw_path);
    with_backend(&abs, |ops, rel| ops.stat(rel))
}

pub fn mkdir(cwd: &str, raw_path: &str) -> Result<(), SysError> {
    let abs = path::absolutize(cwd, raw_path);
    with_backend(&abs, |ops, rel| ops.mkdir(rel))
}

/// Remove um diretório (apenas vazio).
pub fn rmdir(cwd: &str, raw_path: &str) -> Result<(), SysError> {
    let abs = path::absolutize(cwd, raw_path);
    with_backend(&abs, |ops, rel| {
        let st = ops.stat(rel)?;
        if st.mode & 0o170000 != FileType::Directory.mode_bits() {
            return Err(FsError::NotDirectory);
        }
        ops.delete(rel)
    })
}

/// Remove um não-diretório.
pub fn unlink(cwd: &str, raw_path: &str) -> Result<(), SysError> {
    let abs = path::absolutize(cwd, raw_path);
    with_backend(&abs, |ops, rel| {
        let st = ops.stat(rel)?;
        if st.mode & 0o170000 == FileType::Directory.mode_bits() {
            return Err(FsError::IsDirectory);
        }
        ops.delete(rel)
    })
}

/// Renomeia dentro do mesmo mount.
pub fn rename(cwd: &str, from: &str, to: &str) -> Result<(), SysError> {
    let abs_from = path::absolutize(cwd, from);
    let abs_to = path::absolutize(cwd, to);
    let (m_from, rel_from) = mount_index(&abs_from)?;
    let (m_to, rel_to) = mount_index(&abs_to)?;
    if m_from != m_to {
        return Err(SysError::InvalidArgument);
    }
    let mounts = MOUNTS.lock();
    mounts[m_from]
        .ops
        .rename(&rel_from, &rel_to)
        .map_err(SysError::from)
}

/// Lista um diretório em `out`; devolve o total copiado.
pub fn readdir(cwd: &str, raw_path: &str, out: &mut [DirEntry]) -> Result<usize, SysError> {
    let abs = path::absolutize(cwd, raw_path);
    with_backend(&abs, |ops, rel| ops.readdir(rel, out))
}

/// Valida um diretório para chdir; devolve o caminho absoluto.
pub fn resolve_dir(cwd: &str, raw_path: &str) -> Result<String, SysError> {
    let abs = path::absolutize(cwd, raw_path);
    let st = stat("/", &abs)?;
    if st.mode & 0o170000 != FileType::Directory.mode_bits() {
        return Err(SysError::NotDirectory);
    }
    Ok(abs)
}

#[cfg(test)]
pub(crate) fn test_reset() {
    MOUNTS.lock().clear();
    let mut files = OPEN_FILES.lock();
    for f in files.iter_mut() {
        *f = None;
    }
}
