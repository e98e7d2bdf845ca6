//! Contratos entre o VFS e os backends de filesystem.

use bitflags::bitflags;

/// Erros internos dos backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    NotDirectory,
    IsDirectory,
    AlreadyExists,
    NotEmpty,
    /// Estourou a capacidade do backend (nó, filho ou dados).
    NoSpace,
    /// Operação sem suporte no backend (ex: escrever no procfs).
    NotSupported,
    InvalidPath,
    BadHandle,
}

impl From<FsError> for crate::syscall::error::SysError {
    fn from(e: FsError) -> Self {
        use crate::syscall::error::SysError;
        match e {
            FsError::NotFound => SysError::NotFound,
            FsError::NotDirectory => SysError::NotDirectory,
            FsError::IsDirectory => SysError::IsDirectory,
            FsError::AlreadyExists => SysError::AlreadyExists,
            FsError::NotEmpty => SysError::InvalidArgument,
            FsError::NoSpace => SysError::NoSpace,
            FsError::NotSupported => SysError::PermissionDenied,
            FsError::InvalidPath => SysError::InvalidArgument,
            FsError::BadHandle => SysError::BadDescriptor,
        }
    }
}

bitflags! {
    /// Flags de open (modo de acesso nos 2 bits baixos).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const WRITE_ONLY = 0x1;
        const RDWR = 0x2;
        const CREAT = 0x40;
        const EXCL = 0x80;
        const TRUNC = 0x200;
        const APPEND = 0x400;
    }
}

impl OpenFlags {
    pub fn readable(self) -> bool {
        !self.contains(OpenFlags::WRITE_ONLY) || self.contains(OpenFlags::RDWR)
    }

    pub fn writable(self) -> bool {
        self.intersects(OpenFlags::WRITE_ONLY | OpenFlags::RDWR)
    }
}

/// Tipos de nó.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
}

impl FileType {
    /// Bits de tipo do campo `mode` do stat.
    pub const fn mode_bits(self) -> u32 {
        match self {
            FileType::Regular => 0o100000,
            FileType::Directory => 0o040000,
            FileType::Symlink => 0o120000,
            FileType::CharDevice => 0o020000,
            FileType::BlockDevice => 0o060000,
            FileType::Fifo => 0o010000,
        }
    }
}

/// Resultado de stat/fstat (layout ABI).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Stat {
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub dev: u32,
    pub inode: u64,
    pub blksize: u32,
    pub blocks: u64,
}

impl Stat {
    /// Preenche blksize/blocks derivados do tamanho.
    pub fn finish(mut self) -> Self {
        self.blksize = 4096;
        self.blocks = self.size.div_ceil(512);
        self
    }
}

/// Entrada de readdir (nome inline de tamanho fixo).
#[derive(Debug, Clone, Copy)]
pub struct DirEntry {
    pub inode: u64,
    pub ftype: FileType,
    pub name: [u8; 32],
    pub name_len: u8,
}

impl DirEntry {
    pub const EMPTY: DirEntry = DirEntry {
        inode: 0,
        ftype: FileType::Regular,
        name: [0; 32],
        name_len: 0,
    };

    pub fn new(inode: u64, ftype: FileType, name: &str) -> Self {
        let mut e = DirEntry {
            inode,
            ftype,
            name: [0; 32],
            name_len: 0,
        };
        let n = name.len().min(32);
        e.name[..n].copy_from_slice(&name.as_bytes()[..n]);
        e.name_len = n as u8;
        e
    }

    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("?")
    }
}

/// Handle opaco de nó dentro de um backend.
pub type NodeHandle = usize;

/// Tabela de operações que todo backend implementa.
///
/// Os caminhos chegam já relativos ao ponto de montagem, começando em `/`.
pub trait FsOps: Send + Sync {
    /// Resolve (e opcionalmente cria/trunca) um nó; devolve o handle.
    fn open(&self, path: &str, flags: OpenFlags) -> Result<NodeHandle, FsError>;

    /// Libera recursos associados ao handle.
    fn close(&self, _handle: NodeHandle) -> Result<(), FsError> {
        Ok(())
    }

    fn read(&self, handle: NodeHandle, offset: u64, buf: &mut [u8]) -> Result<usize, FsError>;

    fn write(&self, handle: NodeHandle, offset: u64, buf: &[u8]) -> Result<usize, FsError>;

    /// Stat de um handle aberto (tamanho corrente para offset/EOF).
    fn fstat(&self, handle: NodeHandle) -> Result<Stat, FsError>;

    /// Preenche `out` com as entradas do diretório; devolve quantas.
    fn readdir(&self, path: &str, out: &mut [DirEntry]) -> Result<usize, FsError>;

    fn mkdir(&self, path: &str) -> Result<(), FsError>;

    fn stat(&self, path: &str) -> Result<Stat, FsError>;

    fn create(&self, path: &str, ftype: FileType, perms: u16) -> Result<(), FsError>;

    /// Remove um nó (arquivo, ou diretório vazio).
    fn delete(&self, path: &str) -> Result<(), FsError>;

    fn rename(&self, _from: &str, _to: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags_access_modes() {
        let ro = OpenFlags::empty();
        assert!(ro.readable() && !ro.writable());
        let wo = OpenFlags::WRITE_ONLY;
        assert!(!wo.readable() && wo.writable());
        let rw = OpenFlags::RDWR;
        assert!(rw.readable() && rw.writable());
    }

    #[test]
    fn test_stat_block_accounting() {
        let s = Stat {
            size: 1025,
            ..Default::default()
        }
        .finish();
        assert_eq!(s.blksize, 4096);
        assert_eq!(s.blocks, 3);
    }

    #[test]
    fn test_mode_bits() {
        assert_eq!(FileType::Regular.mode_bits(), 0o100000);
        assert_eq!(FileType::Directory.mode_bits(), 0o040000);
        assert_eq!(FileType::CharDevice.mode_bits(), 0o020000);
    }
}
