//! Pseudo-fs de dispositivos (`/dev`).
//!
//! Dispositivos de caractere fixos:
//! - `null`: read devolve 0 (EOF); write aceita tudo.
//! - `zero`: read preenche com zeros; write aceita tudo.
//! - `random`/`urandom`: read tira do PRNG; write mistura no estado.
//! - `console`/`tty`: write vai para o log/serial; read devolve 0.

use super::vfs::ops::{DirEntry, FileType, FsError, FsOps, NodeHandle, OpenFlags, Stat};
use crate::klib::rand;

const DEV_ROOT: usize = 0;
const DEV_NULL: usize = 1;
const DEV_ZERO: usize = 2;
const DEV_RANDOM: usize = 3;
const DEV_URANDOM: usize = 4;
const DEV_CONSOLE: usize = 5;
const DEV_TTY: usize = 6;

const NAMES: [(&str, usize); 6] = [
    ("null", DEV_NULL),
    ("zero", DEV_ZERO),
    ("random", DEV_RANDOM),
    ("urandom", DEV_URANDOM),
    ("console", DEV_CONSOLE),
    ("tty", DEV_TTY),
];

/// O pseudo-fs de dispositivos. Sem estado próprio.
pub struct DevFs;

impl DevFs {
    pub fn new() -> Self {
        DevFs
    }

    fn lookup(path: &str) -> Result<usize, FsError> {
        let name = path.trim_matches('/');
        if name.is_empty() {
            return Ok(DEV_ROOT);
        }
        NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, id)| *id)
            .ok_or(FsError::NotFound)
    }

    fn stat_of(id: usize) -> Stat {
        let ftype = if id == DEV_ROOT {
            FileType::Directory
        } else {
            FileType::CharDevice
        };
        Stat {
            mode: ftype.mode_bits() | 0o666,
            nlink: 1,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            dev: 1,
            inode: id as u64,
            blksize: 0,
            blocks: 0,
        }
        .finish()
    }
}

impl Default for DevFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FsOps for DevFs {
    fn open(&self, path: &str, _flags: OpenFlags) -> Result<NodeHandle, FsError> {
        Self::lookup(path)
    }

    fn read(&self, handle: NodeHandle, _offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
        match handle {
            DEV_NULL => Ok(0),
            DEV_ZERO => {
                buf.fill(0);
                Ok(buf.len())
            }
            DEV_RANDOM | DEV_URANDOM => {
                rand::fill(buf);
                Ok(buf.len())
            }
            DEV_CONSOLE | DEV_TTY => Ok(0),
            DEV_ROOT => Err(FsError::IsDirectory),
            _ => Err(FsError::BadHandle),
        }
    }

    fn write(&self, handle: NodeHandle, _offset: u64, buf: &[u8]) -> Result<usize, FsError> {
        match handle {
            DEV_NULL | DEV_ZERO => Ok(buf.len()),
            DEV_RANDOM | DEV_URANDOM => {
                rand::mix(buf);
                Ok(buf.len())
            }
            DEV_CONSOLE | DEV_TTY => {
                if let Ok(s) = core::str::from_utf8(buf) {
                    crate::drivers::serial::emit_str(s);
                } else {
                    for &b in buf {
                        crate::drivers::serial::emit_hex(b as u64);
                    }
                }
                Ok(buf.len())
            }
            DEV_ROOT => Err(FsError::IsDirectory),
            _ => Err(FsError::BadHandle),
        }
    }

    fn fstat(&self, handle: NodeHandle) -> Result<Stat, FsError> {
        if handle > DEV_TTY {
            return Err(FsError::BadHandle);
        }
        Ok(Self::stat_of(handle))
    }

    fn readdir(&self, path: &str, out: &mut [DirEntry]) -> Result<usize, FsError> {
        if Self::lookup(path)? != DEV_ROOT {
            return Err(FsError::NotDirectory);
        }
        let mut count = 0;
        for (name, id) in NAMES.iter() {
            if count >= out.len() {
                break;
            }
            out[count] = DirEntry::new(*id as u64, FileType::CharDevice, name);
            count += 1;
        }
        Ok(count)
    }

    fn mkdir(&self, _path: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn stat(&self, path: &str) -> Result<Stat, FsError> {
        Ok(Self::stat_of(Self::lookup(path)?))
    }

    fn create(&self, _path: &str, _ftype: FileType, _perms: u16) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn delete(&self, _path: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }
}
