//! Backend primário: grafo de nós em memória.
//!
//! Tabela fixa de nós; diretórios guardam a lista ordenada de filhos;
//! arquivos regulares têm os dados inline (limitados por
//! `MAX_FILE_SIZE`). Escritas além da capacidade são truncadas no limite;
//! uma escrita inteiramente além dele devolve `NoSpace`.

use super::vfs::ops::{DirEntry, FileType, FsError, FsOps, NodeHandle, OpenFlags, Stat};
use crate::core::time;
use crate::sync::Spinlock;
use alloc::string::String;
use alloc::vec::Vec;

pub const MAX_NODES: usize = 256;
pub const MAX_CHILDREN: usize = 64;
pub const MAX_FILE_SIZE: usize = 16 * 1024;
pub const MAX_NAME: usize = 32;

struct Node {
    name: String,
    ftype: FileType,
    perms: u16,
    parent: usize,
    children: Vec<usize>,
    data: Vec<u8>,
    atime: u64,
    mtime: u64,
    ctime: u64,
}

impl Node {
    fn new(name: &str, ftype: FileType, perms: u16, parent: usize) -> Self {
        let now = time::uptime_ms() / 1000;
        Self {
            name: String::from(name),
            ftype,
            perms,
            parent,
            children: Vec::new(),
            data: Vec::new(),
            atime: now,
            mtime: now,
            ctime: now,
        }
    }
}

struct Inner {
    nodes: Vec<Option<Node>>,
}

/// O filesystem em memória.
pub struct RamFs {
    inner: Spinlock<Inner>,
}

impl RamFs {
    pub fn new() -> Self {
        let mut nodes = Vec::with_capacity(MAX_NODES);
        nodes.push(Some(Node::new("/", FileType::Directory, 0o755, 0)));
        for _ in 1..MAX_NODES {
            nodes.push(None);
        }
        Self {
            inner: Spinlock::new(Inner { nodes }),
        }
    }
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Caminha o caminho componente a componente a partir da raiz (id 0).
    /// Falha com `NotFound` no primeiro componente ausente.
    fn resolve(&self, path: &str) -> Result<usize, FsError> {
        let mut cur = 0usize;
        for comp in path.split('/').filter(|c| !c.is_empty()) {
            let node = self.nodes[cur].as_ref().ok_or(FsError::NotFound)?;
            if node.ftype != FileType::Directory {
                return Err(FsError::NotDirectory);
            }
            cur = *node
                .children
                .iter()
                .find(|&&c| {
                    self.nodes[c]
                        .as_ref()
                        .map(|n| n.name == comp)
                        .unwrap_or(false)
                })
                .ok_or(FsError::NotFound)?;
        }
        Ok(cur)
    }

    /// Separa `path` em (diretório pai resolvido, último componente).
    fn resolve_parent<'a>(&self, path: &'a str) -> Result<(usize, &'a str), FsError> {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(FsError::InvalidPath);
        }
        let (dir, name) = match trimmed.rfind('/') {
            Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
            None => ("", trimmed),
        };
        if name.is_empty() || name.len() > MAX_NAME {
            return Err(FsError::InvalidPath);
        }
        let parent = self.resolve(dir)?;
        Ok((parent, name))
    }

    fn alloc_node(&mut self) -> Result<usize, FsError> {
        self.nodes
            .iter()
            .position(|n| n.is_none())
            .ok_or(FsError::NoSpace)
    }

    fn insert(&mut self, path: &str, ftype: FileType, perms: u16) -> Result<usize, FsError> {
        let (parent, name) = self.resolve_parent(path)?;
        {
            let pnode = self.nodes[parent].as_ref().ok_or(FsError::NotFound)?;
            if pnode.ftype != FileType::Directory {
                return Err(FsError::NotDirectory);
            }
            if pnode.children.len() >= MAX_CHILDREN {
                return Err(FsError::NoSpace);
            }
            let exists = pnode.children.iter().any(|&c| {
                self.nodes[c]
                    .as_ref()
                    .map(|n| n.name == name)
                    .unwrap_or(false)
            });
            if exists {
                return Err(FsError::AlreadyExists);
            }
        }
        let id = self.alloc_node()?;
        self.nodes[id] = Some(Node::new(name, ftype, perms, parent));
        self.nodes[parent].as_mut().unwrap().children.push(id);
        Ok(id)
    }

    fn stat_of(&self, id: usize) -> Result<Stat, FsError> {
        let node = self.nodes[id].as_ref().ok_or(FsError::BadHandle)?;
        Ok(Stat {
            mode: node.ftype.mode_bits() | node.perms as u32,
            nlink: if node.ftype == FileType::Directory { 2 } else { 1 },
            uid: 0,
            gid: 0,
            size: node.data.len() as u64,
            atime: node.atime,
            mtime: node.mtime,
            ctime: node.ctime,
            dev: 0,
            inode: id as u64,
            blksize: 0,
            blocks: 0,
        }
        .finish())
    }
}

impl FsOps for RamFs {
    fn open(&self, path: &str, flags: OpenFlags) -> Result<NodeHandle, FsError> {
        let mut inner = self.inner.lock();
        let id = match inner.resolve(path) {
            Ok(id) => {
                if flags.contains(OpenFlags::CREAT) && flags.contains(OpenFlags::EXCL) {
                    return Err(FsError::AlreadyExists);
                }
                id
            }
            Err(FsError::NotFound) if flags.contains(OpenFlags::CREAT) => {
                inner.insert(path, FileType::Regular, 0o644)?
            }
            Err(e) => return Err(e),
        };

        let node = inner.nodes[id].as_mut().ok_or(FsError::NotFound)?;
        if node.ftype == FileType::Directory && flags.writable() {
            return Err(FsError::IsDirectory);
        }
        if flags.contains(OpenFlags::TRUNC) && node.ftype == FileType::Regular {
            node.data.clear();
            node.mtime = time::uptime_ms() / 1000;
        }
        Ok(id)
    }

    fn read(&self, handle: NodeHandle, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut inner = self.inner.lock();
        let node = inner.nodes[handle].as_mut().ok_or(FsError::BadHandle)?;
        if node.ftype == FileType::Directory {
            return Err(FsError::IsDirectory);
        }
        let off = offset as usize;
        if off >= node.data.len() {
            return Ok(0); // EOF exato em offset == size
        }
        let n = buf.len().min(node.data.len() - off);
        buf[..n].copy_from_slice(&node.data[off..off + n]);
        node.atime = time::uptime_ms() / 1000;
        Ok(n)
    }

    fn write(&self, handle: NodeHandle, offset: u64, buf: &[u8]) -> Result<usize, FsError> {
        let mut inner = self.inner.lock();
        let node = inner.nodes[handle].as_mut().ok_or(FsError::BadHandle)?;
        if node.ftype == FileType::Directory {
            return Err(FsError::IsDirectory);
        }
        let off = offset as usize;
        if off >= MAX_FILE_SIZE {
            return Err(FsError::NoSpace);
        }
        // Trunca no teto de capacidade do backend
        let n = buf.len().min(MAX_FILE_SIZE - off);
        if node.data.len() < off + n {
            node.data.resize(off + n, 0);
        }
        node.data[off..off + n].copy_from_slice(&buf[..n]);
        node.mtime = time::uptime_ms() / 1000;
        Ok(n)
    }

    fn fstat(&self, handle: NodeHandle) -> Result<Stat, FsError> {
        self.inner.lock().stat_of(handle)
    }

    fn readdir(&self, path: &str, out: &mut [DirEntry]) -> Result<usize, FsError> {
        let inner = self.inner.lock();
        let id = inner.resolve(path)?;
        let node = inner.nodes[id].as_ref().ok_or(FsError::NotFound)?;
        if node.ftype != FileType::Directory {
            return Err(FsError::NotDirectory);
        }
        let mut count = 0;
        for &child in node.children.iter() {
            if count >= out.len() {
                break;
            }
            if let Some(c) = inner.nodes[child].as_ref() {
                out[count] = DirEntry::new(child as u64, c.ftype, &c.name);
                count += 1;
            }
        }
        Ok(count)
    }

    fn mkdir(&self, path: &str) -> Result<(), FsError> {
        self.inner
            .lock()
            .insert(path, FileType::Directory, 0o755)
            .map(|_| ())
    }

    fn stat(&self, path: &str) -> Result<Stat, FsError> {
        let inner = self.inner.lock();
        let id = inner.resolve(path)?;
        inner.stat_of(id)
    }

    fn create(&self, path: &str, ftype: FileType, perms: u16) -> Result<(), FsError> {
        self.inner.lock().insert(path, ftype, perms).map(|_| ())
    }

    fn delete(&self, path: &str) -> Result<(), FsError> {
        let mut inner = self.inner.lock();
        let id = inner.resolve(path)?;
        if id == 0 {
            return Err(FsError::InvalidPath);
        }
        let (parent, is_dir, n_children) = {
            let node = inner.nodes[id].as_ref().ok_or(FsError::NotFound)?;
            (
                node.parent,
                node.ftype == FileType::Directory,
                node.children.len(),
            )
        };
        if is_dir && n_children > 0 {
            return Err(FsError::NotEmpty);
        }
        if let Some(p) = inner.nodes[parent].as_mut() {
            p.children.retain(|&c| c != id);
        }
        inner.nodes[id] = None;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let mut inner = self.inner.lock();
        let id = inner.resolve(from)?;
        if id == 0 {
            return Err(FsError::InvalidPath);
        }
        if inner.resolve(to).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        let (new_parent, new_name) = inner.resolve_parent(to)?;
        {
            let pnode = inner.nodes[new_parent].as_ref().ok_or(FsError::NotFound)?;
            if pnode.ftype != FileType::Directory {
                return Err(FsError::NotDirectory);
            }
            if pnode.children.len() >= MAX_CHILDREN {
                return Err(FsError::NoSpace);
            }
        }
        let old_parent = inner.nodes[id].as_ref().ok_or(FsError::NotFound)?.parent;
        if let Some(p) = inner.nodes[old_parent].as_mut() {
            p.children.retain(|&c| c != id);
        }
        {
            let node = inner.nodes[id].as_mut().unwrap();
            node.name = String::from(new_name);
            node.parent = new_parent;
            node.ctime = time::uptime_ms() / 1000;
        }
        inner.nodes[new_parent].as_mut().unwrap().children.push(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk() -> RamFs {
        RamFs::new()
    }

    #[test]
    fn test_create_write_read_roundtrip() {
        let fs = mk();
        let h = fs.open("/x", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
        assert_eq!(fs.write(h, 0, b"hello").unwrap(), 5);
        let mut buf = [0u8; 8];
        assert_eq!(fs.read(h, 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(fs.stat("/x").unwrap().size, 5);
    }

    #[test]
    fn test_read_at_eof_returns_zero() {
        let fs = mk();
        let h = fs.open("/f", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
        fs.write(h, 0, b"abc").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fs.read(h, 3, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_open_missing_without_creat() {
        let fs = mk();
        assert_eq!(
            fs.open("/nada", OpenFlags::empty()),
            Err(FsError::NotFound)
        );
    }

    #[test]
    fn test_creat_on_existing_is_ok_excl_fails() {
        let fs = mk();
        fs.open("/y", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
        // O_CREAT em existente: abre sem recriar
        let h = fs.open("/y", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
        fs.write(h, 0, b"z").unwrap();
        assert!(fs.open("/y", OpenFlags::CREAT | OpenFlags::RDWR).is_ok());
        assert_eq!(fs.stat("/y").unwrap().size, 1);
        // O_CREAT|O_EXCL em existente: EEXIST
        assert_eq!(
            fs.open("/y", OpenFlags::CREAT | OpenFlags::EXCL),
            Err(FsError::AlreadyExists)
        );
    }

    #[test]
    fn test_trunc_zeroes_data() {
        let fs = mk();
        let h = fs.open("/t", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
        fs.write(h, 0, b"conteudo").unwrap();
        let _ = fs
            .open("/t", OpenFlags::RDWR | OpenFlags::TRUNC)
            .unwrap();
        assert_eq!(fs.stat("/t").unwrap().size, 0);
    }

    #[test]
    fn test_mkdir_and_nested_paths() {
        let fs = mk();
        fs.mkdir("/dir").unwrap();
        fs.mkdir("/dir/sub").unwrap();
        let h = fs
            .open("/dir/sub/file", OpenFlags::CREAT | OpenFlags::RDWR)
            .unwrap();
        fs.write(h, 0, b"deep").unwrap();
        assert_eq!(fs.stat("/dir/sub/file").unwrap().size, 4);
        // Primeiro componente ausente falha
        assert_eq!(fs.stat("/nao/sub/file"), Err(FsError::NotFound));
    }

    #[test]
    fn test_readdir_order() {
        let fs = mk();
        fs.mkdir("/d").unwrap();
        fs.create("/d/a", FileType::Regular, 0o644).unwrap();
        fs.create("/d/b", FileType::Regular, 0o644).unwrap();
        let mut out = [DirEntry::EMPTY; 8];
        let n = fs.readdir("/d", &mut out).unwrap();
        assert_eq!(n, 2);
        assert_eq!(out[0].name(), "a");
        assert_eq!(out[1].name(), "b");
    }

    #[test]
    fn test_delete_semantics() {
        let fs = mk();
        fs.mkdir("/d").unwrap();
        fs.create("/d/f", FileType::Regular, 0o644).unwrap();
        // Diretório cheio não sai
        assert_eq!(fs.delete("/d"), Err(FsError::NotEmpty));
        fs.delete("/d/f").unwrap();
        fs.delete("/d").unwrap();
        assert_eq!(fs.stat("/d"), Err(FsError::NotFound));
    }

    #[test]
    fn test_write_capacity_truncates_then_rejects() {
        let fs = mk();
        let h = fs.open("/big", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
        let chunk = alloc::vec![7u8; MAX_FILE_SIZE + 100];
        // Corta no teto
        assert_eq!(fs.write(h, 0, &chunk).unwrap(), MAX_FILE_SIZE);
        // Inteiramente além do teto
        assert_eq!(
            fs.write(h, MAX_FILE_SIZE as u64, b"x"),
            Err(FsError::NoSpace)
        );
        assert_eq!(fs.stat("/big").unwrap().size, MAX_FILE_SIZE as u64);
    }

    #[test]
    fn test_rename_moves_node() {
        let fs = mk();
        fs.mkdir("/a").unwrap();
        fs.mkdir("/b").unwrap();
        let h = fs.open("/a/f", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
        fs.write(h, 0, b"dados").unwrap();
        fs.rename("/a/f", "/b/g").unwrap();
        assert_eq!(fs.stat("/a/f"), Err(FsError::NotFound));
        assert_eq!(fs.stat("/b/g").unwrap().size, 5);
    }

    #[test]
    fn test_directory_open_for_write_rejected() {
        let fs = mk();
        fs.mkdir("/d").unwrap();
        assert_eq!(
            fs.open("/d", OpenFlags::RDWR),
            Err(FsError::IsDirectory)
        );
        // Leitura de diretório via open é permitida (readdir usa path)
        assert!(fs.open("/d", OpenFlags::empty()).is_ok());
    }
}
