//! Backend ext2 somente-leitura, por cima do cache de blocos.
//!
//! Estruturas no layout exato do disco (rev 0, inode de 128 bytes).
//! Cobre blocos diretos + indireto simples e duplo: o suficiente para
//! ler arquivos e diretórios de imagens pequenas. Qualquer operação de
//! escrita devolve `NotSupported`.

use super::vfs::ops::{DirEntry, FileType, FsError, FsOps, NodeHandle, OpenFlags, Stat};
use crate::blk::{self, SECTOR_SIZE};
use alloc::vec;
use alloc::vec::Vec;

const EXT2_MAGIC: u16 = 0xEF53;
const SUPERBLOCK_OFFSET: usize = 1024;
const ROOT_INODE: u32 = 2;
const INODE_SIZE: usize = 128;
const GROUP_DESC_SIZE: usize = 32;

const S_IFMT: u16 = 0xF000;
const S_IFDIR: u16 = 0x4000;
const S_IFREG: u16 = 0x8000;

/// Superbloco (campos usados; layout de disco, little-endian).
#[repr(C)]
#[derive(Clone, Copy)]
struct Superblock {
    inodes_count: u32,
    blocks_count: u32,
    r_blocks_count: u32,
    free_blocks_count: u32,
    free_inodes_count: u32,
    first_data_block: u32,
    log_block_size: u32,
    log_frag_size: u32,
    blocks_per_group: u32,
    frags_per_group: u32,
    inodes_per_group: u32,
    mtime: u32,
    wtime: u32,
    mnt_count: u16,
    max_mnt_count: u16,
    magic: u16,
}

/// Inode no layout de disco.
#[repr(C)]
#[derive(Clone, Copy)]
struct DiskInode {
    mode: u16,
    uid: u16,
    size: u32,
    atime: u32,
    ctime: u32,
    mtime: u32,
    dtime: u32,
    gid: u16,
    links_count: u16,
    blocks: u32,
    flags: u32,
    osd1: u32,
    block: [u32; 15],
}

/// O filesystem montado: id do dispositivo + geometria do superbloco.
pub struct Ext2Fs {
    dev: usize,
    block_size: usize,
    inodes_per_group: u32,
    first_data_block: u32,
}

impl Ext2Fs {
    /// Lê e valida o superbloco do dispositivo.
    pub fn new(dev: usize) -> Result<Self, FsError> {
        let mut sb_buf = [0u8; 1024];
        read_bytes_raw(dev, SUPERBLOCK_OFFSET, &mut sb_buf)?;
        let sb: Superblock =
            unsafe { core::ptr::read_unaligned(sb_buf.as_ptr() as *const Superblock) };

        if sb.magic != EXT2_MAGIC {
            return Err(FsError::InvalidPath);
        }
        let block_size = 1024usize << sb.log_block_size;
        crate::kinfo!("(EXT2) Superbloco ok, block_size=", block_size as u64);
        Ok(Self {
            dev,
            block_size,
            inodes_per_group: sb.inodes_per_group,
            first_data_block: sb.first_data_block,
        })
    }

    /// Lê um bloco do fs inteiro para `buf`.
    fn read_block(&self, block: u32, buf: &mut [u8]) -> Result<(), FsError> {
        read_bytes_raw(self.dev, block as usize * self.block_size, &mut buf[..self.block_size])
    }

    fn read_inode(&self, ino: u32) -> Result<DiskInode, FsError> {
        if ino == 0 {
            return Err(FsError::NotFound);
        }
        let index = ino - 1;
        let group = index / self.inodes_per_group;
        let in_group = (index % self.inodes_per_group) as usize;

        // Descritor do grupo: logo após o superbloco
        let gd_table_block = self.first_data_block + 1;
        let gd_offset =
            gd_table_block as usize * self.block_size + group as usize * GROUP_DESC_SIZE;
        let mut gd = [0u8; GROUP_DESC_SIZE];
        read_bytes_raw(self.dev, gd_offset, &mut gd)?;
        let inode_table = u32::from_le_bytes([gd[8], gd[9], gd[10], gd[11]]);

        let offset = inode_table as usize * self.block_size + in_group * INODE_SIZE;
        let mut raw = [0u8; INODE_SIZE];
        read_bytes_raw(self.dev, offset, &mut raw)?;
        Ok(unsafe { core::ptr::read_unaligned(raw.as_ptr() as *const DiskInode) })
    }

    /// Bloco físico do n-ésimo bloco lógico de um inode
    /// (direto → indireto → duplo indireto).
    fn block_of(&self, inode: &DiskInode, n: usize) -> Result<u32, FsError> {
        let per_block = self.block_size / 4;
        if n < 12 {
            return Ok(inode.block[n]);
        }
        let n = n - 12;
        let mut table = vec![0u8; self.block_size];
        if n < per_block {
            if inode.block[12] == 0 {
                return Ok(0);
            }
            self.read_block(inode.block[12], &mut table)?;
            return Ok(read_u32(&table, n));
        }
        let n = n - per_block;
        if n < per_block * per_block {
            if inode.block[13] == 0 {
                return Ok(0);
            }
            self.read_block(inode.block[13], &mut table)?;
            let indirect = read_u32(&table, n / per_block);
            if indirect == 0 {
                return Ok(0);
            }
            self.read_block(indirect, &mut table)?;
            return Ok(read_u32(&table, n % per_block));
        }
        // Triplo indireto fora do alcance deste leitor
        Err(FsError::NoSpace)
    }

    /// Lê `buf.len()` bytes do inode a partir de `offset`.
    fn read_data(&self, inode: &DiskInode, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
        let size = inode.size as u64;
        if offset >= size {
            return Ok(0);
        }
        let want = buf.len().min((size - offset) as usize);
        let mut block_buf = vec![0u8; self.block_size];
        let mut done = 0usize;
        while done < want {
            let pos = offset as usize + done;
            let logical = pos / self.block_size;
            let in_block = pos % self.block_size;
            let n = (self.block_size - in_block).min(want - done);

            let phys = self.block_of(inode, logical)?;
            if phys == 0 {
                // Buraco: zeros
                buf[done..done + n].fill(0);
            } else {
                self.read_block(phys, &mut block_buf)?;
                buf[done..done + n].copy_from_slice(&block_buf[in_block..in_block + n]);
            }
            done += n;
        }
        Ok(done)
    }

    /// Procura `name` num inode de diretório.
    fn dir_lookup(&self, dir: &DiskInode, name: &str) -> Result<u32, FsError> {
        let mut found = None;
        self.walk_dir(dir, |ino, entry_name, _ftype| {
            if entry_name == name {
                found = Some(ino);
            }
        })?;
        found.ok_or(FsError::NotFound)
    }

    /// Itera as entradas de um diretório.
    fn walk_dir(
        &self,
        dir: &DiskInode,
        mut f: impl FnMut(u32, &str, u8),
    ) -> Result<(), FsError> {
        if dir.mode & S_IFMT != S_IFDIR {
            return Err(FsError::NotDirectory);
        }
        let mut block_buf = vec![0u8; self.block_size];
        let n_blocks = (dir.size as usize).div_ceil(self.block_size);
        for logical in 0..n_blocks {
            let phys = self.block_of(dir, logical)?;
            if phys == 0 {
                continue;
            }
            self.read_block(phys, &mut block_buf)?;
            let mut pos = 0usize;
            while pos + 8 <= self.block_size {
                let ino = read_u32(&block_buf, pos / 4);
                let rec_len =
                    u16::from_le_bytes([block_buf[pos + 4], block_buf[pos + 5]]) as usize;
                let name_len = block_buf[pos + 6] as usize;
                let ftype = block_buf[pos + 7];
                if rec_len < 8 {
                    break;
                }
                if ino != 0 && pos + 8 + name_len <= self.block_size {
                    if let Ok(name) =
                        core::str::from_utf8(&block_buf[pos + 8..pos + 8 + name_len])
                    {
                        f(ino, name, ftype);
                    }
                }
                pos += rec_len;
            }
        }
        Ok(())
    }

    /// Resolve um caminho relativo ao mount até um número de inode.
    fn resolve(&self, path: &str) -> Result<u32, FsError> {
        let mut ino = ROOT_INODE;
        for comp in path.split('/').filter(|c| !c.is_empty()) {
            let inode = self.read_inode(ino)?;
            ino = self.dir_lookup(&inode, comp)?;
        }
        Ok(ino)
    }

    fn stat_inode(&self, ino: u32, inode: &DiskInode) -> Stat {
        let ftype = if inode.mode & S_IFMT == S_IFDIR {
            FileType::Directory
        } else {
            FileType::Regular
        };
        Stat {
            mode: ftype.mode_bits() | (inode.mode & 0o777) as u32,
            nlink: inode.links_count as u32,
            uid: inode.uid as u32,
            gid: inode.gid as u32,
            size: inode.size as u64,
            atime: inode.atime as u64,
            mtime: inode.mtime as u64,
            ctime: inode.ctime as u64,
            dev: self.dev as u32,
            inode: ino as u64,
            blksize: 0,
            blocks: 0,
        }
        .finish()
    }
}

/// Leitura byte-endereçada via cache de blocos (decompõe em setores).
fn read_bytes_raw(dev: usize, offset: usize, buf: &mut [u8]) -> Result<(), FsError> {
    let first_lba = (offset / SECTOR_SIZE) as u64;
    let last = offset + buf.len();
    let n_sectors = last.div_ceil(SECTOR_SIZE) - offset / SECTOR_SIZE;
    let mut tmp = vec![0u8; n_sectors * SECTOR_SIZE];
    blk::cache::read(dev, first_lba, n_sectors, &mut tmp).map_err(|_| FsError::BadHandle)?;
    let skew = offset % SECTOR_SIZE;
    buf.copy_from_slice(&tmp[skew..skew + buf.len()]);
    Ok(())
}

#[inline]
fn read_u32(buf: &[u8], idx: usize) -> u32 {
    let p = idx * 4;
    u32::from_le_bytes([buf[p], buf[p + 1], buf[p + 2], buf[p + 3]])
}

impl FsOps for Ext2Fs {
    fn open(&self, path: &str, flags: OpenFlags) -> Result<NodeHandle, FsError> {
        if flags.writable() || flags.contains(OpenFlags::CREAT) {
            return Err(FsError::NotSupported);
        }
        Ok(self.resolve(path)? as NodeHandle)
    }

    fn read(&self, handle: NodeHandle, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
        let inode = self.read_inode(handle as u32)?;
        if inode.mode & S_IFMT == S_IFDIR {
            return Err(FsError::IsDirectory);
        }
        self.read_data(&inode, offset, buf)
    }

    fn write(&self, _handle: NodeHandle, _offset: u64, _buf: &[u8]) -> Result<usize, FsError> {
        Err(FsError::NotSupported)
    }

    fn fstat(&self, handle: NodeHandle) -> Result<Stat, FsError> {
        let inode = self.read_inode(handle as u32)?;
        Ok(self.stat_inode(handle as u32, &inode))
    }

    fn readdir(&self, path: &str, out: &mut [DirEntry]) -> Result<usize, FsError> {
        let ino = self.resolve(path)?;
        let dir = self.read_inode(ino)?;
        let mut count = 0usize;
        self.walk_dir(&dir, |child, name, ftype| {
            if name == "." || name == ".." || count >= out.len() {
                return;
            }
            let kind = if ftype == 2 {
                FileType::Directory
            } else {
                FileType::Regular
            };
            out[count] = DirEntry::new(child as u64, kind, name);
            count += 1;
        })?;
        Ok(count)
    }

    fn mkdir(&self, _path: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn stat(&self, path: &str) -> Result<Stat, FsError> {
        let ino = self.resolve(path)?;
        let inode = self.read_inode(ino)?;
        Ok(self.stat_inode(ino, &inode))
    }

    fn create(&self, _path: &str, _ftype: FileType, _perms: u16) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn delete(&self, _path: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ramdisk::RamDisk;
    use alloc::sync::Arc;

    const BLOCK: usize = 1024;

    fn put_u16(img: &mut [u8], off: usize, v: u16) {
        img[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u32(img: &mut [u8], off: usize, v: u32) {
        img[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Monta uma imagem ext2 mínima: raiz (inode 2) com `hello.txt`
    /// (inode 3) e um subdiretório `sub` (inode 4) vazio.
    fn build_image() -> Vec<u8> {
        let mut img = alloc::vec![0u8; 16 * BLOCK];

        // Superbloco no offset 1024
        let sb = 1024;
        put_u32(&mut img, sb, 16); // inodes_count
        put_u32(&mut img, sb + 4, 16); // blocks_count
        put_u32(&mut img, sb + 20, 1); // first_data_block
        put_u32(&mut img, sb + 24, 0); // log_block_size (1024)
        put_u32(&mut img, sb + 32, 16); // blocks_per_group
        put_u32(&mut img, sb + 40, 16); // inodes_per_group
        put_u16(&mut img, sb + 56, 0xEF53); // magic

        // Descritor do grupo 0 no bloco 2: tabela de inodes no bloco 4
        let gd = 2 * BLOCK;
        put_u32(&mut img, gd, 3); // block bitmap
        put_u32(&mut img, gd + 4, 3); // inode bitmap
        put_u32(&mut img, gd + 8, 4); // inode table

        let inode_at = |n: u32| 4 * BLOCK + (n as usize - 1) * 128;

        // Inode 2: raiz (dir, bloco de dados 6)
        let root = inode_at(2);
        put_u16(&mut img, root, 0x41ED); // dir | 755
        put_u32(&mut img, root + 4, BLOCK as u32); // size
        put_u16(&mut img, root + 26, 3); // links
        put_u32(&mut img, root + 40, 6); // block[0]

        // Inode 3: hello.txt (bloco de dados 7)
        let content = b"conteudo ext2\n";
        let file = inode_at(3);
        put_u16(&mut img, file, 0x81A4); // reg | 644
        put_u32(&mut img, file + 4, content.len() as u32);
        put_u16(&mut img, file + 26, 1);
        put_u32(&mut img, file + 40, 7);

        // Inode 4: sub (dir, bloco de dados 8)
        let sub = inode_at(4);
        put_u16(&mut img, sub, 0x41ED);
        put_u32(&mut img, sub + 4, BLOCK as u32);
        put_u16(&mut img, sub + 26, 2);
        put_u32(&mut img, sub + 40, 8);

        // Bloco 6: entradas da raiz
        let mut pos = 6 * BLOCK;
        let mut dirent = |img: &mut [u8], pos: &mut usize, ino: u32, name: &[u8], ftype: u8, rec: usize| {
            put_u32(img, *pos, ino);
            put_u16(img, *pos + 4, rec as u16);
            img[*pos + 6] = name.len() as u8;
            img[*pos + 7] = ftype;
            img[*pos + 8..*pos + 8 + name.len()].copy_from_slice(name);
            *pos += rec;
        };
        dirent(&mut img, &mut pos, 2, b".", 2, 12);
        dirent(&mut img, &mut pos, 2, b"..", 2, 12);
        dirent(&mut img, &mut pos, 3, b"hello.txt", 1, 20);
        // Última entrada estica até o fim do bloco
        let remaining = 7 * BLOCK - pos;
        dirent(&mut img, &mut pos, 4, b"sub", 2, remaining);

        // Bloco 8: "." e ".." do sub
        let mut spos = 8 * BLOCK;
        dirent(&mut img, &mut spos, 4, b".", 2, 12);
        let srem = 9 * BLOCK - spos;
        dirent(&mut img, &mut spos, 2, b"..", 2, srem);

        // Bloco 7: conteúdo do arquivo
        img[7 * BLOCK..7 * BLOCK + content.len()].copy_from_slice(content);
        img
    }

    fn setup() -> Ext2Fs {
        crate::blk::test_reset_devices();
        crate::blk::cache::test_reset();
        let disk = Arc::new(RamDisk::from_bytes(build_image()));
        let dev = crate::blk::register(disk);
        Ext2Fs::new(dev).unwrap()
    }

    #[test]
    fn test_superblock_rejects_garbage() {
        let _g = crate::sched::task::test_guard();
        crate::blk::test_reset_devices();
        crate::blk::cache::test_reset();
        let disk = Arc::new(RamDisk::new(32));
        let dev = crate::blk::register(disk);
        assert!(Ext2Fs::new(dev).is_err());
    }

    #[test]
    fn test_read_file_through_cache() {
        let _g = crate::sched::task::test_guard();
        let fs = setup();
        let h = fs.open("/hello.txt", OpenFlags::empty()).unwrap();
        let mut buf = [0u8; 64];
        let n = fs.read(h, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"conteudo ext2\n");
        // Leitura além do fim: EOF
        assert_eq!(fs.read(h, n as u64, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_stat_and_types() {
        let _g = crate::sched::task::test_guard();
        let fs = setup();
        let st = fs.stat("/hello.txt").unwrap();
        assert_eq!(st.size, 14);
        assert_eq!(st.mode & 0o170000, FileType::Regular.mode_bits());
        let sd = fs.stat("/sub").unwrap();
        assert_eq!(sd.mode & 0o170000, FileType::Directory.mode_bits());
    }

    #[test]
    fn test_readdir_skips_dot_entries() {
        let _g = crate::sched::task::test_guard();
        let fs = setup();
        let mut out = [DirEntry::EMPTY; 8];
        let n = fs.readdir("/", &mut out).unwrap();
        assert_eq!(n, 2);
        let names: Vec<&str> = out[..n].iter().map(|e| e.name()).collect();
        assert!(names.contains(&"hello.txt"));
        assert!(names.contains(&"sub"));
    }

    #[test]
    fn test_write_paths_rejected() {
        let _g = crate::sched::task::test_guard();
        let fs = setup();
        assert_eq!(
            fs.open("/hello.txt", OpenFlags::RDWR),
            Err(FsError::NotSupported)
        );
        assert_eq!(fs.mkdir("/novo"), Err(FsError::NotSupported));
        let h = fs.open("/hello.txt", OpenFlags::empty()).unwrap();
        assert_eq!(fs.write(h, 0, b"x"), Err(FsError::NotSupported));
    }

    #[test]
    fn test_missing_path_is_enoent() {
        let _g = crate::sched::task::test_guard();
        let fs = setup();
        assert_eq!(fs.stat("/nao/existe"), Err(FsError::NotFound));
    }
}
