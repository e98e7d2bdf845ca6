//! Sistema de arquivos: VFS + backends embutidos.

pub mod devfs;
pub mod ext2;
pub mod procfs;
pub mod ramfs;
pub mod vfs;

use alloc::boxed::Box;

/// Monta a hierarquia padrão: ramfs na raiz (com /tmp), devfs em /dev,
/// procfs em /proc.
pub fn init() {
    use vfs::ops::FsOps;

    let root = ramfs::RamFs::new();
    let _ = root.mkdir("/tmp");
    let _ = root.mkdir("/dev");
    let _ = root.mkdir("/proc");
    let _ = root.mkdir("/bin");
    let _ = root.mkdir("/mnt");

    vfs::mount("/", Box::new(root)).expect("(FS) mount da raiz");
    vfs::mount("/dev", Box::new(devfs::DevFs::new())).expect("(FS) mount do devfs");
    vfs::mount("/proc", Box::new(procfs::ProcFs::new())).expect("(FS) mount do procfs");

    crate::kok!("(FS) VFS montado: / (ram), /dev, /proc");
}

#[cfg(test)]
mod tests {
    use super::vfs::{self, OpenFlags};
    use crate::sched::task;

    fn setup() {
        task::test_reset();
        task::init();
        vfs::test_reset();
        super::init();
    }

    #[test]
    fn test_vfs_roundtrip_scenario() {
        let _g = task::test_guard();
        setup();
        // create → open → write → seek 0 → read → close
        let fd = vfs::open("/", "/tmp/x", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
        assert_eq!(vfs::write(fd, b"hello").unwrap(), 5);
        assert_eq!(vfs::lseek(fd, 0, vfs::SEEK_SET).unwrap(), 0);
        let mut buf = [0u8; 5];
        assert_eq!(vfs::read(fd, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        vfs::close(fd).unwrap();
        assert_eq!(vfs::stat("/", "/tmp/x").unwrap().size, 5);
    }

    #[test]
    fn test_longest_prefix_routing() {
        let _g = task::test_guard();
        setup();
        // /dev/null cai no devfs, não no ramfs
        let fd = vfs::open("/", "/dev/null", OpenFlags::RDWR).unwrap();
        let mut buf = [9u8; 4];
        assert_eq!(vfs::read(fd, &mut buf).unwrap(), 0);
        vfs::close(fd).unwrap();
        // Raiz continua no ramfs
        assert!(vfs::open("/", "/dev-file", OpenFlags::CREAT | OpenFlags::RDWR).is_ok());
    }

    #[test]
    fn test_proc_meminfo_via_vfs() {
        let _g = task::test_guard();
        setup();
        let fd = vfs::open("/", "/proc/meminfo", OpenFlags::empty()).unwrap();
        let mut buf = [0u8; 64];
        let n = vfs::read(fd, &mut buf).unwrap();
        assert!(core::str::from_utf8(&buf[..n]).unwrap().starts_with("MemTotal:"));
        vfs::close(fd).unwrap();
    }

    #[test]
    fn test_relative_paths_with_cwd() {
        let _g = task::test_guard();
        setup();
        vfs::mkdir("/", "/home").unwrap();
        let fd = vfs::open("/home", "notes.txt", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
        vfs::write(fd, b"oi").unwrap();
        vfs::close(fd).unwrap();
        assert_eq!(vfs::stat("/", "/home/notes.txt").unwrap().size, 2);
        // `..` resolve para o pai
        assert!(vfs::stat("/home", "../home/notes.txt").is_ok());
    }

    #[test]
    fn test_append_mode() {
        let _g = task::test_guard();
        setup();
        let fd = vfs::open("/", "/tmp/log", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
        vfs::write(fd, b"aaa").unwrap();
        vfs::close(fd).unwrap();
        let fd2 = vfs::open(
            "/",
            "/tmp/log",
            OpenFlags::RDWR | OpenFlags::APPEND,
        )
        .unwrap();
        vfs::write(fd2, b"bbb").unwrap();
        vfs::close(fd2).unwrap();
        assert_eq!(vfs::stat("/", "/tmp/log").unwrap().size, 6);
    }

    #[test]
    fn test_unlink_and_rmdir_type_checks() {
        let _g = task::test_guard();
        setup();
        vfs::mkdir("/", "/d").unwrap();
        let fd = vfs::open("/", "/f", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
        vfs::close(fd).unwrap();
        // unlink de diretório: EISDIR; rmdir de arquivo: ENOTDIR
        assert!(vfs::unlink("/", "/d").is_err());
        assert!(vfs::rmdir("/", "/f").is_err());
        vfs::unlink("/", "/f").unwrap();
        vfs::rmdir("/", "/d").unwrap();
    }

    #[test]
    fn test_close_unknown_fd_is_ebadf() {
        let _g = task::test_guard();
        setup();
        use crate::syscall::error::SysError;
        assert_eq!(vfs::close(77), Err(SysError::BadDescriptor));
        let mut buf = [0u8; 1];
        assert_eq!(vfs::read(77, &mut buf), Err(SysError::BadDescriptor));
        assert_eq!(vfs::write(77, b"x"), Err(SysError::BadDescriptor));
    }
}
