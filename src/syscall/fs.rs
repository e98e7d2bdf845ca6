//! Syscalls de arquivo, descritores e diretórios.
//!
//! A tabela de descritores é por processo (64 slots no PCB); cada slot
//! aponta para um arquivo do VFS ou uma ponta de pipe. As operações
//! copiam o slot para fora do lock da tabela antes de falar com o VFS.

use super::error::{to_abi, SysError};
use super::numbers::{F_DUPFD, F_GETFD, F_GETFL, F_SETFD, F_SETFL};
use super::{put_user, user_cstr, user_slice, user_slice_mut};
use crate::fs::vfs::{self, DirEntry, OpenFlags};
use crate::ipc::pipe;
use crate::sched::task::{self, FdEntry, MAX_FDS};
use alloc::string::String;

/// Copia a entrada de um fd do processo corrente.
fn fd_entry(fd: usize) -> Result<FdEntry, SysError> {
    let t = task::TABLE.lock();
    let cur = t.current;
    if fd >= MAX_FDS {
        return Err(SysError::BadDescriptor);
    }
    t.slots[cur].fds[fd].ok_or(SysError::BadDescriptor)
}

/// Instala `entry` no menor fd livre a partir de `from`.
fn install_fd(entry: FdEntry, from: usize) -> Result<usize, SysError> {
    let mut t = task::TABLE.lock();
    let cur = t.current;
    for fd in from..MAX_FDS {
        if t.slots[cur].fds[fd].is_none() {
            t.slots[cur].fds[fd] = Some(entry);
            return Ok(fd);
        }
    }
    Err(SysError::TooManyFiles)
}

fn cwd_of_current() -> String {
    let t = task::TABLE.lock();
    let cur = t.current;
    String::from(t.slots[cur].cwd())
}

pub fn sys_open(path_ptr: usize, flags: usize) -> isize {
    to_abi(do_open(path_ptr, flags))
}

fn do_open(path_ptr: usize, flags: usize) -> Result<isize, SysError> {
    let path = user_cstr(path_ptr)?;
    let flags = OpenFlags::from_bits_truncate(flags as u32);
    let handle = vfs::open(&cwd_of_current(), path, flags)?;
    match install_fd(FdEntry::Vfs(handle), 0) {
        Ok(fd) => Ok(fd as isize),
        Err(e) => {
            let _ = vfs::close(handle);
            Err(e)
        }
    }
}

pub fn sys_close(fd: usize) -> isize {
    to_abi(do_close(fd))
}

fn do_close(fd: usize) -> Result<isize, SysError> {
    let entry = fd_entry(fd)?;
    {
        let mut t = task::TABLE.lock();
        let cur = t.current;
        t.slots[cur].fds[fd] = None;
    }
    match entry {
        FdEntry::Vfs(h) => vfs::close(h)?,
        FdEntry::PipeRead(p) => pipe::close(p, false)?,
        FdEntry::PipeWrite(p) => pipe::close(p, true)?,
    }
    Ok(0)
}

pub fn sys_read(fd: usize, buf_ptr: usize, count: usize) -> isize {
    to_abi(do_read(fd, buf_ptr, count))
}

fn do_read(fd: usize, buf_ptr: usize, count: usize) -> Result<isize, SysError> {
    let buf = user_slice_mut(buf_ptr, count)?;
    let n = match fd_entry(fd)? {
        FdEntry::Vfs(h) => vfs::read(h, buf)?,
        FdEntry::PipeRead(p) => pipe::read(p, buf)?,
        FdEntry::PipeWrite(_) => return Err(SysError::BadDescriptor),
    };
    Ok(n as isize)
}

pub fn sys_write(fd: usize, buf_ptr: usize, count: usize) -> isize {
    to_abi(do_write(fd, buf_ptr, count))
}

fn do_write(fd: usize, buf_ptr: usize, count: usize) -> Result<isize, SysError> {
    let buf = user_slice(buf_ptr, count)?;
    let n = match fd_entry(fd)? {
        FdEntry::Vfs(h) => vfs::write(h, buf)?,
        FdEntry::PipeWrite(p) => pipe::write(p, buf)?,
        FdEntry::PipeRead(_) => return Err(SysError::BadDescriptor),
    };
    Ok(n as isize)
}

pub fn sys_lseek(fd: usize, offset: isize, whence: usize) -> isize {
    to_abi(match fd_entry(fd) {
        Ok(FdEntry::Vfs(h)) => vfs::lseek(h, offset as i64, whence).map(|o| o as isize),
        // Pipes não têm posição
        Ok(_) => Err(SysError::IllegalSeek),
        Err(e) => Err(e),
    })
}

pub fn sys_stat(path_ptr: usize, out_ptr: usize) -> isize {
    to_abi(user_cstr(path_ptr).and_then(|path| {
        let st = vfs::stat(&cwd_of_current(), path)?;
        put_user(out_ptr, st)?;
        Ok(0)
    }))
}

pub fn sys_fstat(fd: usize, out_ptr: usize) -> isize {
    to_abi((|| -> Result<isize, SysError> {
        match fd_entry(fd) {
        Ok(FdEntry::Vfs(h)) => {
            let st = vfs::fstat(h)?;
            put_user(out_ptr, st)?;
            Ok(0)
        }
        Ok(_) => {
            // Ponta de pipe: fifo sem tamanho
            let st = vfs::Stat {
                mode: vfs::FileType::Fifo.mode_bits() | 0o600,
                nlink: 1,
                ..Default::default()
            }
            .finish();
            put_user(out_ptr, st)?;
            Ok(0)
        }
        Err(e) => Err(e),
        }
    })())
}

fn dup_entry(entry: FdEntry) {
    match entry {
        FdEntry::Vfs(h) => vfs::dup_handle(h),
        FdEntry::PipeRead(p) => pipe::ref_end(p, false),
        FdEntry::PipeWrite(p) => pipe::ref_end(p, true),
    }
}

pub fn sys_dup(fd: usize) -> isize {
    to_abi(do_dup(fd, 0))
}

fn do_dup(fd: usize, from: usize) -> Result<isize, SysError> {
    let entry = fd_entry(fd)?;
    let newfd = install_fd(entry, from)?;
    dup_entry(entry);
    Ok(newfd as isize)
}

pub fn sys_dup2(fd: usize, newfd: usize) -> isize {
    to_abi(do_dup2(fd, newfd))
}

fn do_dup2(fd: usize, newfd: usize) -> Result<isize, SysError> {
    if newfd >= MAX_FDS {
        return Err(SysError::BadDescriptor);
    }
    let entry = fd_entry(fd)?;
    if fd == newfd {
        return Ok(newfd as isize);
    }
    // Fecha o alvo se estiver em uso
    if fd_entry(newfd).is_ok() {
        let _ = do_close(newfd);
    }
    {
        let mut t = task::TABLE.lock();
        let cur = t.current;
        t.slots[cur].fds[newfd] = Some(entry);
    }
    dup_entry(entry);
    Ok(newfd as isize)
}

pub fn sys_pipe(out_ptr: usize) -> isize {
    to_abi(do_pipe(out_ptr))
}

fn do_pipe(out_ptr: usize) -> Result<isize, SysError> {
    let idx = pipe::create()?;
    let rfd = match install_fd(FdEntry::PipeRead(idx), 0) {
        Ok(fd) => fd,
        Err(e) => {
            let _ = pipe::close(idx, false);
            let _ = pipe::close(idx, true);
            return Err(e);
        }
    };
    let wfd = match install_fd(FdEntry::PipeWrite(idx), 0) {
        Ok(fd) => fd,
        Err(e) => {
            let _ = do_close(rfd);
            let _ = pipe::close(idx, true);
            return Err(e);
        }
    };
    put_user(out_ptr, [rfd as i32, wfd as i32])?;
    Ok(0)
}

pub fn sys_getcwd(buf_ptr: usize, len: usize) -> isize {
    to_abi(do_getcwd(buf_ptr, len))
}

fn do_getcwd(buf_ptr: usize, len: usize) -> Result<isize, SysError> {
    let cwd = cwd_of_current();
    let bytes = cwd.as_bytes();
    if len < bytes.len() + 1 {
        return Err(SysError::InvalidArgument);
    }
    let buf = user_slice_mut(buf_ptr, bytes.len() + 1)?;
    buf[..bytes.len()].copy_from_slice(bytes);
    buf[bytes.len()] = 0;
    Ok(bytes.len() as isize)
}

pub fn sys_chdir(path_ptr: usize) -> isize {
    to_abi(user_cstr(path_ptr).and_then(|path| {
        let abs = vfs::resolve_dir(&cwd_of_current(), path)?;
        let mut t = task::TABLE.lock();
        let cur = t.current;
        t.slots[cur].set_cwd(&abs);
        Ok(0)
    }))
}

pub fn sys_mkdir(path_ptr: usize) -> isize {
    to_abi(user_cstr(path_ptr).and_then(|p| vfs::mkdir(&cwd_of_current(), p).map(|_| 0)))
}

pub fn sys_rmdir(path_ptr: usize) -> isize {
    to_abi(user_cstr(path_ptr).and_then(|p| vfs::rmdir(&cwd_of_current(), p).map(|_| 0)))
}

pub fn sys_unlink(path_ptr: usize) -> isize {
    to_abi(user_cstr(path_ptr).and_then(|p| vfs::unlink(&cwd_of_current(), p).map(|_| 0)))
}

pub fn sys_readdir(path_ptr: usize, out_ptr: usize, max: usize) -> isize {
    to_abi(do_readdir(path_ptr, out_ptr, max))
}

fn do_readdir(path_ptr: usize, out_ptr: usize, max: usize) -> Result<isize, SysError> {
    let path = user_cstr(path_ptr)?;
    let max = max.min(64);
    let mut entries = [DirEntry::EMPTY; 64];
    let n = vfs::readdir(&cwd_of_current(), path, &mut entries[..max])?;
    let out = user_slice_mut(out_ptr, n * core::mem::size_of::<DirEntry>())?;
    let src = unsafe {
        core::slice::from_raw_parts(
            entries.as_ptr() as *const u8,
            n * core::mem::size_of::<DirEntry>(),
        )
    };
    out.copy_from_slice(src);
    Ok(n as isize)
}

pub fn sys_ioctl(fd: usize, _cmd: usize, _arg: usize) -> isize {
    to_abi((|| -> Result<isize, SysError> {
        match fd_entry(fd) {
        // Só dispositivos de caractere aceitam ioctl; nenhum comando ainda
        Ok(FdEntry::Vfs(h)) => {
            let st = vfs::fstat(h)?;
            if st.mode & 0o170000 == vfs::FileType::CharDevice.mode_bits() {
                Ok(0)
            } else {
                Err(SysError::InvalidArgument)
            }
        }
        Ok(_) => Err(SysError::InvalidArgument),
        Err(e) => Err(e),
        }
    })())
}

pub fn sys_fcntl(fd: usize, cmd: usize, arg: usize) -> isize {
    to_abi(do_fcntl(fd, cmd, arg))
}

fn do_fcntl(fd: usize, cmd: usize, arg: usize) -> Result<isize, SysError> {
    let entry = fd_entry(fd)?;
    match cmd {
        F_DUPFD => do_dup(fd, arg),
        // close-on-exec não persiste neste kernel
        F_GETFD | F_SETFD => Ok(0),
        F_GETFL => match entry {
            FdEntry::Vfs(h) => Ok(vfs::flags_of(h)? as isize),
            _ => Ok(0),
        },
        F_SETFL => Ok(0),
        _ => Err(SysError::InvalidArgument),
    }
}

/// Layout ABI do poll.
#[repr(C)]
#[derive(Clone, Copy)]
struct PollFd {
    fd: i32,
    events: i16,
    revents: i16,
}

const POLLIN: i16 = 0x1;
const POLLOUT: i16 = 0x4;
const POLLHUP: i16 = 0x10;
const POLLNVAL: i16 = 0x20;

pub fn sys_poll(fds_ptr: usize, nfds: usize, timeout_ms: usize) -> isize {
    to_abi(do_poll(fds_ptr, nfds, timeout_ms))
}

fn do_poll(fds_ptr: usize, nfds: usize, timeout_ms: usize) -> Result<isize, SysError> {
    if nfds > MAX_FDS {
        return Err(SysError::InvalidArgument);
    }

    let scan = |ready_total: &mut isize| -> Result<(), SysError> {
        for i in 0..nfds {
            let slot_ptr = fds_ptr + i * core::mem::size_of::<PollFd>();
            let mut pfd = unsafe { core::ptr::read_unaligned(slot_ptr as *const PollFd) };
            pfd.revents = 0;
            match fd_entry(pfd.fd as usize) {
                Err(_) => pfd.revents = POLLNVAL,
                Ok(FdEntry::Vfs(_)) => {
                    // Arquivos comuns estão sempre prontos
                    pfd.revents = pfd.events & (POLLIN | POLLOUT);
                }
                Ok(FdEntry::PipeRead(p)) => {
                    if pipe::available(p).unwrap_or(0) > 0 {
                        pfd.revents |= pfd.events & POLLIN;
                    } else if !pipe::has_writers(p).unwrap_or(false) {
                        pfd.revents |= POLLHUP;
                    }
                }
                Ok(FdEntry::PipeWrite(p)) => {
                    if pipe::available(p).unwrap_or(pipe::PIPE_BUF_SIZE) < pipe::PIPE_BUF_SIZE {
                        pfd.revents |= pfd.events & POLLOUT;
                    }
                }
            }
            if pfd.revents != 0 {
                *ready_total += 1;
            }
            put_user(slot_ptr, pfd)?;
        }
        Ok(())
    };

    let mut ready = 0isize;
    scan(&mut ready)?;
    if ready == 0 && timeout_ms > 0 {
        // Uma espera única e um rescan: bloqueio fino fica para a libc
        let wake = crate::core::time::jiffies() + crate::core::time::ms_to_ticks(timeout_ms as u64);
        task::sleep_current(wake);
        ready = 0;
        scan(&mut ready)?;
    }
    Ok(ready)
}

pub fn sys_isatty(fd: usize) -> isize {
    to_abi((|| -> Result<isize, SysError> {
        match fd_entry(fd) {
        Ok(FdEntry::Vfs(h)) => {
            let st = vfs::fstat(h)?;
            let is_chr = st.mode & 0o170000 == vfs::FileType::CharDevice.mode_bits();
            Ok(if is_chr { 1 } else { 0 })
        }
        Ok(_) => Ok(0),
        Err(e) => Err(e),
        }
    })())
}
