//! Dispatcher central de syscalls.
//!
//! Roteia o número para a implementação; números desconhecidos voltam
//! ENOSYS.

use super::error::SysError;
use super::numbers::*;
use super::{fs, ipc, memory, process, system};

/// Roteia a syscall.
pub fn dispatch(num: usize, a1: usize, a2: usize, a3: usize) -> isize {
    match num {
        // Processo
        SYS_EXIT => process::sys_exit(a1 as i32),
        SYS_GETPID => process::sys_getpid(),
        SYS_YIELD => process::sys_yield(),
        SYS_SLEEP => process::sys_sleep(a1),
        SYS_FORK => process::sys_fork(),
        SYS_WAIT => process::sys_wait(a1),
        SYS_EXECVE => process::sys_execve(a1),
        SYS_KILL => process::sys_kill(a1, a2),
        SYS_GETPPID => process::sys_getppid(),
        SYS_UPTIME => process::sys_uptime(),
        SYS_GETPRIO => process::sys_getprio(a1),
        SYS_SETPRIO => process::sys_setprio(a1, a2),
        SYS_PROCINFO => process::sys_procinfo(a1, a2),
        SYS_MEMINFO => process::sys_meminfo(a1),

        // Arquivo
        SYS_OPEN => fs::sys_open(a1, a2),
        SYS_CLOSE => fs::sys_close(a1),
        SYS_READ => fs::sys_read(a1, a2, a3),
        SYS_WRITE => fs::sys_write(a1, a2, a3),
        SYS_LSEEK => fs::sys_lseek(a1, a2 as isize, a3),
        SYS_STAT => fs::sys_stat(a1, a2),
        SYS_FSTAT => fs::sys_fstat(a1, a2),

        // Descritores
        SYS_DUP => fs::sys_dup(a1),
        SYS_DUP2 => fs::sys_dup2(a1, a2),
        SYS_PIPE => fs::sys_pipe(a1),

        // Diretórios
        SYS_GETCWD => fs::sys_getcwd(a1, a2),
        SYS_CHDIR => fs::sys_chdir(a1),
        SYS_MKDIR => fs::sys_mkdir(a1),
        SYS_RMDIR => fs::sys_rmdir(a1),
        SYS_UNLINK => fs::sys_unlink(a1),
        SYS_READDIR => fs::sys_readdir(a1, a2, a3),

        // Memória
        SYS_MMAP => memory::sys_mmap(a1, a2, a3),
        SYS_MUNMAP => memory::sys_munmap(a1, a2),
        SYS_BRK => memory::sys_brk(a1),

        // Controle
        SYS_IOCTL => fs::sys_ioctl(a1, a2, a3),
        SYS_FCNTL => fs::sys_fcntl(a1, a2, a3),
        SYS_POLL => fs::sys_poll(a1, a2, a3),

        // Sinais
        SYS_SIGACTION => ipc::sys_sigaction(a1, a2, a3),
        SYS_SIGRETURN => ipc::sys_sigreturn(),
        SYS_SIGPROCMASK => ipc::sys_sigprocmask(a1, a2),

        // IPC
        SYS_SHMGET => ipc::sys_shmget(a1, a2, a3),
        SYS_SHMAT => ipc::sys_shmat(a1, a2),
        SYS_SHMDT => ipc::sys_shmdt(a1),

        // Diversos
        SYS_GETUID => system::sys_getuid(),
        SYS_GETGID => system::sys_getgid(),
        SYS_ISATTY => fs::sys_isatty(a1),
        SYS_CLOCK => system::sys_clock(),

        _ => {
            crate::kwarn!("(SYSCALL) Numero desconhecido: ", num as u64);
            SysError::NotImplemented.as_isize()
        }
    }
}
