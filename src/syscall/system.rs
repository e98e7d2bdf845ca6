//! Syscalls diversas.

use crate::core::time;

/// Sem modelo multiusuário: todo mundo é root.
pub fn sys_getuid() -> isize {
    0
}

pub fn sys_getgid() -> isize {
    0
}

/// Milissegundos desde o boot.
pub fn sys_clock() -> isize {
    time::uptime_ms() as isize
}
