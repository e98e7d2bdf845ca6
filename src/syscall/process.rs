//! Syscalls de processo.

use super::error::{to_abi, SysError};
use super::{put_user, user_cstr};
use crate::core::time;
use crate::mm::config::{PAGE_SIZE, USER_STACK_SIZE, USER_STACK_TOP};
use crate::mm::{pmm, vmm, VirtAddr};
use crate::sched::task::{self, Priority, ProcState, MAX_NAME, MAX_PROCS};
use crate::sched::{exec, scheduler, signal};
use alloc::vec::Vec;

/// Layout ABI de `procinfo`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProcInfo {
    pub pid: u64,
    pub ppid: u64,
    pub state: u32,
    pub prio: u32,
    pub cpu_ticks: u64,
    pub name: [u8; MAX_NAME],
}

/// Layout ABI de `meminfo`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MemInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
}

pub fn sys_exit(code: i32) -> isize {
    task::exit_current(code);
    0
}

pub fn sys_getpid() -> isize {
    task::current_pid() as isize
}

pub fn sys_yield() -> isize {
    scheduler::yield_now();
    0
}

pub fn sys_sleep(ms: usize) -> isize {
    let wake = time::jiffies() + time::ms_to_ticks(ms as u64).max(1);
    task::sleep_current(wake);
    0
}

pub fn sys_fork() -> isize {
    to_abi(task::fork_current().map(|pid| pid as isize))
}

pub fn sys_wait(status_ptr: usize) -> isize {
    to_abi(task::wait_current().and_then(|(pid, code)| {
        if status_ptr != 0 {
            put_user(status_ptr, code)?;
        }
        Ok(pid as isize)
    }))
}

/// Substitui a imagem do processo corrente pelo executável em `path`.
///
/// Lê o arquivo INTEIRO pelo VFS, monta um address space novo com os
/// segmentos + stack de usuário e redireciona o frame da syscall para o
/// entry point: o sysret "retorna" dentro da imagem nova.
pub fn sys_execve(path_ptr: usize) -> isize {
    to_abi(do_execve(path_ptr))
}

fn do_execve(path_ptr: usize) -> Result<isize, SysError> {
    let path = user_cstr(path_ptr)?;

    // Arquivo inteiro para o heap
    let cwd = {
        let t = task::TABLE.lock();
        let cur = t.current;
        alloc::string::String::from(t.slots[cur].cwd())
    };
    let fd = crate::fs::vfs::open(&cwd, path, crate::fs::vfs::OpenFlags::empty())?;
    let mut image = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = crate::fs::vfs::read(fd, &mut chunk)?;
        if n == 0 {
            break;
        }
        image.extend_from_slice(&chunk[..n]);
    }
    crate::fs::vfs::close(fd)?;

    // Address space novo com a imagem mapeada
    let new_root = vmm::create_address_space().ok_or(SysError::OutOfMemory)?;
    let entry = exec::load(&image, new_root).map_err(|e| {
        vmm::destroy_address_space(new_root);
        SysError::from(e)
    })?;

    // Stack de usuário
    let stack_pages = USER_STACK_SIZE / PAGE_SIZE;
    for i in 0..stack_pages {
        let frame = pmm::alloc_zeroed_frame().ok_or(SysError::OutOfMemory)?;
        let va = USER_STACK_TOP - ((i + 1) * PAGE_SIZE) as u64;
        vmm::map(
            new_root,
            VirtAddr::new(va),
            frame,
            vmm::PageFlags::USER | vmm::PageFlags::WRITABLE | vmm::PageFlags::NO_EXECUTE,
        )
        .map_err(|_| SysError::OutOfMemory)?;
    }

    // Trocar o PCB para a imagem nova e apontar o retorno da syscall
    let old_root = {
        let mut t = task::TABLE.lock();
        let cur = t.current;
        let old = t.slots[cur].aspace;
        let name = alloc::string::String::from(path);
        t.slots[cur].set_name(name.rsplit('/').next().unwrap_or("?"));
        t.slots[cur].aspace = new_root.as_u64();
        t.slots[cur].entry = entry;
        t.slots[cur].ustack_top = USER_STACK_TOP;
        t.slots[cur].ustack_base = USER_STACK_TOP - USER_STACK_SIZE as u64;
        t.slots[cur].brk = crate::mm::config::USER_BRK_BASE;
        t.slots[cur].mmap_next = crate::mm::config::MMAP_VIRT_BASE;
        t.slots[cur].n_mmap = 0;
        old
    };

    vmm::switch_to(new_root);
    if old_root != 0 {
        vmm::destroy_address_space(crate::mm::PhysAddr::new(old_root));
    }

    // O sysret desta syscall cai direto no entry da imagem nova
    if let Some(frame) = crate::arch::x86_64::syscall::current_frame() {
        let f = frame as *const _ as *mut crate::arch::x86_64::idt::TrapFrame;
        unsafe {
            (*f).rip = entry;
            (*f).rsp = USER_STACK_TOP;
            (*f).rflags = 0x202;
        }
    }
    Ok(0)
}

pub fn sys_kill(pid: usize, sig: usize) -> isize {
    to_abi(signal::send(pid, sig).map(|_| 0))
}

pub fn sys_getppid() -> isize {
    task::getppid() as isize
}

pub fn sys_uptime() -> isize {
    time::jiffies() as isize
}

pub fn sys_getprio(pid: usize) -> isize {
    to_abi(task::get_priority(pid).map(|p| p as isize))
}

pub fn sys_setprio(pid: usize, prio: usize) -> isize {
    to_abi(
        Priority::from_usize(prio)
            .ok_or(SysError::InvalidArgument)
            .and_then(|p| task::set_priority(pid, p))
            .map(|_| 0),
    )
}

pub fn sys_procinfo(pid: usize, out_ptr: usize) -> isize {
    to_abi(do_procinfo(pid, out_ptr))
}

fn do_procinfo(pid: usize, out_ptr: usize) -> Result<isize, SysError> {
    let t = task::TABLE.lock();
    if pid >= MAX_PROCS || t.slots[pid].state == ProcState::Unused {
        return Err(SysError::NotFound);
    }
    let p = &t.slots[pid];
    let info = ProcInfo {
        pid: p.pid as u64,
        ppid: p.parent as u64,
        state: p.state as u32,
        prio: p.prio as u32,
        cpu_ticks: p.cpu_ticks,
        name: p.name,
    };
    drop(t);
    put_user(out_ptr, info)?;
    Ok(0)
}

pub fn sys_meminfo(out_ptr: usize) -> isize {
    let st = crate::mm::stats();
    to_abi(
        put_user(
            out_ptr,
            MemInfo {
                total_bytes: st.total_bytes,
                free_bytes: st.free_bytes,
                used_bytes: st.used_bytes,
            },
        )
        .map(|_| 0),
    )
}
