//! Syscalls de IPC: memória compartilhada e sinais.

use super::error::{to_abi, SysError};
use super::put_user;
use crate::ipc::shm;
use crate::sched::signal::{self, SigAction, SigHandler, NSIG};
use crate::sched::task;

pub fn sys_shmget(key: usize, size: usize, flags: usize) -> isize {
    to_abi(shm::shmget(key as u32, size, flags).map(|id| id as isize))
}

pub fn sys_shmat(shmid: usize, addr: usize) -> isize {
    let pid = task::current_pid();
    to_abi(shm::shmat(shmid, pid, addr as u64).map(|va| va as isize))
}

pub fn sys_shmdt(addr: usize) -> isize {
    let pid = task::current_pid();
    to_abi(shm::shmdt(pid, addr as u64).map(|_| 0))
}

/// Layout ABI de sigaction: handler 0 = default, 1 = ignore, outro valor
/// = endereço de handler chamável em modo kernel.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SigActionAbi {
    pub handler: u64,
    pub mask: u64,
    pub flags: u32,
}

fn from_abi(abi: SigActionAbi) -> SigAction {
    let handler = match abi.handler {
        0 => SigHandler::Default,
        1 => SigHandler::Ignore,
        addr => {
            // Handlers são chamáveis em modo kernel: o endereço vira
            // ponteiro de função diretamente
            let f: fn(usize) = unsafe { core::mem::transmute(addr as usize) };
            SigHandler::Kernel(f)
        }
    };
    SigAction {
        handler,
        mask: abi.mask,
        flags: abi.flags,
    }
}

fn to_abi_action(act: SigAction) -> SigActionAbi {
    let handler = match act.handler {
        SigHandler::Default => 0,
        SigHandler::Ignore => 1,
        SigHandler::Kernel(f) => f as usize as u64,
    };
    SigActionAbi {
        handler,
        mask: act.mask,
        flags: act.flags,
    }
}

pub fn sys_sigaction(sig: usize, act_ptr: usize, old_ptr: usize) -> isize {
    to_abi(do_sigaction(sig, act_ptr, old_ptr))
}

fn do_sigaction(sig: usize, act_ptr: usize, old_ptr: usize) -> Result<isize, SysError> {
    if sig == 0 || sig >= NSIG {
        return Err(SysError::InvalidArgument);
    }
    let pid = task::current_pid();
    let old = if act_ptr != 0 {
        let abi = unsafe { core::ptr::read_unaligned(act_ptr as *const SigActionAbi) };
        signal::set_action(pid, sig, from_abi(abi))?
    } else {
        // Consulta: troca pela própria ação corrente
        let t = task::TABLE.lock();
        t.slots[pid].sig.actions[sig]
    };
    if old_ptr != 0 {
        put_user(old_ptr, to_abi_action(old))?;
    }
    Ok(0)
}

/// Retorno de handler: restaura a máscara salva pela entrega.
pub fn sys_sigreturn() -> isize {
    let mut t = task::TABLE.lock();
    let cur = t.current;
    if t.slots[cur].sig.in_handler {
        t.slots[cur].sig.blocked = t.slots[cur].sig.saved_mask;
        t.slots[cur].sig.in_handler = false;
    }
    0
}

pub fn sys_sigprocmask(how: usize, mask: usize) -> isize {
    let pid = task::current_pid();
    to_abi(signal::set_mask(pid, how, mask as u64).map(|old| old as isize))
}
