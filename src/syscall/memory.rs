//! Syscalls de memória: mmap anônimo privado, munmap e brk.

use super::error::{to_abi, SysError};
use crate::mm::config::{MMAP_VIRT_BASE, PAGE_SIZE, USER_BRK_BASE};
use crate::mm::{pmm, vmm, PhysAddr, VirtAddr};
use crate::sched::task::{self, MAX_MMAP_REGIONS};

pub const PROT_READ: usize = 1;
pub const PROT_WRITE: usize = 2;
pub const PROT_EXEC: usize = 4;

/// Teto do brk (1 GiB acima da base).
const BRK_CEIL: u64 = USER_BRK_BASE + (1 << 30);

fn prot_to_flags(prot: usize) -> vmm::PageFlags {
    let mut flags = vmm::PageFlags::USER;
    if prot & PROT_WRITE != 0 {
        flags |= vmm::PageFlags::WRITABLE;
    }
    if prot & PROT_EXEC == 0 {
        flags |= vmm::PageFlags::NO_EXECUTE;
    }
    flags
}

pub fn sys_mmap(addr: usize, len: usize, prot: usize) -> isize {
    to_abi(do_mmap(addr as u64, len, prot))
}

/// mmap anônimo privado: bump na janela dedicada (ou endereço fixo),
/// quadros zerados, proteção traduzida para os bits da página.
fn do_mmap(addr: u64, len: usize, prot: usize) -> Result<isize, SysError> {
    if len == 0 {
        return Err(SysError::InvalidArgument);
    }
    let pages = len.div_ceil(PAGE_SIZE) as u64;

    let (root, base) = {
        let mut t = task::TABLE.lock();
        let cur = t.current;
        if t.slots[cur].aspace == 0 {
            return Err(SysError::InvalidArgument);
        }
        if t.slots[cur].n_mmap >= MAX_MMAP_REGIONS {
            return Err(SysError::OutOfMemory);
        }
        let base = if addr != 0 {
            // mmap_fixed honra o pedido (alinhado)
            if addr % PAGE_SIZE as u64 != 0 || addr < MMAP_VIRT_BASE {
                return Err(SysError::InvalidArgument);
            }
            addr
        } else {
            let b = t.slots[cur].mmap_next;
            t.slots[cur].mmap_next += pages * PAGE_SIZE as u64 + PAGE_SIZE as u64;
            b
        };
        (PhysAddr::new(t.slots[cur].aspace), base)
    };

    let flags = prot_to_flags(prot);
    let mut mapped = 0u64;
    for i in 0..pages {
        let Some(frame) = pmm::alloc_zeroed_frame() else {
            rollback(root, base, mapped);
            return Err(SysError::OutOfMemory);
        };
        let va = VirtAddr::new(base + i * PAGE_SIZE as u64);
        if vmm::map(root, va, frame, flags).is_err() {
            pmm::free_frame(frame);
            rollback(root, base, mapped);
            return Err(SysError::BadAddress);
        }
        mapped += 1;
    }

    let mut t = task::TABLE.lock();
    let cur = t.current;
    let n = t.slots[cur].n_mmap;
    t.slots[cur].mmap_regions[n] = (base, pages);
    t.slots[cur].n_mmap = n + 1;
    Ok(base as isize)
}

fn rollback(root: PhysAddr, base: u64, mapped: u64) {
    for i in 0..mapped {
        if let Ok(frame) = vmm::unmap(root, VirtAddr::new(base + i * PAGE_SIZE as u64)) {
            pmm::free_frame(frame);
        }
    }
}

pub fn sys_munmap(addr: usize, len: usize) -> isize {
    to_abi(do_munmap(addr as u64, len))
}

fn do_munmap(addr: u64, len: usize) -> Result<isize, SysError> {
    let pages = len.div_ceil(PAGE_SIZE) as u64;
    let root = {
        let mut t = task::TABLE.lock();
        let cur = t.current;
        let idx = (0..t.slots[cur].n_mmap)
            .find(|&i| t.slots[cur].mmap_regions[i].0 == addr)
            .ok_or(SysError::InvalidArgument)?;
        if t.slots[cur].mmap_regions[idx].1 != pages {
            return Err(SysError::InvalidArgument);
        }
        // Compacta a lista
        let n = t.slots[cur].n_mmap;
        t.slots[cur].mmap_regions[idx] = t.slots[cur].mmap_regions[n - 1];
        t.slots[cur].mmap_regions[n - 1] = (0, 0);
        t.slots[cur].n_mmap = n - 1;
        PhysAddr::new(t.slots[cur].aspace)
    };

    for i in 0..pages {
        let va = VirtAddr::new(addr + i * PAGE_SIZE as u64);
        if let Ok(frame) = vmm::unmap(root, va) {
            pmm::free_frame(frame);
        }
    }
    Ok(0)
}

pub fn sys_brk(new_brk: usize) -> isize {
    to_abi(do_brk(new_brk as u64))
}

fn do_brk(new_brk: u64) -> Result<isize, SysError> {
    let (root, old_brk) = {
        let t = task::TABLE.lock();
        let cur = t.current;
        (t.slots[cur].aspace, t.slots[cur].brk)
    };

    if new_brk == 0 {
        return Ok(old_brk as isize);
    }
    if new_brk < USER_BRK_BASE || new_brk > BRK_CEIL || root == 0 {
        return Err(SysError::InvalidArgument);
    }

    // Crescimento mapeia páginas novas; encolhimento devolve quadros
    let old_top = old_brk.div_ceil(PAGE_SIZE as u64);
    let new_top = new_brk.div_ceil(PAGE_SIZE as u64);
    let root = PhysAddr::new(root);

    if new_top > old_top {
        for page in old_top..new_top {
            let frame = pmm::alloc_zeroed_frame().ok_or(SysError::OutOfMemory)?;
            let va = VirtAddr::new(page * PAGE_SIZE as u64);
            vmm::map(
                root,
                va,
                frame,
                vmm::PageFlags::USER | vmm::PageFlags::WRITABLE | vmm::PageFlags::NO_EXECUTE,
            )
            .map_err(|_| SysError::OutOfMemory)?;
        }
    } else {
        for page in new_top..old_top {
            let va = VirtAddr::new(page * PAGE_SIZE as u64);
            if let Ok(frame) = vmm::unmap(root, va) {
                pmm::free_frame(frame);
            }
        }
    }

    let mut t = task::TABLE.lock();
    let cur = t.current;
    t.slots[cur].brk = new_brk;
    Ok(new_brk as isize)
}
