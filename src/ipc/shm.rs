//! Segmentos de memória compartilhada.
//!
//! Cada segmento é uma lista de quadros físicos + uma tabela de attaches
//! `{pid, endereço virtual}`. Os quadros só voltam ao PMM quando o
//! segmento está marcado para remoção E a contagem de attaches zera.

use crate::mm::config::PAGE_SIZE;
use crate::mm::{pmm, vmm, PhysAddr, VirtAddr};
use crate::sched::task::{self, Pid};
use crate::sync::Spinlock;
use crate::syscall::error::SysError;
use alloc::boxed::Box;

pub const MAX_SEGMENTS: usize = 16;
pub const MAX_SEG_PAGES: usize = 64;
pub const MAX_ATTACHMENTS: usize = 16;

/// Flag de criação (shmget).
pub const IPC_CREAT: usize = 0o1000;

struct Segment {
    key: u32,
    size: usize,
    frames: [u64; MAX_SEG_PAGES],
    n_frames: usize,
    attachments: [Option<(Pid, u64)>; MAX_ATTACHMENTS],
    n_attach: usize,
    marked_delete: bool,
}

static SEGMENTS: Spinlock<[Option<Box<Segment>>; MAX_SEGMENTS]> =
    Spinlock::new([const { None }; MAX_SEGMENTS]);

/// Busca por chave; com `IPC_CREAT` cria se não existir.
pub fn shmget(key: u32, size: usize, flags: usize) -> Result<usize, SysError> {
    if size == 0 || size > MAX_SEG_PAGES * PAGE_SIZE {
        return Err(SysError::InvalidArgument);
    }

    let mut segs = SEGMENTS.lock();

    // Chave já existente vence
    for (i, slot) in segs.iter().enumerate() {
        if let Some(s) = slot {
            if s.key == key && !s.marked_delete {
                return Ok(i);
            }
        }
    }

    if flags & IPC_CREAT == 0 {
        return Err(SysError::NotFound);
    }

    let slot_idx = segs
        .iter()
        .position(|s| s.is_none())
        .ok_or(SysError::NoSpace)?;

    let n_pages = size.div_ceil(PAGE_SIZE);
    let mut seg = Box::new(Segment {
        key,
        size,
        frames: [0; MAX_SEG_PAGES],
        n_frames: 0,
        attachments: [None; MAX_ATTACHMENTS],
        n_attach: 0,
        marked_delete: false,
    });

    for i in 0..n_pages {
        match pmm::alloc_zeroed_frame() {
            Some(f) => {
                seg.frames[i] = f.as_u64();
                seg.n_frames += 1;
            }
            None => {
                // Devolve o que já tinha pego
                for j in 0..seg.n_frames {
                    pmm::free_frame(PhysAddr::new(seg.frames[j]));
                }
                return Err(SysError::OutOfMemory);
            }
        }
    }

    segs[slot_idx] = Some(seg);
    Ok(slot_idx)
}

/// Mapeia o segmento no address space de `pid`, em `addr` ou numa janela
/// bump do processo. Retorna o endereço virtual do attach.
pub fn shmat(shmid: usize, pid: Pid, addr: u64) -> Result<u64, SysError> {
    let mut segs = SEGMENTS.lock();
    let seg = segs
        .get_mut(shmid)
        .and_then(|s| s.as_mut())
        .ok_or(SysError::NotFound)?;

    if seg.n_attach >= MAX_ATTACHMENTS {
        return Err(SysError::NoSpace);
    }

    // Endereço: o pedido, ou o bump da janela de shm do processo
    let (root, va) = {
        let mut t = task::TABLE.lock();
        if t.slots[pid].state == crate::sched::ProcState::Unused {
            return Err(SysError::NotFound);
        }
        let va = if addr != 0 {
            addr
        } else {
            let va = t.slots[pid].shm_next;
            t.slots[pid].shm_next += (seg.n_frames * PAGE_SIZE) as u64 + PAGE_SIZE as u64;
            va
        };
        (t.slots[pid].aspace, va)
    };

    if root == 0 {
        return Err(SysError::InvalidArgument);
    }
    let root = PhysAddr::new(root);

    for i in 0..seg.n_frames {
        let flags = vmm::PageFlags::USER | vmm::PageFlags::WRITABLE | vmm::PageFlags::NO_EXECUTE;
        vmm::map(
            root,
            VirtAddr::new(va + (i * PAGE_SIZE) as u64),
            PhysAddr::new(seg.frames[i]),
            flags,
        )
        .map_err(|_| SysError::BadAddress)?;
    }

    let slot = seg
        .attachments
        .iter()
        .position(|a| a.is_none())
        .ok_or(SysError::NoSpace)?;
    seg.attachments[slot] = Some((pid, va));
    seg.n_attach += 1;
    Ok(va)
}

/// Desfaz o attach de `pid` em `addr`; libera os quadros se o segmento
/// estiver marcado e esta for a última referência.
pub fn shmdt(pid: Pid, addr: u64) -> Result<(), SysError> {
    let mut segs = SEGMENTS.lock();

    for slot in segs.iter_mut() {
        let Some(seg) = slot.as_mut() else { continue };
        let Some(a_idx) = seg
            .attachments
            .iter()
            .position(|a| *a == Some((pid, addr)))
        else {
            continue;
        };

        let root = {
            let t = task::TABLE.lock();
            t.slots[pid].aspace
        };
        if root != 0 {
            let root = PhysAddr::new(root);
            for i in 0..seg.n_frames {
                let va = VirtAddr::new(addr + (i * PAGE_SIZE) as u64);
                let _ = vmm::unmap(root, va);
                crate::arch::Cpu::invlpg(va.as_u64());
            }
        }

        seg.attachments[a_idx] = None;
        seg.n_attach -= 1;

        if seg.marked_delete && seg.n_attach == 0 {
            for i in 0..seg.n_frames {
                pmm::free_frame(PhysAddr::new(seg.frames[i]));
            }
            *slot = None;
        }
        return Ok(());
    }
    Err(SysError::NotFound)
}

/// Remove o segmento: na hora se não há attaches, senão marca.
pub fn shmrm(shmid: usize) -> Result<(), SysError> {
    let mut segs = SEGMENTS.lock();
    let seg = segs
        .get_mut(shmid)
        .and_then(|s| s.as_mut())
        .ok_or(SysError::NotFound)?;

    if seg.n_attach == 0 {
        for i in 0..seg.n_frames {
            pmm::free_frame(PhysAddr::new(seg.frames[i]));
        }
        segs[shmid] = None;
    } else {
        seg.marked_delete = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset() {
        let mut segs = SEGMENTS.lock();
        for s in segs.iter_mut() {
            *s = None;
        }
        pmm::test_init(256);
    }

    #[test]
    fn test_get_creates_and_finds_by_key() {
        let _g = task::test_guard();
        reset();
        let a = shmget(0x42, 2 * PAGE_SIZE, IPC_CREAT).unwrap();
        let b = shmget(0x42, 2 * PAGE_SIZE, 0).unwrap();
        assert_eq!(a, b);
        // Chave diferente, segmento diferente
        let c = shmget(0x43, PAGE_SIZE, IPC_CREAT).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_get_without_creat_fails() {
        let _g = task::test_guard();
        reset();
        assert_eq!(shmget(0x99, PAGE_SIZE, 0), Err(SysError::NotFound));
    }

    #[test]
    fn test_frames_allocated_per_size() {
        let _g = task::test_guard();
        reset();
        let free_before = pmm::free_bytes();
        let _ = shmget(0x1, 3 * PAGE_SIZE + 1, IPC_CREAT).unwrap();
        // ceil(3p+1 / p) = 4 quadros
        assert_eq!(free_before - pmm::free_bytes(), 4 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_rm_without_attach_frees_now() {
        let _g = task::test_guard();
        reset();
        let free_before = pmm::free_bytes();
        let id = shmget(0x7, 2 * PAGE_SIZE, IPC_CREAT).unwrap();
        shmrm(id).unwrap();
        assert_eq!(pmm::free_bytes(), free_before);
        // Slot liberado
        assert_eq!(shmget(0x7, PAGE_SIZE, 0), Err(SysError::NotFound));
    }

    #[test]
    fn test_size_validation() {
        let _g = task::test_guard();
        reset();
        assert_eq!(shmget(0x1, 0, IPC_CREAT), Err(SysError::InvalidArgument));
        assert!(shmget(0x1, MAX_SEG_PAGES * PAGE_SIZE + 1, IPC_CREAT).is_err());
    }
}
