//! Physical Memory Manager: alocador de quadros por bitmap.
//!
//! Um bit por quadro de 4 KiB sobre toda a faixa física descoberta no
//! memory map do bootloader. O bitmap vive em memória baixa fixa
//! (`config::PMM_BITMAP_PHYS`), fora da imagem do kernel.
//!
//! Sequência de init: marca tudo usado → limpa as regiões tipo 1 (usáveis)
//! → re-marca a imagem do kernel e o próprio bitmap como usados.
//! A alocação é uma busca linear pelo primeiro bit livre.

use super::addr::PhysAddr;
use super::config::{
    KERNEL_PHYS_BASE, KERNEL_PHYS_CEIL, PAGE_SIZE, PMM_BITMAP_MAX_BYTES, PMM_BITMAP_PHYS,
};
use crate::core::handoff::BootInfo;
use crate::klib::bitmap::RawBitmap;
use crate::sync::Spinlock;

/// Alocador de quadros físicos.
///
/// A estrutura é separável do bitmap global para os testes poderem montar
/// uma instância sobre um buffer qualquer.
pub struct FrameAllocator {
    bitmap: RawBitmap,
    total_frames: usize,
    used_frames: usize,
    next_free: usize,
}

impl FrameAllocator {
    pub const fn empty() -> Self {
        Self {
            bitmap: RawBitmap::empty(),
            total_frames: 0,
            used_frames: 0,
            next_free: 0,
        }
    }

    /// Monta o alocador sobre `storage` cobrindo `total_frames` quadros,
    /// todos inicialmente marcados como usados.
    ///
    /// # Safety
    ///
    /// `storage` deve ter espaço para `total_frames` bits e ser de uso
    /// exclusivo deste alocador.
    pub unsafe fn init(&mut self, storage: *mut u64, total_frames: usize) {
        self.bitmap = RawBitmap::from_raw(storage, total_frames);
        self.bitmap.fill();
        self.total_frames = total_frames;
        self.used_frames = total_frames;
        self.next_free = 0;
    }

    /// Marca uma região `[base, base+len)` como livre.
    pub fn release_region(&mut self, base: u64, len: u64) {
        let first = (base as usize).div_ceil(PAGE_SIZE);
        let last = ((base + len) as usize) / PAGE_SIZE;
        for frame in first..last.min(self.total_frames) {
            if self.bitmap.test(frame) {
                self.bitmap.clear(frame);
                self.used_frames -= 1;
            }
        }
    }

    /// Marca uma região `[base, base+len)` como usada (kernel, bitmap).
    pub fn reserve_region(&mut self, base: u64, len: u64) {
        let first = (base as usize) / PAGE_SIZE;
        let last = ((base + len) as usize).div_ceil(PAGE_SIZE);
        for frame in first..last.min(self.total_frames) {
            if !self.bitmap.test(frame) {
                self.bitmap.set(frame);
                self.used_frames += 1;
            }
        }
    }

    /// Primeiro quadro livre, ou `None` se a memória física acabou.
    pub fn alloc(&mut self) -> Option<PhysAddr> {
        let frame = self.bitmap.find_first_clear(self.next_free)?;
        self.bitmap.set(frame);
        self.used_frames += 1;
        self.next_free = frame + 1;
        Some(PhysAddr::new((frame * PAGE_SIZE) as u64))
    }

    /// Devolve um quadro.
    pub fn free(&mut self, addr: PhysAddr) {
        let frame = addr.frame_index();
        if frame >= self.total_frames || !self.bitmap.test(frame) {
            crate::kwarn!("(PMM) free de quadro invalido: ", addr.as_u64());
            return;
        }
        self.bitmap.clear(frame);
        self.used_frames -= 1;
        if frame < self.next_free {
            self.next_free = frame;
        }
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn used_frames(&self) -> usize {
        self.used_frames
    }

    pub fn free_frames(&self) -> usize {
        self.total_frames - self.used_frames
    }
}

static PMM: Spinlock<FrameAllocator> = Spinlock::new(FrameAllocator::empty());

/// Constrói o bitmap global a partir do memory map do boot.
pub fn init(boot: &BootInfo) {
    let phys_limit = boot.phys_limit();
    let mut total_frames = (phys_limit / PAGE_SIZE as u64) as usize;

    // O bitmap reservado em memória baixa limita quantos quadros dá para
    // rastrear (128 KiB = 4 GiB de RAM).
    let max_frames = PMM_BITMAP_MAX_BYTES * 8;
    if total_frames > max_frames {
        crate::kwarn!("(PMM) RAM alem do rastreavel, truncando em 4GiB");
        total_frames = max_frames;
    }

    let mut pmm = PMM.lock();
    unsafe {
        pmm.init(PMM_BITMAP_PHYS as *mut u64, total_frames);
    }

    // 1. Liberar regiões usáveis
    for region in boot.memory_regions() {
        if region.usable {
            pmm.release_region(region.base, region.len);
        }
    }

    // 2. Re-reservar imagem do kernel (+ folga para mods do loader)
    pmm.reserve_region(KERNEL_PHYS_BASE, KERNEL_PHYS_CEIL - KERNEL_PHYS_BASE);

    // 3. Re-reservar o próprio bitmap e a página nula
    pmm.reserve_region(PMM_BITMAP_PHYS, PMM_BITMAP_MAX_BYTES as u64);
    pmm.reserve_region(0, PAGE_SIZE as u64);

    crate::kinfo!("(PMM) Quadros totais=", pmm.total_frames() as u64);
    crate::kinfo!("(PMM) Quadros livres=", pmm.free_frames() as u64);
}

/// Aloca um quadro físico de 4 KiB.
pub fn alloc_frame() -> Option<PhysAddr> {
    PMM.lock().alloc()
}

/// Aloca um quadro e o zera (via identity map).
pub fn alloc_zeroed_frame() -> Option<PhysAddr> {
    let frame = alloc_frame()?;
    #[cfg(target_os = "none")]
    unsafe {
        core::ptr::write_bytes(frame.as_u64() as *mut u8, 0, PAGE_SIZE);
    }
    Some(frame)
}

/// Devolve um quadro físico.
pub fn free_frame(addr: PhysAddr) {
    PMM.lock().free(addr);
}

pub fn total_bytes() -> u64 {
    (PMM.lock().total_frames() * PAGE_SIZE) as u64
}

pub fn free_bytes() -> u64 {
    (PMM.lock().free_frames() * PAGE_SIZE) as u64
}

pub fn used_frames() -> usize {
    PMM.lock().used_frames()
}

/// Reconstrói o PMM global sobre um buffer de teste, tudo livre.
/// "Endereços físicos" sintéticos: só contabilidade, nunca dereferenciados.
#[cfg(test)]
pub fn test_init(frames: usize) {
    let storage = alloc::vec![0u64; crate::klib::bitmap::RawBitmap::words_for(frames)].leak();
    let mut pmm = PMM.lock();
    unsafe {
        pmm.init(storage.as_mut_ptr(), frames);
    }
    pmm.release_region(0, (frames * PAGE_SIZE) as u64);
}
