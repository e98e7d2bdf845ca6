//! Handoff do bootloader (Multiboot 1).
//!
//! O trampolim de boot deixa em EAX o magic `0x2BADB002` e em EBX o
//! endereço físico da estrutura de informações. Como os primeiros 4 GiB são
//! identity-mapped, os ponteiros físicos podem ser derreferenciados direto.

use core::mem::size_of;

/// Magic que o loader Multiboot 1 deixa em EAX.
pub const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

/// Tipo de região usável no memory map.
pub const MMAP_TYPE_AVAILABLE: u32 = 1;

// Bits do campo `flags`
const FLAG_MEM: u32 = 1 << 0;
const FLAG_MMAP: u32 = 1 << 6;
const FLAG_FRAMEBUFFER: u32 = 1 << 12;

/// Estrutura de informações Multiboot 1 (layout fixo do protocolo).
#[repr(C, packed)]
pub struct MultibootInfo {
    pub flags: u32,
    pub mem_lower: u32,
    pub mem_upper: u32,
    pub boot_device: u32,
    pub cmdline: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
    pub syms: [u32; 4],
    pub mmap_length: u32,
    pub mmap_addr: u32,
    pub drives_length: u32,
    pub drives_addr: u32,
    pub config_table: u32,
    pub boot_loader_name: u32,
    pub apm_table: u32,
    pub vbe_control_info: u32,
    pub vbe_mode_info: u32,
    pub vbe_mode: u16,
    pub vbe_interface_seg: u16,
    pub vbe_interface_off: u16,
    pub vbe_interface_len: u16,
    pub framebuffer_addr: u64,
    pub framebuffer_pitch: u32,
    pub framebuffer_width: u32,
    pub framebuffer_height: u32,
    pub framebuffer_bpp: u8,
    pub framebuffer_type: u8,
    pub color_info: [u8; 6],
}

/// Uma entrada do memory map.
///
/// O campo `size` NÃO se conta a si próprio: a próxima entrada está em
/// `entry + size + 4`.
#[repr(C, packed)]
pub struct MmapEntry {
    pub size: u32,
    pub base: u64,
    pub len: u64,
    pub typ: u32,
}

/// Região de memória já decodificada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub len: u64,
    pub usable: bool,
}

/// Descritor do framebuffer linear.
#[derive(Debug, Clone, Copy)]
pub struct Framebuffer {
    pub addr: u64,
    pub pitch: u32,
    pub width: u32,
    pub height: u32,
    pub bpp: u8,
}

/// Visão validada do handoff.
pub struct BootInfo {
    info: &'static MultibootInfo,
}

impl BootInfo {
    /// Valida o magic e embrulha a estrutura física.
    ///
    /// # Safety
    ///
    /// `info_addr` deve apontar para uma estrutura Multiboot 1 válida e
    /// identity-mapped durante toda a vida do kernel.
    pub unsafe fn from_raw(magic: u32, info_addr: u64) -> Option<Self> {
        if magic != MULTIBOOT_BOOTLOADER_MAGIC || info_addr == 0 {
            return None;
        }
        Some(Self {
            info: &*(info_addr as *const MultibootInfo),
        })
    }

    /// `mem_lower`/`mem_upper` em KiB, se presentes.
    pub fn basic_mem(&self) -> Option<(u32, u32)> {
        if self.info.flags & FLAG_MEM != 0 {
            Some((self.info.mem_lower, self.info.mem_upper))
        } else {
            None
        }
    }

    /// Itera as entradas do memory map.
    pub fn memory_regions(&self) -> MemoryRegionIter {
        let (addr, len) = if self.info.flags & FLAG_MMAP != 0 {
            (self.info.mmap_addr as u64, self.info.mmap_length as u64)
        } else {
            (0, 0)
        };
        MemoryRegionIter {
            cursor: addr,
            end: addr + len,
        }
    }

    /// Maior endereço físico usável + 1 (fim da RAM endereçada).
    pub fn phys_limit(&self) -> u64 {
        let mut limit = 0u64;
        for r in self.memory_regions() {
            let end = r.base + r.len;
            if end > limit {
                limit = end;
            }
        }
        if limit == 0 {
            // Sem mmap: cair para mem_upper
            if let Some((_, upper_kib)) = self.basic_mem() {
                limit = 0x10_0000 + (upper_kib as u64) * 1024;
            }
        }
        limit
    }

    /// Framebuffer linear, se o loader configurou um.
    pub fn framebuffer(&self) -> Option<Framebuffer> {
        if self.info.flags & FLAG_FRAMEBUFFER == 0 {
            return None;
        }
        Some(Framebuffer {
            addr: self.info.framebuffer_addr,
            pitch: self.info.framebuffer_pitch,
            width: self.info.framebuffer_width,
            height: self.info.framebuffer_height,
            bpp: self.info.framebuffer_bpp,
        })
    }
}

/// Iterador sobre o memory map físico.
pub struct MemoryRegionIter {
    cursor: u64,
    end: u64,
}

impl Iterator for MemoryRegionIter {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<MemoryRegion> {
        if self.cursor + (size_of::<MmapEntry>() as u64) > self.end {
            return None;
        }
        let entry = unsafe { &*(self.cursor as *const MmapEntry) };
        let size = entry.size;
        let region = MemoryRegion {
            base: entry.base,
            len: entry.len,
            usable: entry.typ == MMAP_TYPE_AVAILABLE,
        };
        self.cursor += size as u64 + 4;
        Some(region)
    }
}
