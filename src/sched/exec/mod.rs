//! Loader de executáveis (ELF64 e PE32+).
//!
//! Valida o cabeçalho, mapeia os segmentos carregáveis no address space de
//! destino com as flags derivadas da proteção de cada segmento e devolve o
//! entry point. Os bytes vêm inteiros do VFS: segmentos são lidos nos
//! seus offsets reais, sem limite de primeira página.

pub mod elf;
pub mod pe;

use crate::mm::config::{PAGE_SIZE, USER_SPACE_BASE};
use crate::mm::{pmm, vmm, PhysAddr, VirtAddr};
use crate::syscall::error::SysError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    BadMagic,
    BadArch,
    BadType,
    Truncated,
    BadAddress,
    NoMemory,
}

impl From<ExecError> for SysError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::NoMemory => SysError::OutOfMemory,
            ExecError::BadAddress => SysError::BadAddress,
            _ => SysError::InvalidArgument,
        }
    }
}

/// Um segmento carregável já validado.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub vaddr: u64,
    pub mem_size: u64,
    pub file_size: u64,
    pub file_offset: u64,
    pub writable: bool,
    pub executable: bool,
}

/// Resultado do parse de uma imagem.
#[derive(Debug)]
pub struct Image {
    pub entry: u64,
    pub segments: [Option<Segment>; MAX_SEGMENTS],
    pub n_segments: usize,
}

pub const MAX_SEGMENTS: usize = 16;

impl Image {
    pub(super) fn new(entry: u64) -> Self {
        Self {
            entry,
            segments: [None; MAX_SEGMENTS],
            n_segments: 0,
        }
    }

    pub(super) fn push(&mut self, seg: Segment) -> Result<(), ExecError> {
        if seg.vaddr < USER_SPACE_BASE {
            return Err(ExecError::BadAddress);
        }
        if self.n_segments >= MAX_SEGMENTS {
            return Err(ExecError::Truncated);
        }
        self.segments[self.n_segments] = Some(seg);
        self.n_segments += 1;
        Ok(())
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments[..self.n_segments].iter().flatten()
    }
}

/// Detecta o formato e faz o parse.
pub fn parse(bytes: &[u8]) -> Result<Image, ExecError> {
    if bytes.len() >= 4 && &bytes[..4] == b"\x7FELF" {
        return elf::parse(bytes);
    }
    if bytes.len() >= 2 && &bytes[..2] == b"MZ" {
        return pe::parse(bytes);
    }
    Err(ExecError::BadMagic)
}

/// Carrega a imagem no address space `root`: parse + mapeamento + cópia.
pub fn load(bytes: &[u8], root: PhysAddr) -> Result<u64, ExecError> {
    let image = parse(bytes)?;
    for seg in image.segments() {
        map_segment(bytes, root, seg)?;
    }
    Ok(image.entry)
}

/// Mapeia um segmento página a página, copiando o conteúdo do arquivo e
/// zerando a cauda (BSS).
fn map_segment(bytes: &[u8], root: PhysAddr, seg: &Segment) -> Result<(), ExecError> {
    if (seg.file_offset + seg.file_size) as usize > bytes.len() {
        return Err(ExecError::Truncated);
    }

    let mut flags = vmm::PageFlags::USER;
    if seg.writable {
        flags |= vmm::PageFlags::WRITABLE;
    }
    if !seg.executable {
        flags |= vmm::PageFlags::NO_EXECUTE;
    }

    let start = seg.vaddr & !(PAGE_SIZE as u64 - 1);
    let end = seg.vaddr + seg.mem_size;
    let mut page = start;
    while page < end {
        let frame = pmm::alloc_zeroed_frame().ok_or(ExecError::NoMemory)?;
        vmm::map(root, VirtAddr::new(page), frame, flags).map_err(|_| ExecError::BadAddress)?;

        // Fatia do arquivo que cai nesta página (identity map: o quadro é
        // endereçável direto pelo seu endereço físico)
        #[cfg(target_os = "none")]
        {
            let page_end = page + PAGE_SIZE as u64;
            let copy_from = seg.vaddr.max(page);
            let copy_to = (seg.vaddr + seg.file_size).min(page_end);
            if copy_from < copy_to {
                let file_off = (seg.file_offset + (copy_from - seg.vaddr)) as usize;
                let len = (copy_to - copy_from) as usize;
                let dst = (frame.as_u64() + (copy_from - page)) as *mut u8;
                unsafe {
                    core::ptr::copy_nonoverlapping(bytes.as_ptr().add(file_off), dst, len);
                }
            }
        }
        page += PAGE_SIZE as u64;
    }
    Ok(())
}
