//! Parse de ELF64 (executáveis estáticos).

use super::{ExecError, Image, Segment};

const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 0x3E;
const PT_LOAD: u32 = 1;

const PF_W: u32 = 2;
const PF_X: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy)]
struct Elf64Header {
    ident: [u8; 16],
    e_type: u16,
    machine: u16,
    version: u32,
    entry: u64,
    phoff: u64,
    shoff: u64,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Elf64Phdr {
    p_type: u32,
    p_flags: u32,
    offset: u64,
    vaddr: u64,
    paddr: u64,
    filesz: u64,
    memsz: u64,
    align: u64,
}

fn read_at<T: Copy>(bytes: &[u8], offset: usize) -> Result<T, ExecError> {
    if offset + core::mem::size_of::<T>() > bytes.len() {
        return Err(ExecError::Truncated);
    }
    Ok(unsafe { core::ptr::read_unaligned(bytes.as_ptr().add(offset) as *const T) })
}

/// Valida o cabeçalho e extrai os PT_LOAD.
pub fn parse(bytes: &[u8]) -> Result<Image, ExecError> {
    let header: Elf64Header = read_at(bytes, 0)?;

    if &header.ident[..4] != b"\x7FELF" {
        return Err(ExecError::BadMagic);
    }
    if header.ident[4] != ELFCLASS64 || header.ident[5] != ELFDATA2LSB {
        return Err(ExecError::BadArch);
    }
    if header.machine != EM_X86_64 {
        return Err(ExecError::BadArch);
    }
    if header.e_type != ET_EXEC {
        return Err(ExecError::BadType);
    }

    let mut image = Image::new(header.entry);
    for i in 0..header.phnum as usize {
        let off = header.phoff as usize + i * header.phentsize as usize;
        let ph: Elf64Phdr = read_at(bytes, off)?;
        if ph.p_type != PT_LOAD || ph.memsz == 0 {
            continue;
        }
        if ph.filesz > ph.memsz {
            return Err(ExecError::Truncated);
        }
        image.push(Segment {
            vaddr: ph.vaddr,
            mem_size: ph.memsz,
            file_size: ph.filesz,
            file_offset: ph.offset,
            writable: ph.p_flags & PF_W != 0,
            executable: ph.p_flags & PF_X != 0,
        })?;
    }
    Ok(image)
}
