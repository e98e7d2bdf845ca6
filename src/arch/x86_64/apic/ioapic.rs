//! I/O APIC.
//!
//! Par de registradores indexados (IOREGSEL/IOWIN) via MMIO. A tabela de
//! redirecionamento é limpa e depois populada com as IRQs ISA, aplicando
//! os interrupt overrides da MADT (linha → GSI, polaridade, trigger).

use crate::arch::x86_64::acpi::MadtInfo;
use crate::arch::x86_64::interrupts::IRQ_BASE;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};
use volatile::VolatilePtr;

const IOREGSEL: usize = 0x00;
const IOWIN: usize = 0x10;

const REG_VER: u32 = 0x01;
const REG_REDTBL_BASE: u32 = 0x10;

const RED_MASKED: u64 = 1 << 16;
const RED_LEVEL: u64 = 1 << 15;
const RED_ACTIVE_LOW: u64 = 1 << 13;

static IOAPIC_BASE: AtomicU64 = AtomicU64::new(0xFEC0_0000);

/// GSI efetivo de cada IRQ ISA depois dos overrides.
static GSI_FOR_IRQ: crate::sync::Spinlock<[u32; 16]> = crate::sync::Spinlock::new([0; 16]);

unsafe fn mmio(offset: usize) -> VolatilePtr<'static, u32> {
    let addr = IOAPIC_BASE.load(Ordering::Relaxed) + offset as u64;
    VolatilePtr::new(NonNull::new_unchecked(addr as *mut u32))
}

unsafe fn read(reg: u32) -> u32 {
    mmio(IOREGSEL).write(reg);
    mmio(IOWIN).read()
}

unsafe fn write(reg: u32, value: u32) {
    mmio(IOREGSEL).write(reg);
    mmio(IOWIN).write(value);
}

unsafe fn write_redirect(gsi: u32, entry: u64) {
    write(REG_REDTBL_BASE + gsi * 2, entry as u32);
    write(REG_REDTBL_BASE + gsi * 2 + 1, (entry >> 32) as u32);
}

/// Número de entradas da tabela de redirecionamento.
unsafe fn redirect_entries() -> u32 {
    ((read(REG_VER) >> 16) & 0xFF) + 1
}

/// Limpa a tabela e instala as IRQs ISA com os overrides aplicados.
///
/// # Safety
///
/// MMIO identity-mapped; chamar uma vez, na migração para APIC.
pub unsafe fn init(base: u64, madt: &MadtInfo) {
    IOAPIC_BASE.store(base, Ordering::Relaxed);

    // 1. Mascarar tudo
    let entries = redirect_entries();
    for gsi in 0..entries {
        write_redirect(gsi, RED_MASKED);
    }

    // 2. IRQs ISA 0-15: identidade, exceto onde a MADT manda diferente
    let mut gsi_map = GSI_FOR_IRQ.lock();
    for irq in 0u8..16 {
        let (gsi, flags) = madt.override_for(irq).unwrap_or((irq as u32, 0));
        gsi_map[irq as usize] = gsi;

        let mut entry = (IRQ_BASE as u64 + irq as u64) | RED_MASKED;
        // Bits de polaridade/trigger dos overrides ISA (estilo MPS)
        if flags & 0x3 == 0x3 {
            entry |= RED_ACTIVE_LOW;
        }
        if (flags >> 2) & 0x3 == 0x3 {
            entry |= RED_LEVEL;
        }
        if gsi < entries {
            write_redirect(gsi, entry);
        }
    }
    drop(gsi_map);

    // 3. Destravar o essencial: timer, teclado, mouse
    unmask(0);
    unmask(1);
    unmask(12);

    crate::kdebug!("(IOAPIC) Tabela programada, entradas=", entries as u64);
}

fn with_gsi(irq: u8, f: impl FnOnce(u32)) {
    if irq < 16 {
        let gsi = GSI_FOR_IRQ.lock()[irq as usize];
        f(gsi);
    }
}

pub fn unmask(irq: u8) {
    with_gsi(irq, |gsi| unsafe {
        let lo = read(REG_REDTBL_BASE + gsi * 2) as u64;
        write(REG_REDTBL_BASE + gsi * 2, (lo & !RED_MASKED) as u32);
    });
}

pub fn mask(irq: u8) {
    with_gsi(irq, |gsi| unsafe {
        let lo = read(REG_REDTBL_BASE + gsi * 2) as u64;
        write(REG_REDTBL_BASE + gsi * 2, (lo | RED_MASKED) as u32);
    });
}
