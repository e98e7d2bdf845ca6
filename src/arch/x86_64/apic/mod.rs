//! Roteamento de interrupções: PIC legado ↔ APIC.
//!
//! No boot o PIC 8259 é remapeado (IRQ 0-15 → vetores 32-47) e fica como
//! controlador ativo. Se o firmware descrever um APIC na MADT, o kernel
//! migra: mascara o PIC de vez, habilita o LAPIC pelo registrador de vetor
//! espúrio, programa a tabela de redirecionamento do I/O APIC a partir dos
//! overrides ISA e calibra o timer do LAPIC contra o PIT.

pub mod ioapic;
pub mod lapic;
pub mod pic;

use super::acpi;
use crate::core::time::TICK_HZ;
use core::sync::atomic::{AtomicBool, Ordering};

/// `true` depois da migração para APIC.
static APIC_MODE: AtomicBool = AtomicBool::new(false);

/// Controlador ativo no momento.
pub fn apic_active() -> bool {
    APIC_MODE.load(Ordering::Relaxed)
}

/// Sobe o roteamento de interrupções.
///
/// Sempre começa em modo PIC (com timer do PIT); migra para APIC se a
/// plataforma tiver um descrito nas tabelas ACPI.
pub fn init() {
    unsafe {
        pic::init();
        // Timer, teclado, cascata e mouse destravados no modo legado
        pic::unmask(0);
        pic::unmask(1);
        pic::unmask(2);
        pic::unmask(12);
    }

    match acpi::find_madt() {
        Some(madt) => {
            crate::kinfo!("(APIC) MADT encontrada, migrando para APIC");
            unsafe {
                pic::mask_all();
                lapic::init(madt.lapic_addr);
                ioapic::init(madt.ioapic_addr, &madt);
                lapic::calibrate_timer(TICK_HZ as u32);
            }
            APIC_MODE.store(true, Ordering::Relaxed);
            crate::kok!("(APIC) Modo APIC ativo");
        }
        None => {
            crate::kwarn!("(APIC) Sem MADT, permanecendo no PIC legado");
            crate::core::time::pit::init(TICK_HZ as u32);
        }
    }
}

/// End of Interrupt para a IRQ dada, no controlador ativo.
#[inline]
pub fn eoi(irq: u8) {
    if apic_active() {
        unsafe { lapic::eoi() };
    } else {
        unsafe { pic::eoi(irq) };
    }
}

/// Destrava uma IRQ no controlador ativo.
pub fn unmask_irq(irq: u8) {
    if apic_active() {
        ioapic::unmask(irq);
    } else {
        unsafe { pic::unmask(irq) };
    }
}

/// Mascara uma IRQ no controlador ativo.
pub fn mask_irq(irq: u8) {
    if apic_active() {
        ioapic::mask(irq);
    } else {
        unsafe { pic::mask(irq) };
    }
}
