//! Local APIC.
//!
//! Registradores via MMIO (base padrão 0xFEE00000, identity-mapped).
//! Responsável pelo EOI em modo APIC e pelo timer local calibrado contra
//! o PIT.

use crate::arch::x86_64::cpu::Cpu;
use crate::arch::x86_64::interrupts::{VEC_SPURIOUS, VEC_TIMER};
use crate::core::time::pit;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};
use volatile::VolatilePtr;

const IA32_APIC_BASE_MSR: u32 = 0x1B;
const APIC_ENABLE_BIT: u64 = 1 << 11;

// Offsets MMIO
const REG_EOI: usize = 0x0B0;
const REG_SVR: usize = 0x0F0;
const REG_LVT_TIMER: usize = 0x320;
const REG_TICR: usize = 0x380; // Timer Initial Count
const REG_TCCR: usize = 0x390; // Timer Current Count
const REG_TDCR: usize = 0x3E0; // Timer Divide Config

const SVR_SOFT_ENABLE: u32 = 1 << 8;
const LVT_MASKED: u32 = 1 << 16;
const LVT_PERIODIC: u32 = 1 << 17;
const TDCR_DIV_16: u32 = 0x3;

static LAPIC_BASE: AtomicU64 = AtomicU64::new(0xFEE0_0000);

#[inline]
fn reg(offset: usize) -> VolatilePtr<'static, u32> {
    let addr = LAPIC_BASE.load(Ordering::Relaxed) + offset as u64;
    unsafe { VolatilePtr::new(NonNull::new_unchecked(addr as *mut u32)) }
}

#[inline]
unsafe fn write(offset: usize, value: u32) {
    reg(offset).write(value);
}

#[inline]
unsafe fn read(offset: usize) -> u32 {
    reg(offset).read()
}

/// Habilita o LAPIC: bit global no MSR + software-enable no SVR.
///
/// # Safety
///
/// Ring 0, base MMIO identity-mapped, uma vez por core.
pub unsafe fn init(base: u64) {
    LAPIC_BASE.store(base, Ordering::Relaxed);

    let msr = Cpu::read_msr(IA32_APIC_BASE_MSR);
    if msr & APIC_ENABLE_BIT == 0 {
        Cpu::write_msr(IA32_APIC_BASE_MSR, msr | APIC_ENABLE_BIT);
    }

    // Software enable + vetor espúrio
    write(REG_SVR, SVR_SOFT_ENABLE | VEC_SPURIOUS as u32);

    // Timer mascarado até a calibração
    write(REG_LVT_TIMER, LVT_MASKED);

    // Limpar qualquer EOI pendente de estado anterior
    write(REG_EOI, 0);

    crate::kdebug!("(LAPIC) Habilitado em ", base);
}

/// End of Interrupt.
#[inline]
pub unsafe fn eoi() {
    write(REG_EOI, 0);
}

/// Calibra o timer contra o PIT (amostra de 10 ms) e o deixa periódico na
/// frequência pedida, no vetor do timer do scheduler.
///
/// # Safety
///
/// LAPIC já habilitado; PIT livre para one-shot no canal 2.
pub unsafe fn calibrate_timer(hz: u32) {
    write(REG_TDCR, TDCR_DIV_16);

    // Contagem livre durante a amostra do PIT
    write(REG_TICR, u32::MAX);
    pit::one_shot_start(10);
    pit::one_shot_wait();
    let elapsed = u32::MAX - read(REG_TCCR);

    // Parar e reprogramar periódico: elapsed ticks ≙ 10ms
    write(REG_LVT_TIMER, LVT_MASKED);
    let per_tick = (elapsed * 100) / hz;
    write(REG_TICR, per_tick.max(1));
    write(REG_LVT_TIMER, LVT_PERIODIC | VEC_TIMER as u32);

    crate::kinfo!("(LAPIC) Timer calibrado, contagem=", per_tick as u64);
}
