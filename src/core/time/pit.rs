//! PIT 8253/8254 (canal 0 = tick, canal 2 = calibração).

use crate::arch::x86_64::ports::{inb, outb};

const PIT_BASE_HZ: u32 = 1_193_182;

const CH0_DATA: u16 = 0x40;
const CH2_DATA: u16 = 0x42;
const CMD: u16 = 0x43;
const SPEAKER_GATE: u16 = 0x61;

/// Programa o canal 0 em modo rate-generator na frequência pedida.
pub fn init(hz: u32) {
    let divisor = (PIT_BASE_HZ / hz).clamp(1, 65535) as u16;
    unsafe {
        outb(CMD, 0x36); // canal 0, lobyte/hibyte, modo 3
        outb(CH0_DATA, (divisor & 0xFF) as u8);
        outb(CH0_DATA, (divisor >> 8) as u8);
    }
    crate::kdebug!("(PIT) Canal 0 programado, divisor=", divisor as u64);
}

/// Arma o canal 2 em one-shot para `ms` milissegundos.
///
/// Usado na calibração do LAPIC timer: arma, espera o terminal count e lê
/// quanto o LAPIC contou nesse intervalo.
pub unsafe fn one_shot_start(ms: u32) {
    let ticks = (PIT_BASE_HZ / 1000) * ms;
    debug_assert!(ticks <= 65535, "one-shot do PIT limitado a ~54ms");

    // Gate do canal 2 ligado, speaker desligado
    let gate = inb(SPEAKER_GATE);
    outb(SPEAKER_GATE, (gate & !0x02) | 0x01);

    outb(CMD, 0xB0); // canal 2, lobyte/hibyte, modo 0
    outb(CH2_DATA, (ticks & 0xFF) as u8);
    outb(CH2_DATA, (ticks >> 8) as u8);
}

/// Espera o one-shot do canal 2 expirar (busy-wait).
pub unsafe fn one_shot_wait() {
    // Bit 5 da porta 0x61 = saída do canal 2
    while inb(SPEAKER_GATE) & 0x20 == 0 {
        core::hint::spin_loop();
    }
}
