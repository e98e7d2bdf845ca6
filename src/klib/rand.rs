//! PRNG do kernel (xorshift64*).
//!
//! Alimenta `/dev/random` e a geração de ISS do TCP. NÃO é
//! criptograficamente seguro.

use core::sync::atomic::{AtomicU64, Ordering};

static STATE: AtomicU64 = AtomicU64::new(0x9E3779B97F4A7C15);

/// Mistura bytes externos no estado (ex: writes em /dev/random).
pub fn mix(bytes: &[u8]) {
    let mut acc = STATE.load(Ordering::Relaxed);
    for &b in bytes {
        acc = acc.rotate_left(7) ^ (b as u64) ^ acc.wrapping_mul(0x2545F4914F6CDD1D);
    }
    STATE.store(acc | 1, Ordering::Relaxed);
}

/// Semente adicional (TSC no boot).
pub fn seed(v: u64) {
    STATE.fetch_xor(v | 1, Ordering::Relaxed);
}

/// Próximo valor de 64 bits.
pub fn next_u64() -> u64 {
    let mut x = STATE.load(Ordering::Relaxed);
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    STATE.store(x, Ordering::Relaxed);
    x.wrapping_mul(0x2545F4914F6CDD1D)
}

/// Próximo valor de 32 bits.
pub fn next_u32() -> u32 {
    (next_u64() >> 32) as u32
}

/// Preenche um buffer com bytes pseudo-aleatórios.
pub fn fill(buf: &mut [u8]) {
    let mut chunk = [0u8; 8];
    for (i, b) in buf.iter_mut().enumerate() {
        if i % 8 == 0 {
            chunk = next_u64().to_le_bytes();
        }
        *b = chunk[i % 8];
    }
}
