//! Relógio do kernel (jiffies).
//!
//! O tick do timer (PIT ou LAPIC timer) incrementa o contador global.
//! Deadlines de sleep, `/proc/uptime` e a retransmissão do TCP leem daqui.

pub mod pit;

use core::sync::atomic::{AtomicU64, Ordering};

/// Frequência do tick do scheduler.
pub const TICK_HZ: u64 = 100;

static JIFFIES: AtomicU64 = AtomicU64::new(0);

/// Incrementa o contador global. Chamado SOMENTE pelo handler do timer.
#[inline]
pub fn tick() {
    JIFFIES.fetch_add(1, Ordering::Relaxed);
}

/// Ticks desde o boot.
#[inline]
pub fn jiffies() -> u64 {
    JIFFIES.load(Ordering::Relaxed)
}

/// Milissegundos desde o boot.
#[inline]
pub fn uptime_ms() -> u64 {
    jiffies() * 1000 / TICK_HZ
}

/// Converte milissegundos em ticks (arredonda para cima).
#[inline]
pub fn ms_to_ticks(ms: u64) -> u64 {
    (ms * TICK_HZ + 999) / 1000
}

#[cfg(test)]
pub(crate) fn test_reset() {
    JIFFIES.store(0, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_to_ticks() {
        assert_eq!(ms_to_ticks(0), 0);
        assert_eq!(ms_to_ticks(10), 1);
        assert_eq!(ms_to_ticks(15), 2);
        assert_eq!(ms_to_ticks(1000), TICK_HZ);
    }
}
