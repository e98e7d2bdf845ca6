//! Primitivas de Sincronização.
//!
//! Em um único núcleo, a exclusão mútua real vem de desabilitar
//! interrupções; o estado atômico existe para manter as invariantes caso o
//! kernel um dia vire SMP.

mod spinlock;

pub use spinlock::{Spinlock, SpinlockGuard};
