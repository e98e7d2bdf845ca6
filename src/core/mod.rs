//! Núcleo do kernel: handoff do bootloader, logging, relógio e entrada.

pub mod entry;
pub mod handoff;
pub mod logging;
pub mod time;
