//! Brasa Kernel Library.
//!
//! Ponto central de exportação dos módulos do Kernel.
//! Define a estrutura hierárquica do sistema operacional.

#![no_std]
#![allow(clippy::needless_range_loop)]

// Habilitar alocação dinâmica (necessário para Vec/Box/Arc)
extern crate alloc;

#[cfg(test)]
extern crate std;

// --- Módulos de Baixo Nível (Hardware) ---
pub mod arch; // HAL (CPU, GDT, IDT, APIC, Syscall MSRs)
pub mod drivers; // Drivers (Serial, PIT, RAM-disk)

// --- Módulos Centrais (Lógica do Kernel) ---
pub mod core; // Inicialização, Handoff, Logging, Tempo
pub mod klib; // Utilitários internos (bitmaps, align, PRNG)
pub mod mm; // Gerenciamento de Memória (PMM, VMM, Heap)
pub mod sync; // Primitivas de Sincronização (Spinlock)

// --- Subsistemas Avançados ---
pub mod blk; // Dispositivos de bloco + cache LRU
pub mod fs; // Sistema de Arquivos Virtual (VFS)
pub mod ipc; // Pipes e Memória Compartilhada
pub mod net; // Ethernet / ARP / IPv4 / ICMP / TCP
pub mod sched; // Scheduler, Processos, Sinais, Loader
pub mod syscall; // Interface com Userspace

mod panic;

// Re-exportar BootInfo para acesso fácil no binário
pub use crate::core::handoff::BootInfo;
