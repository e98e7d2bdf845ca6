//! Gerenciamento de Memória.
//!
//! Ordem de inicialização: PMM (bitmap de quadros) → VMM (árvore de
//! paginação do kernel) → Heap. Nada aqui pode alocar antes do heap subir.

pub mod addr;
pub mod config;
pub mod heap;
pub mod pmm;
pub mod vmm;

#[cfg(feature = "self_test")]
pub mod selftest;

pub use addr::{PhysAddr, VirtAddr};

use crate::core::handoff::BootInfo;

/// Sobe PMM, VMM e Heap, nessa ordem.
pub fn init(boot: &BootInfo) {
    crate::kinfo!("(MM) Inicializando gerenciamento de memoria...");
    pmm::init(boot);
    vmm::init();
    heap::init();
    crate::kok!("(MM) PMM + VMM + Heap prontos");
}

/// Estatísticas agregadas para meminfo/procfs.
pub struct MemStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
}

pub fn stats() -> MemStats {
    let total = pmm::total_bytes();
    let free = pmm::free_bytes();
    MemStats {
        total_bytes: total,
        free_bytes: free,
        used_bytes: total - free,
    }
}
