//! Heap do kernel.
//!
//! Alocador de lista encadeada (`linked_list_allocator`) servindo `Box`,
//! `Vec` e `String` dentro do kernel: objetos administrativos que
//! sobrevivem a uma syscall (PCBs, buffers de pipe, metadados de cache).
//! Fragmentação é aceitável na escala do kernel; falha de alocação crítica
//! é propagada pelos chamadores.
//!
//! A janela virtual (`config::HEAP_VIRT_BASE`) é mapeada pelo VMM durante
//! `mm::init`, antes deste módulo subir.

#[cfg(all(target_os = "none", not(test)))]
use linked_list_allocator::LockedHeap;

#[cfg(all(target_os = "none", not(test)))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Entrega a janela já mapeada ao alocador. Chamar UMA vez.
pub fn init() {
    #[cfg(all(target_os = "none", not(test)))]
    unsafe {
        use crate::mm::config::{HEAP_SIZE, HEAP_VIRT_BASE};
        ALLOCATOR
            .lock()
            .init(HEAP_VIRT_BASE as *mut u8, HEAP_SIZE);
        crate::kinfo!("(HEAP) Janela de ", HEAP_SIZE as u64);
    }
}

/// Bytes livres no heap do kernel (0 em build de host).
pub fn free_bytes() -> usize {
    #[cfg(all(target_os = "none", not(test)))]
    {
        return ALLOCATOR.lock().free();
    }
    #[cfg(not(all(target_os = "none", not(test))))]
    {
        0
    }
}
