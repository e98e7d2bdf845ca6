//! Inicialização do kernel em ordem de dependência.
//!
//! O trampolim de boot (externo) entra em long mode, deixa o magic do
//! Multiboot e o endereço da estrutura de info nos dois primeiros
//! registradores de argumento e salta para cá.

use crate::arch::x86_64::{apic, gdt, idt, syscall};
use crate::arch::Cpu;
use crate::core::handoff::BootInfo;
use crate::{blk, drivers, fs, mm, net, sched};
use alloc::sync::Arc;

/// Setores do RAM-disk inicial (1 MiB).
const RAMDISK_SECTORS: usize = 2048;

/// Ponto principal: sobe cada subsistema e vira o processo idle.
pub fn kernel_main(magic: u32, info_addr: u64) -> ! {
    drivers::serial::init();
    crate::kinfo!("=== Brasa OS ===");
    crate::kinfo!("(BOOT) Magic=", magic as u64);

    let boot = match unsafe { BootInfo::from_raw(magic, info_addr) } {
        Some(b) => b,
        None => {
            crate::kerror!("(BOOT) Handoff Multiboot invalido");
            Cpu::hang();
        }
    };
    if let Some(fb) = boot.framebuffer() {
        crate::kdebug!("(BOOT) Framebuffer em ", fb.addr);
    }

    // Segmentação + vetores antes de qualquer exceção
    gdt::init();
    idt::init();

    // Memória: PMM -> VMM -> Heap (daqui em diante Box/Vec funcionam)
    mm::init(&boot);

    crate::klib::rand::seed(Cpu::rdtsc());

    // Caminho rápido de syscall e tabela de processos
    unsafe { syscall::init() };
    sched::init();

    // Subsistemas de I/O
    fs::init();
    let ramdisk = Arc::new(drivers::ramdisk::RamDisk::new(RAMDISK_SECTORS));
    let disk0 = blk::register(ramdisk);
    // Disco com imagem ext2 ganha um mount somente-leitura em /mnt
    match fs::ext2::Ext2Fs::new(disk0) {
        Ok(ext2) => {
            let _ = fs::vfs::mount("/mnt", alloc::boxed::Box::new(ext2));
            crate::kok!("(FS) ext2 montado em /mnt (ro)");
        }
        Err(_) => crate::kdebug!("(FS) disco 0 sem ext2, seguindo sem /mnt"),
    }
    net::init();

    // Controladores de interrupção + timer por último: a partir daqui o
    // tick preempta
    apic::init();

    #[cfg(feature = "self_test")]
    run_self_tests();

    crate::kok!("(BOOT) Kernel no ar, habilitando interrupcoes");
    Cpu::enable_interrupts();

    // PCB 0: idle. Tudo que há para fazer é esperar o próximo tick.
    loop {
        Cpu::halt();
    }
}

#[cfg(feature = "self_test")]
fn run_self_tests() {
    crate::kinfo!("(TEST) Rodando self tests in-kernel");
    mm::selftest::run();
}
