//! Brasa OS: binário principal.
//!
//! O trampolim de boot (externo ao kernel) já deixou a CPU em long mode
//! com identity map provisório e entra em `_start` com o magic Multiboot
//! em RDI e o endereço físico da estrutura de info em RSI. Aqui só se
//! configura a stack inicial e salta para `core::entry::kernel_main`; o
//! BSS chega zerado pelo loader ELF.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod boot {
    /// Stack do boot (64 KiB), usada até o scheduler assumir.
    #[repr(align(16))]
    struct BootStack([u8; 64 * 1024]);

    #[no_mangle]
    static BOOT_STACK: BootStack = BootStack([0; 64 * 1024]);

    core::arch::global_asm!(
        r#"
.global _start
.section .text._start
_start:
    // Stack inicial (cresce para baixo a partir do topo do buffer)
    lea rax, [rip + BOOT_STACK]
    lea rsp, [rax + {stack_size}]
    xor rbp, rbp

    // (magic, info_addr) já estão em RDI/RSI
    call kernel_entry
2:
    cli
    hlt
    jmp 2b
"#,
        stack_size = const 64 * 1024
    );

    #[no_mangle]
    extern "C" fn kernel_entry(magic: u64, info_addr: u64) -> ! {
        brasa::core::entry::kernel_main(magic as u32, info_addr)
    }
}

/// Build de host (ferramentas/testes): nada a executar.
#[cfg(not(target_os = "none"))]
fn main() {}
