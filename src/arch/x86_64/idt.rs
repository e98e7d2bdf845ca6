//! Interrupt Descriptor Table.
//!
//! Os stubs em assembly (`interrupts.s`) empilham o `TrapFrame` e chamam
//! `interrupt_dispatch`; aqui ficam a tabela, o carregamento e os
//! registros de handlers por vetor.

use super::gdt::KERNEL_CODE_SEL;
use crate::sync::Spinlock;
use core::mem::size_of;

/// Estado salvo pela entrada de interrupção, na ordem exata dos pushes do
/// assembly. O dispatcher pode modificá-lo (inclusive trocar a stack de
/// retorno no caminho do timer).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,

    /// Número do vetor (empilhado pelo stub).
    pub vector: u64,
    /// Error code da CPU ou 0.
    pub error_code: u64,

    // Frame de hardware
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Handler de exceção (vetores 0-31).
pub type ExceptionHandler = fn(&mut TrapFrame);

/// Handler de IRQ (vetores 32-47, sem acesso ao frame).
pub type IrqHandler = fn();

static EXCEPTION_HANDLERS: Spinlock<[Option<ExceptionHandler>; 32]> = Spinlock::new([None; 32]);
static IRQ_HANDLERS: Spinlock<[Option<IrqHandler>; 16]> = Spinlock::new([None; 16]);

/// Registra um handler de exceção pelo número do vetor.
pub fn register_exception(vector: usize, handler: ExceptionHandler) {
    if vector < 32 {
        EXCEPTION_HANDLERS.lock()[vector] = Some(handler);
    }
}

/// Registra um handler para a IRQ (0-15).
pub fn register_irq(irq: usize, handler: IrqHandler) {
    if irq < 16 {
        IRQ_HANDLERS.lock()[irq] = Some(handler);
    }
}

pub(super) fn exception_handler(vector: usize) -> Option<ExceptionHandler> {
    EXCEPTION_HANDLERS.lock()[vector]
}

pub(super) fn irq_handler(irq: usize) -> Option<IrqHandler> {
    IRQ_HANDLERS.lock()[irq]
}

/// Uma entrada da IDT (gate de interrupção de 64 bits).
#[derive(Clone, Copy)]
#[repr(C)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    ist: u8,
    type_attr: u8,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            ist: 0,
            type_attr: 0,
            offset_mid: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    fn set(&mut self, handler: u64, dpl: u8) {
        self.offset_low = handler as u16;
        self.selector = KERNEL_CODE_SEL.0;
        self.ist = 0;
        // present | DPL | interrupt gate (0xE)
        self.type_attr = 0x8E | ((dpl & 0x3) << 5);
        self.offset_mid = (handler >> 16) as u16;
        self.offset_high = (handler >> 32) as u32;
        self.reserved = 0;
    }
}

static mut IDT: [IdtEntry; 256] = [IdtEntry::missing(); 256];

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u64,
}

/// Instala os stubs e carrega a IDT.
pub fn init() {
    #[cfg(target_os = "none")]
    unsafe {
        use core::ptr::addr_of;

        for (vector, stub) in super::interrupts::stub_table() {
            IDT[vector].set(stub, 0);
        }

        let ptr = IdtPointer {
            limit: (size_of::<[IdtEntry; 256]>() - 1) as u16,
            base: addr_of!(IDT) as u64,
        };
        core::arch::asm!("lidt [{}]", in(reg) &ptr);
    }
    crate::kdebug!("(IDT) Carregada");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trapframe_layout() {
        // O assembly depende destes offsets
        assert_eq!(core::mem::size_of::<TrapFrame>(), 22 * 8);
        let f = core::mem::offset_of!(TrapFrame, vector);
        assert_eq!(f, 15 * 8);
        assert_eq!(core::mem::offset_of!(TrapFrame, rip), 17 * 8);
    }

    #[test]
    fn test_idt_entry_encoding() {
        let mut e = IdtEntry::missing();
        e.set(0x1122_3344_5566_7788, 0);
        assert_eq!(e.offset_low, 0x7788);
        assert_eq!(e.offset_mid, 0x5566);
        assert_eq!(e.offset_high, 0x1122_3344);
        assert_eq!(e.type_attr, 0x8E);
    }

    #[test]
    fn test_register_exception() {
        fn h(_f: &mut TrapFrame) {}
        register_exception(3, h);
        assert!(exception_handler(3).is_some());
        assert!(exception_handler(4).is_none());
    }
}
