//! Dispatcher central de interrupções.
//!
//! Os stubs de `interrupts.s` entregam um `TrapFrame` completo; daqui sai
//! o roteamento: exceções para os handlers registrados (page fault é
//! obrigatório, o resto é fatal por padrão), IRQ 0 para o tick do
//! scheduler (que pode devolver OUTRA stack para o iretq) e as demais
//! IRQs para os handlers de dispositivo.

use super::apic;
use super::idt::{self, TrapFrame};
use crate::arch::Cpu;

#[cfg(target_os = "none")]
core::arch::global_asm!(include_str!("interrupts.s"));

/// Vetor base das IRQs remapeadas.
pub const IRQ_BASE: usize = 32;

/// Vetor do timer (IRQ 0).
pub const VEC_TIMER: usize = IRQ_BASE;

/// Vetor espúrio do LAPIC.
pub const VEC_SPURIOUS: usize = 0xFF;

/// Tabela (vetor, endereço do stub) montada a partir dos símbolos do
/// assembly. Só existe no alvo real.
#[cfg(target_os = "none")]
pub(super) fn stub_table() -> [(usize, u64); 49] {
    macro_rules! stubs {
        ($($vec:literal => $sym:ident),+ $(,)?) => {{
            extern "C" {
                $(fn $sym();)+
            }
            [$(($vec, $sym as usize as u64)),+]
        }};
    }
    stubs! {
        0 => isr_0, 1 => isr_1, 2 => isr_2, 3 => isr_3,
        4 => isr_4, 5 => isr_5, 6 => isr_6, 7 => isr_7,
        8 => isr_8, 9 => isr_9, 10 => isr_10, 11 => isr_11,
        12 => isr_12, 13 => isr_13, 14 => isr_14, 15 => isr_15,
        16 => isr_16, 17 => isr_17, 18 => isr_18, 19 => isr_19,
        20 => isr_20, 21 => isr_21, 22 => isr_22, 23 => isr_23,
        24 => isr_24, 25 => isr_25, 26 => isr_26, 27 => isr_27,
        28 => isr_28, 29 => isr_29, 30 => isr_30, 31 => isr_31,
        32 => isr_32, 33 => isr_33, 34 => isr_34, 35 => isr_35,
        36 => isr_36, 37 => isr_37, 38 => isr_38, 39 => isr_39,
        40 => isr_40, 41 => isr_41, 42 => isr_42, 43 => isr_43,
        44 => isr_44, 45 => isr_45, 46 => isr_46, 47 => isr_47,
        255 => isr_255,
    }
}

/// Ponto único de chegada das interrupções.
///
/// Retorna o RSP de onde o epílogo comum deve restaurar registradores e
/// fazer iretq: no caminho do timer pode ser a stack de OUTRO processo.
#[no_mangle]
extern "C" fn interrupt_dispatch(frame: *mut TrapFrame) -> u64 {
    let f = unsafe { &mut *frame };
    let vector = f.vector as usize;
    let mut resume_rsp = frame as u64;

    if vector < 32 {
        handle_exception(vector, f);
    } else if (IRQ_BASE..IRQ_BASE + 16).contains(&vector) {
        let irq = vector - IRQ_BASE;
        if vector == VEC_TIMER {
            crate::core::time::tick();
            crate::net::timer_tick();
            resume_rsp = crate::sched::scheduler::schedule_from_irq(frame as u64);
        } else if let Some(handler) = idt::irq_handler(irq) {
            handler();
        } else {
            crate::ktrace!("(INT) IRQ sem handler: ", irq as u64);
        }
        // EOI sempre ANTES de voltar (possivelmente por outra stack)
        apic::eoi(irq as u8);
    } else if vector == VEC_SPURIOUS {
        // Espúria do LAPIC: sem EOI
        crate::ktrace!("(INT) Interrupcao espuria");
    }

    resume_rsp
}

fn handle_exception(vector: usize, frame: &mut TrapFrame) {
    if let Some(handler) = idt::exception_handler(vector) {
        handler(frame);
        return;
    }
    // Sem handler registrado: fatal
    crate::kerror!("(INT) EXCECAO FATAL vetor=", vector as u64);
    crate::kerror!("(INT)   rip=", frame.rip);
    crate::kerror!("(INT)   err=", frame.error_code);
    crate::kerror!("(INT)   rsp=", frame.rsp);
    Cpu::hang();
}
