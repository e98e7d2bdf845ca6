//! Configuração do caminho rápido de syscall (SYSCALL/SYSRET).
//!
//! MSRs programados no init:
//! - EFER (0xC0000080): bit SCE habilita a instrução.
//! - STAR (0xC0000081): seletores de kernel (entrada) e usuário (sysret).
//! - LSTAR (0xC0000082): RIP de destino: o trampolim em `syscall.s`.
//! - FMASK (0xC0000084): limpa IF/DF/TF na entrada; syscalls rodam com
//!   interrupções desabilitadas (atômicas exceto em yields internos).

use super::gdt;
use super::idt::TrapFrame;
use crate::arch::Cpu;
use crate::mm::config::SYSCALL_STACK_SIZE;

#[cfg(target_os = "none")]
core::arch::global_asm!(include_str!("syscall.s"));

const MSR_EFER: u32 = 0xC000_0080;
const MSR_STAR: u32 = 0xC000_0081;
const MSR_LSTAR: u32 = 0xC000_0082;
const MSR_FMASK: u32 = 0xC000_0084;

const EFER_SCE: u64 = 1;
const RFLAGS_IF: u64 = 1 << 9;
const RFLAGS_DF: u64 = 1 << 10;
const RFLAGS_TF: u64 = 1 << 8;

/// Stack dedicada da entrada de syscall.
#[repr(C, align(16))]
struct SyscallStack([u8; SYSCALL_STACK_SIZE]);

static mut SYSCALL_STACK: SyscallStack = SyscallStack([0; SYSCALL_STACK_SIZE]);

/// Topo da stack de syscall, lido pelo trampolim.
#[no_mangle]
static mut SYSCALL_KSTACK_TOP: u64 = 0;

/// RSP do usuário, estacionado durante a syscall.
#[no_mangle]
static mut SYSCALL_USER_RSP: u64 = 0;

/// Frame da syscall em andamento (para fork). Nulo fora de syscalls.
static mut CURRENT_FRAME: *mut TrapFrame = core::ptr::null_mut();

extern "C" {
    #[cfg(target_os = "none")]
    fn syscall_entry();
    /// Ponto de primeiro resume dos filhos de fork (em `syscall.s`).
    #[cfg(target_os = "none")]
    pub fn fork_child_return();
}

/// Programa os MSRs do caminho rápido.
///
/// # Safety
///
/// Uma vez no boot, depois da GDT.
pub unsafe fn init() {
    #[cfg(target_os = "none")]
    {
        use core::ptr::addr_of;

        SYSCALL_KSTACK_TOP =
            addr_of!(SYSCALL_STACK) as u64 + SYSCALL_STACK_SIZE as u64;

        let efer = Cpu::read_msr(MSR_EFER);
        if efer & EFER_SCE == 0 {
            Cpu::write_msr(MSR_EFER, efer | EFER_SCE);
        }

        Cpu::write_msr(MSR_LSTAR, syscall_entry as usize as u64);

        // SYSCALL: CS = STAR[47:32], SS = +8  →  base kernel (0x08)
        // SYSRET:  CS = STAR[63:48]+16, SS = +8  →  base 0x13 dá 0x23/0x1B
        let kernel_base = gdt::KERNEL_CODE_SEL.0 as u64;
        let user_base = (gdt::KERNEL_DATA_SEL.0 | 3) as u64;
        Cpu::write_msr(MSR_STAR, (user_base << 48) | (kernel_base << 32));

        Cpu::write_msr(MSR_FMASK, RFLAGS_IF | RFLAGS_DF | RFLAGS_TF);

        crate::kinfo!("(SYSCALL) MSRs programados, LSTAR=", syscall_entry as usize as u64);
    }
}

/// Aponta o trampolim para a stack de kernel do processo corrente.
/// Chamado pelo scheduler a cada troca de contexto, junto com o RSP0.
#[inline]
pub fn set_kernel_stack(top: u64) {
    unsafe { SYSCALL_KSTACK_TOP = top };
}

/// Shim chamado pelo trampolim com o TrapFrame completo na stack de
/// syscall. Extrai número/argumentos, despacha e grava o retorno em
/// `frame.rax`; antes de voltar ao usuário entrega sinais pendentes.
#[no_mangle]
extern "C" fn syscall_entry_rust(frame: *mut TrapFrame) {
    unsafe { CURRENT_FRAME = frame };

    let f = unsafe { &mut *frame };
    let result = crate::syscall::dispatch(
        f.rax as usize,
        f.rdi as usize,
        f.rsi as usize,
        f.rdx as usize,
    );
    f.rax = result as u64;

    crate::sched::signal::check_pending_current();

    unsafe { CURRENT_FRAME = core::ptr::null_mut() };
}

/// Frame da syscall corrente, se houver (consumido pelo fork).
pub fn current_frame() -> Option<&'static TrapFrame> {
    unsafe {
        let p = CURRENT_FRAME;
        if p.is_null() {
            None
        } else {
            Some(&*p)
        }
    }
}

/// Endereço do stub de primeiro resume do fork (0 em build de host).
pub fn fork_return_addr() -> u64 {
    #[cfg(target_os = "none")]
    {
        return fork_child_return as usize as u64;
    }
    #[cfg(not(target_os = "none"))]
    {
        0
    }
}
