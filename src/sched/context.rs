//! Troca de contexto.
//!
//! `context_switch` salva os registradores callee-saved e o RFLAGS na
//! stack de quem sai, grava o RSP no PCB de saída, troca para o RSP de
//! quem entra e restaura: quem entra "acorda" saindo do seu próprio
//! `context_switch` anterior, ou do frame sintético do primeiro resume.
//!
//! Layout do frame sintético (endereços crescentes a partir do RSP salvo):
//!
//! ```text
//! [r15][r14][r13][r12][rbp][rbx][rflags][rip]
//! ```
//!
//! No primeiro resume, `rbx` carrega o entry point e `r12` a stack de
//! usuário (quando houver); o `rip` aponta para o bootstrap adequado.

use crate::arch::x86_64::idt::TrapFrame;

/// Tamanho do frame sintético em words.
const SWITCH_FRAME_WORDS: usize = 8;

/// RFLAGS inicial de um processo: IF ligado, resto limpo.
const INITIAL_RFLAGS: u64 = 0x202;

#[cfg(target_os = "none")]
core::arch::global_asm!(
    r#"
.global context_switch
context_switch:
    pushfq
    push rbx
    push rbp
    push r12
    push r13
    push r14
    push r15

    mov [rdi], rsp
    mov rsp, rsi

    pop r15
    pop r14
    pop r13
    pop r12
    pop rbp
    pop rbx
    popfq
    ret

// Primeiro resume de um processo de kernel: entra em rbx; se o entry
// retornar, cai no trampolim de saída.
.global task_bootstrap
task_bootstrap:
    call rbx
    call task_exit_fallthrough
3:  hlt
    jmp 3b

// Primeiro resume de um processo de usuário: monta o frame iretq para
// Ring 3 (rbx = entry, r12 = stack de usuário).
.global user_task_bootstrap
user_task_bootstrap:
    push 0x1B
    push r12
    push 0x202
    push 0x23
    push rbx
    iretq
"#
);

#[cfg(target_os = "none")]
extern "C" {
    /// `(old_sp_out, new_sp_in)`: assinatura C estável do stub.
    pub fn context_switch(old_sp: *mut u64, new_sp: u64);
    fn task_bootstrap();
    fn user_task_bootstrap();
}

/// Troca para `new_sp`, salvando o RSP corrente em `*old_sp`.
///
/// # Safety
///
/// `new_sp` deve apontar para um frame de switch válido; interrupções
/// idealmente desabilitadas em volta.
#[inline]
pub unsafe fn switch(old_sp: *mut u64, new_sp: u64) {
    #[cfg(target_os = "none")]
    context_switch(old_sp, new_sp);
    #[cfg(not(target_os = "none"))]
    {
        let _ = (old_sp, new_sp);
    }
}

fn bootstrap_addr(user: bool) -> u64 {
    #[cfg(target_os = "none")]
    {
        return if user {
            user_task_bootstrap as usize as u64
        } else {
            task_bootstrap as usize as u64
        };
    }
    #[cfg(not(target_os = "none"))]
    {
        // Sem assembly no host; valor sentinela distinto por tipo
        if user {
            0x1000
        } else {
            0x2000
        }
    }
}

/// Monta o frame sintético de primeiro resume no topo da stack de kernel.
///
/// Retorna o RSP a guardar no PCB. Quem cair do entry de um processo de
/// kernel termina no trampolim de `exit(0)`.
pub fn build_initial_frame(kstack_top: u64, entry: u64, user_stack: u64, user: bool) -> u64 {
    let sp = kstack_top - (SWITCH_FRAME_WORDS * 8) as u64;
    let frame = sp as *mut u64;
    unsafe {
        frame.add(0).write(0); // r15
        frame.add(1).write(0); // r14
        frame.add(2).write(0); // r13
        frame.add(3).write(user_stack); // r12
        frame.add(4).write(0); // rbp
        frame.add(5).write(entry); // rbx
        frame.add(6).write(INITIAL_RFLAGS);
        frame.add(7).write(bootstrap_addr(user)); // rip
    }
    sp
}

/// Monta a stack de primeiro resume de um filho de fork: cópia do
/// TrapFrame do pai (rax zerado) + frame de switch que devolve no stub de
/// retorno do fork.
pub fn build_fork_frame(kstack_top: u64, parent: &TrapFrame) -> u64 {
    let frame_size = core::mem::size_of::<TrapFrame>() as u64;
    let trap_at = kstack_top - frame_size;
    unsafe {
        let mut copy = *parent;
        copy.rax = 0; // retorno do fork no filho
        core::ptr::write(trap_at as *mut TrapFrame, copy);
    }

    let sp = trap_at - (SWITCH_FRAME_WORDS * 8) as u64;
    let frame = sp as *mut u64;
    unsafe {
        for i in 0..6 {
            frame.add(i).write(0);
        }
        frame.add(6).write(INITIAL_RFLAGS & !0x200); // IF off até o iretq
        frame
            .add(7)
            .write(crate::arch::x86_64::syscall::fork_return_addr());
    }
    sp
}

/// Trampolim de queda: processos de kernel que retornam do entry.
#[no_mangle]
extern "C" fn task_exit_fallthrough() {
    crate::sched::task::exit_current(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_initial_frame_layout() {
        let stack = vec![0u8; 4096].leak();
        let top = (stack.as_ptr() as u64 + 4096) & !0xF;
        let sp = build_initial_frame(top, 0xDEAD_BEEF, 0xCAFE, true);
        assert_eq!(sp, top - 64);
        let words = unsafe { core::slice::from_raw_parts(sp as *const u64, 8) };
        assert_eq!(words[3], 0xCAFE); // r12 = user stack
        assert_eq!(words[5], 0xDEAD_BEEF); // rbx = entry
        assert_eq!(words[6], 0x202); // rflags
    }

    #[test]
    fn test_fork_frame_zeroes_child_rax() {
        let stack = vec![0u8; 8192].leak();
        let top = (stack.as_ptr() as u64 + 8192) & !0xF;
        let mut parent = unsafe { core::mem::zeroed::<TrapFrame>() };
        parent.rax = 57; // numero da syscall no pai
        parent.rip = 0x4000_1000;
        parent.rsp = 0x7FFF_0000;
        let sp = build_fork_frame(top, &parent);

        let trap_at = top - core::mem::size_of::<TrapFrame>() as u64;
        assert_eq!(sp, trap_at - 64);
        let child = unsafe { &*(trap_at as *const TrapFrame) };
        assert_eq!(child.rax, 0);
        assert_eq!(child.rip, 0x4000_1000);
        assert_eq!(child.rsp, 0x7FFF_0000);
    }
}
