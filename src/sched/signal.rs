//! Sinais.
//!
//! Máscaras de 64 bits por processo (pendentes/bloqueados) e uma ação por
//! sinal: default, ignorar ou handler chamável em modo kernel com máscara
//! adicional própria. A entrega acontece nos retornos ao usuário
//! (`check_pending_current`), sempre do sinal deliverable de menor número.
//!
//! SIGKILL e SIGSTOP não podem ser capturados, ignorados nem bloqueados.
//! SIGCONT sempre retira o alvo do estado parado e limpa SIGSTOP/SIGTSTP
//! pendentes.

use super::task::{self, Pid, ProcState};

pub const SIGHUP: usize = 1;
pub const SIGINT: usize = 2;
pub const SIGQUIT: usize = 3;
pub const SIGILL: usize = 4;
pub const SIGTRAP: usize = 5;
pub const SIGABRT: usize = 6;
pub const SIGBUS: usize = 7;
pub const SIGFPE: usize = 8;
pub const SIGKILL: usize = 9;
pub const SIGUSR1: usize = 10;
pub const SIGSEGV: usize = 11;
pub const SIGUSR2: usize = 12;
pub const SIGPIPE: usize = 13;
pub const SIGALRM: usize = 14;
pub const SIGTERM: usize = 15;
pub const SIGCHLD: usize = 17;
pub const SIGCONT: usize = 18;
pub const SIGSTOP: usize = 19;
pub const SIGTSTP: usize = 20;

/// Quantidade de sinais suportados (1..NSIG).
pub const NSIG: usize = 32;

/// Bits que nunca podem ser bloqueados/capturados.
const UNBLOCKABLE: u64 = (1 << SIGKILL) | (1 << SIGSTOP);

/// Ação instalada para um sinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigHandler {
    Default,
    Ignore,
    /// Handler chamável em modo kernel.
    Kernel(fn(usize)),
}

#[derive(Debug, Clone, Copy)]
pub struct SigAction {
    pub handler: SigHandler,
    /// Sinais adicionais bloqueados durante o handler.
    pub mask: u64,
    pub flags: u32,
}

impl SigAction {
    pub const fn default() -> Self {
        Self {
            handler: SigHandler::Default,
            mask: 0,
            flags: 0,
        }
    }
}

/// Estado de sinais embutido em cada PCB.
#[derive(Debug, Clone, Copy)]
pub struct SignalState {
    pub pending: u64,
    pub blocked: u64,
    pub actions: [SigAction; NSIG],
    pub in_handler: bool,
    pub saved_mask: u64,
}

impl SignalState {
    pub const fn new() -> Self {
        Self {
            pending: 0,
            blocked: 0,
            actions: [SigAction::default(); NSIG],
            in_handler: false,
            saved_mask: 0,
        }
    }
}

/// Ação default de cada sinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefaultAction {
    Terminate,
    Core,
    Stop,
    Continue,
    Ignore,
}

fn default_action(sig: usize) -> DefaultAction {
    match sig {
        SIGCHLD => DefaultAction::Ignore,
        SIGCONT => DefaultAction::Continue,
        SIGSTOP | SIGTSTP => DefaultAction::Stop,
        SIGQUIT | SIGILL | SIGTRAP | SIGABRT | SIGBUS | SIGFPE | SIGSEGV => DefaultAction::Core,
        _ => DefaultAction::Terminate,
    }
}

/// Envia `sig` para `pid`. Acorda alvos dormindo/bloqueados.
pub fn send(pid: Pid, sig: usize) -> Result<(), crate::syscall::error::SysError> {
    use crate::syscall::error::SysError;
    if sig == 0 || sig >= NSIG {
        return Err(SysError::InvalidArgument);
    }
    let mut t = task::TABLE.lock();
    send_locked(&mut t, pid, sig)
}

/// Variante para chamadores que já seguram o lock da tabela.
pub fn send_locked(
    t: &mut task::ProcTable,
    pid: Pid,
    sig: usize,
) -> Result<(), crate::syscall::error::SysError> {
    use crate::syscall::error::SysError;

    if pid >= task::MAX_PROCS {
        return Err(SysError::NotFound);
    }
    if matches!(t.slots[pid].state, ProcState::Unused | ProcState::Zombie) {
        return Err(SysError::NotFound);
    }

    // SIGKILL derruba imediatamente: zombie, stack liberada, nunca mais
    // escalonado. Syscalls em voo não são desfeitas: o processo
    // simplesmente não volta.
    if sig == SIGKILL {
        task::terminate_locked(t, pid, 128 + SIGKILL as i32);
        return Ok(());
    }

    if sig == SIGCONT {
        // Retoma parado e limpa stops pendentes
        t.slots[pid].sig.pending &= !((1 << SIGSTOP) | (1 << SIGTSTP));
        if t.slots[pid].state == ProcState::Blocked {
            t.slots[pid].state = ProcState::Ready;
        }
    }

    t.slots[pid].sig.pending |= 1 << sig;

    // Acordar alvo dormindo/bloqueado para processar o sinal
    if matches!(
        t.slots[pid].state,
        ProcState::Sleeping | ProcState::Blocked
    ) && sig != SIGSTOP
    {
        t.slots[pid].state = ProcState::Ready;
    }
    Ok(())
}

/// Instala uma ação. Recusa SIGKILL/SIGSTOP.
pub fn set_action(pid: Pid, sig: usize, action: SigAction) -> Result<SigAction, crate::syscall::error::SysError> {
    use crate::syscall::error::SysError;
    if sig == 0 || sig >= NSIG || sig == SIGKILL || sig == SIGSTOP {
        return Err(SysError::InvalidArgument);
    }
    let mut t = task::TABLE.lock();
    if t.slots[pid].state == ProcState::Unused {
        return Err(SysError::NotFound);
    }
    let old = t.slots[pid].sig.actions[sig];
    t.slots[pid].sig.actions[sig] = action;
    Ok(old)
}

/// Ajusta a máscara de bloqueio (how: 0=SET, 1=BLOCK, 2=UNBLOCK).
pub fn set_mask(pid: Pid, how: usize, mask: u64) -> Result<u64, crate::syscall::error::SysError> {
    use crate::syscall::error::SysError;
    let mut t = task::TABLE.lock();
    if t.slots[pid].state == ProcState::Unused {
        return Err(SysError::NotFound);
    }
    let old = t.slots[pid].sig.blocked;
    let clean = mask & !UNBLOCKABLE;
    t.slots[pid].sig.blocked = match how {
        0 => clean,
        1 => old | clean,
        2 => old & !clean,
        _ => return Err(SysError::InvalidArgument),
    };
    Ok(old)
}

/// Decisão tomada sob o lock, executada fora dele.
enum Disposition {
    None,
    RunHandler(fn(usize), usize),
    StopSelf,
    Terminated,
}

/// Entrega os sinais pendentes do processo corrente. Chamado em todo
/// retorno ao usuário (fim de syscall).
pub fn check_pending_current() {
    loop {
        let decision = {
            let mut t = task::TABLE.lock();
            let cur = t.current;
            deliver_one_locked(&mut t, cur)
        };
        match decision {
            Disposition::None => break,
            Disposition::Terminated => {
                // Processo corrente virou zombie: sai de cena
                super::scheduler::yield_now();
                break;
            }
            Disposition::StopSelf => {
                super::scheduler::yield_now();
                // Retomado por SIGCONT: continua drenando
            }
            Disposition::RunHandler(handler, sig) => {
                handler(sig);
                // Restaurar máscara salva
                let mut t = task::TABLE.lock();
                let cur = t.current;
                t.slots[cur].sig.blocked = t.slots[cur].sig.saved_mask;
                t.slots[cur].sig.in_handler = false;
            }
        }
    }
}

/// Pega o sinal deliverable de menor número e decide o destino.
fn deliver_one_locked(t: &mut task::ProcTable, pid: Pid) -> Disposition {
    let sig_state = &t.slots[pid].sig;
    let deliverable = sig_state.pending & !(sig_state.blocked & !UNBLOCKABLE);
    if deliverable == 0 || t.slots[pid].state == ProcState::Zombie {
        return Disposition::None;
    }
    let sig = deliverable.trailing_zeros() as usize;
    t.slots[pid].sig.pending &= !(1 << sig);

    let action = t.slots[pid].sig.actions[sig];
    match action.handler {
        SigHandler::Ignore => Disposition::None,
        SigHandler::Kernel(h) => {
            // Bloquear o próprio sinal + máscara do handler enquanto roda
            let s = &mut t.slots[pid].sig;
            s.saved_mask = s.blocked;
            s.blocked |= ((1 << sig) | action.mask) & !UNBLOCKABLE;
            s.in_handler = true;
            Disposition::RunHandler(h, sig)
        }
        SigHandler::Default => match default_action(sig) {
            DefaultAction::Ignore | DefaultAction::Continue => Disposition::None,
            DefaultAction::Stop => {
                t.slots[pid].state = ProcState::Blocked;
                Disposition::StopSelf
            }
            DefaultAction::Terminate | DefaultAction::Core => {
                task::terminate_locked(t, pid, 128 + sig as i32);
                Disposition::Terminated
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::task::{self, ProcState};
    use core::sync::atomic::{AtomicUsize, Ordering};

    static HANDLER_HITS: AtomicUsize = AtomicUsize::new(0);

    fn test_handler(_sig: usize) {
        HANDLER_HITS.fetch_add(1, Ordering::SeqCst);
    }

    fn setup() -> Pid {
        task::test_reset();
        task::init();
        let pid = task::create_process("alvo", 0x1000, super::super::Priority::Normal).unwrap();
        pid
    }

    #[test]
    fn test_send_sets_pending_and_wakes() {
        let _g = task::test_guard();
        let pid = setup();
        {
            let mut t = task::TABLE.lock();
            t.slots[pid].state = ProcState::Sleeping;
            t.slots[pid].wake_tick = u64::MAX;
        }
        send(pid, SIGUSR1).unwrap();
        let t = task::TABLE.lock();
        assert_ne!(t.slots[pid].sig.pending & (1 << SIGUSR1), 0);
        assert_eq!(t.slots[pid].state, ProcState::Ready);
    }

    #[test]
    fn test_sigkill_is_immediate() {
        let _g = task::test_guard();
        let pid = setup();
        send(pid, SIGKILL).unwrap();
        let t = task::TABLE.lock();
        assert_eq!(t.slots[pid].state, ProcState::Zombie);
        assert_eq!(t.slots[pid].exit_code, 128 + SIGKILL as i32);
    }

    #[test]
    fn test_cannot_catch_sigkill() {
        let _g = task::test_guard();
        let pid = setup();
        let act = SigAction {
            handler: SigHandler::Ignore,
            mask: 0,
            flags: 0,
        };
        assert!(set_action(pid, SIGKILL, act).is_err());
        assert!(set_action(pid, SIGSTOP, act).is_err());
        assert!(set_action(pid, SIGUSR1, act).is_ok());
    }

    #[test]
    fn test_mask_never_blocks_kill() {
        let _g = task::test_guard();
        let pid = setup();
        let old = set_mask(pid, 0, u64::MAX).unwrap();
        assert_eq!(old, 0);
        let t = task::TABLE.lock();
        assert_eq!(t.slots[pid].sig.blocked & UNBLOCKABLE, 0);
    }

    #[test]
    fn test_handler_delivery_restores_mask() {
        let _g = task::test_guard();
        let pid = setup();
        set_action(
            pid,
            SIGUSR1,
            SigAction {
                handler: SigHandler::Kernel(test_handler),
                mask: 1 << SIGUSR2,
                flags: 0,
            },
        )
        .unwrap();
        {
            let mut t = task::TABLE.lock();
            t.current = pid;
            t.slots[pid].state = ProcState::Running;
        }
        HANDLER_HITS.store(0, Ordering::SeqCst);
        send(pid, SIGUSR1).unwrap();
        check_pending_current();
        assert_eq!(HANDLER_HITS.load(Ordering::SeqCst), 1);
        let t = task::TABLE.lock();
        assert_eq!(t.slots[pid].sig.blocked, 0);
        assert!(!t.slots[pid].sig.in_handler);
        assert_eq!(t.slots[pid].sig.pending & (1 << SIGUSR1), 0);
    }

    #[test]
    fn test_sigcont_clears_pending_stop() {
        let _g = task::test_guard();
        let pid = setup();
        {
            let mut t = task::TABLE.lock();
            t.slots[pid].sig.pending |= 1 << SIGSTOP;
            t.slots[pid].state = ProcState::Blocked;
        }
        send(pid, SIGCONT).unwrap();
        let t = task::TABLE.lock();
        assert_eq!(t.slots[pid].sig.pending & (1 << SIGSTOP), 0);
        assert_eq!(t.slots[pid].state, ProcState::Ready);
    }

    #[test]
    fn test_default_terminate() {
        let _g = task::test_guard();
        let pid = setup();
        {
            let mut t = task::TABLE.lock();
            t.current = pid;
            t.slots[pid].state = ProcState::Running;
        }
        send(pid, SIGTERM).unwrap();
        check_pending_current();
        let t = task::TABLE.lock();
        assert_eq!(t.slots[pid].state, ProcState::Zombie);
        assert_eq!(t.slots[pid].exit_code, 128 + SIGTERM as i32);
    }
}
