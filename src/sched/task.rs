//! Tabela de processos (PCBs) e ciclo de vida.
//!
//! Array de tamanho fixo, pid = índice do slot. O PCB 0 é o idle/kernel:
//! roda quando ninguém mais está pronto e adota os órfãos.
//!
//! Invariantes:
//! - exatamente um PCB está `Running`;
//! - o RSP salvo do PCB que roda está vivo na CPU, não no PCB;
//! - zombies guardam o exit code até o `wait` do pai.

use super::context;
use super::scheduler::SchedAlgorithm;
use super::signal::{self, SignalState, SIGCHLD};
use crate::mm::config::{
    KSTACK_SIZE, MMAP_VIRT_BASE, SHM_VIRT_BASE, USER_BRK_BASE,
};
use crate::mm::{pmm, vmm, PhysAddr, VirtAddr};
use crate::sync::Spinlock;
use crate::syscall::error::SysError;
use alloc::alloc::{alloc, dealloc, Layout};

pub type Pid = usize;

pub const MAX_PROCS: usize = 64;
pub const MAX_FDS: usize = 64;
pub const MAX_NAME: usize = 24;
pub const MAX_MMAP_REGIONS: usize = 16;
pub const MAX_CWD: usize = 64;

/// Estados de um processo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Unused,
    Ready,
    Running,
    Blocked,
    Sleeping,
    Zombie,
}

/// Classes de prioridade, com a fatia default em ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    Realtime = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Priority {
    pub const fn default_slice(self) -> u32 {
        match self {
            Priority::Realtime => 2,
            Priority::High => 5,
            Priority::Normal => 10,
            Priority::Low => 20,
        }
    }

    pub fn from_usize(v: usize) -> Option<Self> {
        match v {
            0 => Some(Priority::Realtime),
            1 => Some(Priority::High),
            2 => Some(Priority::Normal),
            3 => Some(Priority::Low),
            _ => None,
        }
    }
}

/// Entrada da tabela de descritores: fd de VFS ou ponta de pipe.
///
/// No ABI um fd é só um inteiro pequeno; o bit alto marca pontas de pipe
/// (leitura/escrita distinguidas pelo bit 30).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdEntry {
    Vfs(usize),
    PipeRead(usize),
    PipeWrite(usize),
}

/// Process Control Block.
#[derive(Clone, Copy)]
pub struct Pcb {
    pub pid: Pid,
    pub parent: Pid,
    pub state: ProcState,
    pub prio: Priority,
    pub name: [u8; MAX_NAME],
    pub name_len: u8,

    /// RSP de kernel salvo (inválido enquanto `Running`).
    pub kernel_sp: u64,
    /// Base da stack de kernel (0 = stack do boot, não liberável).
    pub kstack_base: u64,
    pub kstack_top: u64,

    /// Raiz do address space (0 = processo de kernel).
    pub aspace: u64,
    pub ustack_base: u64,
    pub ustack_top: u64,
    pub entry: u64,

    pub slice_default: u32,
    pub slice_left: u32,
    pub cpu_ticks: u64,
    pub wake_tick: u64,
    pub exit_code: i32,

    pub brk: u64,
    pub mmap_next: u64,
    pub shm_next: u64,
    /// Regiões de mmap anônimo: (base, páginas).
    pub mmap_regions: [(u64, u64); MAX_MMAP_REGIONS],
    pub n_mmap: usize,

    pub cwd: [u8; MAX_CWD],
    pub cwd_len: u8,
    pub fds: [Option<FdEntry>; MAX_FDS],

    pub sig: SignalState,
}

impl Pcb {
    pub const UNUSED: Pcb = Pcb {
        pid: 0,
        parent: 0,
        state: ProcState::Unused,
        prio: Priority::Normal,
        name: [0; MAX_NAME],
        name_len: 0,
        kernel_sp: 0,
        kstack_base: 0,
        kstack_top: 0,
        aspace: 0,
        ustack_base: 0,
        ustack_top: 0,
        entry: 0,
        slice_default: 10,
        slice_left: 10,
        cpu_ticks: 0,
        wake_tick: 0,
        exit_code: 0,
        brk: 0,
        mmap_next: 0,
        shm_next: 0,
        mmap_regions: [(0, 0); MAX_MMAP_REGIONS],
        n_mmap: 0,
        cwd: [0; MAX_CWD],
        cwd_len: 0,
        fds: [None; MAX_FDS],
        sig: SignalState::new(),
    };

    pub fn set_name(&mut self, name: &str) {
        let n = name.len().min(MAX_NAME);
        self.name[..n].copy_from_slice(&name.as_bytes()[..n]);
        self.name_len = n as u8;
    }

    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("?")
    }

    pub fn set_cwd(&mut self, path: &str) {
        let n = path.len().min(MAX_CWD);
        self.cwd[..n].copy_from_slice(&path.as_bytes()[..n]);
        self.cwd_len = n as u8;
    }

    pub fn cwd(&self) -> &str {
        core::str::from_utf8(&self.cwd[..self.cwd_len as usize]).unwrap_or("/")
    }

    fn reset(&mut self) {
        *self = Pcb::UNUSED;
    }
}

/// Tabela global + estado do scheduler (um lock só).
pub struct ProcTable {
    pub slots: [Pcb; MAX_PROCS],
    pub current: Pid,
    pub algorithm: SchedAlgorithm,
    pub switch_count: u64,
}

impl ProcTable {
    pub const fn new() -> Self {
        Self {
            slots: [Pcb::UNUSED; MAX_PROCS],
            current: 0,
            algorithm: SchedAlgorithm::RoundRobin,
            switch_count: 0,
        }
    }

    fn find_free_slot(&self) -> Option<usize> {
        (1..MAX_PROCS).find(|&i| self.slots[i].state == ProcState::Unused)
    }

    pub fn n_alive(&self) -> usize {
        self.slots
            .iter()
            .filter(|p| !matches!(p.state, ProcState::Unused))
            .count()
    }

    pub fn n_ready(&self) -> usize {
        self.slots
            .iter()
            .filter(|p| matches!(p.state, ProcState::Ready | ProcState::Running))
            .count()
    }
}

pub static TABLE: Spinlock<ProcTable> = Spinlock::new(ProcTable::new());

fn kstack_layout() -> Layout {
    Layout::from_size_align(KSTACK_SIZE, 16).expect("layout de kstack")
}

fn alloc_kstack() -> Option<(u64, u64)> {
    let p = unsafe { alloc(kstack_layout()) };
    if p.is_null() {
        return None;
    }
    let base = p as u64;
    Some((base, base + KSTACK_SIZE as u64))
}

fn free_kstack(base: u64) {
    if base != 0 {
        unsafe { dealloc(base as *mut u8, kstack_layout()) };
    }
}

/// Instala o PCB 0 (idle/kernel) rodando.
pub fn init() {
    let mut t = TABLE.lock();
    let idle = &mut t.slots[0];
    idle.reset();
    idle.pid = 0;
    idle.set_name("idle");
    idle.set_cwd("/");
    idle.state = ProcState::Running;
    idle.prio = Priority::Low;
    idle.slice_default = Priority::Low.default_slice();
    idle.slice_left = idle.slice_default;
    t.current = 0;
}

fn init_common(pcb: &mut Pcb, pid: Pid, parent: Pid, name: &str, prio: Priority) {
    pcb.reset();
    pcb.pid = pid;
    pcb.parent = parent;
    pcb.set_name(name);
    pcb.set_cwd("/");
    pcb.prio = prio;
    pcb.slice_default = prio.default_slice();
    pcb.slice_left = pcb.slice_default;
    pcb.brk = USER_BRK_BASE;
    pcb.mmap_next = MMAP_VIRT_BASE;
    pcb.shm_next = SHM_VIRT_BASE;
}

/// Cria um processo de kernel pronto para rodar.
///
/// A stack de kernel recebe um frame sintético: o primeiro resume retorna
/// em `entry`; se `entry` retornar, cai no trampolim de `exit(0)`.
pub fn create_process(name: &str, entry: u64, prio: Priority) -> Result<Pid, SysError> {
    let mut t = TABLE.lock();
    let slot = t.find_free_slot().ok_or(SysError::WouldBlock)?;
    let (kbase, ktop) = alloc_kstack().ok_or(SysError::OutOfMemory)?;

    let parent = t.current;
    let pcb = &mut t.slots[slot];
    init_common(pcb, slot, parent, name, prio);
    pcb.kstack_base = kbase;
    pcb.kstack_top = ktop;
    pcb.entry = entry;
    pcb.kernel_sp = context::build_initial_frame(ktop, entry, 0, false);
    pcb.state = ProcState::Ready;

    crate::kdebug!("(PROC) Criado pid=", slot as u64);
    Ok(slot)
}

/// Cria um processo de usuário sobre um address space pronto.
pub fn create_user_process(
    name: &str,
    entry: u64,
    aspace: PhysAddr,
    ustack_base: u64,
    ustack_top: u64,
    prio: Priority,
) -> Result<Pid, SysError> {
    let mut t = TABLE.lock();
    let slot = t.find_free_slot().ok_or(SysError::WouldBlock)?;
    let (kbase, ktop) = alloc_kstack().ok_or(SysError::OutOfMemory)?;

    let parent = t.current;
    let pcb = &mut t.slots[slot];
    init_common(pcb, slot, parent, name, prio);
    pcb.kstack_base = kbase;
    pcb.kstack_top = ktop;
    pcb.aspace = aspace.as_u64();
    pcb.ustack_base = ustack_base;
    pcb.ustack_top = ustack_top;
    pcb.entry = entry;
    pcb.kernel_sp = context::build_initial_frame(ktop, entry, ustack_top, true);
    pcb.state = ProcState::Ready;
    Ok(slot)
}

/// Duplica o processo corrente a partir do TrapFrame da syscall em voo.
///
/// Herda a tabela de fds, o brk e o cwd; o address space é COMPARTILHADO
/// com o pai (sem COW nem cópia). O filho retorna 0 da syscall.
pub fn fork_current() -> Result<Pid, SysError> {
    let frame = crate::arch::x86_64::syscall::current_frame().ok_or(SysError::NotImplemented)?;

    let mut t = TABLE.lock();
    let slot = t.find_free_slot().ok_or(SysError::WouldBlock)?;
    let (kbase, ktop) = alloc_kstack().ok_or(SysError::OutOfMemory)?;

    let cur = t.current;
    let parent = t.slots[cur];
    let pcb = &mut t.slots[slot];
    pcb.reset();
    pcb.pid = slot;
    pcb.parent = cur;
    pcb.name = parent.name;
    pcb.name_len = parent.name_len;
    pcb.prio = parent.prio;
    pcb.slice_default = parent.slice_default;
    pcb.slice_left = pcb.slice_default;
    pcb.aspace = parent.aspace;
    pcb.ustack_base = parent.ustack_base;
    pcb.ustack_top = parent.ustack_top;
    pcb.entry = parent.entry;
    pcb.brk = parent.brk;
    pcb.mmap_next = parent.mmap_next;
    pcb.shm_next = parent.shm_next;
    pcb.cwd = parent.cwd;
    pcb.cwd_len = parent.cwd_len;
    pcb.fds = parent.fds;
    pcb.kstack_base = kbase;
    pcb.kstack_top = ktop;
    pcb.kernel_sp = context::build_fork_frame(ktop, frame);
    pcb.state = ProcState::Ready;

    // Referências de VFS/pipes duplicadas: avisar os donos
    let fds = pcb.fds;
    drop(t);
    for fd in fds.iter().flatten() {
        match fd {
            FdEntry::Vfs(h) => crate::fs::vfs::dup_handle(*h),
            FdEntry::PipeRead(p) => crate::ipc::pipe::ref_end(*p, false),
            FdEntry::PipeWrite(p) => crate::ipc::pipe::ref_end(*p, true),
        }
    }
    Ok(slot)
}

/// Marca `pid` como zombie e libera seus recursos de execução.
///
/// Filhos são re-parenteados para o PCB 0; o pai recebe SIGCHLD. O código
/// de saída fica retido até o `wait`.
pub fn terminate_locked(t: &mut ProcTable, pid: Pid, code: i32) {
    if matches!(t.slots[pid].state, ProcState::Unused | ProcState::Zombie) {
        return;
    }

    // Descartar regiões de mmap e o address space (a metade do kernel é
    // compartilhada; antes de destruir a árvore ativa, voltar para a raiz
    // do kernel)
    let aspace = t.slots[pid].aspace;
    if aspace != 0 {
        let root = PhysAddr::new(aspace);
        if pid == t.current {
            vmm::switch_to(vmm::kernel_root());
        }
        let n = t.slots[pid].n_mmap;
        for i in 0..n {
            let (base, pages) = t.slots[pid].mmap_regions[i];
            for p in 0..pages {
                if let Ok(frame) = vmm::unmap(root, VirtAddr::new(base + p * 4096)) {
                    pmm::free_frame(frame);
                }
            }
        }
        vmm::destroy_address_space(root);
        t.slots[pid].aspace = 0;
    }

    free_kstack(t.slots[pid].kstack_base);
    t.slots[pid].kstack_base = 0;
    t.slots[pid].kstack_top = 0;

    t.slots[pid].state = ProcState::Zombie;
    t.slots[pid].exit_code = code;

    // Órfãos vão para o PCB 0
    for i in 1..MAX_PROCS {
        if i != pid && t.slots[i].parent == pid && t.slots[i].state != ProcState::Unused {
            t.slots[i].parent = 0;
        }
    }

    let parent = t.slots[pid].parent;
    if parent != pid {
        let _ = signal::send_locked(t, parent, SIGCHLD);
    }
}

/// Término voluntário do processo corrente. Não retorna no alvo real.
pub fn exit_current(code: i32) {
    {
        let mut t = TABLE.lock();
        let cur = t.current;
        terminate_locked(&mut t, cur, code);
    }
    super::scheduler::yield_now();
}

/// Término de um processo qualquer.
pub fn terminate(pid: Pid, code: i32) -> Result<(), SysError> {
    let is_current = {
        let mut t = TABLE.lock();
        if pid >= MAX_PROCS || matches!(t.slots[pid].state, ProcState::Unused | ProcState::Zombie)
        {
            return Err(SysError::NotFound);
        }
        terminate_locked(&mut t, pid, code);
        t.current == pid
    };
    if is_current {
        super::scheduler::yield_now();
    }
    Ok(())
}

/// Dorme até o tick absoluto `wake_tick`.
pub fn sleep_current(wake_tick: u64) {
    {
        let mut t = TABLE.lock();
        let cur = t.current;
        t.slots[cur].state = ProcState::Sleeping;
        t.slots[cur].wake_tick = wake_tick;
    }
    super::scheduler::yield_now();
}

/// Espera um filho virar zombie; colhe e libera o slot.
pub fn wait_current() -> Result<(Pid, i32), SysError> {
    loop {
        {
            let mut t = TABLE.lock();
            let cur = t.current;
            let mut have_child = false;
            for i in 1..MAX_PROCS {
                if t.slots[i].parent != cur || t.slots[i].state == ProcState::Unused || i == cur {
                    continue;
                }
                have_child = true;
                if t.slots[i].state == ProcState::Zombie {
                    let code = t.slots[i].exit_code;
                    t.slots[i].reset();
                    return Ok((i, code));
                }
            }
            if !have_child {
                return Err(SysError::NoChild);
            }
            t.slots[cur].state = ProcState::Blocked;
        }
        // SIGCHLD do filho acorda o pai
        super::scheduler::yield_now();
    }
}

pub fn current_pid() -> Pid {
    TABLE.lock().current
}

pub fn getppid() -> Pid {
    let t = TABLE.lock();
    t.slots[t.current].parent
}

pub fn get_priority(pid: Pid) -> Result<Priority, SysError> {
    let t = TABLE.lock();
    if pid >= MAX_PROCS || t.slots[pid].state == ProcState::Unused {
        return Err(SysError::NotFound);
    }
    Ok(t.slots[pid].prio)
}

/// Troca a prioridade; a fatia default acompanha a classe nova.
pub fn set_priority(pid: Pid, prio: Priority) -> Result<(), SysError> {
    let mut t = TABLE.lock();
    if pid >= MAX_PROCS || t.slots[pid].state == ProcState::Unused {
        return Err(SysError::NotFound);
    }
    t.slots[pid].prio = prio;
    t.slots[pid].slice_default = prio.default_slice();
    if t.slots[pid].slice_left > t.slots[pid].slice_default {
        t.slots[pid].slice_left = t.slots[pid].slice_default;
    }
    Ok(())
}

// ============================================================================
// Suporte de teste (host): serialização e reset da tabela global
// ============================================================================

#[cfg(test)]
pub fn test_guard() -> std::sync::MutexGuard<'static, ()> {
    static GATE: std::sync::Mutex<()> = std::sync::Mutex::new(());
    GATE.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
pub fn test_reset() {
    let mut t = TABLE.lock();
    for s in t.slots.iter_mut() {
        s.reset();
    }
    t.current = 0;
    t.switch_count = 0;
    t.algorithm = SchedAlgorithm::RoundRobin;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_process_basics() {
        let _g = test_guard();
        test_reset();
        init();
        let pid = create_process("worker", 0x4000, Priority::High).unwrap();
        let t = TABLE.lock();
        let p = &t.slots[pid];
        assert_eq!(p.state, ProcState::Ready);
        assert_eq!(p.prio, Priority::High);
        assert_eq!(p.slice_left, 5);
        assert_eq!(p.name(), "worker");
        assert_eq!(p.parent, 0);
        // Frame sintético dentro da stack de kernel
        assert!(p.kernel_sp > p.kstack_base && p.kernel_sp < p.kstack_top);
    }

    #[test]
    fn test_exit_reparents_children_and_signals_parent() {
        let _g = test_guard();
        test_reset();
        init();
        let father = create_process("pai", 0x1000, Priority::Normal).unwrap();
        {
            let mut t = TABLE.lock();
            t.current = father;
            t.slots[father].state = ProcState::Running;
        }
        let son = create_process("filho", 0x2000, Priority::Normal).unwrap();
        {
            let t = TABLE.lock();
            assert_eq!(t.slots[son].parent, father);
        }
        // Pai morre: filho re-parenteado para 0, avô (0) recebe SIGCHLD
        {
            let mut t = TABLE.lock();
            terminate_locked(&mut t, father, 7);
            assert_eq!(t.slots[father].state, ProcState::Zombie);
            assert_eq!(t.slots[father].exit_code, 7);
            assert_eq!(t.slots[son].parent, 0);
            assert_ne!(t.slots[0].sig.pending & (1 << SIGCHLD), 0);
        }
    }

    #[test]
    fn test_wait_reaps_zombie() {
        let _g = test_guard();
        test_reset();
        init();
        let child = create_process("c", 0x1000, Priority::Normal).unwrap();
        {
            let mut t = TABLE.lock();
            terminate_locked(&mut t, child, 42);
        }
        // PCB 0 é o pai e o corrente
        let (pid, code) = wait_current().unwrap();
        assert_eq!(pid, child);
        assert_eq!(code, 42);
        let t = TABLE.lock();
        assert_eq!(t.slots[child].state, ProcState::Unused);
    }

    #[test]
    fn test_wait_without_children() {
        let _g = test_guard();
        test_reset();
        init();
        assert_eq!(wait_current(), Err(SysError::NoChild));
    }

    #[test]
    fn test_priority_change_clamps_slice() {
        let _g = test_guard();
        test_reset();
        init();
        let pid = create_process("p", 0x1000, Priority::Low).unwrap();
        assert_eq!(get_priority(pid).unwrap(), Priority::Low);
        set_priority(pid, Priority::Realtime).unwrap();
        let t = TABLE.lock();
        assert_eq!(t.slots[pid].prio, Priority::Realtime);
        assert_eq!(t.slots[pid].slice_default, 2);
        assert!(t.slots[pid].slice_left <= 2);
    }

    #[test]
    fn test_slot_reuse_after_reap() {
        let _g = test_guard();
        test_reset();
        init();
        let a = create_process("a", 0x1000, Priority::Normal).unwrap();
        {
            let mut t = TABLE.lock();
            terminate_locked(&mut t, a, 0);
        }
        let _ = wait_current().unwrap();
        let b = create_process("b", 0x1000, Priority::Normal).unwrap();
        assert_eq!(a, b);
    }
}
