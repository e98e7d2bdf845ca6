//! Scheduler preemptivo de núcleo único.
//!
//! Dois algoritmos selecionáveis em runtime:
//! - Round-robin: próximo PCB pronto depois do slot corrente, circular.
//! - Prioridade: PCB pronto de maior prioridade; empate decide em
//!   round-robin.
//!
//! O caminho do timer NÃO troca contexto com `context_switch`: o trap
//! frame já está na stack de kernel do processo interrompido, então basta
//! guardar esse RSP no PCB de saída e devolver o RSP salvo do PCB de
//! entrada: o epílogo comum da interrupção restaura os registradores DO
//! OUTRO processo e faz iretq nele.

use super::context;
use super::task::{Pid, ProcState, ProcTable, MAX_PROCS, TABLE};
use crate::arch::x86_64::gdt;
use crate::arch::x86_64::syscall as fast_syscall;
use crate::mm::{vmm, PhysAddr};

/// Algoritmo ativo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedAlgorithm {
    RoundRobin,
    Priority,
}

pub fn init() {
    crate::kinfo!("(SCHED) Algoritmo inicial: round-robin");
}

pub fn set_algorithm(alg: SchedAlgorithm) {
    TABLE.lock().algorithm = alg;
}

pub fn switch_count() -> u64 {
    TABLE.lock().switch_count
}

/// Acorda os processos cuja hora chegou.
fn wake_sleepers(t: &mut ProcTable, now: u64) {
    for pcb in t.slots.iter_mut() {
        if pcb.state == ProcState::Sleeping && pcb.wake_tick <= now {
            pcb.state = ProcState::Ready;
        }
    }
}

/// Escolhe o próximo PCB pronto. PCB 0 (idle) é o fallback universal.
fn select_next(t: &ProcTable) -> Pid {
    let cur = t.current;
    // Ordem circular a partir do slot seguinte; o corrente entra por
    // último (off == MAX_PROCS) para o round-robin avançar de verdade
    let rr_order = |from: Pid| {
        (1..=MAX_PROCS)
            .map(move |off| (from + off) % MAX_PROCS)
            .filter(|&i| i != 0)
    };

    match t.algorithm {
        SchedAlgorithm::RoundRobin => {
            for i in rr_order(cur) {
                if t.slots[i].state == ProcState::Ready {
                    return i;
                }
            }
        }
        SchedAlgorithm::Priority => {
            let mut best: Option<Pid> = None;
            // Ordem RR a partir do corrente resolve empates
            for i in rr_order(cur) {
                if t.slots[i].state != ProcState::Ready {
                    continue;
                }
                match best {
                    None => best = Some(i),
                    Some(b) if t.slots[i].prio < t.slots[b].prio => best = Some(i),
                    _ => {}
                }
            }
            if let Some(b) = best {
                return b;
            }
        }
    }
    0
}

/// Efetiva a troca de `cur` para `next` dentro do lock (contabilidade +
/// TSS + CR3). Retorna o RSP salvo do processo que entra.
fn commit_switch(t: &mut ProcTable, next: Pid, old_rsp: u64) -> u64 {
    let cur = t.current;
    t.slots[cur].kernel_sp = old_rsp;
    t.slots[next].state = ProcState::Running;
    t.current = next;
    t.switch_count += 1;

    // Transições Ring3→Ring0 e syscalls caem na stack de kernel do novo
    gdt::set_kernel_stack(t.slots[next].kstack_top);
    fast_syscall::set_kernel_stack(t.slots[next].kstack_top);

    let aspace = t.slots[next].aspace;
    if aspace != 0 {
        vmm::switch_to(PhysAddr::new(aspace));
    }
    t.slots[next].kernel_sp
}

/// Caminho do tick do timer.
///
/// Recebe o RSP onde o trap frame do processo interrompido ficou salvo;
/// devolve o RSP de onde o epílogo deve restaurar: o mesmo, ou o de
/// outro processo se a fatia acabou.
pub fn schedule_from_irq(old_rsp: u64) -> u64 {
    let mut t = TABLE.lock();
    let now = crate::core::time::jiffies();
    wake_sleepers(&mut t, now);

    let cur = t.current;

    // Contabilidade do tick
    if t.slots[cur].state == ProcState::Running {
        t.slots[cur].cpu_ticks += 1;
        if t.slots[cur].slice_left > 0 {
            t.slots[cur].slice_left -= 1;
        }
    }

    let must_switch = t.slots[cur].state != ProcState::Running || t.slots[cur].slice_left == 0;
    if !must_switch {
        return old_rsp;
    }

    // Fatia esgotada: volta para a fila com a fatia cheia
    if t.slots[cur].state == ProcState::Running {
        t.slots[cur].state = ProcState::Ready;
    }
    t.slots[cur].slice_left = t.slots[cur].slice_default;

    let next = select_next(&t);
    if next == cur {
        // Ninguém melhor: segue o mesmo processo
        if t.slots[cur].state == ProcState::Ready {
            t.slots[cur].state = ProcState::Running;
        }
        return old_rsp;
    }

    commit_switch(&mut t, next, old_rsp)
}

/// Cede a CPU voluntariamente (yield, sleep, wait, exit).
pub fn yield_now() {
    let (old_sp_ptr, new_sp) = {
        let mut t = TABLE.lock();
        let cur = t.current;

        if t.slots[cur].state == ProcState::Running {
            t.slots[cur].state = ProcState::Ready;
        }
        t.slots[cur].slice_left = t.slots[cur].slice_default;

        let next = select_next(&t);
        if next == cur {
            if t.slots[cur].state == ProcState::Ready {
                t.slots[cur].state = ProcState::Running;
            }
            return;
        }

        // Zombies não têm mais stack: o RSP de saída vai para o lixo
        static mut DISCARD: u64 = 0;
        let old_ptr = if t.slots[cur].state == ProcState::Zombie {
            unsafe { core::ptr::addr_of_mut!(DISCARD) }
        } else {
            core::ptr::addr_of_mut!(t.slots[cur].kernel_sp)
        };

        t.slots[next].state = ProcState::Running;
        t.current = next;
        t.switch_count += 1;
        gdt::set_kernel_stack(t.slots[next].kstack_top);
        fast_syscall::set_kernel_stack(t.slots[next].kstack_top);
        let aspace = t.slots[next].aspace;
        if aspace != 0 {
            vmm::switch_to(PhysAddr::new(aspace));
        }
        (old_ptr, t.slots[next].kernel_sp)
    };

    // Fora do lock: quem entra pode rodar à vontade
    unsafe { context::switch(old_sp_ptr, new_sp) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::task::{self, Priority};

    fn tick_n(n: usize) {
        for _ in 0..n {
            crate::core::time::tick();
            // RSP sintético: a contabilidade não o dereferencia
            let _ = schedule_from_irq(0x1000);
        }
    }

    fn setup_two(prio1: Priority, prio2: Priority) -> (usize, usize) {
        task::test_reset();
        task::init();
        crate::core::time::test_reset();
        let p1 = task::create_process("p1", 0x1000, prio1).unwrap();
        let p2 = task::create_process("p2", 0x2000, prio2).unwrap();
        // P1 assume a CPU
        let mut t = TABLE.lock();
        t.slots[p1].state = crate::sched::ProcState::Running;
        t.slots[0].state = crate::sched::ProcState::Ready;
        t.current = p1;
        drop(t);
        (p1, p2)
    }

    #[test]
    fn test_round_robin_two_process_fairness() {
        let _g = task::test_guard();
        let (p1, p2) = setup_two(Priority::Normal, Priority::Normal);
        set_algorithm(SchedAlgorithm::RoundRobin);

        tick_n(100);

        let t = TABLE.lock();
        // Fatias de 10: troca nos ticks 10, 20, ..., 100
        assert_eq!(t.switch_count, 10);
        assert_eq!(t.slots[p1].cpu_ticks, 50);
        assert_eq!(t.slots[p2].cpu_ticks, 50);
    }

    #[test]
    fn test_priority_starves_lower_class() {
        let _g = task::test_guard();
        task::test_reset();
        task::init();
        crate::core::time::test_reset();
        let pn = task::create_process("pn", 0x1000, Priority::Normal).unwrap();
        let prt = task::create_process("prt", 0x2000, Priority::Realtime).unwrap();
        {
            let mut t = TABLE.lock();
            t.slots[prt].state = crate::sched::ProcState::Running;
            t.slots[0].state = crate::sched::ProcState::Ready;
            t.current = prt;
            t.algorithm = SchedAlgorithm::Priority;
        }

        tick_n(20);

        let t = TABLE.lock();
        // A cada expiração o realtime é re-eleito na hora
        assert_eq!(t.slots[prt].cpu_ticks, 20);
        assert_eq!(t.slots[pn].cpu_ticks, 0);
        assert_eq!(t.switch_count, 0);
    }

    #[test]
    fn test_idle_runs_when_nobody_ready() {
        let _g = task::test_guard();
        task::test_reset();
        task::init();
        crate::core::time::test_reset();
        let p = task::create_process("p", 0x1000, Priority::Normal).unwrap();
        {
            let mut t = TABLE.lock();
            t.slots[p].state = crate::sched::ProcState::Running;
            t.slots[0].state = crate::sched::ProcState::Ready;
            t.current = p;
            // Único processo dorme para sempre
            t.slots[p].state = crate::sched::ProcState::Sleeping;
            t.slots[p].wake_tick = u64::MAX;
        }
        crate::core::time::tick();
        let _ = schedule_from_irq(0x1000);
        let t = TABLE.lock();
        assert_eq!(t.current, 0);
        assert_eq!(t.slots[0].state, crate::sched::ProcState::Running);
    }

    #[test]
    fn test_sleeper_wakes_at_deadline() {
        let _g = task::test_guard();
        let (p1, p2) = setup_two(Priority::Normal, Priority::Normal);
        {
            let mut t = TABLE.lock();
            t.slots[p2].state = crate::sched::ProcState::Sleeping;
            t.slots[p2].wake_tick = 5;
        }
        tick_n(4);
        assert_eq!(
            TABLE.lock().slots[p2].state,
            crate::sched::ProcState::Sleeping
        );
        tick_n(1);
        // Acordou no tick 5 (e P1 ainda tem fatia, então só fica pronto)
        assert_eq!(TABLE.lock().slots[p2].state, crate::sched::ProcState::Ready);
        let _ = p1;
    }

    #[test]
    fn test_round_robin_skips_blocked() {
        let _g = task::test_guard();
        let (p1, p2) = setup_two(Priority::Normal, Priority::Normal);
        let p3 = task::create_process("p3", 0x3000, Priority::Normal).unwrap();
        {
            let mut t = TABLE.lock();
            t.slots[p2].state = crate::sched::ProcState::Blocked;
        }
        // Esgota a fatia de P1 (10 ticks): deve pular P2 e cair em P3
        tick_n(10);
        let t = TABLE.lock();
        assert_eq!(t.current, p3);
        let _ = p1;
    }
}
