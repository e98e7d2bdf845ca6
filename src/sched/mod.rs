//! Processos, scheduler, sinais e loader de executáveis.

pub mod context;
pub mod exec;
pub mod scheduler;
pub mod signal;
pub mod task;

pub use task::{Pid, Priority, ProcState};

/// Sobe a tabela de processos (PCB 0 = idle/kernel) e o scheduler.
pub fn init() {
    task::init();
    scheduler::init();
    crate::kok!("(SCHED) Tabela de processos e scheduler prontos");
}
