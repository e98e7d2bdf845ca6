//! Comunicação entre processos: pipes e memória compartilhada.

pub mod pipe;
pub mod shm;
