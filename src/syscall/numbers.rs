//! Catálogo de números de syscall.
//!
//! Numeração EXCLUSIVA do Brasa OS: não é Linux nem POSIX. Os números são
//! ABI estável: nunca renumerar, só acrescentar.
//!
//! | Range     | Categoria      |
//! |-----------|----------------|
//! | 0x01-0x0F | Processo       |
//! | 0x10-0x1F | Arquivo (I/O)  |
//! | 0x20-0x27 | Descritores    |
//! | 0x28-0x2F | Diretórios     |
//! | 0x30-0x3F | Memória        |
//! | 0x40-0x4F | Controle       |
//! | 0x50-0x5F | Sinais         |
//! | 0x60-0x6F | IPC            |
//! | 0x70-0x7F | Diversos       |

// ============================================================================
// PROCESSO (0x01 - 0x0F)
// ============================================================================

/// Encerra o processo atual. Args: (exit_code). Não retorna.
pub const SYS_EXIT: usize = 0x01;
/// PID do processo atual.
pub const SYS_GETPID: usize = 0x02;
/// Cede o restante da fatia de tempo.
pub const SYS_YIELD: usize = 0x03;
/// Dorme. Args: (ms).
pub const SYS_SLEEP: usize = 0x04;
/// Duplica o processo (fd table + brk; address space COMPARTILHADO).
pub const SYS_FORK: usize = 0x05;
/// Espera um filho. Args: (status_ptr). Retorno: pid do filho colhido.
pub const SYS_WAIT: usize = 0x06;
/// Substitui a imagem. Args: (path_cstr).
pub const SYS_EXECVE: usize = 0x07;
/// Envia sinal. Args: (pid, sig).
pub const SYS_KILL: usize = 0x08;
/// PID do pai.
pub const SYS_GETPPID: usize = 0x09;
/// Ticks desde o boot.
pub const SYS_UPTIME: usize = 0x0A;
/// Prioridade de um processo. Args: (pid).
pub const SYS_GETPRIO: usize = 0x0B;
/// Troca prioridade. Args: (pid, prio).
pub const SYS_SETPRIO: usize = 0x0C;
/// Preenche ProcInfo. Args: (pid, out_ptr).
pub const SYS_PROCINFO: usize = 0x0D;
/// Preenche MemInfo. Args: (out_ptr).
pub const SYS_MEMINFO: usize = 0x0E;

// ============================================================================
// ARQUIVO (0x10 - 0x1F)
// ============================================================================

/// Args: (path_cstr, flags). Retorno: fd.
pub const SYS_OPEN: usize = 0x10;
/// Args: (fd).
pub const SYS_CLOSE: usize = 0x11;
/// Args: (fd, buf_ptr, count). Retorno: bytes lidos (0 = EOF).
pub const SYS_READ: usize = 0x12;
/// Args: (fd, buf_ptr, count). Retorno: bytes escritos.
pub const SYS_WRITE: usize = 0x13;
/// Args: (fd, offset, whence 0/1/2). Retorno: offset novo.
pub const SYS_LSEEK: usize = 0x14;
/// Args: (path_cstr, out_ptr).
pub const SYS_STAT: usize = 0x15;
/// Args: (fd, out_ptr).
pub const SYS_FSTAT: usize = 0x16;

// ============================================================================
// DESCRITORES (0x20 - 0x27)
// ============================================================================

/// Duplica no menor slot livre. Args: (fd).
pub const SYS_DUP: usize = 0x20;
/// Duplica em slot específico. Args: (fd, newfd).
pub const SYS_DUP2: usize = 0x21;
/// Cria pipe. Args: (out_ptr → [read_fd, write_fd] como 2×i32).
pub const SYS_PIPE: usize = 0x22;

// ============================================================================
// DIRETÓRIOS (0x28 - 0x2F)
// ============================================================================

/// Args: (buf_ptr, buf_len). Retorno: bytes copiados.
pub const SYS_GETCWD: usize = 0x28;
/// Args: (path_cstr).
pub const SYS_CHDIR: usize = 0x29;
pub const SYS_MKDIR: usize = 0x2A;
pub const SYS_RMDIR: usize = 0x2B;
pub const SYS_UNLINK: usize = 0x2C;
/// Args: (path_cstr, out_ptr, max). Entradas no layout de DirEntry.
pub const SYS_READDIR: usize = 0x2D;

// ============================================================================
// MEMÓRIA (0x30 - 0x3F)
// ============================================================================

/// mmap anônimo privado. Args: (addr, len, prot). Retorno: VA.
pub const SYS_MMAP: usize = 0x30;
/// Args: (addr, len).
pub const SYS_MUNMAP: usize = 0x31;
/// Args: (novo brk; 0 = consulta). Retorno: brk corrente.
pub const SYS_BRK: usize = 0x32;

// ============================================================================
// CONTROLE (0x40 - 0x4F)
// ============================================================================

/// Args: (fd, cmd, arg).
pub const SYS_IOCTL: usize = 0x40;
/// Args: (fd, cmd, arg). DUPFD/GETFD/SETFD/GETFL/SETFL.
pub const SYS_FCNTL: usize = 0x41;
/// Args: (fds_ptr, nfds, timeout_ms).
pub const SYS_POLL: usize = 0x42;

// ============================================================================
// SINAIS (0x50 - 0x5F)
// ============================================================================

/// Args: (sig, act_ptr, old_ptr).
pub const SYS_SIGACTION: usize = 0x50;
/// Retorno de handler (restaura máscara).
pub const SYS_SIGRETURN: usize = 0x51;
/// Args: (how, mask). Retorno: máscara antiga.
pub const SYS_SIGPROCMASK: usize = 0x52;

// ============================================================================
// IPC (0x60 - 0x6F)
// ============================================================================

/// Args: (key, size, flags). Retorno: shmid.
pub const SYS_SHMGET: usize = 0x60;
/// Args: (shmid, addr). Retorno: VA do attach.
pub const SYS_SHMAT: usize = 0x61;
/// Args: (addr).
pub const SYS_SHMDT: usize = 0x62;

// ============================================================================
// DIVERSOS (0x70 - 0x7F)
// ============================================================================

pub const SYS_GETUID: usize = 0x70;
pub const SYS_GETGID: usize = 0x71;
/// Args: (fd). Retorno: 1 se terminal, 0 se não.
pub const SYS_ISATTY: usize = 0x72;
/// Milissegundos desde o boot.
pub const SYS_CLOCK: usize = 0x73;

// Comandos de fcntl
pub const F_DUPFD: usize = 0;
pub const F_GETFD: usize = 1;
pub const F_SETFD: usize = 2;
pub const F_GETFL: usize = 3;
pub const F_SETFL: usize = 4;
