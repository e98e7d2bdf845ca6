//! Layout de memória do kernel: fonte única de verdade.
//!
//! O espaço baixo (PML4[0], primeiro meio-TiB) pertence ao kernel: os
//! primeiros 4 GiB são identity-mapped e compartilhados por todos os
//! address spaces. Espaço de usuário começa no PML4[1].

/// Tamanho de página (4 KiB).
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;

/// Tamanho de uma huge page de nível PD (2 MiB).
pub const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Fim da região identity-mapped (4 GiB).
pub const IDENTITY_LIMIT: u64 = 4 * 1024 * 1024 * 1024;

/// Base física do bitmap do PMM (512 KiB, memória baixa convencional,
/// fora da imagem do kernel que carrega em 1 MiB).
pub const PMM_BITMAP_PHYS: u64 = 0x0008_0000;

/// Espaço reservado para o bitmap (128 KiB = 1 bit por quadro em 4 GiB).
pub const PMM_BITMAP_MAX_BYTES: usize = 128 * 1024;

/// Início físico da imagem do kernel.
pub const KERNEL_PHYS_BASE: u64 = 0x0010_0000;

/// Reserva de folga depois da imagem do kernel (mods, page tables do loader).
pub const KERNEL_PHYS_CEIL: u64 = 0x0100_0000; // 16 MiB

/// Heap do kernel: virtual acima do identity map, dentro do PML4[0].
pub const HEAP_VIRT_BASE: usize = 0x1_0000_0000; // 4 GiB
pub const HEAP_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

/// Stack de kernel por processo.
pub const KSTACK_SIZE: usize = 16 * 1024;

/// Stack dedicada da entrada de syscall.
pub const SYSCALL_STACK_SIZE: usize = 16 * 1024;

/// Início do espaço de usuário (PML4[1] = 512 GiB).
pub const USER_SPACE_BASE: u64 = 0x80_0000_0000;

/// Topo da stack de usuário e seu tamanho.
pub const USER_STACK_TOP: u64 = 0x90_0000_0000;
pub const USER_STACK_SIZE: usize = 64 * 1024;

/// Base do brk (heap de usuário).
pub const USER_BRK_BASE: u64 = 0x88_0000_0000;

/// Janela de mmap anônimo (bump).
pub const MMAP_VIRT_BASE: u64 = 0xA0_0000_0000;

/// Janela de attach de memória compartilhada (bump).
pub const SHM_VIRT_BASE: u64 = 0xB0_0000_0000;
