//! Virtual Memory Manager.
//!
//! Caminhada das tabelas de 4 níveis com o identity map como atalho: o
//! endereço físico de qualquer tabela É o seu endereço virtual (primeiros
//! 4 GiB compartilhados via PML4[0]).
//!
//! Ciclo de vida de address space:
//! - `create_address_space` copia a entrada 0 do PML4 do kernel (metade
//!   do kernel, compartilhada) e deixa o resto vazio.
//! - `destroy_address_space` percorre as entradas de usuário devolvendo as
//!   tabelas intermediárias ao PMM. A entrada 0 NUNCA é liberada.
//!
//! Os quadros de dados mapeados pertencem aos seus subsistemas (mmap, shm,
//! loader); aqui só se devolvem as páginas de tabela.

pub mod paging;

use super::addr::{PhysAddr, VirtAddr};
use super::config::PAGE_SIZE;
#[cfg(target_os = "none")]
use super::config::{HEAP_SIZE, HEAP_VIRT_BASE, HUGE_PAGE_SIZE};
use super::pmm;
use crate::arch::x86_64::idt::{self, TrapFrame};
use crate::arch::Cpu;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU64, Ordering};
pub use paging::{PageFlags, PageTable, PageTableEntry};

/// Erros das operações de mapeamento.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// PMM sem quadros para tabelas intermediárias.
    NoMemory,
    /// Endereço virtual dentro de uma huge page de 1 GiB (não divisível).
    GiantPage,
    /// Página não mapeada (unmap/translate).
    NotMapped,
    /// Já existe mapeamento presente no endereço.
    AlreadyMapped,
}

bitflags! {
    /// Error code empilhado pela CPU no page fault.
    #[derive(Debug, Clone, Copy)]
    pub struct PfError: u64 {
        const PRESENT     = 1 << 0;
        const WRITE       = 1 << 1;
        const USER        = 1 << 2;
        const RESERVED    = 1 << 3;
        const INSTRUCTION = 1 << 4;
    }
}

/// Fornecedor de páginas de tabela.
///
/// A implementação de produção puxa do PMM; os testes de host entregam
/// páginas do heap do processo (o identity map vira "endereço == ponteiro").
/// Contrato: `alloc_table` retorna uma página JÁ zerada.
pub trait TableAlloc {
    fn alloc_table(&mut self) -> Option<PhysAddr>;
    fn free_table(&mut self, addr: PhysAddr);
}

/// Alocador padrão: quadros físicos do PMM.
pub struct PmmTables;

impl TableAlloc for PmmTables {
    fn alloc_table(&mut self) -> Option<PhysAddr> {
        pmm::alloc_zeroed_frame()
    }

    fn free_table(&mut self, addr: PhysAddr) {
        pmm::free_frame(addr);
    }
}

static KERNEL_ROOT: AtomicU64 = AtomicU64::new(0);

#[inline]
fn table_mut(addr: PhysAddr) -> &'static mut PageTable {
    unsafe { &mut *(addr.as_u64() as *mut PageTable) }
}

/// Raiz da árvore do kernel.
pub fn kernel_root() -> PhysAddr {
    PhysAddr::new(KERNEL_ROOT.load(Ordering::Relaxed))
}

/// Monta a árvore do kernel: identity map de 4 GiB em huge pages de 2 MiB
/// e carrega CR3. Só roda no alvo real.
pub fn init() {
    #[cfg(target_os = "none")]
    {
        let mut alloc = PmmTables;
        let root = alloc
            .alloc_table()
            .expect("(VMM) sem quadro para o PML4 do kernel");
        let pdpt = alloc
            .alloc_table()
            .expect("(VMM) sem quadro para o PDPT do kernel");

        let kflags = PageFlags::PRESENT | PageFlags::WRITABLE;
        table_mut(root).entries[0].set(pdpt, kflags);

        // 4 entradas de PDPT, cada uma um PD com 512 huge pages de 2 MiB
        for g in 0..4usize {
            let pd = alloc
                .alloc_table()
                .expect("(VMM) sem quadro para PD do identity map");
            table_mut(pdpt).entries[g].set(pd, kflags);
            for i in 0..512usize {
                let phys = (g * 512 + i) * HUGE_PAGE_SIZE;
                table_mut(pd).entries[i].set(
                    PhysAddr::new(phys as u64),
                    kflags | PageFlags::HUGE | PageFlags::GLOBAL,
                );
            }
        }

        KERNEL_ROOT.store(root.as_u64(), Ordering::Relaxed);

        // Mapear a janela do heap antes de trocar o CR3
        let mut virt = HEAP_VIRT_BASE as u64;
        let heap_end = (HEAP_VIRT_BASE + HEAP_SIZE) as u64;
        while virt < heap_end {
            let frame = pmm::alloc_frame().expect("(VMM) sem quadros para o heap");
            map_with(&mut alloc, root, VirtAddr::new(virt), frame, kflags)
                .expect("(VMM) falha mapeando heap");
            virt += PAGE_SIZE as u64;
        }

        unsafe { Cpu::write_cr3(root.as_u64()) };
        crate::kinfo!("(VMM) CR3 carregado, root=", root.as_u64());
    }

    idt::register_exception(14, page_fault_handler);
}

/// Divide uma huge page de 2 MiB em 512 entradas de 4 KiB preservando
/// endereços e flags originais.
fn split_huge(alloc: &mut dyn TableAlloc, pd_entry: &mut PageTableEntry) -> Result<(), MapError> {
    let base = pd_entry.addr();
    let mut child_flags = pd_entry.flags();
    child_flags.remove(PageFlags::HUGE);

    let pt_phys = alloc.alloc_table().ok_or(MapError::NoMemory)?;
    let pt = table_mut(pt_phys);
    for (i, entry) in pt.entries.iter_mut().enumerate() {
        entry.set(
            PhysAddr::new(base.as_u64() + (i * PAGE_SIZE) as u64),
            child_flags,
        );
    }

    // A entrada do PD vira um ponteiro de tabela comum
    let mut table_flags = child_flags & (PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER);
    table_flags.insert(PageFlags::PRESENT);
    pd_entry.set(pt_phys, table_flags);
    Ok(())
}

/// Desce até a PT de `virt`, criando tabelas intermediárias.
///
/// Retorna a entrada folha e se uma huge page foi dividida no caminho:
/// nesse caso a entrada folha é o filho herdado do split e pode ser
/// sobrescrita pelo novo mapeamento.
fn walk_create<'a>(
    alloc: &mut dyn TableAlloc,
    root: PhysAddr,
    virt: VirtAddr,
) -> Result<(&'a mut PageTableEntry, bool), MapError> {
    let inter_flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER;
    let mut did_split = false;

    let pml4 = table_mut(root);
    let p4e = &mut pml4.entries[virt.p4_index()];
    if !p4e.is_present() {
        let t = alloc.alloc_table().ok_or(MapError::NoMemory)?;
        p4e.set(t, inter_flags);
    }

    let pdpt = table_mut(p4e.addr());
    let p3e = &mut pdpt.entries[virt.p3_index()];
    if p3e.is_present() && p3e.is_huge() {
        // 1 GiB: não divisível
        return Err(MapError::GiantPage);
    }
    if !p3e.is_present() {
        let t = alloc.alloc_table().ok_or(MapError::NoMemory)?;
        p3e.set(t, inter_flags);
    }

    let pd = table_mut(p3e.addr());
    let p2e = &mut pd.entries[virt.p2_index()];
    if p2e.is_present() && p2e.is_huge() {
        split_huge(alloc, p2e)?;
        did_split = true;
    }
    if !p2e.is_present() {
        let t = alloc.alloc_table().ok_or(MapError::NoMemory)?;
        p2e.set(t, inter_flags);
    }

    let pt = table_mut(p2e.addr());
    Ok((&mut pt.entries[virt.p1_index()], did_split))
}

/// Instala o mapeamento `virt -> phys` na árvore `root`.
///
/// Dentro de uma região 2 MiB huge, a huge page é dividida e a nova
/// entrada substitui o filho herdado; um mapeamento 4 KiB pré-existente é
/// recusado.
pub fn map_with(
    alloc: &mut dyn TableAlloc,
    root: PhysAddr,
    virt: VirtAddr,
    phys: PhysAddr,
    flags: PageFlags,
) -> Result<(), MapError> {
    let (entry, from_split) = walk_create(alloc, root, virt)?;
    if entry.is_present() && !from_split {
        return Err(MapError::AlreadyMapped);
    }
    entry.set(phys, flags | PageFlags::PRESENT);
    Ok(())
}

/// `map_with` usando o PMM.
pub fn map(root: PhysAddr, virt: VirtAddr, phys: PhysAddr, flags: PageFlags) -> Result<(), MapError> {
    map_with(&mut PmmTables, root, virt, phys, flags)
}

/// Remove o mapeamento e devolve o quadro que estava instalado.
pub fn unmap_with(
    alloc: &mut dyn TableAlloc,
    root: PhysAddr,
    virt: VirtAddr,
) -> Result<PhysAddr, MapError> {
    let pml4 = table_mut(root);
    let p4e = &pml4.entries[virt.p4_index()];
    if !p4e.is_present() {
        return Err(MapError::NotMapped);
    }
    let pdpt = table_mut(p4e.addr());
    let p3e = &pdpt.entries[virt.p3_index()];
    if !p3e.is_present() {
        return Err(MapError::NotMapped);
    }
    if p3e.is_huge() {
        return Err(MapError::GiantPage);
    }
    let pd = table_mut(p3e.addr());
    let p2e = &mut pd.entries[virt.p2_index()];
    if !p2e.is_present() {
        return Err(MapError::NotMapped);
    }
    if p2e.is_huge() {
        split_huge(alloc, p2e)?;
    }
    let pt = table_mut(p2e.addr());
    let p1e = &mut pt.entries[virt.p1_index()];
    if !p1e.is_present() {
        return Err(MapError::NotMapped);
    }
    let phys = p1e.addr();
    p1e.clear();
    Cpu::invlpg(virt.as_u64());
    Ok(phys)
}

pub fn unmap(root: PhysAddr, virt: VirtAddr) -> Result<PhysAddr, MapError> {
    unmap_with(&mut PmmTables, root, virt)
}

/// Traduz `virt` para físico na árvore `root`. 0 vira `None`.
pub fn translate(root: PhysAddr, virt: VirtAddr) -> Option<PhysAddr> {
    let pml4 = table_mut(root);
    let p4e = pml4.entries[virt.p4_index()];
    if !p4e.is_present() {
        return None;
    }
    let p3e = table_mut(p4e.addr()).entries[virt.p3_index()];
    if !p3e.is_present() {
        return None;
    }
    if p3e.is_huge() {
        let off = virt.as_u64() & 0x3FFF_FFFF;
        return Some(PhysAddr::new(p3e.addr().as_u64() + off));
    }
    let p2e = table_mut(p3e.addr()).entries[virt.p2_index()];
    if !p2e.is_present() {
        return None;
    }
    if p2e.is_huge() {
        let off = virt.as_u64() & 0x1F_FFFF;
        return Some(PhysAddr::new(p2e.addr().as_u64() + off));
    }
    let p1e = table_mut(p2e.addr()).entries[virt.p1_index()];
    if !p1e.is_present() {
        return None;
    }
    Some(PhysAddr::new(p1e.addr().as_u64() + virt.page_offset()))
}

/// Cria um address space novo com a metade do kernel compartilhada.
pub fn create_address_space_with(alloc: &mut dyn TableAlloc, kernel: PhysAddr) -> Option<PhysAddr> {
    let root = alloc.alloc_table()?;
    let new = table_mut(root);
    // Entrada 0 compartilhada (identity map do kernel); resto vazio
    new.entries[0] = table_mut(kernel).entries[0];
    Some(root)
}

pub fn create_address_space() -> Option<PhysAddr> {
    create_address_space_with(&mut PmmTables, kernel_root())
}

/// Destrói um address space devolvendo TODAS as páginas de tabela de
/// usuário ao alocador. A entrada 0 (kernel) nunca é tocada.
pub fn destroy_address_space_with(alloc: &mut dyn TableAlloc, root: PhysAddr) {
    let pml4 = table_mut(root);
    for i in 1..512 {
        let p4e = pml4.entries[i];
        if !p4e.is_present() {
            continue;
        }
        let pdpt = table_mut(p4e.addr());
        for p3e in pdpt.entries.iter() {
            if !p3e.is_present() || p3e.is_huge() {
                continue;
            }
            let pd = table_mut(p3e.addr());
            for p2e in pd.entries.iter() {
                if !p2e.is_present() || p2e.is_huge() {
                    continue;
                }
                alloc.free_table(p2e.addr());
            }
            alloc.free_table(p3e.addr());
        }
        alloc.free_table(p4e.addr());
        pml4.entries[i].clear();
    }
    alloc.free_table(root);
}

pub fn destroy_address_space(root: PhysAddr) {
    destroy_address_space_with(&mut PmmTables, root);
}

/// Ativa a árvore `root`.
pub fn switch_to(root: PhysAddr) {
    unsafe { Cpu::write_cr3(root.as_u64()) };
}

/// Handler de page fault (vetor 14).
///
/// Kernel mode: fatal. User mode: por enquanto fatal também: ponto de
/// gancho para demand paging / stack grow / SIGSEGV.
fn page_fault_handler(frame: &mut TrapFrame) {
    let cr2 = Cpu::read_cr2();
    let err = PfError::from_bits_truncate(frame.error_code);

    crate::kerror!("(VMM) PAGE FAULT addr=", cr2);
    crate::kerror!("(VMM)   rip=", frame.rip);
    crate::kerror!("(VMM)   err=", frame.error_code);
    if err.contains(PfError::USER) {
        // TODO: converter em SIGSEGV quando houver handlers de usuário
        crate::kerror!("(VMM) fault de usuario - terminando sistema");
    }
    Cpu::hang();
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::vec::Vec;

    /// Tabelas vindas do heap do processo de teste; o "endereço físico" é
    /// o ponteiro, o que casa com o atalho identity map do walk.
    struct HeapTables {
        allocated: Vec<u64>,
        freed: Vec<u64>,
    }

    impl HeapTables {
        fn new() -> Self {
            Self {
                allocated: Vec::new(),
                freed: Vec::new(),
            }
        }
    }

    impl TableAlloc for HeapTables {
        fn alloc_table(&mut self) -> Option<PhysAddr> {
            let table = Box::leak(Box::new(PageTable::new()));
            let addr = table as *mut PageTable as u64;
            self.allocated.push(addr);
            Some(PhysAddr::new(addr))
        }

        fn free_table(&mut self, addr: PhysAddr) {
            self.freed.push(addr.as_u64());
            unsafe { drop(Box::from_raw(addr.as_u64() as *mut PageTable)) };
        }
    }

    fn mk_root(alloc: &mut HeapTables) -> PhysAddr {
        alloc.alloc_table().unwrap()
    }

    const V: u64 = 0x80_0000_0000; // PML4[1]

    #[test]
    fn test_map_translate() {
        let mut a = HeapTables::new();
        let root = mk_root(&mut a);
        let virt = VirtAddr::new(V + 0x3000);
        let phys = PhysAddr::new(0xAAAA_B000);
        map_with(&mut a, root, virt, phys, PageFlags::WRITABLE | PageFlags::USER).unwrap();
        assert_eq!(translate(root, virt), Some(phys));
        // Offset dentro da página acompanha
        assert_eq!(
            translate(root, VirtAddr::new(V + 0x3123)),
            Some(PhysAddr::new(0xAAAA_B123))
        );
    }

    #[test]
    fn test_translate_unmapped_is_none() {
        let mut a = HeapTables::new();
        let root = mk_root(&mut a);
        assert_eq!(translate(root, VirtAddr::new(V)), None);
    }

    #[test]
    fn test_map_unmap_roundtrip() {
        let mut a = HeapTables::new();
        let root = mk_root(&mut a);
        let virt = VirtAddr::new(V + 0x5000);
        let phys = PhysAddr::new(0x1_2345_6000);
        map_with(&mut a, root, virt, phys, PageFlags::WRITABLE).unwrap();
        let got = unmap_with(&mut a, root, virt).unwrap();
        assert_eq!(got, phys);
        assert_eq!(translate(root, virt), None);
        // A mesma caminhada continua válida para remapear
        map_with(&mut a, root, virt, phys, PageFlags::WRITABLE).unwrap();
        assert_eq!(translate(root, virt), Some(phys));
    }

    #[test]
    fn test_double_map_rejected() {
        let mut a = HeapTables::new();
        let root = mk_root(&mut a);
        let virt = VirtAddr::new(V);
        map_with(&mut a, root, virt, PhysAddr::new(0x1000), PageFlags::empty()).unwrap();
        assert_eq!(
            map_with(&mut a, root, virt, PhysAddr::new(0x2000), PageFlags::empty()),
            Err(MapError::AlreadyMapped)
        );
    }

    #[test]
    fn test_huge_2m_split_preserves_siblings() {
        let mut a = HeapTables::new();
        let root = mk_root(&mut a);

        // Montar manualmente uma huge page de 2 MiB em V
        let huge_base = PhysAddr::new(0x4000_0000);
        let huge_flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER;
        {
            let inter = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER;
            let pml4 = table_mut(root);
            let pdpt_phys = a.alloc_table().unwrap();
            pml4.entries[VirtAddr::new(V).p4_index()].set(pdpt_phys, inter);
            let pd_phys = a.alloc_table().unwrap();
            table_mut(pdpt_phys).entries[VirtAddr::new(V).p3_index()].set(pd_phys, inter);
            table_mut(pd_phys).entries[VirtAddr::new(V).p2_index()]
                .set(huge_base, huge_flags | PageFlags::HUGE);
        }

        // Antes do split a tradução cai dentro da huge page
        assert_eq!(
            translate(root, VirtAddr::new(V + 0x42_000)),
            Some(PhysAddr::new(huge_base.as_u64() + 0x42_000))
        );

        // Mapear uma 4K dentro da região força o split e substitui o filho
        let target = VirtAddr::new(V + 0x10_000); // página 16 da região
        let newphys = PhysAddr::new(0x9999_9000);
        map_with(&mut a, root, target, newphys, PageFlags::WRITABLE).unwrap();
        assert_eq!(translate(root, target), Some(newphys));

        // As outras 511 sub-páginas continuam apontando para o original
        for probe in [0usize, 1, 15, 17, 511] {
            let v = VirtAddr::new(V + (probe * PAGE_SIZE) as u64);
            let expect = PhysAddr::new(huge_base.as_u64() + (probe * PAGE_SIZE) as u64);
            assert_eq!(translate(root, v), Some(expect), "sub-pagina {}", probe);
        }

        // E as flags originais foram preservadas nos filhos
        let pml4 = table_mut(root);
        let pdpt = table_mut(pml4.entries[target.p4_index()].addr());
        let pd = table_mut(pdpt.entries[target.p3_index()].addr());
        let p2e = pd.entries[target.p2_index()];
        assert!(!p2e.is_huge());
        let pt = table_mut(p2e.addr());
        let child = pt.entries[7];
        assert!(child.flags().contains(PageFlags::WRITABLE));
        assert!(child.flags().contains(PageFlags::USER));
        assert!(!child.flags().contains(PageFlags::HUGE));
    }

    #[test]
    fn test_unmap_inside_huge_after_split() {
        let mut a = HeapTables::new();
        let root = mk_root(&mut a);
        let inter = PageFlags::PRESENT | PageFlags::WRITABLE;
        let huge_base = PhysAddr::new(0x8000_0000);
        {
            let pml4 = table_mut(root);
            let pdpt_phys = a.alloc_table().unwrap();
            pml4.entries[VirtAddr::new(V).p4_index()].set(pdpt_phys, inter);
            let pd_phys = a.alloc_table().unwrap();
            table_mut(pdpt_phys).entries[VirtAddr::new(V).p3_index()].set(pd_phys, inter);
            table_mut(pd_phys).entries[VirtAddr::new(V).p2_index()]
                .set(huge_base, inter | PageFlags::HUGE);
        }
        let victim = VirtAddr::new(V + 0x8000);
        let freed = unmap_with(&mut a, root, victim).unwrap();
        assert_eq!(freed.as_u64(), huge_base.as_u64() + 0x8000);
        assert_eq!(translate(root, victim), None);
        // Vizinhas sobrevivem
        assert_eq!(
            translate(root, VirtAddr::new(V + 0x9000)),
            Some(PhysAddr::new(huge_base.as_u64() + 0x9000))
        );
    }

    #[test]
    fn test_giant_1g_rejected() {
        let mut a = HeapTables::new();
        let root = mk_root(&mut a);
        let inter = PageFlags::PRESENT | PageFlags::WRITABLE;
        {
            let pml4 = table_mut(root);
            let pdpt_phys = a.alloc_table().unwrap();
            pml4.entries[VirtAddr::new(V).p4_index()].set(pdpt_phys, inter);
            table_mut(pdpt_phys).entries[VirtAddr::new(V).p3_index()]
                .set(PhysAddr::new(0x4000_0000), inter | PageFlags::HUGE);
        }
        assert_eq!(
            map_with(&mut a, root, VirtAddr::new(V), PhysAddr::new(0x1000), PageFlags::empty()),
            Err(MapError::GiantPage)
        );
    }

    #[test]
    fn test_address_space_lifecycle() {
        let mut a = HeapTables::new();
        // "Kernel root" com uma entrada 0 qualquer
        let kroot = mk_root(&mut a);
        table_mut(kroot).entries[0].set(
            PhysAddr::new(0xDEAD_0000),
            PageFlags::PRESENT | PageFlags::WRITABLE,
        );

        let aspace = create_address_space_with(&mut a, kroot).unwrap();
        // Entrada 0 compartilhada byte a byte
        assert_eq!(
            table_mut(aspace).entries[0].raw(),
            table_mut(kroot).entries[0].raw()
        );

        // Popular alguns mapeamentos de usuário
        for i in 0..4u64 {
            map_with(
                &mut a,
                aspace,
                VirtAddr::new(V + i * 0x1000),
                PhysAddr::new(0x7000_0000 + i * 0x1000),
                PageFlags::USER | PageFlags::WRITABLE,
            )
            .unwrap();
        }

        let allocated_before = a.allocated.len();
        destroy_address_space_with(&mut a, aspace);
        // Devolveu: PML4 + PDPT + PD + PT do ramo de usuário (4 tabelas);
        // a "entrada do kernel" (0xDEAD_0000) não foi tocada.
        assert_eq!(a.freed.len(), 4);
        assert!(!a.freed.contains(&0xDEAD_0000));
        assert_eq!(a.allocated.len(), allocated_before);
    }
}
