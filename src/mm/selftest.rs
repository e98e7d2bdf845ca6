//! Self tests de memória: rodam DENTRO do kernel no boot (feature
//! `self_test`), cobrindo o que os testes de host não alcançam: o PMM
//! sobre o memory map vivo e a paginação com quadros reais.

use super::addr::VirtAddr;
use super::vmm::{self, PageFlags};
use super::{config, pmm};
use crate::klib::test_framework::{run_test_suite, TestCase, TestResult};

const MM_TESTS: &[TestCase] = &[
    TestCase::new("pmm_alloc_free_roundtrip", test_pmm_roundtrip),
    TestCase::new("pmm_alloc_distinct", test_pmm_distinct),
    TestCase::new("vmm_map_translate_live", test_vmm_map_translate),
    TestCase::new("vmm_aspace_lifecycle", test_aspace_lifecycle),
];

pub fn run() {
    run_test_suite("mm", MM_TESTS);
}

fn test_pmm_roundtrip() -> TestResult {
    let free_before = pmm::free_bytes();
    let frame = match pmm::alloc_frame() {
        Some(f) => f,
        None => return TestResult::Failed,
    };
    pmm::free_frame(frame);
    if pmm::free_bytes() == free_before {
        TestResult::Passed
    } else {
        TestResult::Failed
    }
}

fn test_pmm_distinct() -> TestResult {
    let a = pmm::alloc_frame();
    let b = pmm::alloc_frame();
    let ok = match (a, b) {
        (Some(x), Some(y)) => x != y,
        _ => false,
    };
    if let Some(x) = a {
        pmm::free_frame(x);
    }
    if let Some(y) = b {
        pmm::free_frame(y);
    }
    if ok {
        TestResult::Passed
    } else {
        TestResult::Failed
    }
}

fn test_vmm_map_translate() -> TestResult {
    let root = vmm::kernel_root();
    let frame = match pmm::alloc_frame() {
        Some(f) => f,
        None => return TestResult::Failed,
    };
    // Janela de teste fora de tudo que o kernel usa
    let virt = VirtAddr::new(0x7F_0000_0000);
    if vmm::map(root, virt, frame, PageFlags::WRITABLE).is_err() {
        pmm::free_frame(frame);
        return TestResult::Failed;
    }
    // Escrever pelo alias e ler pelo identity map
    unsafe {
        core::ptr::write_volatile(virt.as_u64() as *mut u64, 0xC0FE_BABE);
    }
    let via_identity = unsafe { core::ptr::read_volatile(frame.as_u64() as *const u64) };
    let translated = vmm::translate(root, virt);
    let _ = vmm::unmap(root, virt);
    pmm::free_frame(frame);

    if translated == Some(frame) && via_identity == 0xC0FE_BABE {
        TestResult::Passed
    } else {
        TestResult::Failed
    }
}

fn test_aspace_lifecycle() -> TestResult {
    let used_before = pmm::used_frames();
    let root = match vmm::create_address_space() {
        Some(r) => r,
        None => return TestResult::Failed,
    };
    let frame = match pmm::alloc_frame() {
        Some(f) => f,
        None => return TestResult::Failed,
    };
    let virt = VirtAddr::new(config::USER_SPACE_BASE);
    if vmm::map(root, virt, frame, PageFlags::USER | PageFlags::WRITABLE).is_err() {
        return TestResult::Failed;
    }
    vmm::destroy_address_space(root);
    pmm::free_frame(frame);
    // Todas as tabelas voltaram para o PMM
    if pmm::used_frames() == used_before {
        TestResult::Passed
    } else {
        TestResult::Failed
    }
}
