//! Handler de panic do kernel: despeja na serial e trava a CPU.

#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    crate::kerror!("================================");
    crate::kerror!("KERNEL PANIC");
    if let Some(loc) = info.location() {
        crate::kerror!(loc.file(), loc.line() as u64);
    }
    crate::kerror!("================================");
    crate::arch::Cpu::hang();
}
