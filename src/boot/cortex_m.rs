use cortex_m::{Peripherals, asm, interrupt};

use crate::boot::Boot;

/// Bootload mechanism for a Cortex-M7 without support for TrustZone.
///
/// Leaves the core as close to reset state as the image can expect: interrupts masked and
/// cleared, SysTick stopped and both caches off.
pub struct SimpleCortexM;

impl Boot for SimpleCortexM {
    unsafe fn boot(vector_table: *const u32) -> ! {
        interrupt::disable();

        // Nothing of the bootloader runs after this, so the peripherals can be taken over.
        let mut p = unsafe { Peripherals::steal() };

        p.SYST.disable_interrupt();
        p.SYST.disable_counter();

        for i in 0..p.NVIC.icer.len() {
            unsafe {
                p.NVIC.icer[i].write(u32::MAX);
                p.NVIC.icpr[i].write(u32::MAX);
            }
        }

        p.SCB.disable_dcache(&mut p.CPUID);
        p.SCB.disable_icache();

        unsafe {
            p.SCB.vtor.write(vector_table as u32);
            asm::bootload(vector_table)
        }
    }

    fn halt() -> ! {
        interrupt::disable();
        loop {
            asm::wfi();
        }
    }
}
