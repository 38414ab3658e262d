//! Handing control over to the selected image.

#[cfg(feature = "cortex_m")]
pub mod cortex_m;

use crate::{
    Result,
    decision::BootTarget,
    fmt::{error, info},
};

/// Bootload mechanism that at the least jumps to the vector table of an image slot.
///
/// Optionally could drop TrustZone privileges or mask memory access.
pub trait Boot {
    /// Jump into an image.
    ///
    /// # Safety
    /// `vector_table` must point at the vector table of an image that has been verified, as
    /// seen by the CPU. Any state of the bootloader is abandoned.
    unsafe fn boot(vector_table: *const u32) -> !;

    /// Park the CPU without running any image.
    fn halt() -> !;
}

/// Jump into the outcome of [`Bootloader::decide`](crate::Bootloader::decide), or halt when
/// there is no image to run.
pub fn start<B: Boot>(decision: Result<BootTarget>) -> ! {
    match decision {
        Ok(target) => {
            info!("booting slot {} at 0x{:x}", target.slot.0, target.entry);
            // Safety: a target is only produced for a slot whose digest checked out.
            unsafe { B::boot(target.entry as *const u32) }
        }
        Err(e) => {
            error!("nothing to boot: {:?}", e);
            B::halt()
        }
    }
}
