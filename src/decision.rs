//! Selection of the image to boot.
//!
//! Every candidate is verified right before it is selected, regardless of what the slot
//! table or the boot record claim about it. Flash may have decayed since it was written.

use embedded_storage_async::nor_flash::NorFlash;

use crate::{
    Bootloader, Error, Result, Slot,
    descriptor::ImageDescriptor,
    fmt::{info, warn},
    record::{BootRecord, RecordStore},
    slots::SlotState,
    verify,
};

/// Image selected for boot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootTarget {
    pub slot: Slot,
    /// Address of the vector table, as seen by the CPU.
    pub entry: u32,
    pub descriptor: ImageDescriptor,
}

/// Decide which slot to boot, persisting the attempt.
///
/// 1. Without a boot record, the highest version that verifies is booted and recorded.
/// 2. A committed image that used up its boot attempts without being confirmed is skipped.
/// 3. The active slot is booted if it verifies.
/// 4. Otherwise the last known good slot is reverted to if it verifies.
/// 5. Otherwise any other slot that verifies, highest version first.
///
/// [`Error::NoValidImage`] is returned only when no slot verifies. Failing to persist the
/// record does not prevent booting a verified image.
pub async fn decide<F: NorFlash, const N: usize, S: RecordStore<F>>(
    ctx: &mut Bootloader<F, N, S>,
) -> Result<BootTarget> {
    let Some(record) = ctx.record else {
        info!("no boot record, selecting newest image");
        return last_resort(ctx, &[]).await;
    };

    let active = record.active_slot;
    let fallback = record.fallback();

    let exhausted = !record.confirmed
        && ctx
            .config
            .max_boot_attempts
            .is_some_and(|limit| record.boot_attempt_count >= limit.get());

    if exhausted && fallback.is_some() {
        warn!(
            "slot {} not confirmed after {} boots",
            active.0, record.boot_attempt_count
        );
    } else if let Some(target) = check(ctx, active).await {
        select(ctx, target, record.attempted()).await;
        return Ok(target);
    }

    if let Some(lkg) = fallback {
        if let Some(target) = check(ctx, lkg).await {
            warn!("reverting to slot {}", lkg.0);
            select(ctx, target, BootRecord::reverted(lkg)).await;
            return Ok(target);
        }
    }

    let tried = [Some(active), fallback];
    last_resort(ctx, &tried).await
}

/// Boot the newest image that verifies, skipping slots in `tried`.
///
/// Slots in `tried` are still considered after everything else failed.
async fn last_resort<F: NorFlash, const N: usize, S: RecordStore<F>>(
    ctx: &mut Bootloader<F, N, S>,
    tried: &[Option<Slot>],
) -> Result<BootTarget> {
    let order = ctx.slots.by_version();
    let untried = order.iter().filter(|slot| !tried.contains(&Some(**slot)));
    let retried = order.iter().filter(|slot| tried.contains(&Some(**slot)));

    for slot in untried.chain(retried).copied() {
        if ctx.slots.state(slot) == SlotState::Invalid {
            continue;
        }
        if let Some(target) = check(ctx, slot).await {
            info!("selected slot {}", slot.0);
            select(ctx, target, BootRecord::reverted(slot)).await;
            return Ok(target);
        }
    }

    Err(Error::NoValidImage)
}

/// Verify the image in a slot, producing a target if it is intact.
async fn check<F: NorFlash, const N: usize, S: RecordStore<F>>(
    ctx: &mut Bootloader<F, N, S>,
    slot: Slot,
) -> Option<BootTarget> {
    if !ctx.config.contains(slot) {
        warn!("slot {} is not part of the layout", slot.0);
        return None;
    }
    let descriptor = *ctx.slots.descriptor(slot)?;

    let region = ctx.config.region(slot);
    if verify::verify(&mut ctx.flash, region, ctx.config.header_size, &descriptor).await {
        ctx.slots.mark(slot, SlotState::Verified);
        Some(BootTarget {
            slot,
            entry: ctx.config.entry_address(slot),
            descriptor,
        })
    } else {
        warn!("slot {} failed verification", slot.0);
        ctx.slots.mark(slot, SlotState::Invalid);
        None
    }
}

async fn select<F: NorFlash, const N: usize, S: RecordStore<F>>(
    ctx: &mut Bootloader<F, N, S>,
    target: BootTarget,
    record: BootRecord,
) {
    ctx.slots.mark(target.slot, SlotState::Active);
    if let Err(e) = ctx.persist(record).await {
        warn!("failed to persist boot record: {:?}", e);
        ctx.record = Some(record);
    }
}
