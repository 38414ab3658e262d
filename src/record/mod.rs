//! Boot record: which slot to boot, and what to fall back to.
//!
//! The record is persisted through a [`RecordStore`]. Stores must be crash-atomic: after a
//! reset during [`RecordStore::store`], a subsequent [`RecordStore::load`] returns either the
//! previous or the new record, never anything else.

use embedded_storage_async::nor_flash::NorFlash;
use serde::{Deserialize, Serialize};

use crate::{Result, Slot};

pub mod journal;
#[cfg(feature = "simple_state")]
pub mod simple;

pub use journal::Journal;

/// State as stored by the bootloader.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootRecord {
    /// Slot that will be booted.
    pub active_slot: Slot,
    /// Slot that booted before the active slot was committed, if any.
    pub last_known_good_slot: Option<Slot>,
    /// Boots of the active slot since it was committed or last confirmed.
    pub boot_attempt_count: u32,
    /// The active slot is known good: it confirmed itself, or it was chosen without a commit.
    pub confirmed: bool,
}

impl BootRecord {
    pub const fn new(active_slot: Slot) -> Self {
        Self {
            active_slot,
            last_known_good_slot: None,
            boot_attempt_count: 0,
            confirmed: true,
        }
    }

    /// Record after committing `slot`.
    ///
    /// The current active slot becomes the fallback if it was ever booted or confirmed.
    /// Otherwise the existing fallback is kept.
    pub fn committed(&self, slot: Slot) -> Self {
        let proven = self.confirmed || self.boot_attempt_count > 0;
        let last_known_good_slot = if slot != self.active_slot && proven {
            Some(self.active_slot)
        } else {
            self.last_known_good_slot
        };
        Self {
            active_slot: slot,
            last_known_good_slot,
            boot_attempt_count: 0,
            confirmed: false,
        }
    }

    /// Record after one more boot attempt of the active slot.
    pub fn attempted(&self) -> Self {
        Self {
            boot_attempt_count: self.boot_attempt_count.saturating_add(1),
            ..*self
        }
    }

    /// Record after the running image confirmed itself.
    pub fn confirmed(&self) -> Self {
        Self {
            boot_attempt_count: 0,
            confirmed: true,
            ..*self
        }
    }

    /// Fallback slot, if it differs from the active slot.
    pub fn fallback(&self) -> Option<Slot> {
        self.last_known_good_slot
            .filter(|slot| *slot != self.active_slot)
    }

    /// Record after falling back to `slot` and booting it once.
    pub fn reverted(slot: Slot) -> Self {
        Self::new(slot).attempted()
    }
}

/// Persistence of the [`BootRecord`].
#[allow(async_fn_in_trait)]
pub trait RecordStore<F: NorFlash> {
    /// Most recent record, or `None` if none was ever stored.
    async fn load(&mut self, flash: &mut F) -> Result<Option<BootRecord>>;

    /// Persist a record, replacing the current one atomically.
    async fn store(&mut self, flash: &mut F, record: &BootRecord) -> Result<()>;
}
