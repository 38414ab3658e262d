//! In-memory view of the image slots.
//!
//! Slot identity and placement come from the [`Config`]; this only tracks what each slot
//! currently holds. The table is rebuilt from the slot headers at every start.

use core::cmp::Reverse;

use embedded_storage_async::nor_flash::ReadNorFlash;
use heapless::Vec;

use crate::{
    Config, Error, Result, Slot,
    descriptor::{DESCRIPTOR_LEN, ImageDescriptor, TargetSlot, is_erased},
    fmt::{debug, trace},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotState {
    /// Header area is erased.
    Empty,
    /// Carries a well-formed header, contents not yet checked.
    Staged,
    /// Contents match the header digest.
    Verified,
    /// Selected for boot. At most one slot is active.
    Active,
    /// Garbage, a torn transfer or a failed verification.
    Invalid,
}

pub struct SlotTable<const N: usize> {
    states: [SlotState; N],
    descriptors: [Option<ImageDescriptor>; N],
}

impl<const N: usize> Default for SlotTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SlotTable<N> {
    pub const fn new() -> Self {
        Self {
            states: [SlotState::Empty; N],
            descriptors: [None; N],
        }
    }

    /// Classify every slot by its header alone.
    pub async fn scan<F: ReadNorFlash>(flash: &mut F, config: &Config<N>) -> Result<Self> {
        let mut table = Self::new();

        for slot in config.slots() {
            let mut header = [0u8; DESCRIPTOR_LEN];
            flash
                .read(config.region(slot).base, &mut header)
                .await
                .map_err(Error::storage)?;

            if is_erased(&header) {
                continue;
            }

            match ImageDescriptor::parse(&header, config.payload_capacity(slot)) {
                Ok(descriptor) if descriptor.target.accepts(slot) => {
                    trace!("slot {} holds version {}", slot.0, descriptor.version);
                    table.stage(slot, descriptor);
                }
                _ => {
                    debug!("slot {} has an invalid header", slot.0);
                    table.mark(slot, SlotState::Invalid);
                }
            }
        }

        Ok(table)
    }

    pub fn state(&self, slot: Slot) -> SlotState {
        self.states[slot.index()]
    }

    /// Descriptor of the image in a slot, if its header was well-formed.
    pub fn descriptor(&self, slot: Slot) -> Option<&ImageDescriptor> {
        self.descriptors[slot.index()].as_ref()
    }

    pub fn version(&self, slot: Slot) -> Option<u32> {
        self.descriptor(slot).map(|d| d.version)
    }

    /// Change the state of a slot.
    ///
    /// Marking a slot active demotes the previously active slot to verified. Marking a slot
    /// empty or invalid forgets its descriptor.
    pub fn mark(&mut self, slot: Slot, state: SlotState) {
        if state == SlotState::Active {
            for s in self.states.iter_mut() {
                if *s == SlotState::Active {
                    *s = SlotState::Verified;
                }
            }
        }
        if matches!(state, SlotState::Empty | SlotState::Invalid) {
            self.descriptors[slot.index()] = None;
        }
        self.states[slot.index()] = state;
    }

    /// Record a freshly written header.
    pub fn stage(&mut self, slot: Slot, descriptor: ImageDescriptor) {
        self.descriptors[slot.index()] = Some(descriptor);
        self.mark(slot, SlotState::Staged);
    }

    pub fn active(&self) -> Option<Slot> {
        self.states
            .iter()
            .position(|s| *s == SlotState::Active)
            .map(|i| Slot(i as u8))
    }

    /// Slots carrying a header, highest version first.
    pub fn by_version(&self) -> Vec<Slot, N> {
        let mut order: Vec<Slot, N> = (0..N as u8)
            .map(Slot)
            .filter(|slot| self.descriptor(*slot).is_some())
            .collect();
        order.sort_unstable_by_key(|slot| (Reverse(self.version(*slot)), *slot));
        order
    }

    /// Pick the slot to write an incoming image into.
    ///
    /// A specific target is honoured unless it is the active slot. Otherwise an empty slot is
    /// preferred, then an invalid one, then the one holding the oldest image. The active
    /// slot is never returned.
    pub fn select_staging(
        &self,
        config: &Config<N>,
        descriptor: &ImageDescriptor,
        active: Option<Slot>,
    ) -> Result<Slot> {
        let is_active = |slot: Slot| Some(slot) == active || self.state(slot) == SlotState::Active;

        if let TargetSlot::Slot(slot) = descriptor.target {
            if !config.contains(slot) {
                return Err(Error::NoStagingSlot);
            }
            if is_active(slot) {
                return Err(Error::TargetActive);
            }
            if descriptor.size > config.payload_capacity(slot) {
                return Err(Error::CapacityExceeded);
            }
            return Ok(slot);
        }

        config
            .slots()
            .filter(|slot| !is_active(*slot))
            .filter(|slot| descriptor.size <= config.payload_capacity(*slot))
            .min_by_key(|slot| {
                let rank = match self.state(*slot) {
                    SlotState::Empty => 0,
                    SlotState::Invalid => 1,
                    _ => 2,
                };
                (rank, self.version(*slot).unwrap_or(0), *slot)
            })
            .ok_or(Error::NoStagingSlot)
    }
}
