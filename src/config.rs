//! Memory layout and policy knobs, fixed at build time.
//!
//! A typical STM32H7 layout with 128K sectors:
//!
//! ```
//! use core::time::Duration;
//! use slotboot::{Config, Region};
//!
//! const CONFIG: Config<2> = Config::new(
//!     [Region::new(0x2_0000, 0x6_0000), Region::new(0x8_0000, 0x6_0000)],
//!     Region::new(0xe_0000, 0x2_0000),
//! )
//! .with_mapped_base(0x0800_0000)
//! .with_header_size(0x400)
//! .with_receive_timeout(Duration::from_secs(2));
//! # let _ = CONFIG;
//! ```

use core::{num::NonZeroU32, time::Duration};

use embedded_storage_async::nor_flash::NorFlash;

use crate::{Error, Result, Slot, descriptor::DESCRIPTOR_LEN};

/// Largest program granularity supported, bounds the stack buffers used for writing.
pub const MAX_WRITE_SIZE: usize = 256;

/// Largest read granularity supported.
pub const MAX_READ_SIZE: usize = 64;

/// A contiguous range of flash, as offsets relative to the start of the flash device.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    pub base: u32,
    pub size: u32,
}

impl Region {
    pub const fn new(base: u32, size: u32) -> Self {
        Self { base, size }
    }

    pub const fn end(&self) -> u32 {
        self.base + self.size
    }

    const fn overlaps(&self, other: &Region) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

#[derive(Clone, Debug)]
pub struct Config<const N: usize> {
    /// Image slots, indexed by [`Slot`].
    pub slots: [Region; N],
    /// Region holding the boot record journal, at least two erase sectors.
    pub record: Region,
    /// Space reserved at the start of each slot for the image descriptor.
    ///
    /// The application's vector table starts right after, so this has to satisfy the
    /// VTOR alignment of the target.
    pub header_size: u32,
    /// Address at which offset 0 of the flash device is visible to the CPU.
    pub mapped_base: u32,
    /// Upper bound on waiting for each piece of an incoming image.
    pub receive_timeout: Duration,
    /// Number of unconfirmed boots of a freshly committed image before reverting to the last known good one.
    pub max_boot_attempts: Option<NonZeroU32>,
    /// Accept images with a lower version than the active image.
    pub allow_downgrade: bool,
}

impl<const N: usize> Config<N> {
    pub const fn new(slots: [Region; N], record: Region) -> Self {
        Self {
            slots,
            record,
            header_size: 0x200,
            mapped_base: 0,
            receive_timeout: Duration::from_secs(1),
            max_boot_attempts: None,
            allow_downgrade: false,
        }
    }

    pub const fn with_header_size(mut self, header_size: u32) -> Self {
        self.header_size = header_size;
        self
    }

    pub const fn with_mapped_base(mut self, mapped_base: u32) -> Self {
        self.mapped_base = mapped_base;
        self
    }

    pub const fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub const fn with_max_boot_attempts(mut self, attempts: u32) -> Self {
        self.max_boot_attempts = NonZeroU32::new(attempts);
        self
    }

    pub const fn with_allow_downgrade(mut self, allow: bool) -> Self {
        self.allow_downgrade = allow;
        self
    }

    pub fn slots(&self) -> impl Iterator<Item = Slot> + use<N> {
        (0..N as u8).map(Slot)
    }

    /// Flash region of a slot. Panics on a slot that is not part of this configuration.
    pub fn region(&self, slot: Slot) -> Region {
        self.slots[slot.index()]
    }

    pub fn contains(&self, slot: Slot) -> bool {
        slot.index() < N
    }

    /// Bytes available for the image payload in a slot.
    pub fn payload_capacity(&self, slot: Slot) -> u32 {
        self.region(slot).size - self.header_size
    }

    /// Offset of the first payload byte of a slot.
    pub fn payload_base(&self, slot: Slot) -> u32 {
        self.region(slot).base + self.header_size
    }

    /// Address of the application vector table of a slot, as seen by the CPU.
    pub fn entry_address(&self, slot: Slot) -> u32 {
        self.mapped_base + self.payload_base(slot)
    }

    /// Check the layout against the geometry of the flash it will be used with.
    pub fn validate<F: NorFlash>(&self, flash: &F) -> Result<()> {
        let erase = F::ERASE_SIZE as u32;
        let write = F::WRITE_SIZE as u32;
        let capacity = flash.capacity() as u32;

        let geometry_ok = N > 0
            && N < u8::MAX as usize
            && F::WRITE_SIZE.is_power_of_two()
            && F::WRITE_SIZE <= MAX_WRITE_SIZE
            && F::READ_SIZE.is_power_of_two()
            && F::READ_SIZE <= MAX_READ_SIZE
            && erase % write == 0
            && self.header_size % write == 0
            && self.header_size as usize >= DESCRIPTOR_LEN;
        if !geometry_ok {
            return Err(Error::InvalidLayout);
        }

        let aligned = |r: &Region| r.base % erase == 0 && r.size % erase == 0 && r.size > 0;
        let inside = |r: &Region| r.base.checked_add(r.size).is_some_and(|end| end <= capacity);

        if !aligned(&self.record) || !inside(&self.record) || self.record.size < 2 * erase {
            return Err(Error::InvalidLayout);
        }

        for (i, slot) in self.slots.iter().enumerate() {
            if !aligned(slot) || !inside(slot) || slot.size <= self.header_size {
                return Err(Error::InvalidLayout);
            }
            if slot.overlaps(&self.record) || self.slots[i + 1..].iter().any(|o| slot.overlaps(o)) {
                return Err(Error::InvalidLayout);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockFlash, test_config};

    #[test]
    fn test_layout_is_valid() {
        let flash = MockFlash::new();
        assert_eq!(test_config().validate(&flash), Ok(()));
    }

    #[test]
    fn overlapping_slots() {
        let flash = MockFlash::new();
        let mut config = test_config();
        config.slots[1].base = config.slots[0].base + 1024;
        assert_eq!(config.validate(&flash), Err(Error::InvalidLayout));
    }

    #[test]
    fn record_needs_two_sectors() {
        let flash = MockFlash::new();
        let mut config = test_config();
        config.record.size = 1024;
        assert_eq!(config.validate(&flash), Err(Error::InvalidLayout));
    }

    #[test]
    fn unaligned_header() {
        let flash = MockFlash::new();
        let config = test_config().with_header_size(68);
        assert_eq!(config.validate(&flash), Err(Error::InvalidLayout));
    }

    #[test]
    fn slot_beyond_flash() {
        let flash = MockFlash::new();
        let mut config = test_config();
        config.slots[2].size = 1024 * 1024;
        assert_eq!(config.validate(&flash), Err(Error::InvalidLayout));
    }

    #[test]
    fn entry_address_skips_header() {
        let config = test_config().with_mapped_base(0x9000_0000);
        assert_eq!(
            config.entry_address(Slot(1)),
            0x9000_0000 + config.slots[1].base + config.header_size
        );
    }
}
