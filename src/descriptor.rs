//! Image descriptor, the fixed header at the start of every slot.
//!
//! All fields are little-endian:
//!
//! | Offset | Size | Field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | magic, [`IMAGE_MAGIC`]                  |
//! | 4      | 4    | payload size in bytes                   |
//! | 8      | 4    | version                                 |
//! | 12     | 1    | target slot, `0xff` for any slot        |
//! | 13     | 3    | reserved, `0xff`                        |
//! | 16     | 32   | SHA-256 digest of the payload           |
//! | 48     | 4    | CRC-32 over bytes 0..48                 |
//! | 52     | 12   | reserved, `0xff`                        |
//!
//! The payload starts at `header_size` from the slot base, which is a layout parameter
//! and not part of the descriptor.

use crate::{Error, Result, Slot, verify::Hash256};

/// The image header starts with this magic value.
pub const IMAGE_MAGIC: u32 = 0x5ec0_b007;

/// Length of the encoded descriptor.
pub const DESCRIPTOR_LEN: usize = 64;

const TARGET_ANY: u8 = 0xff;
const CHECKED_LEN: usize = 48;

pub(crate) const HEADER_CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Slot an image has been built for.
///
/// Images linked to execute in place at a specific address name their slot, position
/// independent images leave the choice to the bootloader.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TargetSlot {
    Any,
    Slot(Slot),
}

impl TargetSlot {
    /// Whether an image built for this target can run from `slot`.
    pub fn accepts(&self, slot: Slot) -> bool {
        match self {
            TargetSlot::Any => true,
            TargetSlot::Slot(target) => *target == slot,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageDescriptor {
    /// Length of the payload following the header.
    pub size: u32,
    /// Monotonic version counter.
    pub version: u32,
    pub target: TargetSlot,
    pub digest: Hash256,
}

impl ImageDescriptor {
    /// Decode a descriptor, checking it against the payload capacity of the slot it was read from.
    pub fn parse(bytes: &[u8], capacity: u32) -> Result<Self> {
        let bytes: &[u8; DESCRIPTOR_LEN] = bytes
            .get(..DESCRIPTOR_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::MalformedHeader)?;

        if read_u32(bytes, 0) != IMAGE_MAGIC {
            return Err(Error::MalformedHeader);
        }
        if read_u32(bytes, CHECKED_LEN) != HEADER_CRC.checksum(&bytes[..CHECKED_LEN]) {
            return Err(Error::MalformedHeader);
        }

        let size = read_u32(bytes, 4);
        let version = read_u32(bytes, 8);
        let target = match bytes[12] {
            TARGET_ANY => TargetSlot::Any,
            n => TargetSlot::Slot(Slot(n)),
        };
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[16..48]);

        if size > capacity {
            return Err(Error::CapacityExceeded);
        }

        Ok(Self {
            size,
            version,
            target,
            digest,
        })
    }

    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_LEN] {
        let mut bytes = [0xffu8; DESCRIPTOR_LEN];
        bytes[0..4].copy_from_slice(&IMAGE_MAGIC.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.size.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.version.to_le_bytes());
        bytes[12] = match self.target {
            TargetSlot::Any => TARGET_ANY,
            TargetSlot::Slot(slot) => slot.0,
        };
        bytes[16..48].copy_from_slice(&self.digest);
        let crc = HEADER_CRC.checksum(&bytes[..CHECKED_LEN]);
        bytes[48..52].copy_from_slice(&crc.to_le_bytes());
        bytes
    }
}

/// True if the header area has never been programmed since its last erase.
pub fn is_erased(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == 0xff)
}

fn read_u32(bytes: &[u8; DESCRIPTOR_LEN], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ImageDescriptor {
        ImageDescriptor {
            size: 1500,
            version: 7,
            target: TargetSlot::Slot(Slot(1)),
            digest: [0xa5; 32],
        }
    }

    #[test]
    fn parse_encoded() {
        let bytes = descriptor().to_bytes();
        assert_eq!(ImageDescriptor::parse(&bytes, 4096), Ok(descriptor()));

        let any = ImageDescriptor {
            target: TargetSlot::Any,
            ..descriptor()
        };
        assert_eq!(ImageDescriptor::parse(&any.to_bytes(), 4096), Ok(any));
    }

    #[test]
    fn layout_is_stable() {
        let bytes = descriptor().to_bytes();
        assert_eq!(&bytes[0..4], &[0x07, 0xb0, 0xc0, 0x5e]);
        assert_eq!(&bytes[4..8], &1500u32.to_le_bytes());
        assert_eq!(bytes[12], 1);
        assert_eq!(&bytes[13..16], &[0xff; 3]);
        assert!(is_erased(&bytes[52..]));
    }

    #[test]
    fn wrong_magic() {
        let mut bytes = descriptor().to_bytes();
        bytes[0] ^= 0x01;
        assert_eq!(ImageDescriptor::parse(&bytes, 4096), Err(Error::MalformedHeader));
    }

    #[test]
    fn corrupted_field() {
        let mut bytes = descriptor().to_bytes();
        bytes[9] ^= 0x10;
        assert_eq!(ImageDescriptor::parse(&bytes, 4096), Err(Error::MalformedHeader));
    }

    #[test]
    fn partially_programmed() {
        // Programming stopped halfway through the header, the tail still reads erased.
        let mut bytes = descriptor().to_bytes();
        bytes[24..].fill(0xff);
        assert_eq!(ImageDescriptor::parse(&bytes, 4096), Err(Error::MalformedHeader));
    }

    #[test]
    fn erased() {
        let bytes = [0xff; DESCRIPTOR_LEN];
        assert!(is_erased(&bytes));
        assert_eq!(ImageDescriptor::parse(&bytes, 4096), Err(Error::MalformedHeader));
    }

    #[test]
    fn too_short() {
        let bytes = descriptor().to_bytes();
        assert_eq!(
            ImageDescriptor::parse(&bytes[..40], 4096),
            Err(Error::MalformedHeader)
        );
    }

    #[test]
    fn exceeds_capacity() {
        let bytes = descriptor().to_bytes();
        assert_eq!(ImageDescriptor::parse(&bytes, 1500), Ok(descriptor()));
        assert_eq!(ImageDescriptor::parse(&bytes, 1499), Err(Error::CapacityExceeded));
    }
}
