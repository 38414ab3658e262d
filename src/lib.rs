//! Power-loss safe bootloader core: image slots, verified updates and boot selection.
//!
//! The crate is linked into a board specific binary which provides the flash driver
//! (any [`NorFlash`](embedded_storage_async::nor_flash::NorFlash)), a [`Transport`] to receive
//! new images over and a [`Boot`](boot::Boot) implementation that performs the final jump.
//!
//! All persistent state changes are ordered such that a reset at any moment leaves the
//! device with at least the previously active image bootable:
//!
//! * image payloads are written before their header, so an interrupted transfer never
//!   carries a header that matches its contents;
//! * the boot record is journaled, a new generation is written and read back before the
//!   previous one is considered stale.
#![no_std]

#[cfg(test)]
extern crate std;

pub(crate) mod fmt;

pub mod boot;
pub mod config;
pub mod context;
pub mod decision;
pub mod descriptor;
pub mod program;
pub mod record;
pub mod slots;
pub mod transport;
pub mod update;
pub mod verify;

#[cfg(test)]
mod mock;

use embedded_storage_async::nor_flash::{NorFlashError, NorFlashErrorKind};
use serde::{Deserialize, Serialize};

pub use config::{Config, Region};
pub use context::Bootloader;
pub use decision::BootTarget;
pub use descriptor::{ImageDescriptor, TargetSlot};
pub use record::BootRecord;
pub use slots::SlotState;
pub use transport::{Transport, TransportError};
pub use update::{UpdateMachine, UpdateState};

pub type Result<T> = core::result::Result<T, Error>;

/// Image slot with regards to the bootloader.
///
/// The number indexes the slot regions of the [`Config`]. Identity is fixed at build time,
/// only the contents and the tracked [`SlotState`] change.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Slot(pub u8);

impl Slot {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Failure of the underlying flash device, decoupled from the concrete driver error.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    NotAligned,
    OutOfBounds,
    /// Program or erase failure, including timeouts reported by the driver.
    Other,
}

impl From<NorFlashErrorKind> for StorageError {
    fn from(kind: NorFlashErrorKind) -> Self {
        match kind {
            NorFlashErrorKind::NotAligned => StorageError::NotAligned,
            NorFlashErrorKind::OutOfBounds => StorageError::OutOfBounds,
            _ => StorageError::Other,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Header magic or checksum does not match.
    MalformedHeader,
    /// Image contents do not hash to the digest in the header.
    DigestMismatch,
    Storage(StorageError),
    Transport(TransportError),
    /// Declared image size does not fit the slot.
    CapacityExceeded,
    /// No slot holds a verifiable image. The only fatal error.
    NoValidImage,
    /// The image targets the slot that is currently active.
    TargetActive,
    /// No slot is available to stage an image into.
    NoStagingSlot,
    /// The image version is older than the active image.
    Downgrade,
    /// The configured layout does not fit the flash geometry.
    InvalidLayout,
    /// Operation is not allowed in the current update state.
    InvalidState,
}

impl Error {
    /// Fold any flash driver error into the crate error.
    pub fn storage<E: NorFlashError>(e: E) -> Self {
        Error::Storage(e.kind().into())
    }

    /// Status byte reported back to the party that initiated an update.
    pub const fn code(&self) -> u8 {
        match self {
            Error::MalformedHeader => 0x01,
            Error::DigestMismatch => 0x02,
            Error::Storage(_) => 0x03,
            Error::Transport(TransportError::Timeout) => 0x04,
            Error::Transport(TransportError::Framing) => 0x05,
            Error::Transport(TransportError::Truncated) => 0x06,
            Error::CapacityExceeded => 0x07,
            Error::NoValidImage => 0x08,
            Error::TargetActive => 0x09,
            Error::NoStagingSlot => 0x0a,
            Error::Downgrade => 0x0b,
            Error::InvalidLayout => 0x0c,
            Error::InvalidState => 0x0d,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::Storage(e)
    }
}

/// Status byte reported after a committed update.
pub const STATUS_OK: u8 = 0x00;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_unique() {
        let errors = [
            Error::MalformedHeader,
            Error::DigestMismatch,
            Error::Storage(StorageError::Other),
            Error::Transport(TransportError::Timeout),
            Error::Transport(TransportError::Framing),
            Error::Transport(TransportError::Truncated),
            Error::CapacityExceeded,
            Error::NoValidImage,
            Error::TargetActive,
            Error::NoStagingSlot,
            Error::Downgrade,
            Error::InvalidLayout,
            Error::InvalidState,
        ];

        for (i, a) in errors.iter().enumerate() {
            assert_ne!(a.code(), STATUS_OK);
            for b in &errors[i + 1..] {
                assert_ne!(a.code(), b.code(), "{a:?} and {b:?} share a code");
            }
        }
    }

    #[test]
    fn storage_kind_mapping() {
        assert_eq!(
            Error::storage(NorFlashErrorKind::NotAligned),
            Error::Storage(StorageError::NotAligned)
        );
        assert_eq!(
            Error::storage(NorFlashErrorKind::Other),
            Error::Storage(StorageError::Other)
        );
    }
}
