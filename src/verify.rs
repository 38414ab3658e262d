//! Image integrity verification.
//!
//! The digest is computed over exactly `size` bytes following the header area of a slot,
//! streamed through a small stack buffer so images of any size can be checked.

use embedded_storage_async::nor_flash::ReadNorFlash;
use sha2::{Digest, Sha256};

use crate::{
    Error, Result,
    config::{MAX_READ_SIZE, Region},
    descriptor::ImageDescriptor,
    fmt::debug,
};

/// The result of a SHA256 hash, appropriate for stack allocation.
pub type Hash256 = [u8; 32];

const CHUNK: usize = 256;

const _: () = assert!(CHUNK % MAX_READ_SIZE == 0);

/// Incremental SHA-256 over an image payload.
#[derive(Clone)]
pub struct ImageHasher(Sha256);

impl ImageHasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn finalize(self) -> Hash256 {
        let mut result = [0u8; 32];
        result.copy_from_slice(self.0.finalize().as_slice());
        result
    }

    /// Digest of a complete payload held in memory.
    pub fn digest(bytes: &[u8]) -> Hash256 {
        let mut hasher = Self::new();
        hasher.update(bytes);
        hasher.finalize()
    }
}

impl Default for ImageHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash the payload of the image described by `descriptor` residing in `region`.
pub async fn hash_payload<F: ReadNorFlash>(
    flash: &mut F,
    region: Region,
    header_size: u32,
    descriptor: &ImageDescriptor,
) -> Result<Hash256> {
    let capacity = region.size.checked_sub(header_size).ok_or(Error::CapacityExceeded)?;
    if descriptor.size > capacity {
        return Err(Error::CapacityExceeded);
    }

    let start = region.base + header_size;
    let end = start + descriptor.size;

    let mut hasher = ImageHasher::new();
    let mut buffer = [0u8; CHUNK];
    let mut pos = start;
    while pos < end {
        let todo = ((end - pos) as usize).min(CHUNK);
        // Reads have to cover whole read units; the slot end is sector aligned so this stays inside.
        let read_len = todo.next_multiple_of(F::READ_SIZE).min(CHUNK);
        flash
            .read(pos, &mut buffer[..read_len])
            .await
            .map_err(Error::storage)?;
        hasher.update(&buffer[..todo]);
        pos += todo as u32;
    }

    Ok(hasher.finalize())
}

/// Check the payload against the digest in its descriptor.
pub async fn check<F: ReadNorFlash>(
    flash: &mut F,
    region: Region,
    header_size: u32,
    descriptor: &ImageDescriptor,
) -> Result<()> {
    let digest = hash_payload(flash, region, header_size, descriptor).await?;
    if digest != descriptor.digest {
        debug!("digest mismatch at 0x{:x}", region.base);
        return Err(Error::DigestMismatch);
    }
    Ok(())
}

/// Whether the payload matches its descriptor. Any failure to read counts as a mismatch.
pub async fn verify<F: ReadNorFlash>(
    flash: &mut F,
    region: Region,
    header_size: u32,
    descriptor: &ImageDescriptor,
) -> bool {
    check(flash, region, header_size, descriptor).await.is_ok()
}
