//! Sequential programming of a slot with erase-ahead.
//!
//! Sectors are erased one at a time, right before the write cursor enters them, so an
//! interrupted session has only ever destroyed the part of the slot it was about to rewrite.
//! Incoming data is collected into whole write units before being programmed.

use embedded_storage_async::nor_flash::NorFlash;
use heapless::Vec;

use crate::{
    Error, Result,
    config::{MAX_WRITE_SIZE, Region},
    descriptor::{DESCRIPTOR_LEN, ImageDescriptor},
    fmt::trace,
};

const BUFFER: usize = MAX_WRITE_SIZE;

pub struct Programmer {
    region: Region,
    /// Next offset to be programmed.
    cursor: u32,
    /// Sectors below this offset have been erased during this session.
    erased_to: u32,
    buffer: Vec<u8, BUFFER>,
}

impl Programmer {
    /// Program `region` starting at `start`.
    pub fn new(region: Region, start: u32) -> Self {
        Self {
            region,
            cursor: start,
            erased_to: region.base,
            buffer: Vec::new(),
        }
    }

    /// Erase the first sector of the region, which holds the header.
    pub async fn start<F: NorFlash>(&mut self, flash: &mut F) -> Result<()> {
        self.erase_ahead(flash, self.region.base + 1).await
    }

    /// Offset up to which data has been handed to the flash.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub async fn write<F: NorFlash>(&mut self, flash: &mut F, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            let n = (BUFFER - self.buffer.len()).min(bytes.len());
            self.buffer
                .extend_from_slice(&bytes[..n])
                .map_err(|_| Error::InvalidState)?;
            bytes = &bytes[n..];

            if self.buffer.is_full() {
                self.flush(flash).await?;
            }
        }
        Ok(())
    }

    /// Program whatever is still buffered, padding the last write unit with erased bytes.
    pub async fn finish<F: NorFlash>(&mut self, flash: &mut F) -> Result<()> {
        self.flush(flash).await
    }

    async fn flush<F: NorFlash>(&mut self, flash: &mut F) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        while self.buffer.len() % F::WRITE_SIZE != 0 {
            self.buffer.push(0xff).map_err(|_| Error::InvalidState)?;
        }

        let end = self.cursor + self.buffer.len() as u32;
        if end > self.region.end() {
            return Err(Error::CapacityExceeded);
        }

        self.erase_ahead(flash, end).await?;
        flash
            .write(self.cursor, &self.buffer)
            .await
            .map_err(Error::storage)?;

        self.cursor = end;
        self.buffer.clear();
        Ok(())
    }

    async fn erase_ahead<F: NorFlash>(&mut self, flash: &mut F, upto: u32) -> Result<()> {
        let sector = F::ERASE_SIZE as u32;
        while self.erased_to < upto {
            trace!("erase 0x{:x}", self.erased_to);
            flash
                .erase(self.erased_to, self.erased_to + sector)
                .await
                .map_err(Error::storage)?;
            self.erased_to += sector;
        }
        Ok(())
    }
}

/// Program the descriptor at the start of a slot whose first sector is erased.
pub async fn write_header<F: NorFlash>(
    flash: &mut F,
    region: Region,
    descriptor: &ImageDescriptor,
) -> Result<()> {
    let mut buffer = [0xffu8; BUFFER];
    let len = DESCRIPTOR_LEN.next_multiple_of(F::WRITE_SIZE);
    buffer[..DESCRIPTOR_LEN].copy_from_slice(&descriptor.to_bytes());

    flash
        .write(region.base, &buffer[..len])
        .await
        .map_err(Error::storage)
}
