//! Simulated NOR flash.
//!
//! Programming only clears bits, and by default refuses to touch bytes that are not erased,
//! which catches any write sequence that forgets to erase ahead of itself.
//!
//! Power can be cut after a number of units of work, where programming a byte and erasing a
//! sector each count as one unit. The operation that runs out of power is left half done:
//! a program stores only the bytes it got to, an erase only clears the first half of the sector.

use std::{vec, vec::Vec};

use embedded_storage_async::nor_flash::{
    ErrorType, MultiwriteNorFlash, NorFlash, NorFlashErrorKind, ReadNorFlash,
};

use super::{TestImage, WearTracker};
use crate::{Config, Slot};

pub const ERASE_SIZE: usize = 1024;
pub const WRITE_SIZE: usize = 8;
pub const SECTORS: usize = 16;

pub struct MockFlash {
    data: Vec<u8>,
    pub wear: WearTracker,
    strict: bool,
    powered: bool,
    budget: Option<usize>,
    units: usize,
    programmed: usize,
    fail_at: Option<u32>,
}

impl MockFlash {
    pub fn new() -> Self {
        Self {
            data: vec![0xff; ERASE_SIZE * SECTORS],
            wear: WearTracker::new(),
            strict: true,
            powered: true,
            budget: None,
            units: 0,
            programmed: 0,
            fail_at: None,
        }
    }

    /// Allow programming over already programmed bytes, as NOR physically does.
    pub fn lenient() -> Self {
        Self {
            strict: false,
            ..Self::new()
        }
    }

    /// Write an image as if it was flashed by a programmer, bypassing all accounting.
    pub fn install<const N: usize>(&mut self, config: &Config<N>, slot: Slot, image: &TestImage) {
        let region = config.region(slot);
        self.data[region.base as usize..region.end() as usize].fill(0xff);

        let header = image.descriptor.to_bytes();
        let base = region.base as usize;
        self.data[base..base + header.len()].copy_from_slice(&header);

        let payload = config.payload_base(slot) as usize;
        self.data[payload..payload + image.payload.len()].copy_from_slice(&image.payload);
    }

    /// Flip a bit of a single byte.
    pub fn corrupt(&mut self, offset: u32) {
        self.data[offset as usize] ^= 0x01;
    }

    pub fn bytes(&self, offset: u32, len: usize) -> &[u8] {
        &self.data[offset as usize..offset as usize + len]
    }

    /// Let `units` more units of work complete, then lose power.
    pub fn cut_power_after(&mut self, units: usize) {
        self.budget = Some(self.units + units);
    }

    pub fn power_off(&mut self) {
        self.powered = false;
    }

    pub fn restore_power(&mut self) {
        self.powered = true;
        self.budget = None;
    }

    /// Fail any program operation covering `offset`, without losing power.
    pub fn fail_program_at(&mut self, offset: u32) {
        self.fail_at = Some(offset);
    }

    /// Units of work performed so far.
    pub fn units(&self) -> usize {
        self.units
    }

    pub fn programmed_bytes(&self) -> usize {
        self.programmed
    }

    /// How many of `units` may still be performed before power is lost.
    fn allowance(&self, units: usize) -> usize {
        match self.budget {
            Some(budget) => budget.saturating_sub(self.units).min(units),
            None => units,
        }
    }

    fn check(&self, offset: u32, len: usize, align: usize) -> Result<(), NorFlashErrorKind> {
        if !self.powered {
            return Err(NorFlashErrorKind::Other);
        }
        let offset = offset as usize;
        if offset % align != 0 || len % align != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        if offset + len > self.data.len() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        Ok(())
    }
}

impl ErrorType for MockFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MockFlash {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check(offset, bytes.len(), Self::READ_SIZE)?;
        bytes.copy_from_slice(self.bytes(offset, bytes.len()));
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for MockFlash {
    const WRITE_SIZE: usize = WRITE_SIZE;
    const ERASE_SIZE: usize = ERASE_SIZE;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from > to {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        self.check(from, (to - from) as usize, ERASE_SIZE)?;

        for sector in (from..to).step_by(ERASE_SIZE) {
            let start = sector as usize;
            if self.allowance(1) == 0 {
                self.data[start..start + ERASE_SIZE / 2].fill(0xff);
                self.powered = false;
                return Err(NorFlashErrorKind::Other);
            }
            self.data[start..start + ERASE_SIZE].fill(0xff);
            self.units += 1;
            self.wear.increase(sector);
        }
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check(offset, bytes.len(), WRITE_SIZE)?;

        let range = offset..offset + bytes.len() as u32;
        if self.fail_at.is_some_and(|at| range.contains(&at)) {
            return Err(NorFlashErrorKind::Other);
        }

        let start = offset as usize;
        if self.strict && self.data[start..start + bytes.len()].iter().any(|b| *b != 0xff) {
            return Err(NorFlashErrorKind::Other);
        }

        let allowed = self.allowance(bytes.len());
        for (cell, byte) in self.data[start..start + allowed].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        self.units += allowed;
        self.programmed += allowed;

        if allowed < bytes.len() {
            self.powered = false;
            return Err(NorFlashErrorKind::Other);
        }
        Ok(())
    }
}

impl MultiwriteNorFlash for MockFlash {}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;

    #[test]
    fn program_requires_erase() {
        let mut flash = MockFlash::new();
        block_on(async {
            flash.write(0, &[0x12; 8]).await.unwrap();
            assert_eq!(flash.write(0, &[0x12; 8]).await, Err(NorFlashErrorKind::Other));
            flash.erase(0, ERASE_SIZE as u32).await.unwrap();
            flash.write(0, &[0x34; 8]).await.unwrap();
        });
        assert_eq!(flash.bytes(0, 8), &[0x34; 8]);
        assert_eq!(flash.wear.get(0), 1);
    }

    #[test]
    fn power_cut_mid_program() {
        let mut flash = MockFlash::new();
        flash.cut_power_after(3);
        block_on(async {
            assert!(flash.write(8, &[0u8; 8]).await.is_err());
            let mut buf = [0u8; 1];
            assert!(flash.read(0, &mut buf).await.is_err());
        });
        flash.restore_power();
        assert_eq!(flash.bytes(8, 8), &[0, 0, 0, 0xff, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn power_cut_mid_erase() {
        let mut flash = MockFlash::new();
        block_on(flash.write(0, &[0u8; ERASE_SIZE])).unwrap();
        flash.cut_power_after(0);
        assert!(block_on(flash.erase(0, ERASE_SIZE as u32)).is_err());
        flash.restore_power();
        assert!(flash.bytes(0, ERASE_SIZE / 2).iter().all(|b| *b == 0xff));
        assert!(flash.bytes(ERASE_SIZE as u32 / 2, ERASE_SIZE / 2).iter().all(|b| *b == 0));
    }
}
