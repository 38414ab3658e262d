//! Generational boot record journal.
//!
//! The journal region is split into erase sectors, each holding at most one frame at its start:
//!
//! | Offset    | Size | Field                                          |
//! |-----------|------|------------------------------------------------|
//! | 0         | 4    | magic, [`RECORD_MAGIC`]                        |
//! | 4         | 1    | length `n` of the encoded entry                |
//! | 5         | n    | postcard encoded generation and [`BootRecord`] |
//! | 5 + n     | 4    | CRC-32 over bytes `0..5 + n`                   |
//!
//! A new record goes into the sector after the newest one, with the next generation number.
//! The newest sector is never erased or written while storing, so a reset leaves either the
//! old frame as newest or the new frame fully written. Torn frames fail their CRC.

use embedded_storage_async::nor_flash::NorFlash;
use serde::{Deserialize, Serialize};

use super::{BootRecord, RecordStore};
use crate::{
    Error, Result, StorageError,
    config::{MAX_WRITE_SIZE, Region},
    fmt::{debug, warn},
};

pub const RECORD_MAGIC: u32 = 0xb007_4ec0;

/// Bytes read back from the start of every sector.
const FRAME_LEN: usize = 64;
const PREFIX: usize = 5;
const MAX_ENTRY: usize = FRAME_LEN - PREFIX - 4;

const FRAME_CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
struct Entry {
    generation: u32,
    record: BootRecord,
}

#[derive(Clone, Copy, Debug)]
struct Newest {
    sector: u32,
    generation: u32,
}

pub struct Journal {
    region: Region,
    loaded: bool,
    newest: Option<Newest>,
}

impl Journal {
    pub const fn new(region: Region) -> Self {
        Self {
            region,
            loaded: false,
            newest: None,
        }
    }

    /// Generation of the current record, 0 if there is none.
    pub fn generation(&self) -> u32 {
        self.newest.map_or(0, |n| n.generation)
    }

    fn sectors<F: NorFlash>(&self) -> u32 {
        self.region.size / F::ERASE_SIZE as u32
    }

    fn sector_base<F: NorFlash>(&self, sector: u32) -> u32 {
        self.region.base + sector * F::ERASE_SIZE as u32
    }

    async fn read_entry<F: NorFlash>(&self, flash: &mut F, sector: u32) -> Result<Option<Entry>> {
        let mut frame = [0u8; FRAME_LEN];
        flash
            .read(self.sector_base::<F>(sector), &mut frame)
            .await
            .map_err(Error::storage)?;
        Ok(decode(&frame))
    }
}

impl<F: NorFlash> RecordStore<F> for Journal {
    async fn load(&mut self, flash: &mut F) -> Result<Option<BootRecord>> {
        let mut newest: Option<(Newest, BootRecord)> = None;

        for sector in 0..self.sectors::<F>() {
            let Some(entry) = self.read_entry(flash, sector).await? else {
                continue;
            };
            if newest.is_none_or(|(n, _)| entry.generation > n.generation) {
                newest = Some((
                    Newest {
                        sector,
                        generation: entry.generation,
                    },
                    entry.record,
                ));
            }
        }

        self.loaded = true;
        self.newest = newest.map(|(n, _)| n);
        Ok(newest.map(|(_, record)| record))
    }

    async fn store(&mut self, flash: &mut F, record: &BootRecord) -> Result<()> {
        if !self.loaded {
            RecordStore::<F>::load(self, flash).await?;
        }

        let (sector, generation) = match self.newest {
            Some(n) => ((n.sector + 1) % self.sectors::<F>(), n.generation.saturating_add(1)),
            None => (0, 1),
        };
        let entry = Entry {
            generation,
            record: *record,
        };

        let mut buffer = [0xffu8; MAX_WRITE_SIZE];
        let len = encode(&entry, &mut buffer)?.next_multiple_of(F::WRITE_SIZE);

        let base = self.sector_base::<F>(sector);
        flash
            .erase(base, base + F::ERASE_SIZE as u32)
            .await
            .map_err(Error::storage)?;
        flash
            .write(base, &buffer[..len])
            .await
            .map_err(Error::storage)?;

        if self.read_entry(flash, sector).await? != Some(entry) {
            warn!("record readback mismatch in sector {}", sector);
            return Err(Error::Storage(StorageError::Other));
        }

        debug!("stored record generation {}", generation);
        self.newest = Some(Newest { sector, generation });
        Ok(())
    }
}

/// Encode a frame into `buffer`, returning its length.
fn encode(entry: &Entry, buffer: &mut [u8; MAX_WRITE_SIZE]) -> Result<usize> {
    let len = postcard::to_slice(entry, &mut buffer[PREFIX..PREFIX + MAX_ENTRY])
        .map_err(|_| Error::InvalidState)?
        .len();
    buffer[0..4].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
    buffer[4] = len as u8;

    let end = PREFIX + len;
    let crc = FRAME_CRC.checksum(&buffer[..end]);
    buffer[end..end + 4].copy_from_slice(&crc.to_le_bytes());
    Ok(end + 4)
}

/// Length of the frame holding `record` as generation `generation`, before padding.
#[cfg(test)]
pub(crate) fn frame_len(generation: u32, record: &BootRecord) -> usize {
    let entry = Entry {
        generation,
        record: *record,
    };
    encode(&entry, &mut [0xff; MAX_WRITE_SIZE]).unwrap_or(0)
}

fn decode(frame: &[u8; FRAME_LEN]) -> Option<Entry> {
    if frame[0..4] != RECORD_MAGIC.to_le_bytes() {
        return None;
    }
    let len = frame[4] as usize;
    if len > MAX_ENTRY {
        return None;
    }

    let end = PREFIX + len;
    let mut crc = [0u8; 4];
    crc.copy_from_slice(&frame[end..end + 4]);
    if u32::from_le_bytes(crc) != FRAME_CRC.checksum(&frame[..end]) {
        return None;
    }

    postcard::from_bytes(&frame[PREFIX..end]).ok()
}
