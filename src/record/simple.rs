//! Simple straightforward implementation of keeping the boot record.
//!
//! This implementation focusses on correctness and ease, contrary to efficiency and code size.
//! Leverages `sequential-storage` and `postcard` to store and serialize/deserialize the record.
//! The region handed to it must span exactly two erase sectors.

use core::ops::Range;

use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::{
    cache::KeyPointerCache,
    map::{SerializationError, Value},
};

use super::{BootRecord, RecordStore};
use crate::{Error, Result, StorageError, config::Region, fmt::debug};

const MAX_SERIALIZED_SIZE: usize = 64;

impl<'a> Value<'a> for BootRecord {
    fn serialize_into(&self, buffer: &mut [u8]) -> core::result::Result<usize, SerializationError> {
        let buffer = postcard::to_slice(self, buffer).map_err(|e| match e {
            postcard::Error::SerializeBufferFull => SerializationError::BufferTooSmall,
            // Unmapped error.
            _ => SerializationError::Custom(0),
        })?;

        Ok(buffer.len())
    }

    fn deserialize_from(buffer: &'a [u8]) -> core::result::Result<Self, SerializationError>
    where
        Self: Sized,
    {
        postcard::from_bytes(buffer).map_err(|e| match e {
            // Provided buffer is too small.
            postcard::Error::DeserializeUnexpectedEnd => SerializationError::BufferTooSmall,
            // Data type mismatch between Value and what is stored on disk.
            postcard::Error::DeserializeBadVarint
            | postcard::Error::DeserializeBadBool
            | postcard::Error::DeserializeBadChar
            | postcard::Error::DeserializeBadUtf8
            | postcard::Error::DeserializeBadOption
            | postcard::Error::DeserializeBadEnum
            | postcard::Error::DeserializeBadEncoding => SerializationError::InvalidFormat,
            // Unmapped error.
            _ => SerializationError::Custom(0),
        })
    }
}

/// Boot record kept as the single item of a `sequential-storage` map.
pub struct SequentialStore {
    range: Range<u32>,
    cache: KeyPointerCache<2, (), 1>,
}

impl SequentialStore {
    /// Keep the record in `region`, which must span exactly two erase sectors of `F`.
    pub fn new<F: NorFlash>(region: Region) -> Result<Self> {
        if region.size != 2 * F::ERASE_SIZE as u32 {
            return Err(Error::InvalidLayout);
        }
        Ok(Self {
            range: region.base..region.end(),
            cache: KeyPointerCache::new(),
        })
    }
}

impl<F: NorFlash> RecordStore<F> for SequentialStore {
    async fn load(&mut self, flash: &mut F) -> Result<Option<BootRecord>> {
        let mut data_buffer = [0u8; MAX_SERIALIZED_SIZE];

        let record = sequential_storage::map::fetch_item::<(), BootRecord, _>(
            flash,
            self.range.clone(),
            &mut self.cache,
            &mut data_buffer,
            &(),
        )
        .await
        .map_err(|_| Error::Storage(StorageError::Other))?;

        if record.is_none() {
            debug!("record storage does not contain value");
        }
        Ok(record)
    }

    async fn store(&mut self, flash: &mut F, record: &BootRecord) -> Result<()> {
        let mut data_buffer = [0u8; MAX_SERIALIZED_SIZE];

        debug!("storing {:?}", record);

        sequential_storage::map::store_item::<(), BootRecord, _>(
            flash,
            self.range.clone(),
            &mut self.cache,
            &mut data_buffer,
            &(),
            record,
        )
        .await
        .map_err(|_| Error::Storage(StorageError::Other))
    }
}
