//! Image generation.

use std::vec::Vec;

use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

use crate::{
    Slot,
    descriptor::{ImageDescriptor, TargetSlot},
    verify::ImageHasher,
};

#[derive(Clone)]
pub struct TestImage {
    pub descriptor: ImageDescriptor,
    pub payload: Vec<u8>,
}

impl TestImage {
    /// Pseudo random payload of `size` bytes with a matching descriptor.
    pub fn new(size: usize, seed: u64) -> Self {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let mut payload = std::vec![0u8; size];
        rng.fill_bytes(&mut payload);

        let descriptor = ImageDescriptor {
            size: size as u32,
            version: 1,
            target: TargetSlot::Any,
            digest: ImageHasher::digest(&payload),
        };
        Self {
            descriptor,
            payload,
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.descriptor.version = version;
        self
    }

    pub fn target(mut self, slot: Slot) -> Self {
        self.descriptor.target = TargetSlot::Slot(slot);
        self
    }

    /// The bytes a sender puts on the wire: descriptor followed by the payload.
    pub fn stream(&self) -> Vec<u8> {
        let mut stream = self.descriptor.to_bytes().to_vec();
        stream.extend_from_slice(&self.payload);
        stream
    }
}
