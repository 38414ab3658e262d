mod flash;
mod image;
mod transport;

use std::collections::BTreeMap;

pub use flash::{ERASE_SIZE, MockFlash, SECTORS, WRITE_SIZE};
pub use image::TestImage;
pub use transport::MockTransport;

use crate::{Config, Region};

/// Three 4K slots with the boot record journal in between the second and third slot.
pub fn test_config() -> Config<3> {
    Config::new(
        [
            Region::new(0, 4096),
            Region::new(4096, 4096),
            Region::new(10240, 4096),
        ],
        Region::new(8192, 2048),
    )
    .with_header_size(256)
}

/// Number of erasures per sector.
#[derive(Debug, Default, Clone)]
pub struct WearTracker(BTreeMap<u32, usize>);

impl WearTracker {
    pub const fn new() -> Self {
        WearTracker(BTreeMap::new())
    }

    pub fn increase(&mut self, sector: u32) {
        *self.0.entry(sector).or_insert(0) += 1;
    }

    pub fn get(&self, sector: u32) -> usize {
        self.0.get(&sector).copied().unwrap_or(0)
    }

    /// Check wear on all sectors of a region for worst wear.
    pub fn check_region(&self, region: Region, wear_level: usize) -> bool {
        self.0
            .iter()
            .filter(|(sector, _)| (region.base..region.end()).contains(*sector))
            .all(|(_, v)| *v <= wear_level)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }
}
