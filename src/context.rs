//! The bootloader context, owning the flash and everything known about its contents.

use embedded_storage_async::nor_flash::NorFlash;

use crate::{
    Config, Result, Slot, Transport,
    decision::{self, BootTarget},
    fmt::{debug, info},
    record::{BootRecord, Journal, RecordStore},
    slots::SlotTable,
    update::UpdateMachine,
};

/// Single owner of the flash, threaded through boot selection and updates.
///
/// A typical bootloader `main`:
///
/// ```ignore
/// let mut bootloader = Bootloader::open(flash, CONFIG).await?;
/// if let Some(mut uart) = update_requested() {
///     let _ = bootloader.update(&mut uart).await;
/// }
/// slotboot::boot::start::<SimpleCortexM>(bootloader.decide().await)
/// ```
pub struct Bootloader<F: NorFlash, const N: usize, S: RecordStore<F> = Journal> {
    pub(crate) flash: F,
    pub(crate) config: Config<N>,
    pub(crate) slots: SlotTable<N>,
    pub(crate) record: Option<BootRecord>,
    store: S,
}

impl<F: NorFlash, const N: usize> Bootloader<F, N, Journal> {
    /// Open with the boot record journal in [`Config::record`].
    pub async fn open(flash: F, config: Config<N>) -> Result<Self> {
        let store = Journal::new(config.record);
        Self::open_with_store(flash, config, store).await
    }
}

impl<F: NorFlash, const N: usize, S: RecordStore<F>> Bootloader<F, N, S> {
    /// Check the layout, classify all slots and load the boot record.
    pub async fn open_with_store(mut flash: F, config: Config<N>, mut store: S) -> Result<Self> {
        config.validate(&flash)?;
        let slots = SlotTable::scan(&mut flash, &config).await?;
        let record = store.load(&mut flash).await?;
        debug!("loaded record {:?}", record);

        Ok(Self {
            flash,
            config,
            slots,
            record,
            store,
        })
    }

    pub fn config(&self) -> &Config<N> {
        &self.config
    }

    pub fn slots(&self) -> &SlotTable<N> {
        &self.slots
    }

    pub fn record(&self) -> Option<&BootRecord> {
        self.record.as_ref()
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Give back the flash, for example to put it into memory mapped mode before booting.
    pub fn release(self) -> F {
        self.flash
    }

    /// Slot the record designates, falling back to whatever the table holds as active.
    pub(crate) fn active_slot(&self) -> Option<Slot> {
        self.record
            .map(|r| r.active_slot)
            .filter(|slot| self.config.contains(*slot))
            .or(self.slots.active())
    }

    /// Store a record, and keep it as current once it is persisted.
    pub(crate) async fn persist(&mut self, record: BootRecord) -> Result<()> {
        self.store.store(&mut self.flash, &record).await?;
        self.record = Some(record);
        Ok(())
    }

    /// Select the image to boot. See [`decision::decide`].
    pub async fn decide(&mut self) -> Result<BootTarget> {
        decision::decide(self).await
    }

    /// Called by the running image once it deems itself healthy.
    ///
    /// The active slot stays selected from then on, whatever the boot attempt limit.
    pub async fn confirm(&mut self) -> Result<()> {
        match self.record {
            Some(record) if !record.confirmed || record.boot_attempt_count != 0 => {
                info!("slot {} confirmed", record.active_slot.0);
                self.persist(record.confirmed()).await
            }
            _ => Ok(()),
        }
    }

    /// Receive, verify and commit a single image from `transport`.
    ///
    /// Returns the slot the image was committed to. It will be booted on the next decision.
    pub async fn update<T: Transport>(&mut self, transport: &mut T) -> Result<Slot> {
        UpdateMachine::new().run(self, transport).await
    }
}
