//! Receiving, staging and committing a new image.
//!
//! ```text
//! Idle -> Receiving -> Staged -> Verifying -> Verified -> Committing -> Committed
//!             |           |           |                       |
//!             +-----------+-----------+-----------------------+--> Rejected
//! ```
//!
//! The payload is programmed as it arrives, erasing each sector of the target slot right
//! before it is written. The header goes in last, once the whole payload matched the announced
//! digest, so a slot with a well-formed header always carries a complete transfer. The boot
//! record only changes on commit.
//!
//! Any failure leaves the machine [`Rejected`](UpdateState::Rejected) and the target slot
//! invalid. The active slot is never written to.

use embedded_storage_async::nor_flash::NorFlash;

use crate::{
    Bootloader, Error, Result, STATUS_OK, Slot,
    descriptor::{DESCRIPTOR_LEN, ImageDescriptor},
    fmt::{debug, info, warn},
    program::{Programmer, write_header},
    record::{BootRecord, RecordStore},
    slots::SlotState,
    transport::{Transport, TransportError, receive_exact},
    verify::{self, ImageHasher},
};

/// Size of the pieces requested from the transport.
const CHUNK: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateState {
    Idle,
    Receiving,
    Staged,
    Verifying,
    Verified,
    Rejected,
    Committing,
    Committed,
}

/// A single transfer in progress.
struct Session {
    slot: Slot,
    descriptor: ImageDescriptor,
    hasher: ImageHasher,
    received: u32,
    programmer: Programmer,
}

impl Session {
    fn remaining(&self) -> u32 {
        self.descriptor.size - self.received
    }
}

pub struct UpdateMachine {
    state: UpdateState,
    /// Slot being written, known as soon as it is selected.
    target: Option<Slot>,
    session: Option<Session>,
}

impl Default for UpdateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateMachine {
    pub const fn new() -> Self {
        Self {
            state: UpdateState::Idle,
            target: None,
            session: None,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Slot the current or last transfer went into.
    pub fn target(&self) -> Option<Slot> {
        self.target
    }

    /// Forget the last transfer, whatever its outcome.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Start a transfer from its encoded descriptor.
    ///
    /// Nothing is written before the descriptor is accepted and a target slot is chosen.
    /// Then the first sector of the target is erased, dropping any header it had.
    pub async fn begin<F: NorFlash, const N: usize, S: RecordStore<F>>(
        &mut self,
        ctx: &mut Bootloader<F, N, S>,
        descriptor: &[u8],
    ) -> Result<()> {
        self.ensure(UpdateState::Idle)?;
        let result = self.try_begin(ctx, descriptor).await;
        self.settle(ctx, result, UpdateState::Receiving)
    }

    async fn try_begin<F: NorFlash, const N: usize, S: RecordStore<F>>(
        &mut self,
        ctx: &mut Bootloader<F, N, S>,
        descriptor: &[u8],
    ) -> Result<()> {
        let config = &ctx.config;
        let capacity = config
            .slots()
            .map(|slot| config.payload_capacity(slot))
            .max()
            .unwrap_or(0);
        let descriptor = ImageDescriptor::parse(descriptor, capacity)?;

        let active = ctx.active_slot();
        let current = active.and_then(|slot| ctx.slots.version(slot));
        if let Some(current) = current.filter(|v| descriptor.version < *v) {
            if !config.allow_downgrade {
                warn!("refusing version {} over {}", descriptor.version, current);
                return Err(Error::Downgrade);
            }
        }

        let slot = ctx.slots.select_staging(config, &descriptor, active)?;
        info!(
            "receiving version {} ({} bytes) into slot {}",
            descriptor.version, descriptor.size, slot.0
        );

        self.target = Some(slot);
        ctx.slots.mark(slot, SlotState::Invalid);

        let mut programmer = Programmer::new(config.region(slot), config.payload_base(slot));
        programmer.start(&mut ctx.flash).await?;

        self.session = Some(Session {
            slot,
            descriptor,
            hasher: ImageHasher::new(),
            received: 0,
            programmer,
        });
        Ok(())
    }

    /// Program the next piece of the payload.
    pub async fn receive<F: NorFlash, const N: usize, S: RecordStore<F>>(
        &mut self,
        ctx: &mut Bootloader<F, N, S>,
        chunk: &[u8],
    ) -> Result<()> {
        self.ensure(UpdateState::Receiving)?;
        let result = self.try_receive(ctx, chunk).await;
        self.settle(ctx, result, UpdateState::Receiving)
    }

    async fn try_receive<F: NorFlash, const N: usize, S: RecordStore<F>>(
        &mut self,
        ctx: &mut Bootloader<F, N, S>,
        chunk: &[u8],
    ) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::InvalidState)?;
        if chunk.len() > session.remaining() as usize {
            return Err(TransportError::Framing.into());
        }

        session.programmer.write(&mut ctx.flash, chunk).await?;
        session.hasher.update(chunk);
        session.received += chunk.len() as u32;
        Ok(())
    }

    /// Complete the payload and write the header.
    pub async fn finish<F: NorFlash, const N: usize, S: RecordStore<F>>(
        &mut self,
        ctx: &mut Bootloader<F, N, S>,
    ) -> Result<()> {
        self.ensure(UpdateState::Receiving)?;
        let result = self.try_finish(ctx).await;
        self.settle(ctx, result, UpdateState::Staged)
    }

    async fn try_finish<F: NorFlash, const N: usize, S: RecordStore<F>>(
        &mut self,
        ctx: &mut Bootloader<F, N, S>,
    ) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::InvalidState)?;
        if session.remaining() != 0 {
            return Err(TransportError::Truncated.into());
        }

        session.programmer.finish(&mut ctx.flash).await?;

        let digest = core::mem::take(&mut session.hasher).finalize();
        if digest != session.descriptor.digest {
            return Err(Error::DigestMismatch);
        }

        let region = ctx.config.region(session.slot);
        write_header(&mut ctx.flash, region, &session.descriptor).await?;
        ctx.slots.stage(session.slot, session.descriptor);
        debug!("slot {} staged", session.slot.0);
        Ok(())
    }

    /// Check the staged image as it ended up in flash.
    pub async fn verify<F: NorFlash, const N: usize, S: RecordStore<F>>(
        &mut self,
        ctx: &mut Bootloader<F, N, S>,
    ) -> Result<()> {
        self.ensure(UpdateState::Staged)?;
        self.state = UpdateState::Verifying;

        let result = match &self.session {
            Some(session) => {
                let region = ctx.config.region(session.slot);
                verify::check(&mut ctx.flash, region, ctx.config.header_size, &session.descriptor)
                    .await
            }
            None => Err(Error::InvalidState),
        };
        if let (Ok(()), Some(slot)) = (result, self.target) {
            ctx.slots.mark(slot, SlotState::Verified);
        }
        self.settle(ctx, result, UpdateState::Verified)
    }

    /// Make the verified image the one to boot next.
    ///
    /// The image currently selected for boot becomes the fallback, unless it never ran. See
    /// [`BootRecord::committed`].
    pub async fn commit<F: NorFlash, const N: usize, S: RecordStore<F>>(
        &mut self,
        ctx: &mut Bootloader<F, N, S>,
    ) -> Result<Slot> {
        self.ensure(UpdateState::Verified)?;
        self.state = UpdateState::Committing;

        let Some(slot) = self.target else {
            return Err(self.reject(ctx, Error::InvalidState));
        };
        let record = match (ctx.record, ctx.active_slot()) {
            (Some(record), _) => record.committed(slot),
            (None, Some(active)) => BootRecord::new(active).committed(slot),
            (None, None) => BootRecord::new(slot).committed(slot),
        };
        let result = ctx.persist(record).await;
        self.settle(ctx, result, UpdateState::Committed)?;

        info!("slot {} committed", slot.0);
        Ok(slot)
    }

    /// Drive a complete transfer from `transport`, reporting the outcome back to it.
    ///
    /// The stream consists of the encoded descriptor followed by exactly `size` payload
    /// bytes. The machine is idle again afterwards.
    pub async fn run<F: NorFlash, const N: usize, S: RecordStore<F>, T: Transport>(
        &mut self,
        ctx: &mut Bootloader<F, N, S>,
        transport: &mut T,
    ) -> Result<Slot> {
        let result = self.transfer(ctx, transport).await;

        let status = match &result {
            Ok(_) => STATUS_OK,
            Err(e) => {
                warn!("update failed: {:?}", e);
                e.code()
            }
        };
        if let Err(e) = transport.send(&[status]).await {
            warn!("could not report status: {:?}", e);
        }

        self.reset();
        result
    }

    async fn transfer<F: NorFlash, const N: usize, S: RecordStore<F>, T: Transport>(
        &mut self,
        ctx: &mut Bootloader<F, N, S>,
        transport: &mut T,
    ) -> Result<Slot> {
        self.ensure(UpdateState::Idle)?;
        let timeout = ctx.config.receive_timeout;

        let mut header = [0u8; DESCRIPTOR_LEN];
        if let Err(e) = receive_exact(transport, &mut header, timeout).await {
            return Err(self.reject(ctx, e.into()));
        }
        self.begin(ctx, &header).await?;

        let mut buffer = [0u8; CHUNK];
        loop {
            let remaining = self.session.as_ref().map_or(0, Session::remaining) as usize;
            if remaining == 0 {
                break;
            }
            let want = remaining.min(CHUNK);
            match transport.receive(&mut buffer[..want], timeout).await {
                Ok(0) => return Err(self.reject(ctx, TransportError::Truncated.into())),
                Ok(n) => self.receive(ctx, &buffer[..n]).await?,
                Err(e) => return Err(self.reject(ctx, e.into())),
            }
        }

        self.finish(ctx).await?;
        self.verify(ctx).await?;
        self.commit(ctx).await
    }

    fn ensure(&self, state: UpdateState) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }

    /// Move to `next` on success. On failure reject the transfer and invalidate its target.
    fn settle<F: NorFlash, const N: usize, S: RecordStore<F>>(
        &mut self,
        ctx: &mut Bootloader<F, N, S>,
        result: Result<()>,
        next: UpdateState,
    ) -> Result<()> {
        match result {
            Ok(()) => {
                self.state = next;
                Ok(())
            }
            Err(e) => Err(self.reject(ctx, e)),
        }
    }

    /// Abandon the transfer, invalidating whatever part of the target was written.
    fn reject<F: NorFlash, const N: usize, S: RecordStore<F>>(
        &mut self,
        ctx: &mut Bootloader<F, N, S>,
        error: Error,
    ) -> Error {
        debug!("rejected in {:?}: {:?}", self.state, error);
        if let Some(slot) = self.target {
            ctx.slots.mark(slot, SlotState::Invalid);
        }
        self.session = None;
        self.state = UpdateState::Rejected;
        error
    }
}
