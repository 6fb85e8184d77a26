//! Softbuffer pool
//!
//! Routes reservations to the softbuffer already holding the identifier, so
//! retransmissions combine into the same codeblocks, or to the first available
//! one. Failures are ordinary outcomes under load: the caller drops the PDU and
//! retries with the next transmission.

use super::codeblock_pool::CodeblockPool;
use super::softbuffer::{Softbuffer, UniqueSoftbuffer};
use super::{SoftbufferId, SoftbufferPoolConfig, SoftbufferState, SoftbufferStatus};
use crate::LayerError;
use common::types::SlotPoint;
use tracing::{debug, info, trace, warn};

/// Occupancy snapshot of a softbuffer pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftbufferPoolStats {
    pub available: usize,
    pub reserved: usize,
    pub locked: usize,
    pub released: usize,
    pub free_codeblocks: usize,
    pub total_codeblocks: usize,
}

/// Fixed-size pool of receive softbuffers
pub struct SoftbufferPool {
    config: SoftbufferPoolConfig,
    codeblocks: CodeblockPool,
    buffers: Vec<Softbuffer>,
}

impl SoftbufferPool {
    /// Allocate every softbuffer and codeblock up front
    pub fn new(config: SoftbufferPoolConfig) -> Result<Self, LayerError> {
        config.validate()?;

        info!(
            "Creating softbuffer pool: {} softbuffers, {} codeblocks of {} soft bits, expiry {} slots",
            config.max_softbuffers,
            config.max_nof_codeblocks,
            config.max_codeblock_size,
            config.expire_timeout_slots
        );

        Ok(Self {
            config,
            codeblocks: CodeblockPool::new(config.max_nof_codeblocks, config.max_codeblock_size),
            buffers: (0..config.max_softbuffers).map(|_| Softbuffer::new()).collect(),
        })
    }

    /// Pool dimensions
    pub fn config(&self) -> &SoftbufferPoolConfig {
        &self.config
    }

    /// Reserve a softbuffer for `id` with `nof_codeblocks` codeblocks at `slot`.
    ///
    /// The buffer already reserved for `id` is always preferred, and a failure
    /// on it is final: using another buffer would break soft-combining.
    /// Returns `None` when no buffer can take the reservation.
    pub fn reserve(
        &self,
        slot: SlotPoint,
        id: SoftbufferId,
        nof_codeblocks: usize,
    ) -> Option<UniqueSoftbuffer<'_>> {
        let expire_slot = slot + self.config.expire_timeout_slots;

        if let Some(buffer) = self.buffers.iter().find(|buffer| buffer.match_id(id)) {
            return self.try_reserve(buffer, id, expire_slot, nof_codeblocks);
        }

        let Some(buffer) = self.buffers.iter().find(|buffer| buffer.is_available()) else {
            warn!("Softbuffer pool exhausted, cannot reserve for {} at {}", id, slot);
            return None;
        };

        self.try_reserve(buffer, id, expire_slot, nof_codeblocks)
    }

    fn try_reserve<'a>(
        &'a self,
        buffer: &'a Softbuffer,
        id: SoftbufferId,
        expire_slot: SlotPoint,
        nof_codeblocks: usize,
    ) -> Option<UniqueSoftbuffer<'a>> {
        match buffer.reserve(id, expire_slot, nof_codeblocks, &self.codeblocks) {
            SoftbufferStatus::Successful => {
                trace!(
                    "Reserved softbuffer for {} with {} codeblocks until {}",
                    id,
                    nof_codeblocks,
                    expire_slot
                );
                Some(UniqueSoftbuffer::new(buffer, &self.codeblocks, id))
            }
            SoftbufferStatus::AlreadyInUse => {
                debug!("Softbuffer for {} is in use", id);
                None
            }
            SoftbufferStatus::InsufficientCodeblocks => {
                warn!(
                    "Not enough codeblocks for {}: requested {}, free {}",
                    id,
                    nof_codeblocks,
                    self.codeblocks.nof_free_codeblocks()
                );
                None
            }
        }
    }

    /// Reclaim released and expired softbuffers. Call once per slot.
    pub fn run_slot(&self, slot: SlotPoint) {
        for buffer in &self.buffers {
            buffer.run_slot(slot, &self.codeblocks);
        }
    }

    /// Occupancy of buffers and codeblocks
    pub fn stats(&self) -> SoftbufferPoolStats {
        let mut stats = SoftbufferPoolStats {
            free_codeblocks: self.codeblocks.nof_free_codeblocks(),
            total_codeblocks: self.codeblocks.capacity(),
            ..Default::default()
        };

        for buffer in &self.buffers {
            match buffer.state() {
                SoftbufferState::Available => stats.available += 1,
                SoftbufferState::Reserved => stats.reserved += 1,
                SoftbufferState::Locked => stats.locked += 1,
                SoftbufferState::Released => stats.released += 1,
            }
        }

        stats
    }
}
