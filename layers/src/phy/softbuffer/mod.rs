//! HARQ Receive Softbuffers
//!
//! Storage for the soft bits of uplink transport blocks across HARQ
//! retransmissions. A [`SoftbufferPool`] owns a fixed set of [`Softbuffer`]s
//! and one [`CodeblockPool`] they all draw their codeblocks from.
//!
//! Per PUSCH PDU the decoder reserves a buffer with the UE's RNTI and HARQ
//! process, locks it while decoding, then releases it on success or unlocks it
//! so the next retransmission can combine into the same codeblocks. The slot
//! driver calls [`SoftbufferPool::run_slot`] once per slot to reclaim released
//! buffers and reservations that were abandoned for `expire_timeout_slots`.

mod codeblock_pool;
mod pool;
#[allow(clippy::module_inception)]
mod softbuffer;

pub use codeblock_pool::{CodeblockId, CodeblockPool};
pub use pool::{SoftbufferPool, SoftbufferPoolStats};
pub use softbuffer::{Softbuffer, UniqueSoftbuffer};

/// Upper bound (exclusive) of `expire_timeout_slots`.
///
/// Slot points compare within half a hyper period. At 15 kHz that is 5120
/// slots; a longer timeout would make a fresh reservation look expired.
pub const MAX_EXPIRE_TIMEOUT_SLOTS: u32 = NOF_SFNS * NOF_SUBFRAMES_PER_FRAME / 2;

use super::ldpc::MAX_CODEBLOCK_SIZE;
use crate::LayerError;
use common::types::{Rnti, NOF_SFNS, NOF_SUBFRAMES_PER_FRAME};
use std::fmt;

/// Identifies the transport block a softbuffer is reserved for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftbufferId {
    /// UE the transport block belongs to
    pub rnti: Rnti,
    /// HARQ process of the transport block
    pub harq_ack_id: u8,
}

impl SoftbufferId {
    /// Marks a populated identity in the lock-free mirror
    const VALID: u32 = 1 << 24;

    pub fn new(rnti: Rnti, harq_ack_id: u8) -> Self {
        Self { rnti, harq_ack_id }
    }

    /// Packed form stored in the softbuffer's identity mirror
    pub(crate) fn to_raw(&self) -> u32 {
        Self::VALID | (self.rnti.value() as u32) << 8 | self.harq_ack_id as u32
    }
}

impl fmt::Display for SoftbufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rnti={} h_id={}", self.rnti, self.harq_ack_id)
    }
}

/// Softbuffer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftbufferState {
    /// Free for any reservation
    Available,
    /// Holds codeblocks for an identifier, reclaimed on expiry
    Reserved,
    /// Being decoded; never pre-empted nor expired
    Locked,
    /// Decoded; reclaimed on the next slot
    Released,
}

/// Outcome of a softbuffer reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftbufferStatus {
    Successful,
    /// The buffer is locked or held by another identifier
    AlreadyInUse,
    /// The codeblock pool ran out
    InsufficientCodeblocks,
}

/// Softbuffer pool dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftbufferPoolConfig {
    /// Number of softbuffers, the HARQ processes receivable at once
    pub max_softbuffers: usize,
    /// Number of codeblocks shared by all softbuffers
    pub max_nof_codeblocks: usize,
    /// Soft bits per codeblock
    pub max_codeblock_size: usize,
    /// Slots an unlocked reservation survives without being reused
    pub expire_timeout_slots: u32,
}

impl Default for SoftbufferPoolConfig {
    fn default() -> Self {
        Self {
            max_softbuffers: 64,
            max_nof_codeblocks: 256,
            max_codeblock_size: MAX_CODEBLOCK_SIZE,
            expire_timeout_slots: 100,
        }
    }
}

impl SoftbufferPoolConfig {
    /// Check the dimensions describe a usable pool
    pub fn validate(&self) -> Result<(), LayerError> {
        if self.max_softbuffers == 0 {
            return Err(LayerError::InvalidConfiguration(
                "max_softbuffers must be positive".into(),
            ));
        }
        if self.max_nof_codeblocks == 0 {
            return Err(LayerError::InvalidConfiguration(
                "max_nof_codeblocks must be positive".into(),
            ));
        }
        if self.max_codeblock_size == 0 || self.max_codeblock_size > MAX_CODEBLOCK_SIZE {
            return Err(LayerError::InvalidConfiguration(format!(
                "max_codeblock_size {} outside 1..={}",
                self.max_codeblock_size, MAX_CODEBLOCK_SIZE
            )));
        }
        if self.expire_timeout_slots == 0 || self.expire_timeout_slots >= MAX_EXPIRE_TIMEOUT_SLOTS {
            return Err(LayerError::InvalidConfiguration(format!(
                "expire_timeout_slots {} outside 1..{}",
                self.expire_timeout_slots, MAX_EXPIRE_TIMEOUT_SLOTS
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_packing_is_unique() {
        let a = SoftbufferId::new(Rnti::new(0x4601), 0);
        let b = SoftbufferId::new(Rnti::new(0x4601), 1);
        let c = SoftbufferId::new(Rnti::new(0x4602), 0);
        assert_ne!(a.to_raw(), b.to_raw());
        assert_ne!(a.to_raw(), c.to_raw());

        // Never collides with the empty mirror, even for RNTI 0
        assert_ne!(SoftbufferId::new(Rnti::new(0), 0).to_raw(), 0);
    }

    #[test]
    fn test_config_validation() {
        assert!(SoftbufferPoolConfig::default().validate().is_ok());

        let config = SoftbufferPoolConfig {
            max_softbuffers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LayerError::InvalidConfiguration(_))));

        let config = SoftbufferPoolConfig {
            max_codeblock_size: MAX_CODEBLOCK_SIZE + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SoftbufferPoolConfig {
            expire_timeout_slots: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expire_timeout_within_half_hyper_period() {
        assert_eq!(MAX_EXPIRE_TIMEOUT_SLOTS, 5120);

        let config = SoftbufferPoolConfig {
            expire_timeout_slots: MAX_EXPIRE_TIMEOUT_SLOTS,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LayerError::InvalidConfiguration(_))));

        let config = SoftbufferPoolConfig {
            expire_timeout_slots: MAX_EXPIRE_TIMEOUT_SLOTS - 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
