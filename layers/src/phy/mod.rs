//! Physical Layer (PHY) Submodules
//!
//! Uplink receive processing of the 5G NR physical layer according to
//! 3GPP TS 38.212 and TS 38.214.

pub mod ldpc;
pub mod pusch;
pub mod softbuffer;

// Re-export commonly used types
pub use ldpc::{CodeblockDecoder, HardDecisionDecoder, LdpcSegmentation, UlschEncoder, MAX_CODEBLOCK_SIZE};
pub use pusch::{PuschDecodeResult, PuschPdu, PuschProcessor, PuschStatsSnapshot};
pub use softbuffer::{
    SoftbufferId, SoftbufferPool, SoftbufferPoolConfig, SoftbufferPoolStats, SoftbufferState,
    UniqueSoftbuffer, MAX_EXPIRE_TIMEOUT_SLOTS,
};

use crate::LayerError;
use common::types::SlotPoint;
use std::sync::Arc;
use tracing::info;

/// Uplink PHY: the HARQ softbuffers and the PUSCH decoder sharing them
#[derive(Clone)]
pub struct UplinkPhy {
    softbuffers: Arc<SoftbufferPool>,
    pusch: PuschProcessor,
}

impl UplinkPhy {
    pub fn new(config: SoftbufferPoolConfig) -> Result<Self, LayerError> {
        let softbuffers = Arc::new(SoftbufferPool::new(config)?);
        let pusch = PuschProcessor::new(softbuffers.clone());

        info!(
            "Uplink PHY ready: {} softbuffers, {} codeblocks",
            config.max_softbuffers, config.max_nof_codeblocks
        );

        Ok(Self { softbuffers, pusch })
    }

    /// Slot boundary: reclaim released and expired softbuffers
    pub fn run_slot(&self, slot: SlotPoint) {
        self.softbuffers.run_slot(slot);
    }

    /// Decode a PUSCH transmission. Safe to call from several threads.
    pub fn process_pusch(&self, pdu: &PuschPdu) -> Result<PuschDecodeResult, LayerError> {
        self.pusch.process(pdu)
    }

    pub fn softbuffer_stats(&self) -> SoftbufferPoolStats {
        self.softbuffers.stats()
    }

    pub fn pusch_stats(&self) -> PuschStatsSnapshot {
        self.pusch.stats().snapshot()
    }
}
