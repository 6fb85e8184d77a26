/// PUSCH (Physical Uplink Shared Channel) transport block decoding
/// Based on 3GPP TS 38.212 Section 6.2 and TS 38.321 Section 5.4.2
///
/// Soft bits arrive already demodulated and descrambled. Each PDU is combined
/// into the HARQ softbuffer of its UE and HARQ process, decoded per codeblock,
/// and checked against the transport block CRC.

use super::ldpc::{CodeblockDecoder, HardDecisionDecoder, LdpcRateDematcher, LdpcSegmentation};
use super::softbuffer::{SoftbufferId, SoftbufferPool, UniqueSoftbuffer};
use crate::LayerError;
use bytes::Bytes;
use common::types::{LogLikelihoodRatio, Rnti, SlotPoint};
use common::utils::{check_crc, pack_bits};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Highest redundancy version
const MAX_RV: u8 = 3;

/// One received PUSCH transmission
#[derive(Debug, Clone)]
pub struct PuschPdu {
    /// Slot the transmission was received in
    pub slot: SlotPoint,
    /// Transmitting UE
    pub rnti: Rnti,
    /// HARQ process ID
    pub harq_id: u8,
    /// Transport block size in bytes
    pub tbs_bytes: usize,
    /// New data indicator toggled, the first transmission of a transport block
    pub new_data: bool,
    /// Redundancy version
    pub rv: u8,
    /// Rate-matched soft bits of all codeblocks
    pub llrs: Vec<LogLikelihoodRatio>,
}

/// Decoding outcome of a PUSCH transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuschDecodeResult {
    /// Transport block CRC passed
    pub crc_ok: bool,
    /// Decoded transport block, present when the CRC passed
    pub payload: Option<Bytes>,
    /// Number of codeblocks in the transport block
    pub nof_codeblocks: usize,
    /// Codeblocks whose CRC passed, including earlier transmissions
    pub nof_codeblocks_ok: usize,
}

/// PUSCH decoding counters
#[derive(Debug, Default)]
pub struct PuschStats {
    transmissions: AtomicU64,
    crc_ok: AtomicU64,
    crc_ko: AtomicU64,
    no_softbuffer: AtomicU64,
}

/// Point-in-time copy of [`PuschStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PuschStatsSnapshot {
    pub transmissions: u64,
    pub crc_ok: u64,
    pub crc_ko: u64,
    pub no_softbuffer: u64,
}

impl PuschStats {
    pub fn snapshot(&self) -> PuschStatsSnapshot {
        PuschStatsSnapshot {
            transmissions: self.transmissions.load(Ordering::Relaxed),
            crc_ok: self.crc_ok.load(Ordering::Relaxed),
            crc_ko: self.crc_ko.load(Ordering::Relaxed),
            no_softbuffer: self.no_softbuffer.load(Ordering::Relaxed),
        }
    }
}

impl PuschStatsSnapshot {
    /// Block error rate over all decoded transmissions
    pub fn bler(&self) -> f64 {
        let decoded = self.crc_ok + self.crc_ko;
        if decoded == 0 {
            0.0
        } else {
            self.crc_ko as f64 / decoded as f64
        }
    }
}

/// PUSCH processor
#[derive(Clone)]
pub struct PuschProcessor {
    softbuffers: Arc<SoftbufferPool>,
    decoder: Arc<dyn CodeblockDecoder>,
    stats: Arc<PuschStats>,
}

impl PuschProcessor {
    pub fn new(softbuffers: Arc<SoftbufferPool>) -> Self {
        Self::with_decoder(softbuffers, Arc::new(HardDecisionDecoder))
    }

    pub fn with_decoder(softbuffers: Arc<SoftbufferPool>, decoder: Arc<dyn CodeblockDecoder>) -> Self {
        Self {
            softbuffers,
            decoder,
            stats: Arc::new(PuschStats::default()),
        }
    }

    pub fn softbuffers(&self) -> &Arc<SoftbufferPool> {
        &self.softbuffers
    }

    pub fn stats(&self) -> &PuschStats {
        &self.stats
    }

    /// Decode one PUSCH transmission
    pub fn process(&self, pdu: &PuschPdu) -> Result<PuschDecodeResult, LayerError> {
        let segmentation = self.validate(pdu)?;
        let nof_codeblocks = segmentation.nof_codeblocks;
        self.stats.transmissions.fetch_add(1, Ordering::Relaxed);

        let id = SoftbufferId::new(pdu.rnti, pdu.harq_id);
        let Some(mut buffer) = self.softbuffers.reserve(pdu.slot, id, nof_codeblocks) else {
            self.stats.no_softbuffer.fetch_add(1, Ordering::Relaxed);
            return Err(LayerError::SoftbufferUnavailable {
                rnti: pdu.rnti,
                harq_id: pdu.harq_id,
            });
        };

        if pdu.new_data {
            buffer.reset_codeblocks_crc();
        }
        // Freshly allocated codeblocks hold another transport block's soft bits
        let overwrite = pdu.new_data || !buffer.reused_codeblocks();

        buffer.lock();
        let mut crc = buffer.codeblocks_crc().to_vec();

        let dematcher = LdpcRateDematcher;
        let lengths = segmentation.rate_matched_lengths(pdu.llrs.len());
        let mut offset = 0;
        for (cb, e) in lengths.into_iter().enumerate() {
            let llrs = &pdu.llrs[offset..offset + e];
            offset += e;

            if crc[cb] {
                trace!("{} codeblock {} already decoded", id, cb);
                continue;
            }

            let mut soft_bits = buffer.codeblock_soft_bits(cb, segmentation.codeblock_size);
            dematcher.dematch(&mut soft_bits, llrs, pdu.rv, overwrite, segmentation.base_graph);

            let mut data_bits = buffer.codeblock_data_bits(cb, segmentation.info_bits);
            crc[cb] = self.decoder.decode(&soft_bits, &mut data_bits, &segmentation);
        }

        buffer.codeblocks_crc().copy_from_slice(&crc);
        let nof_codeblocks_ok = crc.iter().filter(|&&ok| ok).count();

        let payload = if nof_codeblocks_ok == nof_codeblocks {
            let tb_bits = self.concatenate_codeblocks(&buffer, &segmentation);
            // A single codeblock is covered by the transport block CRC already
            if nof_codeblocks == 1 || check_crc(&tb_bits, segmentation.tb_crc) {
                Some(pack_bits(&tb_bits[..segmentation.tbs_bits]))
            } else {
                debug!("{} transport block CRC failed with all codeblocks passing", id);
                buffer.reset_codeblocks_crc();
                None
            }
        } else {
            None
        };

        if payload.is_some() {
            buffer.release();
            self.stats.crc_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            buffer.unlock();
            self.stats.crc_ko.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            "PUSCH {} slot={} rv={} ndi={} tbs={}: crc={} cbs={}/{}",
            id,
            pdu.slot,
            pdu.rv,
            pdu.new_data,
            pdu.tbs_bytes,
            if payload.is_some() { "OK" } else { "KO" },
            nof_codeblocks_ok,
            nof_codeblocks
        );

        Ok(PuschDecodeResult {
            crc_ok: payload.is_some(),
            payload,
            nof_codeblocks,
            nof_codeblocks_ok,
        })
    }

    fn validate(&self, pdu: &PuschPdu) -> Result<LdpcSegmentation, LayerError> {
        if pdu.tbs_bytes == 0 {
            return Err(LayerError::InvalidPdu("empty transport block".into()));
        }
        if pdu.rv > MAX_RV {
            return Err(LayerError::InvalidPdu(format!("redundancy version {}", pdu.rv)));
        }

        let segmentation = LdpcSegmentation::new(pdu.tbs_bytes * 8);
        let max_codeblock_size = self.softbuffers.config().max_codeblock_size;
        if segmentation.codeblock_size > max_codeblock_size {
            return Err(LayerError::InvalidPdu(format!(
                "codeword of {} bits exceeds softbuffer codeblock size {}",
                segmentation.codeblock_size, max_codeblock_size
            )));
        }
        if pdu.llrs.len() < segmentation.nof_codeblocks {
            return Err(LayerError::InvalidPdu(format!(
                "{} soft bits for {} codeblocks",
                pdu.llrs.len(),
                segmentation.nof_codeblocks
            )));
        }

        Ok(segmentation)
    }

    /// Transport block bits with CRC, from the data bits of every codeblock
    fn concatenate_codeblocks(
        &self,
        buffer: &UniqueSoftbuffer<'_>,
        segmentation: &LdpcSegmentation,
    ) -> Vec<u8> {
        let mut bits = Vec::with_capacity(segmentation.segment_bits * segmentation.nof_codeblocks);
        for cb in 0..segmentation.nof_codeblocks {
            let data_bits = buffer.codeblock_data_bits(cb, segmentation.segment_bits);
            bits.extend_from_slice(&data_bits);
        }
        bits.truncate(segmentation.tb_bits_with_crc());
        bits
    }
}
