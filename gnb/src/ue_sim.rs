//! Emulated UEs transmitting PUSCH with HARQ
//!
//! Each UE cycles through its HARQ processes, one transmission per slot. A
//! NACK schedules a retransmission of the same transport block with the next
//! redundancy version; an ACK or running out of retransmissions frees the
//! process for new data.

use crate::config::PuschConfig;
use bytes::Bytes;
use common::types::{LogLikelihoodRatio, Rnti, SlotPoint};
use common::utils::bytes_to_hex;
use layers::phy::{LdpcSegmentation, PuschPdu, UlschEncoder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// HARQ processes per UE
pub const NOF_HARQ_PROCESSES: usize = 8;

/// Redundancy version order of TS 38.214 Table 6.1.2.1-2
const RV_SEQUENCE: [u8; 4] = [0, 2, 3, 1];

/// Decoding outcome reported back to a UE
#[derive(Debug, Clone)]
pub struct HarqFeedback {
    /// Index of the UE in the emulator list
    pub ue_index: usize,
    pub harq_id: u8,
    /// Decoded transport block, `None` on CRC failure or decoder error
    pub payload: Option<Bytes>,
}

/// Counters shared by all emulated UEs
#[derive(Debug, Default)]
pub struct UeSimStats {
    pub new_transmissions: AtomicU64,
    pub retransmissions: AtomicU64,
    pub acks: AtomicU64,
    pub nacks: AtomicU64,
    pub dropped: AtomicU64,
    pub payload_mismatches: AtomicU64,
}

#[derive(Debug, Default)]
struct HarqProcess {
    payload: Vec<u8>,
    rv_index: usize,
    nof_retx: u32,
    /// Transport block still to be delivered
    active: bool,
    /// Transmitted, feedback not received yet
    awaiting_feedback: bool,
}

/// One emulated UE
pub struct UeEmulator {
    rnti: Rnti,
    config: PuschConfig,
    segmentation: LdpcSegmentation,
    encoder: UlschEncoder,
    harq: Vec<HarqProcess>,
    next_harq: usize,
    rng: StdRng,
    stats: Arc<UeSimStats>,
}

impl UeEmulator {
    pub fn new(rnti: Rnti, config: PuschConfig, seed: u64, stats: Arc<UeSimStats>) -> Self {
        let segmentation = LdpcSegmentation::new(config.tbs_bytes * 8);
        Self {
            rnti,
            config,
            segmentation,
            encoder: UlschEncoder::new(),
            harq: (0..NOF_HARQ_PROCESSES).map(|_| HarqProcess::default()).collect(),
            next_harq: 0,
            rng: StdRng::seed_from_u64(seed),
            stats,
        }
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    /// Build the transmission for `slot`, `None` while every HARQ process awaits feedback
    pub fn next_pdu(&mut self, slot: SlotPoint) -> Option<PuschPdu> {
        let harq_id = (0..NOF_HARQ_PROCESSES)
            .map(|i| (self.next_harq + i) % NOF_HARQ_PROCESSES)
            .find(|&id| !self.harq[id].awaiting_feedback)?;
        self.next_harq = (harq_id + 1) % NOF_HARQ_PROCESSES;

        let new_data = !self.harq[harq_id].active;
        if new_data {
            let payload = (0..self.config.tbs_bytes).map(|_| self.rng.gen()).collect();
            let process = &mut self.harq[harq_id];
            process.payload = payload;
            process.rv_index = 0;
            process.nof_retx = 0;
            process.active = true;
            self.stats.new_transmissions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.retransmissions.fetch_add(1, Ordering::Relaxed);
        }

        let process = &self.harq[harq_id];
        let rv = RV_SEQUENCE[process.rv_index % RV_SEQUENCE.len()];
        let nof_bits = self.segmentation.nof_codeblocks * self.segmentation.codeblock_size;
        let bits = self.encoder.encode(&process.payload, &self.segmentation, nof_bits, rv);
        let llrs = self.channel(&bits);

        self.harq[harq_id].awaiting_feedback = true;

        Some(PuschPdu {
            slot,
            rnti: self.rnti,
            harq_id: harq_id as u8,
            tbs_bytes: self.config.tbs_bytes,
            new_data,
            rv,
            llrs,
        })
    }

    /// Apply decoding feedback for one HARQ process
    pub fn handle_feedback(&mut self, harq_id: u8, payload: Option<Bytes>) {
        let max_retx = self.config.max_retx;
        let Some(process) = self.harq.get_mut(harq_id as usize) else {
            warn!("Feedback for unknown HARQ process {} of {}", harq_id, self.rnti);
            return;
        };
        process.awaiting_feedback = false;

        match payload {
            Some(decoded) if decoded[..] == process.payload[..] => {
                self.stats.acks.fetch_add(1, Ordering::Relaxed);
                process.active = false;
                return;
            }
            Some(decoded) => {
                warn!(
                    "{} h_id={} decoded a corrupted transport block: {}...",
                    self.rnti,
                    harq_id,
                    bytes_to_hex(&decoded[..decoded.len().min(8)])
                );
                self.stats.payload_mismatches.fetch_add(1, Ordering::Relaxed);
            }
            None => {}
        }

        self.stats.nacks.fetch_add(1, Ordering::Relaxed);
        if process.nof_retx >= max_retx {
            debug!("{} h_id={} dropped after {} retransmissions", self.rnti, harq_id, process.nof_retx);
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            process.active = false;
        } else {
            process.nof_retx += 1;
            process.rv_index += 1;
        }
    }

    /// LLRs of the received bits: bounded noise plus an occasional fade
    fn channel(&mut self, bits: &[u8]) -> Vec<LogLikelihoodRatio> {
        let amplitude = self.config.llr_amplitude;
        let noise = self.config.noise_amplitude as i32;

        let mut llrs: Vec<LogLikelihoodRatio> = bits
            .iter()
            .map(|&bit| {
                let clean = LogLikelihoodRatio::from_bit(bit, amplitude).value() as i32;
                LogLikelihoodRatio::new(clean + self.rng.gen_range(-noise..=noise))
            })
            .collect();

        if !llrs.is_empty() && self.rng.gen_bool(self.config.fade_probability) {
            let len = llrs.len() / 2;
            let start = self.rng.gen_range(0..llrs.len());
            for i in 0..len {
                let idx = (start + i) % llrs.len();
                llrs[idx] = LogLikelihoodRatio::ZERO;
            }
        }

        llrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::SubcarrierSpacing;
    use layers::phy::{SoftbufferPoolConfig, UplinkPhy};

    fn config(fade_probability: f64) -> PuschConfig {
        PuschConfig {
            tbs_bytes: 200,
            fade_probability,
            ..Default::default()
        }
    }

    fn slot(count: u64) -> SlotPoint {
        SlotPoint::from_count(SubcarrierSpacing::Scs30, count)
    }

    #[test]
    fn test_harq_processes_rotate() {
        let stats = Arc::new(UeSimStats::default());
        let mut ue = UeEmulator::new(Rnti::new(0x4601), config(0.0), 1, stats.clone());

        for i in 0..NOF_HARQ_PROCESSES {
            let pdu = ue.next_pdu(slot(i as u64)).unwrap();
            assert_eq!(pdu.harq_id as usize, i);
            assert!(pdu.new_data);
            assert_eq!(pdu.rv, 0);
        }
        // All processes wait for feedback
        assert!(ue.next_pdu(slot(8)).is_none());
        assert_eq!(stats.new_transmissions.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn test_nack_retransmits_with_next_rv() {
        let stats = Arc::new(UeSimStats::default());
        let mut ue = UeEmulator::new(Rnti::new(0x4601), config(0.0), 2, stats.clone());

        let first = ue.next_pdu(slot(0)).unwrap();
        ue.handle_feedback(first.harq_id, None);

        // Round robin moves on, the NACKed process is picked up when its turn comes
        for i in 1..NOF_HARQ_PROCESSES {
            let pdu = ue.next_pdu(slot(i as u64)).unwrap();
            ue.handle_feedback(pdu.harq_id, None);
        }
        let retx = ue.next_pdu(slot(8)).unwrap();
        assert_eq!(retx.harq_id, first.harq_id);
        assert!(!retx.new_data);
        assert_eq!(retx.rv, 2);
        assert_eq!(stats.retransmissions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_drop_after_max_retx() {
        let stats = Arc::new(UeSimStats::default());
        let mut cfg = config(0.0);
        cfg.max_retx = 1;
        let mut ue = UeEmulator::new(Rnti::new(0x4601), cfg, 3, stats.clone());

        for count in 0..(2 * NOF_HARQ_PROCESSES as u64) {
            let pdu = ue.next_pdu(slot(count)).unwrap();
            ue.handle_feedback(pdu.harq_id, None);
        }
        assert_eq!(stats.dropped.load(Ordering::Relaxed), NOF_HARQ_PROCESSES as u64);

        // Dropped processes start over with new data
        let pdu = ue.next_pdu(slot(16)).unwrap();
        assert!(pdu.new_data);
    }

    #[test]
    fn test_wrong_payload_is_nacked() {
        let stats = Arc::new(UeSimStats::default());
        let mut ue = UeEmulator::new(Rnti::new(0x4601), config(0.0), 4, stats.clone());

        let pdu = ue.next_pdu(slot(0)).unwrap();
        ue.handle_feedback(pdu.harq_id, Some(Bytes::from(vec![0u8; 200])));
        assert_eq!(stats.payload_mismatches.load(Ordering::Relaxed), 1);
        assert_eq!(stats.nacks.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_fading_channel_recovers_through_retransmissions() {
        let phy = UplinkPhy::new(SoftbufferPoolConfig {
            max_softbuffers: 16,
            max_nof_codeblocks: 32,
            expire_timeout_slots: 50,
            ..Default::default()
        })
        .unwrap();
        let stats = Arc::new(UeSimStats::default());
        let mut cfg = config(0.5);
        cfg.max_retx = 8;
        let mut ues: Vec<_> = (0..2)
            .map(|i| UeEmulator::new(Rnti::new(0x4601 + i), cfg.clone(), 10 + i as u64, stats.clone()))
            .collect();

        for count in 0..200 {
            let now = slot(count);
            phy.run_slot(now);
            for ue in &mut ues {
                if let Some(pdu) = ue.next_pdu(now) {
                    let payload = phy.process_pusch(&pdu).ok().and_then(|result| result.payload);
                    ue.handle_feedback(pdu.harq_id, payload);
                }
            }
        }

        assert!(stats.nacks.load(Ordering::Relaxed) > 0);
        assert!(stats.retransmissions.load(Ordering::Relaxed) > 0);
        assert!(stats.acks.load(Ordering::Relaxed) > 100);
        assert_eq!(stats.payload_mismatches.load(Ordering::Relaxed), 0);

        // Nothing in flight: every buffer is reclaimed once reservations expire
        phy.run_slot(slot(260));
        let pool = phy.softbuffer_stats();
        assert_eq!(pool.available, 16);
        assert_eq!(pool.free_codeblocks, pool.total_codeblocks);
    }
}
