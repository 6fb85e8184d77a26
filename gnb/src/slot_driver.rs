//! Slot timing loop of the uplink PHY
//!
//! Every slot tick reclaims softbuffers, hands decoding feedback back to the
//! UEs and dispatches the new PUSCH transmissions to blocking worker threads.
//! Decoding of slot N can overlap the tick of slot N+1.

use crate::ue_sim::{HarqFeedback, UeEmulator};
use common::types::{SlotPoint, SubcarrierSpacing};
use common::utils::time;
use layers::phy::UplinkPhy;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct SlotDriver {
    phy: UplinkPhy,
    ues: Vec<UeEmulator>,
    scs: SubcarrierSpacing,
    running: Arc<RwLock<bool>>,
    feedback_tx: mpsc::UnboundedSender<HarqFeedback>,
    feedback_rx: mpsc::UnboundedReceiver<HarqFeedback>,
}

impl SlotDriver {
    pub fn new(
        phy: UplinkPhy,
        ues: Vec<UeEmulator>,
        scs: SubcarrierSpacing,
        running: Arc<RwLock<bool>>,
    ) -> Self {
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
        Self {
            phy,
            ues,
            scs,
            running,
            feedback_tx,
            feedback_rx,
        }
    }

    /// Run until stopped or `nof_slots` slots have been processed. Returns the slot count.
    pub async fn run(mut self, nof_slots: Option<u64>) -> u64 {
        let slot_duration = Duration::from_micros(time::slot_duration_us(self.scs) as u64);
        let mut interval = tokio::time::interval(slot_duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Slot driver started: {} UEs, slot duration {} us",
            self.ues.len(),
            slot_duration.as_micros()
        );

        let mut slot = SlotPoint::new(self.scs, 0, 0);
        let mut count = 0u64;
        let mut decoders = JoinSet::new();

        while *self.running.read().await {
            if nof_slots.is_some_and(|max| count >= max) {
                break;
            }
            interval.tick().await;

            self.phy.run_slot(slot);
            self.drain_feedback();
            while let Some(result) = decoders.try_join_next() {
                if let Err(e) = result {
                    warn!("PUSCH decoder task failed: {}", e);
                }
            }

            for (ue_index, ue) in self.ues.iter_mut().enumerate() {
                let Some(pdu) = ue.next_pdu(slot) else {
                    debug!("{} has no HARQ process free at {}", ue.rnti(), slot);
                    continue;
                };

                let phy = self.phy.clone();
                let feedback_tx = self.feedback_tx.clone();
                decoders.spawn_blocking(move || {
                    let payload = match phy.process_pusch(&pdu) {
                        Ok(result) => result.payload,
                        Err(e) => {
                            warn!("PUSCH {} h_id={} at {} dropped: {}", pdu.rnti, pdu.harq_id, pdu.slot, e);
                            None
                        }
                    };
                    // Receiver outlives every decoder task
                    let _ = feedback_tx.send(HarqFeedback {
                        ue_index,
                        harq_id: pdu.harq_id,
                        payload,
                    });
                });
            }

            slot += 1;
            count += 1;
        }

        while let Some(result) = decoders.join_next().await {
            if let Err(e) = result {
                warn!("PUSCH decoder task failed: {}", e);
            }
        }
        self.drain_feedback();

        info!("Slot driver stopped after {} slots at {}", count, slot);
        count
    }

    fn drain_feedback(&mut self) {
        while let Ok(feedback) = self.feedback_rx.try_recv() {
            match self.ues.get_mut(feedback.ue_index) {
                Some(ue) => ue.handle_feedback(feedback.harq_id, feedback.payload),
                None => warn!("Feedback for unknown UE {}", feedback.ue_index),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PuschConfig;
    use crate::ue_sim::UeSimStats;
    use common::types::Rnti;
    use layers::phy::SoftbufferPoolConfig;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_driver_delivers_every_transport_block() {
        let phy = UplinkPhy::new(SoftbufferPoolConfig {
            max_softbuffers: 32,
            max_nof_codeblocks: 64,
            ..Default::default()
        })
        .unwrap();
        let stats = Arc::new(UeSimStats::default());
        let config = PuschConfig {
            tbs_bytes: 200,
            fade_probability: 0.0,
            ..Default::default()
        };
        let ues = (0..2)
            .map(|i| UeEmulator::new(Rnti::new(0x4601 + i), config.clone(), i as u64, stats.clone()))
            .collect();

        let running = Arc::new(RwLock::new(true));
        let driver = SlotDriver::new(phy.clone(), ues, SubcarrierSpacing::Scs120, running);
        assert_eq!(driver.run(Some(40)).await, 40);

        let sent = stats.new_transmissions.load(Ordering::Relaxed);
        assert!(sent > 0);
        assert_eq!(stats.acks.load(Ordering::Relaxed), sent);
        assert_eq!(stats.nacks.load(Ordering::Relaxed), 0);
        assert_eq!(phy.pusch_stats().crc_ok, sent);
    }

    #[tokio::test]
    async fn test_driver_stops_when_not_running() {
        let phy = UplinkPhy::new(SoftbufferPoolConfig::default()).unwrap();
        let running = Arc::new(RwLock::new(false));
        let driver = SlotDriver::new(phy, Vec::new(), SubcarrierSpacing::Scs30, running);
        assert_eq!(driver.run(None).await, 0);
    }
}
