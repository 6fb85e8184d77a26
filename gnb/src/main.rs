//! Albor Space 5G Uplink PHY Main Application
//!
//! Runs the PUSCH HARQ receive path against emulated UEs: a slot driver
//! reclaims softbuffers every slot and decodes each UE's transmission on
//! blocking worker threads.

mod config;
mod slot_driver;
mod ue_sim;

use anyhow::{bail, Result};
use clap::Parser;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::types::{Rnti, SubcarrierSpacing};
use config::GnbConfig;
use layers::phy::UplinkPhy;
use slot_driver::SlotDriver;
use ue_sim::{UeEmulator, UeSimStats};

/// Albor Space 5G Uplink PHY
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, default_value = "gnb_ul_phy.yml")]
    config: String,

    /// Log level (trace, debug, info, warn, error), overrides log.all_level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Number of emulated UEs
    #[arg(long, default_value = "4")]
    nof_ues: u16,

    /// Stop after this many slots, run until Ctrl-C otherwise
    #[arg(long)]
    slots: Option<u64>,

    /// Subcarrier spacing in kHz (15, 30, 60, 120, 240), overrides cell_cfg.common_scs
    #[arg(long)]
    scs_khz: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if Path::new(&args.config).exists() {
        GnbConfig::from_file(&args.config)?
    } else {
        GnbConfig::default()
    };
    if let Some(scs_khz) = args.scs_khz {
        config.cell_cfg.common_scs = scs_khz;
    }

    // Initialize logging
    let log_level = args.log_level.clone().unwrap_or_else(|| config.log.all_level.clone());
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor Space 5G Uplink PHY");
    if Path::new(&args.config).exists() {
        info!("Configuration file: {}", args.config);
    } else {
        warn!("Configuration file {} not found, using defaults", args.config);
    }

    config.validate()?;
    let scs = SubcarrierSpacing::from_khz(config.cell_cfg.common_scs)
        .ok_or_else(|| anyhow::anyhow!("Invalid subcarrier spacing: {} kHz", config.cell_cfg.common_scs))?;

    info!("Configuration:");
    info!("  Subcarrier spacing: {} kHz", scs.as_khz());
    info!("  Softbuffers: {}", config.expert_phy.max_softbuffers);
    info!("  Codeblocks: {} x {} soft bits", config.expert_phy.max_nof_codeblocks, config.expert_phy.max_codeblock_size);
    info!("  Expiry: {} slots", config.expert_phy.expire_timeout_slots);
    info!("  UEs: {}, TBS: {} bytes, max retx: {}", args.nof_ues, config.pusch.tbs_bytes, config.pusch.max_retx);

    let phy = UplinkPhy::new(config.softbuffer_config())?;

    let ue_stats = Arc::new(UeSimStats::default());
    let ues = (0..args.nof_ues)
        .map(|i| -> Result<UeEmulator> {
            let rnti = ue_rnti(i)?;
            Ok(UeEmulator::new(rnti, config.pusch.clone(), i as u64, ue_stats.clone()))
        })
        .collect::<Result<Vec<_>>>()?;

    let running = Arc::new(RwLock::new(true));

    let driver = SlotDriver::new(phy.clone(), ues, scs, running.clone());
    let mut driver_handle = tokio::spawn(driver.run(args.slots));

    // Start statistics reporting
    let stats_handle = {
        let phy = phy.clone();
        let ue_stats = ue_stats.clone();
        let running = running.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(5));
            interval.tick().await;

            while *running.read().await {
                interval.tick().await;
                report_stats(&phy, &ue_stats);
            }
        })
    };

    // Wait for shutdown signal
    let driver_finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        _ = &mut driver_handle => {
            info!("Slot limit reached");
            true
        }
    };

    // Shutdown
    info!("Shutting down Uplink PHY");
    *running.write().await = false;

    if !driver_finished {
        let _ = tokio::time::timeout(tokio::time::Duration::from_secs(5), driver_handle).await;
    }
    stats_handle.abort();

    report_stats(&phy, &ue_stats);
    info!("Uplink PHY shutdown complete");
    Ok(())
}

/// C-RNTI of the emulated UE at `index`
fn ue_rnti(index: u16) -> Result<Rnti> {
    match Rnti::MIN_CRNTI.value().checked_add(index) {
        Some(value) => Ok(Rnti::new(value)),
        None => bail!(
            "Too many UEs: index {} exceeds the C-RNTI range starting at {}",
            index,
            Rnti::MIN_CRNTI
        ),
    }
}

fn report_stats(phy: &UplinkPhy, ue_stats: &UeSimStats) {
    let pool = phy.softbuffer_stats();
    let pusch = phy.pusch_stats();

    info!("PHY Statistics:");
    info!(
        "  Softbuffers: available={} reserved={} locked={} released={}",
        pool.available, pool.reserved, pool.locked, pool.released
    );
    info!("  Codeblocks: {}/{} free", pool.free_codeblocks, pool.total_codeblocks);
    info!(
        "  PUSCH: tx={} ok={} ko={} no_softbuffer={} bler={:.3}",
        pusch.transmissions,
        pusch.crc_ok,
        pusch.crc_ko,
        pusch.no_softbuffer,
        pusch.bler()
    );
    info!(
        "  UEs: new={} retx={} ack={} nack={} dropped={} corrupted={}",
        ue_stats.new_transmissions.load(Ordering::Relaxed),
        ue_stats.retransmissions.load(Ordering::Relaxed),
        ue_stats.acks.load(Ordering::Relaxed),
        ue_stats.nacks.load(Ordering::Relaxed),
        ue_stats.dropped.load(Ordering::Relaxed),
        ue_stats.payload_mismatches.load(Ordering::Relaxed)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ue_rnti_starts_at_first_crnti() {
        assert_eq!(ue_rnti(0).unwrap(), Rnti::MIN_CRNTI);
        assert_eq!(ue_rnti(3).unwrap().value(), Rnti::MIN_CRNTI.value() + 3);
    }

    #[test]
    fn test_ue_rnti_overflow_rejected() {
        let last = u16::MAX - Rnti::MIN_CRNTI.value();
        assert_eq!(ue_rnti(last).unwrap().value(), u16::MAX);
        assert!(ue_rnti(last + 1).is_err());
        assert!(ue_rnti(u16::MAX).is_err());
    }
}
