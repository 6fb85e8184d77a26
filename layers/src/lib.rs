//! Protocol Stack Layers Library
//!
//! This crate implements the uplink physical layer HARQ receive path
//! according to 3GPP Release 16.

pub mod phy;

use common::types::Rnti;
use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Invalid protocol data unit: {0}")]
    InvalidPdu(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("No softbuffer available for rnti={rnti} h_id={harq_id}")]
    SoftbufferUnavailable { rnti: Rnti, harq_id: u8 },
}
