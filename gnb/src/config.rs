//! YAML Configuration Structures for the uplink PHY application
//!
//! Section names follow the srsRAN gNB configuration format.

use anyhow::{bail, Context};
use layers::phy::{SoftbufferPoolConfig, MAX_CODEBLOCK_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GnbConfig {
    /// Cell configuration
    #[serde(default)]
    pub cell_cfg: CellConfig,
    /// PHY dimensioning
    #[serde(default)]
    pub expert_phy: ExpertPhyConfig,
    /// Emulated PUSCH traffic
    #[serde(default)]
    pub pusch: PuschConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Cell configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Common subcarrier spacing in kHz
    #[serde(default = "default_common_scs")]
    pub common_scs: u32,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            common_scs: default_common_scs(),
        }
    }
}

fn default_common_scs() -> u32 {
    30
}

/// Softbuffer pool dimensioning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExpertPhyConfig {
    /// Number of receive softbuffers
    #[serde(default = "default_max_softbuffers")]
    pub max_softbuffers: usize,
    /// Codeblocks shared by all softbuffers
    #[serde(default = "default_max_nof_codeblocks")]
    pub max_nof_codeblocks: usize,
    /// Soft bits per codeblock
    #[serde(default = "default_max_codeblock_size")]
    pub max_codeblock_size: usize,
    /// Slots before an abandoned reservation is reclaimed, below `MAX_EXPIRE_TIMEOUT_SLOTS`
    #[serde(default = "default_expire_timeout_slots")]
    pub expire_timeout_slots: u32,
}

impl Default for ExpertPhyConfig {
    fn default() -> Self {
        Self {
            max_softbuffers: default_max_softbuffers(),
            max_nof_codeblocks: default_max_nof_codeblocks(),
            max_codeblock_size: default_max_codeblock_size(),
            expire_timeout_slots: default_expire_timeout_slots(),
        }
    }
}

fn default_max_softbuffers() -> usize {
    64
}

fn default_max_nof_codeblocks() -> usize {
    256
}

fn default_max_codeblock_size() -> usize {
    MAX_CODEBLOCK_SIZE
}

fn default_expire_timeout_slots() -> u32 {
    100
}

/// Emulated UE uplink traffic
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PuschConfig {
    /// Transport block size in bytes
    #[serde(default = "default_tbs_bytes")]
    pub tbs_bytes: usize,
    /// Retransmissions before a transport block is dropped
    #[serde(default = "default_max_retx")]
    pub max_retx: u32,
    /// LLR magnitude of a received coded bit
    #[serde(default = "default_llr_amplitude")]
    pub llr_amplitude: i8,
    /// Peak uniform noise added to every LLR, below `llr_amplitude`
    #[serde(default = "default_noise_amplitude")]
    pub noise_amplitude: i8,
    /// Probability that a transmission suffers a fade erasing half of its soft bits
    #[serde(default = "default_fade_probability")]
    pub fade_probability: f64,
}

impl Default for PuschConfig {
    fn default() -> Self {
        Self {
            tbs_bytes: default_tbs_bytes(),
            max_retx: default_max_retx(),
            llr_amplitude: default_llr_amplitude(),
            noise_amplitude: default_noise_amplitude(),
            fade_probability: default_fade_probability(),
        }
    }
}

fn default_tbs_bytes() -> usize {
    1500
}

fn default_max_retx() -> u32 {
    4
}

fn default_llr_amplitude() -> i8 {
    16
}

fn default_noise_amplitude() -> i8 {
    8
}

fn default_fade_probability() -> f64 {
    0.3
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// All layers log level
    #[serde(default = "default_log_level")]
    pub all_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            all_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GnbConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: GnbConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_toml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: GnbConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration, picking the format from the file extension
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = match Path::new(path).extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            _ => Self::from_yaml_file(path),
        };
        config.with_context(|| format!("Failed to load configuration from {}", path))
    }

    /// Softbuffer pool dimensions
    pub fn softbuffer_config(&self) -> SoftbufferPoolConfig {
        SoftbufferPoolConfig {
            max_softbuffers: self.expert_phy.max_softbuffers,
            max_nof_codeblocks: self.expert_phy.max_nof_codeblocks,
            max_codeblock_size: self.expert_phy.max_codeblock_size,
            expire_timeout_slots: self.expert_phy.expire_timeout_slots,
        }
    }

    /// Check the settings the pool does not validate itself
    pub fn validate(&self) -> anyhow::Result<()> {
        self.softbuffer_config().validate()?;

        let pusch = &self.pusch;
        if pusch.tbs_bytes == 0 {
            bail!("pusch.tbs_bytes must be positive");
        }
        if pusch.llr_amplitude <= 0 {
            bail!("pusch.llr_amplitude must be positive");
        }
        if pusch.noise_amplitude < 0 || pusch.noise_amplitude >= pusch.llr_amplitude {
            bail!(
                "pusch.noise_amplitude {} outside 0..{}",
                pusch.noise_amplitude,
                pusch.llr_amplitude
            );
        }
        if !(0.0..=1.0).contains(&pusch.fade_probability) {
            bail!("pusch.fade_probability {} outside 0..=1", pusch.fade_probability);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layers::phy::MAX_EXPIRE_TIMEOUT_SLOTS;

    #[test]
    fn test_defaults_are_valid() {
        let config = GnbConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.softbuffer_config(), SoftbufferPoolConfig::default());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
cell_cfg:
  common_scs: 15
expert_phy:
  max_softbuffers: 8
  expire_timeout_slots: 40
pusch:
  tbs_bytes: 300
log:
  all_level: debug
"#;
        let config: GnbConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cell_cfg.common_scs, 15);
        assert_eq!(config.expert_phy.max_softbuffers, 8);
        assert_eq!(config.expert_phy.max_nof_codeblocks, 256);
        assert_eq!(config.expert_phy.expire_timeout_slots, 40);
        assert_eq!(config.pusch.tbs_bytes, 300);
        assert_eq!(config.pusch.max_retx, 4);
        assert_eq!(config.log.all_level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
[expert_phy]
max_nof_codeblocks = 32

[pusch]
noise_amplitude = 0
"#;
        let config: GnbConfig = toml::from_str(text).unwrap();
        assert_eq!(config.expert_phy.max_nof_codeblocks, 32);
        assert_eq!(config.pusch.noise_amplitude, 0);
        assert_eq!(config.cell_cfg.common_scs, 30);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut config = GnbConfig::default();
        config.expert_phy.max_softbuffers = 0;
        assert!(config.validate().is_err());

        let mut config = GnbConfig::default();
        config.pusch.noise_amplitude = config.pusch.llr_amplitude;
        assert!(config.validate().is_err());

        let mut config = GnbConfig::default();
        config.pusch.fade_probability = 1.5;
        assert!(config.validate().is_err());

        // Expiry must stay below half the 15 kHz hyper period
        let mut config = GnbConfig::default();
        config.expert_phy.expire_timeout_slots = MAX_EXPIRE_TIMEOUT_SLOTS;
        assert!(config.validate().is_err());
        config.expert_phy.expire_timeout_slots = MAX_EXPIRE_TIMEOUT_SLOTS - 1;
        assert!(config.validate().is_ok());
    }
}
