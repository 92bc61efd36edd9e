//! eNodeB PHY configuration
//!
//! Loaded once at startup from YAML or TOML (chosen by file extension).
//! Every section and field has a default, so a partial file is enough.

use anyhow::{anyhow, Context};
use layers::phy::{CarrierArgs, PhyArgs, PrachArgs};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EnbConfig {
    /// Radio front-end
    #[serde(default)]
    pub rf: RfConfig,
    /// Worker pipeline
    #[serde(default)]
    pub phy: PhyConfig,
    /// Random access detection
    #[serde(default)]
    pub prach: PrachConfig,
    /// Test signal generated by every worker
    #[serde(default)]
    pub test_signal: TestSignalConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Statistics reporting
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Radio configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RfConfig {
    /// "zmq" or "sim"
    #[serde(default = "default_device_driver")]
    pub device_driver: String,
    /// Driver arguments in "key=value,..." form
    #[serde(default = "default_device_args")]
    pub device_args: String,
}

fn default_device_driver() -> String {
    "zmq".to_string()
}

fn default_device_args() -> String {
    "tx_port=tcp://*:2000,rx_port=tcp://localhost:2001,base_srate=1.92e6".to_string()
}

impl Default for RfConfig {
    fn default() -> Self {
        Self {
            device_driver: default_device_driver(),
            device_args: default_device_args(),
        }
    }
}

/// Worker pipeline configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PhyConfig {
    /// Workers per carrier
    #[serde(default = "default_nof_workers")]
    pub nof_workers: usize,
    /// Subframe duration in microseconds
    #[serde(default = "default_sf_duration_us")]
    pub sf_duration_us: u64,
    /// Subframes between reception and transmission
    #[serde(default = "default_tx_offset")]
    pub tx_offset: u32,
    /// Subframe counter wrap
    #[serde(default = "default_tti_modulus")]
    pub tti_modulus: u32,
    /// Antennas per carrier
    #[serde(default = "default_nof_antennas")]
    pub nof_antennas: usize,
    /// RF port of each carrier
    #[serde(default = "default_carriers")]
    pub carriers: Vec<CarrierConfig>,
    /// Time alignment subtracted from transmit timestamps, in microseconds
    #[serde(default)]
    pub time_alignment_us: f64,
}

/// Carrier configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CarrierConfig {
    #[serde(default)]
    pub rf_port: usize,
}

fn default_nof_workers() -> usize {
    4
}

fn default_sf_duration_us() -> u64 {
    1000
}

fn default_tx_offset() -> u32 {
    4
}

fn default_tti_modulus() -> u32 {
    common::DEFAULT_TTI_MODULUS
}

fn default_nof_antennas() -> usize {
    1
}

fn default_carriers() -> Vec<CarrierConfig> {
    vec![CarrierConfig { rf_port: 0 }]
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self {
            nof_workers: default_nof_workers(),
            sf_duration_us: default_sf_duration_us(),
            tx_offset: default_tx_offset(),
            tti_modulus: default_tti_modulus(),
            nof_antennas: default_nof_antennas(),
            carriers: default_carriers(),
            time_alignment_us: 0.0,
        }
    }
}

/// PRACH configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PrachConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Opportunity period in subframes
    #[serde(default = "default_prach_period")]
    pub period: u32,
    /// Subframe offset within the period
    #[serde(default = "default_prach_offset")]
    pub offset: u32,
    /// Carrier scanned for preambles
    #[serde(default)]
    pub carrier: usize,
    #[serde(default = "default_prach_queue_depth")]
    pub queue_depth: usize,
    /// Peak-to-average power ratio
    #[serde(default = "default_prach_threshold")]
    pub threshold: f32,
}

fn default_true() -> bool {
    true
}

fn default_prach_period() -> u32 {
    10
}

fn default_prach_offset() -> u32 {
    1
}

fn default_prach_queue_depth() -> usize {
    8
}

fn default_prach_threshold() -> f32 {
    10.0
}

impl Default for PrachConfig {
    fn default() -> Self {
        Self {
            enable: true,
            period: default_prach_period(),
            offset: default_prach_offset(),
            carrier: 0,
            queue_depth: default_prach_queue_depth(),
            threshold: default_prach_threshold(),
        }
    }
}

/// Test tone configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TestSignalConfig {
    #[serde(default = "default_amplitude")]
    pub amplitude: f32,
    /// Tone periods per subframe
    #[serde(default = "default_tone_cycles")]
    pub tone_cycles: f32,
    /// Transmit every N-th subframe, 0 for silence
    #[serde(default = "default_tx_period")]
    pub tx_period: u32,
}

fn default_amplitude() -> f32 {
    0.5
}

fn default_tone_cycles() -> f32 {
    15.0
}

fn default_tx_period() -> u32 {
    1
}

impl Default for TestSignalConfig {
    fn default() -> Self {
        Self {
            amplitude: default_amplitude(),
            tone_cycles: default_tone_cycles(),
            tx_period: default_tx_period(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogConfig {
    /// All layers log level
    #[serde(default = "default_log_level")]
    pub all_level: String,
    /// PHY pipeline log level
    #[serde(default = "default_log_level")]
    pub phy_level: String,
    /// Radio log level
    #[serde(default = "default_log_level")]
    pub rf_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            all_level: default_log_level(),
            phy_level: default_log_level(),
            rf_level: default_log_level(),
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directive for the configured levels
    pub fn filter_directive(&self) -> String {
        format!("{},layers={},interfaces={}", self.all_level, self.phy_level, self.rf_level)
    }
}

/// Statistics reporting
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_metrics_period")]
    pub period_secs: u64,
}

fn default_metrics_period() -> u64 {
    5
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable: true,
            period_secs: default_metrics_period(),
        }
    }
}

impl EnbConfig {
    /// Load from a `.yml`/`.yaml` or `.toml` file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path))?;
        let extension = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::parse(&contents, extension).with_context(|| format!("Failed to parse {}", path))
    }

    /// Parse `contents` in the format named by `extension`
    pub fn parse(contents: &str, extension: &str) -> anyhow::Result<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "yml" | "yaml" => Ok(serde_yaml::from_str(contents)?),
            "toml" => Ok(toml::from_str(contents)?),
            other => Err(anyhow!("Unsupported configuration format '{}'", other)),
        }
    }

    /// Radio channels needed by the configured carriers
    pub fn nof_channels(&self) -> usize {
        let ports = self.phy.carriers.iter().map(|c| c.rf_port + 1).max().unwrap_or(1);
        ports * self.phy.nof_antennas
    }

    /// PHY arguments; validated by the PHY itself
    pub fn phy_args(&self) -> PhyArgs {
        PhyArgs {
            nof_workers: self.phy.nof_workers,
            sf_duration: Duration::from_micros(self.phy.sf_duration_us),
            tx_offset: self.phy.tx_offset,
            tti_modulus: self.phy.tti_modulus,
            nof_antennas: self.phy.nof_antennas,
            carriers: self.phy.carriers.iter().map(|c| CarrierArgs { rf_port: c.rf_port }).collect(),
            prach: PrachArgs {
                enabled: self.prach.enable,
                period: self.prach.period,
                offset: self.prach.offset,
                carrier: self.prach.carrier,
                queue_depth: self.prach.queue_depth,
                threshold: self.prach.threshold,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = EnbConfig::parse("{}", "yml").unwrap();
        assert_eq!(config, EnbConfig::default());
        assert!(config.phy_args().validate().is_ok());
        assert_eq!(config.phy_args().sf_duration, Duration::from_millis(1));
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
rf:
  device_driver: sim
  device_args: "srate=1.92e6,realtime=false"
phy:
  nof_workers: 6
  nof_antennas: 2
  carriers:
    - rf_port: 0
    - rf_port: 1
prach:
  enable: false
log:
  phy_level: debug
"#;
        let config = EnbConfig::parse(yaml, "yaml").unwrap();
        assert_eq!(config.rf.device_driver, "sim");
        assert_eq!(config.phy.nof_workers, 6);
        assert_eq!(config.phy.tx_offset, 4);
        assert_eq!(config.nof_channels(), 4);
        assert!(!config.phy_args().prach.enabled);
        assert_eq!(config.log.filter_directive(), "info,layers=debug,interfaces=info");
    }

    #[test]
    fn test_toml() {
        let toml = r#"
[phy]
nof_workers = 3
tti_modulus = 1024
time_alignment_us = 2.5

[metrics]
period_secs = 1
"#;
        let config = EnbConfig::parse(toml, "toml").unwrap();
        assert_eq!(config.phy.nof_workers, 3);
        assert_eq!(config.phy_args().tti_modulus, 1024);
        assert_eq!(config.phy.time_alignment_us, 2.5);
        assert_eq!(config.metrics.period_secs, 1);
        assert!(config.metrics.enable);
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(EnbConfig::parse("{}", "json").is_err());
        assert!(EnbConfig::from_file("/nonexistent/enb.yml").is_err());
    }

    #[test]
    fn test_invalid_pipeline_surfaces_from_phy_args() {
        let config = EnbConfig::parse("phy:\n  nof_workers: 0\n", "yml").unwrap();
        assert!(config.phy_args().validate().is_err());
    }
}
