//! Application configuration.
//!
//! A TOML file describes the managed devices declaratively: each device
//! carries one or more counter watches, each watch a threshold and the rule
//! set to toggle. Growing the fabric is a config edit, not a code change.
//! All forwarding references are symbolic here; they are resolved to
//! numeric ids through the schema catalog when the controller starts.

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::logging::LoggingConfig;
use crate::session::DeviceSpec;
use crate::types::MacAddr;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// Control-loop timing knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerSettings {
    /// Averaging window in seconds: the pause between the two counter reads
    /// of one sample. Reaction latency is bounded below by this window.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Deadline for any single RPC against a device.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

fn default_window_secs() -> u64 {
    10
}

fn default_rpc_timeout_ms() -> u64 {
    2000
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

/// Paths to the compiled pipeline artifacts. Both must exist before the
/// loop starts when driving real hardware; the sim fabric needs neither.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// p4info text file from the pipeline compiler
    #[serde(default = "default_p4info")]
    pub p4info: String,
    /// Device pipeline config (e.g. BMv2 JSON)
    #[serde(default = "default_device_config")]
    pub device_config: String,
}

fn default_p4info() -> String {
    "build/firewall.p4.p4info.txt".to_string()
}

fn default_device_config() -> String {
    "build/firewall.json".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            p4info: default_p4info(),
            device_config: default_device_config(),
        }
    }
}

/// One managed device and its watches.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub name: String,
    pub address: String,
    pub device_id: u64,
    #[serde(default)]
    pub watches: Vec<WatchConfig>,
}

impl DeviceConfig {
    pub fn spec(&self) -> DeviceSpec {
        DeviceSpec {
            name: self.name.clone(),
            address: self.address.clone(),
            device_id: self.device_id,
        }
    }
}

/// One (counter, threshold, rule set) tuple on a device.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    /// Symbolic counter name, e.g. "MyIngress.icmp_counter"
    pub counter: String,
    /// Index within the counter
    #[serde(default)]
    pub index: u64,
    /// Packets per second above which the rule set is pulled
    pub threshold: f64,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Symbolic form of one forwarding rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleConfig {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_action")]
    pub action: String,
    pub dst_addr: Ipv4Addr,
    #[serde(default = "default_prefix_len")]
    pub prefix_len: u8,
    pub dst_mac: String,
    pub port: u32,
}

fn default_table() -> String {
    "MyIngress.ipv4_lpm".to_string()
}

fn default_action() -> String {
    "MyIngress.ipv4_forward".to_string()
}

fn default_prefix_len() -> u8 {
    32
}

impl AppConfig {
    /// Load from a TOML file; a missing file falls back to defaults.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("{path}: {e}")))
    }

    /// Reject configurations the controller cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.controller.window_secs == 0 {
            return Err(Error::Config("controller.window_secs must be > 0".into()));
        }
        if self.controller.rpc_timeout_ms == 0 {
            return Err(Error::Config("controller.rpc_timeout_ms must be > 0".into()));
        }
        if self.devices.is_empty() {
            return Err(Error::Config("at least one [[devices]] entry required".into()));
        }
        for device in &self.devices {
            if device.name.is_empty() {
                return Err(Error::Config("device name must not be empty".into()));
            }
            let dupes = self
                .devices
                .iter()
                .filter(|d| d.device_id == device.device_id)
                .count();
            if dupes > 1 {
                return Err(Error::Config(format!(
                    "duplicate device_id {} ({})",
                    device.device_id, device.name
                )));
            }
            if device.watches.is_empty() {
                return Err(Error::Config(format!(
                    "device {} has no watches",
                    device.name
                )));
            }
            for watch in &device.watches {
                if watch.threshold < 0.0 {
                    return Err(Error::Config(format!(
                        "device {}: threshold must be >= 0",
                        device.name
                    )));
                }
                for rule in &watch.rules {
                    if rule.prefix_len > 32 {
                        return Err(Error::Config(format!(
                            "device {}: prefix_len {} out of range",
                            device.name, rule.prefix_len
                        )));
                    }
                    rule.dst_mac.parse::<MacAddr>().map_err(Error::Config)?;
                }
            }
        }
        Ok(())
    }

    /// Fatal unless both pipeline artifacts exist on disk. Skipped in sim
    /// mode, where no pipeline is pushed to any device.
    pub fn ensure_pipeline_artifacts(&self) -> Result<()> {
        for path in [&self.pipeline.p4info, &self.pipeline.device_config] {
            if !Path::new(path).exists() {
                return Err(Error::MissingArtifact(path.clone()));
            }
        }
        Ok(())
    }

    /// A two-switch sample configuration mirroring the lab topology the
    /// sim fabric models.
    pub fn sample() -> Self {
        let rule = |dst: [u8; 4], mac: &str, port: u32| RuleConfig {
            table: default_table(),
            action: default_action(),
            dst_addr: Ipv4Addr::new(dst[0], dst[1], dst[2], dst[3]),
            prefix_len: 32,
            dst_mac: mac.to_string(),
            port,
        };
        let watch = |rules: Vec<RuleConfig>| WatchConfig {
            counter: "MyIngress.icmp_counter".to_string(),
            index: 1,
            threshold: 10.0,
            rules,
        };
        Self {
            controller: ControllerSettings::default(),
            logging: LoggingConfig::default(),
            pipeline: PipelineConfig::default(),
            devices: vec![
                DeviceConfig {
                    name: "s1".to_string(),
                    address: "127.0.0.1:50051".to_string(),
                    device_id: 0,
                    watches: vec![watch(vec![
                        rule([10, 0, 1, 1], "08:00:00:00:01:11", 1),
                        rule([10, 0, 2, 2], "08:00:00:00:02:22", 2),
                    ])],
                },
                DeviceConfig {
                    name: "s2".to_string(),
                    address: "127.0.0.1:50052".to_string(),
                    device_id: 1,
                    watches: vec![watch(vec![
                        rule([10, 0, 3, 3], "08:00:00:00:03:33", 1),
                        rule([10, 0, 4, 4], "08:00:00:00:04:44", 2),
                    ])],
                },
            ],
        }
    }
}
