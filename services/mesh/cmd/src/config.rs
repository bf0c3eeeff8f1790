//! Configuration handling for the simulator.
//!
//! Settings come from a YAML file, then `RFMESH_*` environment variables, then
//! command line flags. A missing or unparsable file falls back to defaults.

use anyhow::{bail, Context, Result};
use mesh_directory::DirectoryConfig;
use mesh_radio::{RadioConfig, SimMediumConfig};
use mesh_storage::StorageMode;
use mesh_wire::{LogicalAddress, NodeIdentity};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Largest payload a node may be configured to send
const MAX_PAYLOAD_SIZE: usize = 1514;

/// One simulated node besides the master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Mesh identity (1 to 254)
    pub identity: NodeIdentity,
    /// Octal address reserved for this node on the master, e.g. "02"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_address: Option<String>,
    /// Identities this node cannot hear (0 is the master)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub out_of_range: Vec<NodeIdentity>,
}

impl NodeSpec {
    /// Parsed static address
    pub fn static_address(&self) -> Result<Option<LogicalAddress>> {
        self.static_address
            .as_deref()
            .map(|s| {
                s.parse::<LogicalAddress>()
                    .with_context(|| format!("invalid static address {:?} for {}", s, self.identity))
            })
            .transpose()
    }
}

/// Simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Interval between update rounds
    #[serde(with = "humantime_serde")]
    pub tick: Duration,
    /// Stop after this long; run until interrupted when absent
    #[serde(with = "humantime_serde_opt")]
    pub duration: Option<Duration>,
    /// Interval between messages from each assigned node
    #[serde(with = "humantime_serde")]
    pub send_interval: Duration,
    /// Bytes per message; above one frame the message is fragmented
    pub payload_size: usize,
    /// Shared medium
    pub medium: SimMediumConfig,
    /// Transceiver settings for every radio
    pub radio: RadioConfig,
    /// Master allocation limits
    pub directory: DirectoryConfig,
    /// Master directory persistence
    pub storage: StorageMode,
    /// Nodes besides the master
    pub nodes: Vec<NodeSpec>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let id = |raw| NodeIdentity::new(raw).unwrap_or(NodeIdentity::MASTER);
        Self {
            tick: Duration::from_millis(10),
            duration: None,
            send_interval: Duration::from_secs(1),
            payload_size: 16,
            medium: SimMediumConfig::default(),
            radio: RadioConfig::default(),
            directory: DirectoryConfig::default(),
            storage: StorageMode::default(),
            nodes: vec![
                NodeSpec {
                    identity: id(1),
                    static_address: None,
                    out_of_range: Vec::new(),
                },
                NodeSpec {
                    identity: id(2),
                    static_address: None,
                    out_of_range: Vec::new(),
                },
                // Reaches the master only through another node
                NodeSpec {
                    identity: id(3),
                    static_address: None,
                    out_of_range: vec![NodeIdentity::MASTER],
                },
            ],
        }
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

mod humantime_serde_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::humantime_serde::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

impl SimulationConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<SimulationConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({}), using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides();

        info!(
            "Simulation: {} nodes, tick={}, send_interval={}, payload={} bytes, loss={}",
            config.nodes.len(),
            humantime::format_duration(config.tick),
            humantime::format_duration(config.send_interval),
            config.payload_size,
            config.medium.loss
        );
        Ok(config)
    }

    /// Apply `RFMESH_*` overrides from the process environment
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `RFMESH_*` overrides from `lookup`; malformed values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("RFMESH_TICK") {
            match humantime::parse_duration(&value) {
                Ok(tick) => {
                    self.tick = tick;
                    info!("Tick overridden by environment: {}", value);
                }
                Err(e) => warn!("Ignoring RFMESH_TICK={}: {}", value, e),
            }
        }

        if let Some(value) = lookup("RFMESH_DURATION") {
            match humantime::parse_duration(&value) {
                Ok(duration) => {
                    self.duration = Some(duration);
                    info!("Duration overridden by environment: {}", value);
                }
                Err(e) => warn!("Ignoring RFMESH_DURATION={}: {}", value, e),
            }
        }

        if let Some(value) = lookup("RFMESH_SEND_INTERVAL") {
            match humantime::parse_duration(&value) {
                Ok(interval) => {
                    self.send_interval = interval;
                    info!("Send interval overridden by environment: {}", value);
                }
                Err(e) => warn!("Ignoring RFMESH_SEND_INTERVAL={}: {}", value, e),
            }
        }

        if let Some(value) = lookup("RFMESH_PAYLOAD_SIZE") {
            match value.parse::<usize>() {
                Ok(size) => {
                    self.payload_size = size;
                    info!("Payload size overridden by environment: {}", size);
                }
                Err(e) => warn!("Ignoring RFMESH_PAYLOAD_SIZE={}: {}", value, e),
            }
        }

        if let Some(value) = lookup("RFMESH_LOSS") {
            match value.parse::<f64>() {
                Ok(loss) => {
                    self.medium.loss = loss;
                    info!("Loss overridden by environment: {}", loss);
                }
                Err(e) => warn!("Ignoring RFMESH_LOSS={}: {}", value, e),
            }
        }

        if let Some(value) = lookup("RFMESH_SEED") {
            match value.parse::<u64>() {
                Ok(seed) => {
                    self.medium.seed = seed;
                    info!("Seed overridden by environment: {}", seed);
                }
                Err(e) => warn!("Ignoring RFMESH_SEED={}: {}", value, e),
            }
        }

        if let Some(value) = lookup("RFMESH_CHANNEL") {
            match value.parse::<u8>() {
                Ok(channel) => {
                    self.radio.channel = channel;
                    info!("Channel overridden by environment: {}", channel);
                }
                Err(e) => warn!("Ignoring RFMESH_CHANNEL={}: {}", value, e),
            }
        }
    }

    /// Reject settings the simulation cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tick.is_zero() {
            bail!("tick must be positive");
        }
        if self.payload_size > MAX_PAYLOAD_SIZE {
            bail!(
                "payload_size {} exceeds maximum {}",
                self.payload_size,
                MAX_PAYLOAD_SIZE
            );
        }
        if !(0.0..=1.0).contains(&self.medium.loss) {
            bail!("loss {} outside 0.0..=1.0", self.medium.loss);
        }
        self.radio
            .validate()
            .map_err(|e| anyhow::anyhow!("radio: {}", e))?;

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.identity.is_master() {
                bail!("identity 0 is reserved for the master");
            }
            if !seen.insert(node.identity) {
                bail!("duplicate node identity {}", node.identity);
            }
            node.static_address()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = SimulationConfig::default();
        assert_eq!(config.tick, Duration::from_millis(10));
        assert_eq!(config.nodes.len(), 3);
        assert_eq!(config.nodes[2].out_of_range, vec![NodeIdentity::MASTER]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
tick: 5ms
duration: 2m
send_interval: 500ms
payload_size: 64
medium:
  loss: 0.1
  seed: 42
radio:
  channel: 76
directory:
  max_depth: 2
  entry_timeout: 30
storage:
  mode: file
  path: /tmp/rf-mesh/directory.json
nodes:
  - identity: 7
    static_address: "02"
  - identity: 8
    out_of_range: [0]
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = SimulationConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.tick, Duration::from_millis(5));
        assert_eq!(config.duration, Some(Duration::from_secs(120)));
        assert_eq!(config.payload_size, 64);
        assert_eq!(config.medium.seed, 42);
        assert_eq!(config.medium.rx_capacity, 64);
        assert_eq!(config.radio.channel, 76);
        assert_eq!(config.directory.max_depth, 2);
        assert_eq!(config.directory.entry_timeout, Duration::from_secs(30));
        assert!(matches!(config.storage, StorageMode::File { .. }));
        assert_eq!(
            config.nodes[0].static_address().unwrap(),
            Some("02".parse().unwrap())
        );
        assert_eq!(config.nodes[1].out_of_range, vec![NodeIdentity::MASTER]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SimulationConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.nodes, SimulationConfig::default().nodes);
    }

    #[test]
    fn test_unparsable_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"tick: [not a duration").unwrap();
        let config = SimulationConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.tick, SimulationConfig::default().tick);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("RFMESH_TICK", "20ms"),
            ("RFMESH_DURATION", "10s"),
            ("RFMESH_PAYLOAD_SIZE", "100"),
            ("RFMESH_LOSS", "0.25"),
            ("RFMESH_SEED", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = SimulationConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.tick, Duration::from_millis(20));
        assert_eq!(config.duration, Some(Duration::from_secs(10)));
        assert_eq!(config.payload_size, 100);
        assert_eq!(config.medium.loss, 0.25);
        assert_eq!(config.medium.seed, 0);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = SimulationConfig::default();
        config.nodes.push(config.nodes[0].clone());
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.nodes[0].static_address = Some("09".to_string());
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.payload_size = 4096;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.radio.channel = 200;
        assert!(config.validate().is_err());
    }
}
