//! # Configuration
//!
//! TOML configuration for receivers, generators and their stream addresses.
//! Every section is optional; an empty document gives the defaults.

use std::net::SocketAddr;

use serde::Deserialize;

use crate::addr;
use crate::error::FecError;
use crate::generator::{validate_geometry, FecGenerator};
use crate::receiver::{DelayUnits, ReceiverConfig};

pub const CONFIG_VERSION: u32 = 1;

// ─── Input ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FecConfigInput {
    pub version: u32,
    pub receiver: ReceiverConfigInput,
    pub generator: Option<GeneratorConfigInput>,
    pub network: Option<NetworkConfigInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReceiverConfigInput {
    pub delay: Option<usize>,
    pub delay_units: Option<DelayUnits>,
    pub fec_horizon: Option<usize>,
    pub require_mp2t: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeneratorConfigInput {
    pub columns: Option<u8>,
    pub rows: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfigInput {
    pub media: String,
    pub column: Option<String>,
    pub row: Option<String>,
}

// ─── Resolved ───────────────────────────────────────────────────────────────

/// Matrix geometry used by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// L
    pub columns: u8,
    /// D
    pub rows: u8,
}

impl GeneratorConfig {
    pub fn build(&self) -> Result<FecGenerator, FecError> {
        FecGenerator::new(self.columns, self.rows)
    }
}

/// Media, column FEC and row FEC stream addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamAddresses {
    pub media: SocketAddr,
    pub column: SocketAddr,
    pub row: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct FecConfig {
    pub version: u32,
    pub receiver: ReceiverConfig,
    pub generator: Option<GeneratorConfig>,
    pub network: Option<StreamAddresses>,
}

impl Default for FecConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            receiver: ReceiverConfig::default(),
            generator: None,
            network: None,
        }
    }
}

fn parse_addr(key: &str, value: &str) -> Result<SocketAddr, FecError> {
    value
        .trim()
        .parse()
        .map_err(|e| FecError::Config(format!("network.{key} = {value:?}: {e}")))
}

fn stream_addr(
    key: &str,
    explicit: Option<String>,
    derived: Option<SocketAddr>,
) -> Result<SocketAddr, FecError> {
    match explicit {
        Some(value) => parse_addr(key, &value),
        None => derived.ok_or_else(|| {
            FecError::Config(format!(
                "network.{key} must be set when the media address is not IPv4 multicast"
            ))
        }),
    }
}

impl FecConfigInput {
    pub fn resolve(self) -> Result<FecConfig, FecError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(FecError::Config(format!(
                "Unsupported config version {}",
                version
            )));
        }

        let defaults = ReceiverConfig::default();
        let receiver = ReceiverConfig {
            delay: self.receiver.delay.unwrap_or(defaults.delay),
            delay_units: self.receiver.delay_units.unwrap_or(defaults.delay_units),
            fec_horizon: self.receiver.fec_horizon.unwrap_or(defaults.fec_horizon),
            require_mp2t: self.receiver.require_mp2t.unwrap_or(defaults.require_mp2t),
        };

        let generator = match self.generator {
            Some(input) => {
                let (Some(columns), Some(rows)) = (input.columns, input.rows) else {
                    return Err(FecError::Config(
                        "generator.columns and generator.rows are both required".to_string(),
                    ));
                };
                validate_geometry(columns, rows)?;
                Some(GeneratorConfig { columns, rows })
            }
            None => None,
        };

        let network = match self.network {
            Some(input) => {
                let media = parse_addr("media", &input.media)?;
                Some(StreamAddresses {
                    media,
                    column: stream_addr("column", input.column, addr::column_address(media))?,
                    row: stream_addr("row", input.row, addr::row_address(media))?,
                })
            }
            None => None,
        };

        Ok(FecConfig {
            version,
            receiver,
            generator,
            network,
        })
    }
}

impl FecConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, FecError> {
        if input.trim().is_empty() {
            return Ok(FecConfig::default());
        }
        let parsed: FecConfigInput = toml::from_str(input)
            .map_err(|e| FecError::Config(format!("Invalid config TOML: {}", e)))?;
        parsed.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_gives_defaults() {
        let cfg = FecConfig::from_toml_str("  \n").unwrap();
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert_eq!(cfg.receiver.delay, 100);
        assert_eq!(cfg.receiver.fec_horizon, 10);
        assert_eq!(cfg.receiver.delay_units, DelayUnits::Packets);
        assert!(cfg.receiver.require_mp2t);
        assert!(cfg.generator.is_none());
        assert!(cfg.network.is_none());
    }

    #[test]
    fn parse_toml_config_full() {
        let toml = r#"
            version = 1

            [receiver]
            delay = 40
            delay_units = "packets"
            fec_horizon = 4
            require_mp2t = false

            [generator]
            columns = 4
            rows = 5

            [network]
            media = "239.232.0.222:5004"
        "#;

        let cfg = FecConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.receiver.delay, 40);
        assert_eq!(cfg.receiver.fec_horizon, 4);
        assert!(!cfg.receiver.require_mp2t);
        assert_eq!(
            cfg.generator,
            Some(GeneratorConfig {
                columns: 4,
                rows: 5
            })
        );
        assert_eq!(cfg.generator.unwrap().build().unwrap().matrix(), (4, 5));

        let net = cfg.network.unwrap();
        assert_eq!(net.column, "239.232.0.223:5006".parse::<SocketAddr>().unwrap());
        assert_eq!(net.row, "239.232.0.224:5008".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn seconds_are_accepted_in_config() {
        let cfg = FecConfig::from_toml_str("[receiver]\ndelay_units = \"seconds\"").unwrap();
        assert_eq!(cfg.receiver.delay_units, DelayUnits::Seconds);
    }

    #[test]
    fn unicast_media_needs_explicit_fec_addresses() {
        let toml = r#"
            [network]
            media = "10.0.0.1:5004"
        "#;
        assert!(matches!(
            FecConfig::from_toml_str(toml),
            Err(FecError::Config(_))
        ));

        let toml = r#"
            [network]
            media = "10.0.0.1:5004"
            column = "10.0.0.1:5006"
            row = "10.0.0.1:5008"
        "#;
        let net = FecConfig::from_toml_str(toml).unwrap().network.unwrap();
        assert_eq!(net.row.port(), 5008);
    }

    #[test]
    fn rejects_bad_input() {
        let err = FecConfig::from_toml_str("version = 2").unwrap_err();
        assert_eq!(err.to_string(), "invalid config: Unsupported config version 2");

        assert!(FecConfig::from_toml_str("[receiver]\ndelay = \"many\"").is_err());
        assert!(FecConfig::from_toml_str("[receiver]\ndelay_units = \"frames\"").is_err());
        assert!(FecConfig::from_toml_str("[generator]\ncolumns = 4").is_err());
        assert!(matches!(
            FecConfig::from_toml_str("[generator]\ncolumns = 20\nrows = 20"),
            Err(FecError::Geometry { l: 20, d: 20 })
        ));
        assert!(FecConfig::from_toml_str("[network]\nmedia = \"nowhere\"").is_err());
    }
}
