//! RTK bridge configuration file parser.
//!
//! Loads a JSON document shaped like the original system's own `config.json`
//! (see `ntrip`/`serial` sections), deserialized straight into typed structs.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, RtkError};
use crate::nmea::SentenceType;

fn default_baudrate() -> u32 {
    115_200
}

fn default_keepalive_seconds() -> f64 {
    2.0
}

fn default_enabled_nmea_messages() -> Vec<SentenceType> {
    vec![SentenceType::Gga, SentenceType::Rmc, SentenceType::Gll]
}

/// `serial.*` section: GNSS receiver device.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
}

/// `ntrip.*` section: caster connection.
#[derive(Debug, Clone, Deserialize)]
pub struct NtripConfig {
    pub host: String,
    pub port: u16,
    pub mountpoint: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Use the synthetic sender instead of a real socket.
    #[serde(default)]
    pub mock: bool,
}

/// Full bridge configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RtkConfig {
    pub serial: Option<SerialConfig>,
    pub ntrip: Option<NtripConfig>,
    #[serde(default = "default_enabled_nmea_messages")]
    pub enabled_nmea_messages: Vec<SentenceType>,
    #[serde(default = "default_keepalive_seconds")]
    pub keepalive_seconds: f64,
}

/// Parse `path` as an RTK bridge JSON configuration file.
pub fn load_config(path: &Path) -> Result<RtkConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| RtkError::Config(format!("cannot read {}: {e}", path.display())))?;
    let cfg: RtkConfig = serde_json::from_str(&content)
        .map_err(|e| RtkError::Config(format!("cannot parse {}: {e}", path.display())))?;
    Ok(cfg)
}

/// Validate that the configuration is internally consistent before `start()`.
///
/// A config with neither `serial` nor `ntrip` is rejected: a bridge that
/// mediates nothing is a configuration mistake, not a valid idle state.
pub fn validate_config(cfg: &RtkConfig) -> Result<()> {
    if cfg.serial.is_none() && cfg.ntrip.is_none() {
        return Err(RtkError::Config(
            "at least one of `serial` or `ntrip` must be configured".into(),
        ));
    }
    if let Some(ntrip) = &cfg.ntrip {
        if ntrip.mountpoint.is_empty() && !ntrip.mock {
            return Err(RtkError::Config("ntrip.mountpoint is required".into()));
        }
    }
    if let Some(serial) = &cfg.serial {
        if serial.port.is_empty() {
            return Err(RtkError::Config("serial.port is required".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_when_omitted() {
        let json = r#"{ "serial": { "port": "/dev/ttyUSB0" } }"#;
        let cfg: RtkConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.serial.unwrap().baudrate, 115_200);
        assert!(cfg.ntrip.is_none());
        assert_eq!(cfg.keepalive_seconds, 2.0);
        assert_eq!(
            cfg.enabled_nmea_messages,
            vec![SentenceType::Gga, SentenceType::Rmc, SentenceType::Gll]
        );
    }

    #[test]
    fn empty_config_fails_validation() {
        let cfg: RtkConfig = serde_json::from_str("{}").unwrap();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn ntrip_without_mountpoint_fails_validation() {
        let json = r#"{ "ntrip": { "host": "caster.example.com", "port": 2101, "mountpoint": "" } }"#;
        let cfg: RtkConfig = serde_json::from_str(json).unwrap();
        assert!(validate_config(&cfg).is_err());
    }
}
