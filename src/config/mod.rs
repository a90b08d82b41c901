//! Configuration for the MIDI/OSC HID bridge
//!
//! Handles loading, validating and saving YAML configuration files, plus
//! hot-reloading of an external script file.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::bridge::DEFAULT_ACTIVE_STATUS_DELAY;
use crate::device::DeviceDescriptor;

pub use watcher::ScriptWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub settings: BridgeSettings,
    #[serde(default)]
    pub midi: MidiConfig,
    /// Script loaded from disk instead of `bridge.script`; watched for changes.
    /// Relative paths resolve against the config file's directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Configuration record read by the bridge at construction
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Device path, `vendor:product:usagePage:usage` in hex
    pub identifier: String,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub autoreset: bool,
    #[serde(default)]
    pub script: String,
    #[serde(rename = "enableMIDI", default = "default_true")]
    pub enable_midi: bool,
    #[serde(rename = "enableOSC", default)]
    pub enable_osc: bool,
}

impl BridgeConfig {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            exclusive: false,
            autoreset: false,
            script: String::new(),
            enable_midi: true,
            enable_osc: false,
        }
    }
}

/// User-adjustable bridge settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BridgeSettings {
    #[serde(default = "default_name")]
    pub name: String,
    /// 0-15
    #[serde(default)]
    pub midi_channel: u8,
    #[serde(default = "default_osc_address")]
    pub osc_address: String,
    #[serde(default = "default_osc_port")]
    pub osc_port: u16,
    #[serde(default = "default_active_status_delay_ms")]
    pub active_status_delay_ms: u64,
}

impl BridgeSettings {
    pub fn active_status_delay(&self) -> Duration {
        Duration::from_millis(self.active_status_delay_ms)
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            midi_channel: 0,
            osc_address: default_osc_address(),
            osc_port: default_osc_port(),
            active_status_delay_ms: default_active_status_delay_ms(),
        }
    }
}

/// MIDI output configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Substring of the output port name; a virtual port named after the
    /// bridge is created when absent or unmatched (Unix only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_port: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        DeviceDescriptor::parse_path(&self.bridge.identifier)
            .context("Invalid bridge identifier")?;

        let settings = &self.settings;
        if settings.name.trim().is_empty() {
            anyhow::bail!("Bridge name cannot be empty");
        }
        if settings.midi_channel > 15 {
            anyhow::bail!(
                "Invalid MIDI channel {} (must be 0-15)",
                settings.midi_channel
            );
        }
        if self.bridge.enable_osc {
            if settings.osc_address.is_empty() {
                anyhow::bail!("OSC address cannot be empty when OSC is enabled");
            }
            if settings.osc_port == 0 {
                anyhow::bail!("OSC port cannot be 0 when OSC is enabled");
            }
        }
        if settings.active_status_delay_ms == 0 {
            anyhow::bail!("active_status_delay_ms must be greater than 0");
        }
        if let Some(port) = &self.midi.output_port {
            if port.trim().is_empty() {
                anyhow::bail!("MIDI output_port cannot be empty (omit it for a virtual port)");
            }
        }

        Ok(())
    }

    /// Resolve `script_file` against the directory of `config_path`
    pub fn script_path(&self, config_path: impl AsRef<Path>) -> Option<PathBuf> {
        let script_file = self.script_file.as_ref()?;
        if script_file.is_absolute() {
            return Some(script_file.clone());
        }
        let base = config_path.as_ref().parent().unwrap_or_else(|| Path::new(""));
        Some(base.join(script_file))
    }

    /// Script source: `script_file` contents when set, `bridge.script` otherwise
    pub async fn load_script(&self, config_path: impl AsRef<Path>) -> Result<String> {
        match self.script_path(config_path) {
            Some(path) => fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read script file: {}", path.display())),
            None => Ok(self.bridge.script.clone()),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_name() -> String { "MidiHID".to_string() }
fn default_osc_address() -> String { "127.0.0.1".to_string() }
fn default_osc_port() -> u16 { 9000 }
fn default_active_status_delay_ms() -> u64 { DEFAULT_ACTIVE_STATUS_DELAY.as_millis() as u64 }
fn default_log_level() -> String { "info".to_string() }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
bridge:
  identifier: "046d:c21d:0001:0005"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert!(config.bridge.enable_midi);
        assert!(!config.bridge.enable_osc);
        assert_eq!(config.settings, BridgeSettings::default());
        assert_eq!(config.settings.active_status_delay(), Duration::from_millis(100));
        assert!(config.midi.output_port.is_none());
    }

    #[test]
    fn test_bridge_record_field_names() {
        let yaml = r#"
bridge:
  identifier: "046d:c21d:0001:0005"
  exclusive: true
  autoreset: true
  script: "log('hi')"
  enableMIDI: false
  enableOSC: true
settings:
  name: "Pad"
  midi_channel: 9
  osc_address: "10.0.0.2"
  osc_port: 8000
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.bridge,
            BridgeConfig {
                identifier: "046d:c21d:0001:0005".to_string(),
                exclusive: true,
                autoreset: true,
                script: "log('hi')".to_string(),
                enable_midi: false,
                enable_osc: true,
            }
        );
        assert_eq!(config.settings.midi_channel, 9);

        let out = serde_yaml::to_string(&config.bridge).unwrap();
        assert!(out.contains("enableMIDI: false"));
        assert!(out.contains("enableOSC: true"));
    }

    #[test]
    fn test_validation_errors() {
        let bad_identifier = "bridge:\n  identifier: \"nope\"\n";
        assert!(AppConfig::from_yaml(bad_identifier).is_err());

        let bad_channel = format!("{}settings:\n  midi_channel: 16\n", MINIMAL);
        let err = AppConfig::from_yaml(&bad_channel).unwrap_err();
        assert!(err.to_string().contains("MIDI channel"));

        let bad_port = "bridge:\n  identifier: \"1:2:3:4\"\n  enableOSC: true\nsettings:\n  osc_port: 0\n";
        assert!(AppConfig::from_yaml(bad_port).is_err());
    }

    #[test]
    fn test_demo_config_is_valid() {
        let config = AppConfig::from_yaml(include_str!("../../demos/bridge.yaml")).unwrap();
        assert_eq!(config.settings.name, "Gamepad");
        assert_eq!(config.script_file, Some(PathBuf::from("gamepad.lua")));
        assert_eq!(config.midi.output_port.as_deref(), Some("IAC"));
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("bridge.yaml");

        let mut config = AppConfig::from_yaml(MINIMAL)?;
        config.settings.name = "Saved".to_string();
        config.save(&path).await?;

        let loaded = AppConfig::load(&path).await?;
        assert_eq!(loaded.settings.name, "Saved");
        assert_eq!(loaded.bridge, config.bridge);
        Ok(())
    }

    #[tokio::test]
    async fn test_script_file_resolves_relative_to_config() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("pad.lua"), "x = 1")?;
        let config_path = dir.path().join("bridge.yaml");

        let config = AppConfig::from_yaml(&format!("{}script_file: pad.lua\n", MINIMAL))?;
        assert_eq!(config.script_path(&config_path), Some(dir.path().join("pad.lua")));
        assert_eq!(config.load_script(&config_path).await?, "x = 1");

        let inline = AppConfig::from_yaml(MINIMAL)?;
        assert_eq!(inline.load_script(&config_path).await?, "");
        Ok(())
    }
}
