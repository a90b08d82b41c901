//! HID device event source contract
//!
//! The bridge does not open HID devices itself. Whatever delivers element
//! changes (an OS backend, a replay file, a test) drives a [`DeviceDelegate`],
//! possibly from its own thread, and may expose an [`ElementSource`] for
//! on-demand reads.

pub mod replay;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BridgeError, Result};

/// Separator between the fields of a device path
pub const PATH_SEPARATOR: char = ':';

/// Extra per-element attributes (usage, name, ...) passed through to scripts
pub type ElementInfo = BTreeMap<String, serde_json::Value>;

/// Identifying attributes of a HID device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub primary_usage_page: u16,
    pub primary_usage: u16,
}

impl DeviceDescriptor {
    pub fn new(vendor_id: u16, product_id: u16, primary_usage_page: u16, primary_usage: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            primary_usage_page,
            primary_usage,
        }
    }

    /// Parse a `vendor:product:usagePage:usage` path (hex, optional `0x`)
    pub fn parse_path(path: &str) -> Result<Self> {
        let unavailable = |reason: String| BridgeError::DeviceUnavailable {
            path: path.to_string(),
            reason,
        };

        let fields: Vec<&str> = path.split(PATH_SEPARATOR).map(str::trim).collect();
        if fields.len() != 4 {
            return Err(unavailable(format!(
                "expected 4 '{}'-separated fields, found {}",
                PATH_SEPARATOR,
                fields.len()
            )));
        }

        let mut ids = [0u16; 4];
        for (slot, field) in ids.iter_mut().zip(&fields) {
            let digits = field
                .strip_prefix("0x")
                .or_else(|| field.strip_prefix("0X"))
                .unwrap_or(field);
            *slot = u16::from_str_radix(digits, 16)
                .map_err(|e| unavailable(format!("invalid field '{}': {}", field, e)))?;
        }

        Ok(Self::new(ids[0], ids[1], ids[2], ids[3]))
    }

    /// Device path string, the inverse of [`DeviceDescriptor::parse_path`]
    pub fn path(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}{sep}{:04x}{sep}{:04x}{sep}{:04x}",
            self.vendor_id,
            self.product_id,
            self.primary_usage_page,
            self.primary_usage,
            sep = PATH_SEPARATOR
        )
    }
}

/// One physical control change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementUpdate {
    /// Stable identifier of the control for the device's lifetime
    pub cookie: u64,
    pub value: i32,
    pub min: i32,
    pub max: i32,
    #[serde(default)]
    pub info: ElementInfo,
}

impl ElementUpdate {
    pub fn new(cookie: u64, value: i32, min: i32, max: i32) -> Self {
        Self {
            cookie,
            value,
            min,
            max,
            info: ElementInfo::new(),
        }
    }

    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }
}

/// Current state of an element as read outside the update callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementReading {
    pub value: i32,
    pub min: i32,
    pub max: i32,
}

/// Receiver of device notifications
///
/// Calls may arrive on any thread. Implementations must not assume the
/// caller's thread and must return promptly.
pub trait DeviceDelegate: Send + Sync {
    fn on_connect(&self);
    fn on_disconnect(&self);
    fn on_element_update(&self, update: ElementUpdate);
}

/// On-demand element reads from a connected device
pub trait ElementSource: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Read the current value of an element; `None` when unknown or offline
    fn fetch_element(&self, cookie: u64) -> Option<ElementReading>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_path() {
        let desc = DeviceDescriptor::parse_path("046d:c21d:0001:0005").unwrap();
        assert_eq!(desc, DeviceDescriptor::new(0x046d, 0xc21d, 0x0001, 0x0005));
        assert_eq!(desc.path(), "046d:c21d:0001:0005");
    }

    #[test]
    fn test_parse_path_with_prefix_and_spaces() {
        let desc = DeviceDescriptor::parse_path("0x46D: 0xC21D :1:5").unwrap();
        assert_eq!(desc, DeviceDescriptor::new(0x046d, 0xc21d, 1, 5));
    }

    #[test]
    fn test_parse_path_wrong_field_count() {
        let err = DeviceDescriptor::parse_path("046d:c21d").unwrap_err();
        assert!(matches!(err, BridgeError::DeviceUnavailable { .. }));
    }

    #[test]
    fn test_parse_path_bad_hex() {
        let err = DeviceDescriptor::parse_path("zzzz:c21d:1:5").unwrap_err();
        match err {
            BridgeError::DeviceUnavailable { path, reason } => {
                assert_eq!(path, "zzzz:c21d:1:5");
                assert!(reason.contains("zzzz"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_element_update_deserializes_without_info() {
        let update: ElementUpdate =
            serde_json::from_value(json!({"cookie": 7, "value": 3, "min": 0, "max": 255})).unwrap();
        assert_eq!(update, ElementUpdate::new(7, 3, 0, 255));
    }
}
