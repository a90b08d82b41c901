//! Error types for the bridge
//!
//! Library code returns [`BridgeError`]; the binary and configuration loading
//! wrap it in `anyhow` with context.

use thiserror::Error;

/// Errors surfaced by the bridge and its collaborators
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BridgeError {
    /// Script source failed to compile or its top-level chunk raised.
    /// The previously loaded script stays active.
    #[error("script compile error{}: {message}", line.map(|l| format!(" (line {})", l)).unwrap_or_default())]
    ScriptCompile { line: Option<u32>, message: String },

    /// A fault raised while a script handler was running
    #[error("script runtime error: {message}")]
    ScriptRuntime { message: String },

    /// A MIDI or OSC send could not reach its transport
    #[error("{target} transport error: {message}")]
    Transport { target: &'static str, message: String },

    /// The device path or vendor/product lookup failed
    #[error("device '{path}' unavailable: {reason}")]
    DeviceUnavailable { path: String, reason: String },

    /// OSC address patterns must start with '/'
    #[error("invalid OSC address '{0}' (must start with '/')")]
    InvalidOscAddress(String),

    /// Malformed OSC packet
    #[error("OSC decode error: {0}")]
    OscDecode(String),

    /// Bad initial configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    pub(crate) fn transport(target: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            target,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_display_with_line() {
        let err = BridgeError::ScriptCompile {
            line: Some(3),
            message: "unexpected symbol".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "script compile error (line 3): unexpected symbol"
        );
    }

    #[test]
    fn test_compile_error_display_without_line() {
        let err = BridgeError::ScriptCompile {
            line: None,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "script compile error: boom");
    }

    #[test]
    fn test_transport_error_display() {
        let err = BridgeError::transport("osc", "connection refused");
        assert_eq!(err.to_string(), "osc transport error: connection refused");
    }
}
