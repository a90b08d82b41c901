//! Replays recorded device events into a delegate
//!
//! Each input line is one JSON record:
//!
//! ```text
//! {"event":"connect"}
//! {"event":"update","cookie":12,"value":80,"min":0,"max":255,"info":{"usage":48}}
//! {"event":"wait","ms":250}
//! {"event":"disconnect"}
//! ```
//!
//! Events are delivered from a dedicated thread, the same way a HID backend
//! would call in from its own run loop.

use crossbeam::channel::{self, Receiver};
use serde::Deserialize;
use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DeviceDelegate, ElementUpdate};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ReplayEvent {
    Connect,
    Disconnect,
    Update(ElementUpdate),
    Wait { ms: u64 },
}

/// Counters reported when a replay finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub delivered: usize,
    pub skipped: usize,
}

pub struct ReplaySource;

impl ReplaySource {
    /// Parse a single line; blank lines and `#` comments yield `None`
    pub fn parse_line(line: &str) -> Option<Result<ReplayEvent, serde_json::Error>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        Some(serde_json::from_str(line))
    }

    /// Deliver every event in `reader` to `delegate` on the calling thread
    pub fn run<R: BufRead>(reader: R, delegate: &dyn DeviceDelegate) -> ReplaySummary {
        let mut summary = ReplaySummary::default();

        for (idx, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Replay input error at line {}: {}", idx + 1, e);
                    break;
                }
            };

            match Self::parse_line(&line) {
                None => continue,
                Some(Err(e)) => {
                    warn!("Skipping replay line {}: {}", idx + 1, e);
                    summary.skipped += 1;
                }
                Some(Ok(event)) => {
                    debug!("Replay: {:?}", event);
                    match event {
                        ReplayEvent::Connect => delegate.on_connect(),
                        ReplayEvent::Disconnect => delegate.on_disconnect(),
                        ReplayEvent::Update(update) => delegate.on_element_update(update),
                        ReplayEvent::Wait { ms } => thread::sleep(Duration::from_millis(ms)),
                    }
                    summary.delivered += 1;
                }
            }
        }

        summary
    }

    /// Deliver events from a background thread
    ///
    /// The returned receiver yields the summary once the input is exhausted.
    pub fn spawn<R>(reader: R, delegate: Arc<dyn DeviceDelegate>) -> std::io::Result<Receiver<ReplaySummary>>
    where
        R: BufRead + Send + 'static,
    {
        let (done_tx, done_rx) = channel::bounded(1);

        thread::Builder::new()
            .name("device-replay".to_string())
            .spawn(move || {
                let summary = Self::run(reader, delegate.as_ref());
                info!(
                    "Replay finished: {} events delivered, {} skipped",
                    summary.delivered, summary.skipped
                );
                let _ = done_tx.send(summary);
            })?;

        Ok(done_rx)
    }
}
