//! Bounded buffer of script `log()` output

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Lines kept per bridge
pub const SCRIPT_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptLogLine {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

/// Shared handle to a bridge's script log
#[derive(Clone, Default)]
pub struct ScriptLog {
    lines: Arc<Mutex<VecDeque<ScriptLogLine>>>,
}

impl ScriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: impl Into<String>) {
        let mut lines = self.lines.lock();
        if lines.len() == SCRIPT_LOG_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(ScriptLogLine {
            timestamp: Local::now(),
            message: message.into(),
        });
    }

    pub fn lines(&self) -> Vec<ScriptLogLine> {
        self.lines.lock().iter().cloned().collect()
    }

    /// Messages only, oldest first
    pub fn messages(&self) -> Vec<String> {
        self.lines.lock().iter().map(|l| l.message.clone()).collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}
