//! Script file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Watches a script file and yields its new contents after each change
pub struct ScriptWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<String>,
}

impl ScriptWatcher {
    /// Start watching `script_path`; must be called inside a Tokio runtime
    pub fn new(script_path: PathBuf) -> Result<Self> {
        let (tx, rx) = mpsc::channel(10);

        let path = script_path.clone();

        // notify callbacks run on their own OS thread, not in Tokio context
        let runtime_handle = tokio::runtime::Handle::current();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        debug!("Script file modified: {:?}", event.paths);

                        let path = path.clone();
                        let tx = tx.clone();

                        runtime_handle.spawn(async move {
                            // Debounce: wait a bit for file writes to complete
                            tokio::time::sleep(Duration::from_millis(100)).await;

                            match tokio::fs::read_to_string(&path).await {
                                Ok(source) => {
                                    if let Err(e) = tx.send(source).await {
                                        error!("Failed to send script update: {}", e);
                                    }
                                }
                                Err(e) => {
                                    warn!("Failed to read script (keeping old script): {}", e);
                                }
                            }
                        });
                    }
                }
                Err(e) => {
                    error!("Watch error: {}", e);
                }
            }
        })?;

        watcher
            .watch(&script_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch script file: {}", script_path.display()))?;

        info!("Script file watcher started for: {}", script_path.display());

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next script contents
    /// Returns None if the watcher has been closed
    pub async fn next_source(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}
