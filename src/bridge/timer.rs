//! Background thread decaying `Active` back to `Idle`

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use super::status::StatusTracker;

pub struct DecayTimer {
    tracker: Arc<StatusTracker>,
    handle: Option<JoinHandle<()>>,
}

impl DecayTimer {
    pub fn spawn(name: &str, tracker: Arc<StatusTracker>) -> std::io::Result<Self> {
        let worker = tracker.clone();
        let handle = thread::Builder::new()
            .name(format!("decay-{}", name))
            .spawn(move || worker.run_timer())?;
        debug!("Decay timer started for '{}'", name);

        Ok(Self {
            tracker,
            handle: Some(handle),
        })
    }
}

impl Drop for DecayTimer {
    fn drop(&mut self) {
        self.tracker.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Decay timer thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::clock::SystemClock;
    use crate::bridge::status::{BridgeStatus, StatusMachine};
    use crossbeam::channel;
    use std::time::Duration;

    #[test]
    fn test_timer_decays_to_idle() {
        let machine = StatusMachine::new(true, true, Duration::from_millis(20));
        let tracker = Arc::new(StatusTracker::new(machine, Arc::new(SystemClock)));
        let (tx, rx) = channel::unbounded();
        tracker.subscribe(Arc::new(move |status: BridgeStatus| {
            let _ = tx.send(status);
        }));

        let _timer = DecayTimer::spawn("test", tracker.clone()).unwrap();
        tracker.apply(|m, now| m.activity(now));

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), BridgeStatus::Active);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), BridgeStatus::Idle);
        assert_eq!(tracker.status(), BridgeStatus::Idle);
    }

    #[test]
    fn test_drop_joins_thread() {
        let machine = StatusMachine::new(true, true, Duration::from_secs(60));
        let tracker = Arc::new(StatusTracker::new(machine, Arc::new(SystemClock)));
        let timer = DecayTimer::spawn("drop", tracker.clone()).unwrap();
        tracker.apply(|m, now| m.activity(now));

        drop(timer);
        assert_eq!(Arc::strong_count(&tracker), 1);
    }
}
