//! Event bridge between a HID device and the script's MIDI/OSC output
//!
//! The bridge receives [`DeviceDelegate`] callbacks from any thread,
//! serializes them into the [`ScriptEnvironment`] under the script lock and
//! tracks activity through a [`BridgeStatus`] state machine.
//!
//! Lock order is script lock, then status lock. The decay timer only takes
//! the status lock, and status reads take neither.

pub mod cache;
pub mod clock;
pub mod status;
pub mod timer;


use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, BridgeSettings};
use crate::device::{DeviceDelegate, DeviceDescriptor, ElementSource, ElementUpdate};
use crate::error::{BridgeError, Result};
use crate::midi::{MidiSink, MidiTransport};
use crate::osc::OscSink;
use crate::script::api::HostContext;
use crate::script::{ScriptEnvironment, ScriptLog, ScriptLogLine};

pub use cache::{CachedElement, ElementCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use status::{BridgeStatus, StatusCallback, StatusMachine, StatusTracker, DEFAULT_ACTIVE_STATUS_DELAY};
use timer::DecayTimer;

/// Everything needed to build a bridge
pub struct BridgeOptions {
    pub config: BridgeConfig,
    pub settings: BridgeSettings,
    /// Required when `config.enable_midi` is set
    pub midi_transport: Option<Arc<dyn MidiTransport>>,
    /// Backs `getElementValue` for cookies not seen yet
    pub element_source: Option<Arc<dyn ElementSource>>,
    pub enabled: bool,
    /// Whether the device is already connected
    pub connected: bool,
}

impl BridgeOptions {
    pub fn new(config: BridgeConfig, settings: BridgeSettings) -> Self {
        Self {
            config,
            settings,
            midi_transport: None,
            element_source: None,
            enabled: false,
            connected: false,
        }
    }
}

pub struct BridgeController {
    device: DeviceDescriptor,
    exclusive: bool,
    settings: Mutex<BridgeSettings>,
    auto_reset: AtomicBool,
    midi: Option<Arc<MidiSink>>,
    osc: Option<Arc<OscSink>>,
    cache: Arc<ElementCache>,
    log: ScriptLog,
    last_error: Arc<Mutex<Option<BridgeError>>>,
    script: Mutex<ScriptEnvironment>,
    status: Arc<StatusTracker>,
    _timer: Option<DecayTimer>,
}

impl BridgeController {
    /// Build a bridge on the system clock with a decay timer thread
    pub fn new(options: BridgeOptions) -> Result<Self> {
        let mut bridge = Self::build(options, Arc::new(SystemClock))?;
        let timer = DecayTimer::spawn(&bridge.name(), bridge.status.clone())
            .map_err(|e| BridgeError::Config(format!("failed to start decay timer: {}", e)))?;
        bridge._timer = Some(timer);
        Ok(bridge)
    }

    /// Build a bridge on a caller-supplied clock
    ///
    /// No timer thread is started; call [`BridgeController::tick`] to decay
    /// `Active` status.
    pub fn with_clock(options: BridgeOptions, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::build(options, clock)
    }

    fn build(options: BridgeOptions, clock: Arc<dyn Clock>) -> Result<Self> {
        let BridgeOptions {
            config,
            settings,
            midi_transport,
            element_source,
            enabled,
            connected,
        } = options;

        let device = DeviceDescriptor::parse_path(&config.identifier)?;
        if settings.midi_channel > 15 {
            return Err(BridgeError::Config(format!(
                "MIDI channel {} out of range 0-15",
                settings.midi_channel
            )));
        }

        let midi = match (config.enable_midi, midi_transport) {
            (true, Some(transport)) => {
                let sink = MidiSink::new(transport);
                sink.set_channel(settings.midi_channel);
                Some(Arc::new(sink))
            }
            (true, None) => {
                return Err(BridgeError::Config(
                    "MIDI is enabled but no MIDI output was provided".to_string(),
                ))
            }
            (false, _) => None,
        };

        let osc = if config.enable_osc {
            Some(Arc::new(OscSink::new(
                settings.osc_address.clone(),
                settings.osc_port,
            )?))
        } else {
            None
        };

        let cache = Arc::new(ElementCache::new());
        let log = ScriptLog::new();
        let last_error: Arc<Mutex<Option<BridgeError>>> = Arc::new(Mutex::new(None));

        let reporter_slot = last_error.clone();
        let host = HostContext {
            midi: midi.clone(),
            osc: osc.clone(),
            cache: cache.clone(),
            source: element_source,
            log: log.clone(),
            report: Arc::new(move |err: BridgeError| *reporter_slot.lock() = Some(err)),
        };

        let machine = StatusMachine::new(enabled, connected, settings.active_status_delay());
        let status = Arc::new(StatusTracker::new(machine, clock));

        let bridge = Self {
            device,
            exclusive: config.exclusive,
            settings: Mutex::new(settings),
            auto_reset: AtomicBool::new(config.autoreset),
            midi,
            osc,
            cache,
            log,
            last_error,
            script: Mutex::new(ScriptEnvironment::new(host)),
            status,
            _timer: None,
        };

        // Start from an empty VM so chunks and actions can run without a script
        bridge.script.lock().load("")?;
        if !config.script.is_empty() {
            // A broken initial script is not fatal; it shows up as last error
            let _ = bridge.set_source(&config.script);
        }

        info!(
            "Bridge '{}' created for {} (midi: {}, osc: {})",
            bridge.name(),
            bridge.device,
            bridge.midi.is_some(),
            bridge.osc.is_some()
        );
        Ok(bridge)
    }

    pub fn name(&self) -> String {
        self.settings.lock().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.settings.lock().name = name.into();
    }

    pub fn device_path(&self) -> String {
        self.device.path()
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_midi_enabled(&self) -> bool {
        self.midi.is_some()
    }

    pub fn is_osc_enabled(&self) -> bool {
        self.osc.is_some()
    }

    pub fn auto_reset(&self) -> bool {
        self.auto_reset.load(Ordering::Relaxed)
    }

    pub fn set_auto_reset(&self, flag: bool) {
        self.auto_reset.store(flag, Ordering::Relaxed);
    }

    /// Current status; never blocks
    pub fn status(&self) -> BridgeStatus {
        self.status.status()
    }

    pub fn subscribe(&self, callback: StatusCallback) {
        self.status.subscribe(callback);
    }

    pub fn enabled(&self) -> bool {
        self.status.with(|m| m.enabled())
    }

    pub fn connected(&self) -> bool {
        self.status.with(|m| m.connected())
    }

    /// Enable or disable dispatch
    ///
    /// Takes the script lock, so no update can reach the script after a
    /// disable returns.
    pub fn set_enabled(&self, enabled: bool) {
        let _script = self.script.lock();
        self.status.apply(|m, _| m.set_enabled(enabled));
        info!(
            "Bridge '{}' {}",
            self.name(),
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn midi_channel(&self) -> u8 {
        self.settings.lock().midi_channel
    }

    /// Set the MIDI channel (0-15); higher bits are discarded
    pub fn set_midi_channel(&self, channel: u8) {
        let channel = channel & 0x0F;
        self.settings.lock().midi_channel = channel;
        if let Some(midi) = &self.midi {
            midi.set_channel(channel);
        }
    }

    pub fn osc_address(&self) -> String {
        self.settings.lock().osc_address.clone()
    }

    /// Takes effect on the next OSC send
    pub fn set_osc_address(&self, address: impl Into<String>) {
        let address = address.into();
        if let Some(osc) = &self.osc {
            osc.set_destination_address(address.clone());
        }
        self.settings.lock().osc_address = address;
    }

    pub fn osc_port(&self) -> u16 {
        self.settings.lock().osc_port
    }

    pub fn set_osc_port(&self, port: u16) {
        if let Some(osc) = &self.osc {
            osc.set_destination_port(port);
        }
        self.settings.lock().osc_port = port;
    }

    pub fn active_status_delay(&self) -> Duration {
        self.status.with(|m| m.delay())
    }

    pub fn set_active_status_delay(&self, delay: Duration) {
        self.status.apply(|m, _| {
            m.set_delay(delay);
            None
        });
    }

    /// Most recent script or transport error
    pub fn last_error(&self) -> Option<BridgeError> {
        self.last_error.lock().clone()
    }

    fn record_error(&self, err: BridgeError) {
        warn!("Bridge '{}': {}", self.name(), err);
        *self.last_error.lock() = Some(err);
    }

    /// Latest cached reading for `cookie`
    pub fn cached_element(&self, cookie: u64) -> Option<CachedElement> {
        self.cache.get(cookie)
    }

    pub fn source(&self) -> String {
        self.script.lock().source().to_string()
    }

    /// Replace the script
    ///
    /// On success the last error is cleared; on failure the previous script
    /// stays active and the error is recorded.
    pub fn set_source(&self, source: &str) -> Result<()> {
        let result = self.script.lock().load(source);
        match &result {
            Ok(()) => *self.last_error.lock() = None,
            Err(e) => self.record_error(e.clone()),
        }
        result
    }

    pub fn action_names(&self) -> Vec<String> {
        self.script.lock().action_names()
    }

    pub fn perform_action(&self, name: &str) -> Result<()> {
        let result = self.script.lock().perform_action(name);
        if let Err(e) = &result {
            self.record_error(e.clone());
        }
        result
    }

    /// Run an ad-hoc chunk in the current script's environment
    pub fn run(&self, chunk: &str) -> Result<()> {
        let result = self.script.lock().run(chunk);
        if let Err(e) = &result {
            self.record_error(e.clone());
        }
        result
    }

    pub fn log_lines(&self) -> Vec<ScriptLogLine> {
        self.log.lines()
    }

    pub fn clear_log(&self) {
        self.log.clear();
    }

    /// Decay `Active` to `Idle` if the deadline has passed
    pub fn tick(&self) {
        self.status.tick();
    }

    /// Configuration record reflecting the current state
    pub fn save_configuration(&self) -> BridgeConfig {
        BridgeConfig {
            identifier: self.device_path(),
            exclusive: self.exclusive,
            autoreset: self.auto_reset(),
            script: self.source(),
            enable_midi: self.is_midi_enabled(),
            enable_osc: self.is_osc_enabled(),
        }
    }

    pub fn save_settings(&self) -> BridgeSettings {
        let mut settings = self.settings.lock().clone();
        settings.active_status_delay_ms = self.active_status_delay().as_millis() as u64;
        settings
    }

    pub fn load_settings(&self, settings: BridgeSettings) -> Result<()> {
        if settings.midi_channel > 15 {
            return Err(BridgeError::Config(format!(
                "MIDI channel {} out of range 0-15",
                settings.midi_channel
            )));
        }
        self.set_name(settings.name.clone());
        self.set_midi_channel(settings.midi_channel);
        self.set_osc_address(settings.osc_address.clone());
        self.set_osc_port(settings.osc_port);
        self.set_active_status_delay(settings.active_status_delay());
        debug!("Settings loaded: {:?}", settings);
        Ok(())
    }
}

impl DeviceDelegate for BridgeController {
    fn on_connect(&self) {
        let script = self.script.lock();
        self.status.apply(|m, _| m.set_connected(true));
        if self.auto_reset() {
            debug!("Auto-reset: clearing element cache on connect");
            self.cache.clear();
        }

        if !self.enabled() {
            return;
        }
        info!("Device {} connected", self.device);
        if let Err(e) = script.dispatch_connect() {
            self.record_error(e);
        }
    }

    fn on_disconnect(&self) {
        let script = self.script.lock();
        self.status.apply(|m, _| m.set_connected(false));
        if self.auto_reset() {
            debug!("Auto-reset: clearing element cache on disconnect");
            self.cache.clear();
        }

        if !self.enabled() {
            return;
        }
        info!("Device {} disconnected", self.device);
        if let Err(e) = script.dispatch_disconnect() {
            self.record_error(e);
        }
    }

    fn on_element_update(&self, update: ElementUpdate) {
        let script = self.script.lock();
        // Recorded under the script lock so the cache follows dispatch order
        self.cache.record(&update);

        let mut accepted = false;
        self.status.apply(|m, now| {
            accepted = m.accepts_updates();
            m.activity(now)
        });
        if !accepted {
            return;
        }

        if let Err(e) = script.dispatch_element_update(&update) {
            self.record_error(e);
        }
    }
}

impl Drop for BridgeController {
    fn drop(&mut self) {
        debug!("Bridge '{}' shutting down", self.settings.get_mut().name);
    }
}
