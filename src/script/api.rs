//! Host API exposed to bridge scripts
//!
//! The functions registered here are the only way a script can affect the
//! outside world:
//!
//!   sendMidiNoteOn, sendMidiNoteOff, sendMidiControlChange, sendMidiPitchWheel,
//!   sendMidiMessage, sendOSC, log, getElementValue
//!
//! `print` is an alias of `log`.
//!
//! Numeric arguments are passed through as-is; clamping happens in the sinks.
//! Transport failures are logged and reported, never raised into the script.

use mlua::{Lua, Result as LuaResult, Value, Variadic};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::log::ScriptLog;
use crate::bridge::cache::ElementCache;
use crate::device::{ElementInfo, ElementSource};
use crate::error::{BridgeError, Result};
use crate::midi::MidiSink;
use crate::osc::{OscArg, OscMessageBuilder, OscSink};

/// Callback receiving non-fatal errors raised on behalf of the script
pub type ErrorReporter = Arc<dyn Fn(BridgeError) + Send + Sync>;

/// Everything the host API closures may touch
#[derive(Clone)]
pub struct HostContext {
    /// `None` when MIDI output is disabled for the bridge
    pub midi: Option<Arc<MidiSink>>,
    /// `None` when OSC output is disabled for the bridge
    pub osc: Option<Arc<OscSink>>,
    pub cache: Arc<ElementCache>,
    /// Fallback for `getElementValue` on cookies not seen yet
    pub source: Option<Arc<dyn ElementSource>>,
    pub log: ScriptLog,
    pub report: ErrorReporter,
}

impl HostContext {
    fn with_midi(&self, what: &str, send: impl FnOnce(&MidiSink) -> Result<()>) {
        let Some(midi) = &self.midi else {
            debug!("MIDI disabled, dropping {}", what);
            return;
        };
        if let Err(e) = send(midi) {
            warn!("{} failed: {}", what, e);
            (self.report)(e);
        }
    }

    fn send_osc(&self, address: String, args: Vec<OscArg>) -> Result<()> {
        let mut builder = OscMessageBuilder::new(address)?;
        for arg in &args {
            builder.append(arg);
        }
        let message = builder.build();

        let Some(osc) = &self.osc else {
            debug!("OSC disabled, dropping {}", message);
            return Ok(());
        };
        if let Err(e) = osc.send_message(&message) {
            warn!("sendOSC {} failed: {}", message.address(), e);
            (self.report)(e);
        }
        Ok(())
    }
}

/// Script numbers may be floats; round and saturate into i64
fn to_int(n: f64) -> i64 {
    n.round() as i64
}

/// Register all host API globals on `lua`
pub fn register_all(lua: &Lua, host: &HostContext) -> LuaResult<()> {
    register_midi(lua, host)?;
    register_osc(lua, host)?;
    register_log(lua, host)?;
    register_elements(lua, host)?;
    Ok(())
}

fn register_midi(lua: &Lua, host: &HostContext) -> LuaResult<()> {
    let globals = lua.globals();

    macro_rules! midi_fn2 {
        ($name:literal, $method:ident) => {{
            let host = host.clone();
            lua.create_function(move |_, (a, b): (f64, f64)| {
                host.with_midi($name, |midi| midi.$method(to_int(a), to_int(b)));
                Ok(())
            })?
        }};
    }

    globals.set("sendMidiNoteOn", midi_fn2!("sendMidiNoteOn", send_note_on))?;
    globals.set("sendMidiNoteOff", midi_fn2!("sendMidiNoteOff", send_note_off))?;
    globals.set(
        "sendMidiControlChange",
        midi_fn2!("sendMidiControlChange", send_control_change),
    )?;

    let pitch_host = host.clone();
    globals.set(
        "sendMidiPitchWheel",
        lua.create_function(move |_, value: f64| {
            pitch_host.with_midi("sendMidiPitchWheel", |midi| midi.send_pitch_wheel(to_int(value)));
            Ok(())
        })?,
    )?;

    let raw_host = host.clone();
    globals.set(
        "sendMidiMessage",
        lua.create_function(
            move |_, (status, data1, data2): (f64, Option<f64>, Option<f64>)| {
                let status = to_int(status).clamp(0x80, 0xFF) as u8;
                raw_host.with_midi("sendMidiMessage", |midi| match (data1, data2) {
                    (Some(d1), Some(d2)) => midi.send_message_data2(status, to_int(d1), to_int(d2)),
                    (Some(d1), None) => midi.send_message_data(status, to_int(d1)),
                    _ => midi.send_message(status),
                });
                Ok(())
            },
        )?,
    )?;

    Ok(())
}

fn register_osc(lua: &Lua, host: &HostContext) -> LuaResult<()> {
    let host = host.clone();
    let send_osc = lua.create_function(move |_, (address, args): (String, Variadic<Value>)| {
        let args = args
            .into_iter()
            .enumerate()
            .map(|(idx, value)| lua_value_to_osc(value).map_err(|e| arg_error(idx + 2, e)))
            .collect::<LuaResult<Vec<_>>>()?;

        host.send_osc(address, args)
            .map_err(|e| mlua::Error::RuntimeError(format!("sendOSC: {}", e)))
    })?;

    lua.globals().set("sendOSC", send_osc)?;
    Ok(())
}

fn arg_error(position: usize, message: String) -> mlua::Error {
    mlua::Error::RuntimeError(format!("sendOSC: bad argument #{}: {}", position, message))
}

/// Map a script value onto an OSC argument
///
/// integer → i, float → f, string → s, boolean → i (1/0),
/// array of integers → b (blob).
fn lua_value_to_osc(value: Value) -> std::result::Result<OscArg, String> {
    match value {
        Value::Integer(i) => i32::try_from(i)
            .map(OscArg::Int)
            .map_err(|_| format!("integer {} does not fit in 32 bits", i)),
        Value::Number(n) => Ok(OscArg::Float(n as f32)),
        Value::Boolean(b) => Ok(OscArg::Int(b as i32)),
        Value::String(s) => Ok(OscArg::Str(s.to_str().map_err(|e| e.to_string())?.to_string())),
        Value::Table(t) => {
            let bytes = t
                .sequence_values::<i64>()
                .map(|b| {
                    b.map_err(|e| e.to_string())
                        .and_then(|b| u8::try_from(b).map_err(|_| format!("blob byte {} out of range", b)))
                })
                .collect::<std::result::Result<Vec<u8>, String>>()?;
            Ok(OscArg::Blob(bytes))
        }
        other => Err(format!("unsupported type '{}'", other.type_name())),
    }
}

fn register_log(lua: &Lua, host: &HostContext) -> LuaResult<()> {
    let sink = host.log.clone();
    let log_fn = lua.create_function(move |_, message: Value| {
        let text = match message {
            Value::String(s) => s.to_string_lossy(),
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => n.to_string(),
            other => format!("<{}>", other.type_name()),
        };
        info!(target: "script", "{}", text);
        sink.push(text);
        Ok(())
    })?;

    let globals = lua.globals();
    globals.set("print", log_fn.clone())?;
    globals.set("log", log_fn)?;
    Ok(())
}

fn register_elements(lua: &Lua, host: &HostContext) -> LuaResult<()> {
    let host = host.clone();
    let get_value = lua.create_function(move |lua, cookie: i64| {
        let mut result = Variadic::new();
        let Ok(cookie) = u64::try_from(cookie) else {
            result.push(Value::Nil);
            return Ok(result);
        };

        if let Some(entry) = host.cache.get(cookie) {
            result.push(Value::Integer(entry.value as i64));
            result.push(Value::Integer(entry.min as i64));
            result.push(Value::Integer(entry.max as i64));
            result.push(Value::Table(info_to_table(lua, &entry.info)?));
        } else if let Some(reading) = host
            .source
            .as_ref()
            .filter(|s| s.is_connected())
            .and_then(|s| s.fetch_element(cookie))
        {
            result.push(Value::Integer(reading.value as i64));
            result.push(Value::Integer(reading.min as i64));
            result.push(Value::Integer(reading.max as i64));
            result.push(Value::Table(lua.create_table()?));
        } else {
            result.push(Value::Nil);
        }

        Ok(result)
    })?;

    lua.globals().set("getElementValue", get_value)?;
    Ok(())
}

/// Convert element info into a Lua table
pub fn info_to_table(lua: &Lua, info: &ElementInfo) -> LuaResult<mlua::Table> {
    let table = lua.create_table()?;
    for (key, value) in info {
        table.set(key.as_str(), json_to_lua_value(lua, value)?)?;
    }
    Ok(table)
}

fn json_to_lua_value(lua: &Lua, val: &serde_json::Value) -> LuaResult<Value> {
    match val {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                Ok(Value::Number(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(lua.create_string(s.as_str())?)),
        serde_json::Value::Array(arr) => {
            let t = lua.create_table()?;
            for (i, v) in arr.iter().enumerate() {
                t.set(i + 1, json_to_lua_value(lua, v)?)?;
            }
            Ok(Value::Table(t))
        }
        serde_json::Value::Object(obj) => {
            let t = lua.create_table()?;
            for (k, v) in obj {
                t.set(k.as_str(), json_to_lua_value(lua, v)?)?;
            }
            Ok(Value::Table(t))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::sandbox::create_sandboxed_vm;

    #[test]
    fn test_lua_value_to_osc_kinds() {
        let lua = create_sandboxed_vm().unwrap();
        let values: Variadic<Value> = lua
            .load("return 7, 0.5, 'txt', true, {1, 2, 255}")
            .eval()
            .unwrap();
        let args: Vec<OscArg> = values
            .into_iter()
            .map(|v| lua_value_to_osc(v).unwrap())
            .collect();
        assert_eq!(
            args,
            vec![
                OscArg::Int(7),
                OscArg::Float(0.5),
                OscArg::Str("txt".to_string()),
                OscArg::Int(1),
                OscArg::Blob(vec![1, 2, 255]),
            ]
        );
    }

    #[test]
    fn test_lua_value_to_osc_rejects_out_of_range() {
        let lua = create_sandboxed_vm().unwrap();
        let big: Value = lua.load("return 4294967296").eval().unwrap();
        assert!(lua_value_to_osc(big).is_err());
        let bad_blob: Value = lua.load("return {1, 256}").eval().unwrap();
        assert!(lua_value_to_osc(bad_blob).is_err());
        assert!(lua_value_to_osc(Value::Nil).is_err());
    }

    #[test]
    fn test_to_int_rounds_and_saturates() {
        assert_eq!(to_int(63.6), 64);
        assert_eq!(to_int(-0.4), 0);
        assert_eq!(to_int(f64::INFINITY), i64::MAX);
        assert_eq!(to_int(f64::NAN), 0);
    }
}
