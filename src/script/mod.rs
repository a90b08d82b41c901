//! Embedded Lua environment that runs a bridge's script
//!
//! A script is a Lua chunk that may define any of these globals:
//!
//! ```lua
//! function onConnect() end
//! function onDisconnect() end
//! function onElementUpdate(cookie, value, min, max, info) end
//! actions = { ["Reset mixer"] = function() ... end }
//! ```
//!
//! The environment is not thread-safe on its own; the bridge keeps it behind
//! its script lock.

pub mod api;
pub mod log;
pub mod sandbox;

use mlua::{Function, Lua, Table, Value};
use tracing::{debug, info};

use crate::device::ElementUpdate;
use crate::error::{BridgeError, Result};
use api::HostContext;
use sandbox::create_sandboxed_vm;

pub use api::ErrorReporter;
pub use log::{ScriptLog, ScriptLogLine, SCRIPT_LOG_CAPACITY};

const CHUNK_NAME: &str = "=script";
const ACTIONS_TABLE: &str = "actions";

pub struct ScriptEnvironment {
    host: HostContext,
    lua: Option<Lua>,
    source: String,
}

impl ScriptEnvironment {
    pub fn new(host: HostContext) -> Self {
        Self {
            host,
            lua: None,
            source: String::new(),
        }
    }

    /// Source of the currently active script
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Compile and run `source` in a fresh VM, then make it the active script
    ///
    /// On failure the previous VM is left untouched.
    pub fn load(&mut self, source: &str) -> Result<()> {
        let lua = create_sandboxed_vm().map_err(compile_error)?;
        api::register_all(&lua, &self.host).map_err(compile_error)?;
        lua.load(source)
            .set_name(CHUNK_NAME)
            .exec()
            .map_err(compile_error)?;

        self.lua = Some(lua);
        self.source = source.to_string();
        info!("Script loaded ({} bytes)", source.len());
        Ok(())
    }

    pub fn dispatch_connect(&self) -> Result<()> {
        self.call_hook("onConnect", ())
    }

    pub fn dispatch_disconnect(&self) -> Result<()> {
        self.call_hook("onDisconnect", ())
    }

    pub fn dispatch_element_update(&self, update: &ElementUpdate) -> Result<()> {
        let Some(lua) = &self.lua else {
            return Ok(());
        };
        let info = api::info_to_table(lua, &update.info).map_err(runtime_error)?;
        self.call_hook(
            "onElementUpdate",
            (update.cookie, update.value, update.min, update.max, info),
        )
    }

    /// Names defined in the script's `actions` table, sorted
    pub fn action_names(&self) -> Vec<String> {
        let Some(actions) = self.actions_table() else {
            return Vec::new();
        };
        let mut names: Vec<String> = actions
            .pairs::<String, Value>()
            .filter_map(|pair| pair.ok())
            .filter(|(_, value)| matches!(value, Value::Function(_)))
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }

    pub fn perform_action(&self, name: &str) -> Result<()> {
        let action = self
            .actions_table()
            .and_then(|actions| actions.get::<Option<Function>>(name).ok().flatten())
            .ok_or_else(|| BridgeError::ScriptRuntime {
                message: format!("no action named '{}'", name),
            })?;
        debug!("Performing action '{}'", name);
        action.call::<()>(()).map_err(runtime_error)
    }

    /// Execute an ad-hoc chunk inside the active VM
    pub fn run(&self, chunk: &str) -> Result<()> {
        let lua = self.lua.as_ref().ok_or_else(|| BridgeError::ScriptRuntime {
            message: "no script loaded".to_string(),
        })?;
        lua.load(chunk)
            .set_name("=run")
            .exec()
            .map_err(runtime_error)
    }

    fn actions_table(&self) -> Option<Table> {
        self.lua
            .as_ref()?
            .globals()
            .get::<Option<Table>>(ACTIONS_TABLE)
            .ok()
            .flatten()
    }

    fn call_hook(&self, name: &str, args: impl mlua::IntoLuaMulti) -> Result<()> {
        let Some(lua) = &self.lua else {
            return Ok(());
        };
        let hook = lua
            .globals()
            .get::<Option<Function>>(name)
            .map_err(runtime_error)?;
        match hook {
            Some(hook) => hook.call::<()>(args).map_err(runtime_error),
            None => Ok(()),
        }
    }
}

/// Strip callback wrapping so the message names the original fault
fn error_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::CallbackError { cause, .. } => error_message(cause),
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

fn compile_error(err: mlua::Error) -> BridgeError {
    let message = error_message(&err);
    BridgeError::ScriptCompile {
        line: parse_error_line(&message),
        message,
    }
}

fn runtime_error(err: mlua::Error) -> BridgeError {
    BridgeError::ScriptRuntime {
        message: error_message(&err),
    }
}

/// Line number from a Lua error such as `script:5: unexpected symbol`
fn parse_error_line(message: &str) -> Option<u32> {
    let mut parts = message.split(':').peekable();
    while let Some(part) = parts.next() {
        parts.peek()?;
        if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
            return part.parse().ok();
        }
    }
    None
}
