//! Lua VM construction with a restricted standard library
//!
//! Scripts get `table`, `string`, `math`, `utf8` and `coroutine`. There is no
//! `io`, `os`, `package` or `debug`, and the base-library file loaders are
//! removed, so the only way out of the VM is the host API.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Value};

/// Memory ceiling for one script VM
pub const MEMORY_LIMIT_BYTES: usize = 16 * 1024 * 1024;

/// Globals from the base library that reach the filesystem
const REMOVED_GLOBALS: &[&str] = &["dofile", "loadfile", "require"];

/// Create a new Lua VM with sandbox restrictions applied
pub fn create_sandboxed_vm() -> LuaResult<Lua> {
    let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8 | StdLib::COROUTINE;
    let lua = Lua::new_with(libs, LuaOptions::default())?;

    let globals = lua.globals();
    for name in REMOVED_GLOBALS {
        globals.set(*name, Value::Nil)?;
    }

    lua.set_memory_limit(MEMORY_LIMIT_BYTES)?;
    Ok(lua)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_libraries_available() {
        let lua = create_sandboxed_vm().unwrap();
        let n: i64 = lua.load("return math.max(1, 5) + #string.rep('a', 2)").eval().unwrap();
        assert_eq!(n, 7);
    }

    #[test]
    fn test_unsafe_libraries_missing() {
        let lua = create_sandboxed_vm().unwrap();
        for name in ["io", "os", "package", "debug", "dofile", "loadfile", "require"] {
            let value: Value = lua.globals().get(name).unwrap();
            assert!(value.is_nil(), "{} should not be reachable", name);
        }
    }
}
