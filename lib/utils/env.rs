//! Utility functions for working with environment variables.

use std::path::PathBuf;

use crate::config::DEFAULT_ROOT;
use crate::ProcboxResult;

use super::path::{RunnerRoot, UPTESTER_FILENAME};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable overriding the procbox root directory.
pub const PROCBOX_ROOT_ENV_VAR: &str = "PROCBOX_ROOT";

/// Environment variable pointing at the uptester executable.
pub const UPTESTER_EXE_ENV_VAR: &str = "UPTESTER_EXE";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the root configuration for this invocation.
///
/// Consulted once at the CLI edge; the library itself only ever works with
/// an explicit [`RunnerRoot`] value.
pub fn get_runner_root() -> RunnerRoot {
    match std::env::var(PROCBOX_ROOT_ENV_VAR) {
        Ok(root) => RunnerRoot::new(root),
        Err(_) => RunnerRoot::new(DEFAULT_ROOT),
    }
}

/// Returns the path of the uptester executable.
///
/// `UPTESTER_EXE` wins when set; otherwise an `uptester` file next to the
/// current executable is assumed.
pub fn get_uptester_path() -> ProcboxResult<PathBuf> {
    if let Ok(path) = std::env::var(UPTESTER_EXE_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }

    let exe = std::env::current_exe()?;
    Ok(match exe.parent() {
        Some(dir) => dir.join(UPTESTER_FILENAME),
        None => PathBuf::from(UPTESTER_FILENAME),
    })
}

/// Resolves one descriptor env value at render time.
///
/// A value beginning with `$` is replaced with the value of the same-named
/// variable from the provisioning process's own environment, defaulting to
/// the empty string. The substitution happens exactly once, here, not at
/// container boot.
pub fn resolve_env_value(value: &str) -> String {
    match value.strip_prefix('$') {
        Some(name) => std::env::var(name).unwrap_or_default(),
        None => value.to_string(),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
