//! Engine invocation argument construction and process handoff.
//!
//! On a successful handoff the current process image is replaced by the
//! engine binary; no further procbox code executes. The argument vector
//! shape, including the inner privilege-drop invocation, is an operational
//! compatibility contract and must not be reordered.

use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use md5::{Digest, Md5};

use crate::{ProcboxError, ProcboxResult};

use super::{Dialect, EngineVersion, MODERN_ENGINE_MIN};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The engine binary the lifecycle hands process control to.
pub const ENGINE_START_BIN: &str = "lxc-start";

/// The engine binary that registers a container object, required by newer
/// engine generations before an ephemeral start.
pub const ENGINE_CREATE_BIN: &str = "lxc-create";

/// Marker inserted into ephemeral container names, ahead of the command hash.
pub const EPHEMERAL_NAME_MARKER: &str = "-TMP";

/// Filename of the engine debug log written into `app_folder` when set.
pub const ENGINE_DEBUG_LOG_FILENAME: &str = ".lxcdebug.log";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Derives a uniquified container name for an ephemeral command.
///
/// Ephemeral containers (shell, uptest) coexist with the primary container
/// for the same process, so the name gets a fixed marker plus a short hash of
/// the special command. Hashing also strips characters that are invalid in
/// container names. Names must stay short for older engine versions.
pub fn ephemeral_name(base: &str, special_cmd: &str) -> String {
    let digest = hex::encode(Md5::digest(special_cmd.as_bytes()));
    format!("{}{}{}", base, EPHEMERAL_NAME_MARKER, &digest[..8])
}

/// Builds the full engine start argument vector for a container.
///
/// Layout: container name and descriptor path, dialect-gated foreground flag,
/// optional debug-log flags when `app_folder` is set, then the inner
/// privilege-drop invocation that switches to `user`, preserves the
/// environment, and execs the entrypoint with `cmd` as its sole argument.
/// Short options only; old versions of sudo reject the long forms.
pub fn start_args(
    name: &str,
    descriptor: &Path,
    dialect: &Dialect,
    app_folder: Option<&str>,
    user: &str,
    cmd: &str,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        ENGINE_START_BIN.to_string(),
        "--name".to_string(),
        name.to_string(),
        "--rcfile".to_string(),
        descriptor.display().to_string(),
    ];

    if dialect.requires_foreground_flag {
        // Early engine versions either lacked the flag or defaulted to it.
        args.push("--foreground".to_string());
    }

    if let Some(folder) = app_folder {
        args.push("--logpriority".to_string());
        args.push("debug".to_string());
        args.push("--logfile".to_string());
        args.push(
            Path::new(folder)
                .join(ENGINE_DEBUG_LOG_FILENAME)
                .display()
                .to_string(),
        );
    }

    args.extend(
        [
            "--",
            "sudo",
            "-u",
            user,
            "-E",
            "-s",
            "/bin/bash",
            "-c",
        ]
        .map(String::from),
    );
    args.push(format!("cd /app;source /env.sh; exec /proc.sh \"{}\"", cmd));

    args
}

/// Locates a program on the current `PATH`.
pub fn which(program: &str) -> ProcboxResult<PathBuf> {
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            ProcboxError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found on PATH", program),
            ))
        })
}

/// Replaces the current process image with the engine start invocation.
///
/// The new image inherits stdio but starts with an empty environment; the
/// container's environment comes from the sourced `env.sh` instead. This
/// function only ever returns on failure to start the replacement.
pub fn exec_engine(argv: &[String]) -> ProcboxResult<()> {
    let program = which(ENGINE_START_BIN)?;
    let program_c = cstring(&program.display().to_string())?;
    let argv_c: Vec<CString> = argv.iter().map(|a| cstring(a)).collect::<Result<_, _>>()?;
    let env: [&CStr; 0] = [];

    nix::unistd::execve(&program_c, &argv_c, &env)?;
    Ok(())
}

/// Makes sure the engine knows a container by `name` before an ephemeral
/// start. A no-op on engine generations that start containers ad hoc.
///
/// Failure is tolerated: the container object may already exist from an
/// earlier ephemeral run, and the start itself will surface real problems.
pub async fn ensure_container(name: &str, version: &EngineVersion) -> ProcboxResult<()> {
    if *version < MODERN_ENGINE_MIN {
        return Ok(());
    }

    let status = tokio::process::Command::new(ENGINE_CREATE_BIN)
        .args(["--name", name, "--template", "none"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if !status.success() {
        tracing::debug!(
            "{} for {} exited with {}; container likely exists",
            ENGINE_CREATE_BIN,
            name,
            status
        );
    }

    Ok(())
}

fn cstring(s: &str) -> ProcboxResult<CString> {
    CString::new(s).map_err(|e| {
        ProcboxError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("argument contains interior nul: {}", e),
        ))
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn old_dialect() -> Dialect {
        Dialect::for_version(&EngineVersion::new(1, 0, 8))
    }

    #[test]
    fn test_start_args_exact_shape() {
        let args = start_args(
            "myApp-1.0-cfg-deadbeef-web-8000",
            Path::new("/apps/procs/myApp-1.0-cfg-deadbeef-web-8000/proc.lxc"),
            &old_dialect(),
            None,
            "webuser",
            "run",
        );
        assert_eq!(
            args,
            vec![
                "lxc-start",
                "--name",
                "myApp-1.0-cfg-deadbeef-web-8000",
                "--rcfile",
                "/apps/procs/myApp-1.0-cfg-deadbeef-web-8000/proc.lxc",
                "--",
                "sudo",
                "-u",
                "webuser",
                "-E",
                "-s",
                "/bin/bash",
                "-c",
                "cd /app;source /env.sh; exec /proc.sh \"run\"",
            ]
        );
    }

    #[test]
    fn test_start_args_foreground_for_modern_engine() {
        let dialect = Dialect::for_version(&EngineVersion::new(2, 0, 1));
        let args = start_args("c", Path::new("/p/proc.lxc"), &dialect, None, "u", "run");
        assert_eq!(args[5], "--foreground");
    }

    #[test]
    fn test_start_args_debug_log_flags() {
        let args = start_args(
            "c",
            Path::new("/p/proc.lxc"),
            &old_dialect(),
            Some("/srv/app"),
            "u",
            "run",
        );
        let logpriority = args.iter().position(|a| a == "--logpriority").unwrap();
        assert_eq!(args[logpriority + 1], "debug");
        assert_eq!(args[logpriority + 2], "--logfile");
        assert_eq!(args[logpriority + 3], "/srv/app/.lxcdebug.log");
        // Debug flags come after the dialect flags and before the separator.
        assert!(logpriority < args.iter().position(|a| a == "--").unwrap());
    }

    #[test]
    fn test_ephemeral_name_is_deterministic_and_short() {
        let a = ephemeral_name("myApp-web", "/bin/bash");
        let b = ephemeral_name("myApp-web", "/bin/bash");
        assert_eq!(a, b);
        assert!(a.starts_with("myApp-web-TMP"));
        assert_eq!(a.len(), "myApp-web-TMP".len() + 8);

        let c = ephemeral_name("myApp-web", "/uptester /app/uptests/web h 1 ");
        assert_ne!(a, c);
    }
}
