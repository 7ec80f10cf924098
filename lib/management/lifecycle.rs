//! Container lifecycle control.
//!
//! Every command starts by loading the process descriptor and taking an
//! exclusive lock on the descriptor file, so concurrent invocations against
//! the same process serialize instead of interleaving. Provisioning commands
//! hold the lock for their whole duration; handoff commands release it just
//! before replacing the process image, since the engine start that follows
//! may run indefinitely.

use std::fs::{self, File};
use std::path::Path;

use nix::fcntl::{Flock, FlockArg};

use crate::config::ProcessSpec;
use crate::engine::{
    detect_version, ensure_container, ephemeral_name, exec_engine, start_args, Dialect,
};
use crate::utils::env::get_uptester_path;
use crate::utils::file::make_executable;
use crate::utils::path::{
    container_name, ContainerPaths, RunnerRoot, UPTESTER_FILENAME, UPTESTS_SUBDIR,
};
use crate::{ProcboxError, ProcboxResult};

use super::image::strategy_for;
use super::provision::Provisioner;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The lifecycle operations a process descriptor supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleCommand {
    /// Provision the container directory tree and all boot artifacts.
    Setup,

    /// Hand the process over to the engine running the proc's command.
    Run,

    /// Hand the process over to an interactive shell in an ephemeral
    /// container.
    Shell,

    /// Run the proc's uptests in an ephemeral container, or report an empty
    /// result set when the build ships none.
    Uptest,

    /// Remove the container directory tree.
    Teardown,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Executes one lifecycle command against a process descriptor file.
pub async fn execute(
    command: LifecycleCommand,
    descriptor: &Path,
    root: &RunnerRoot,
) -> ProcboxResult<()> {
    let spec = ProcessSpec::load(descriptor)?;
    let lock = lock_descriptor(descriptor)?;

    match command {
        LifecycleCommand::Setup => {
            let version = detect_version().await?;
            let dialect = Dialect::for_version(&version);
            Provisioner::new(&spec, root, dialect, strategy_for(&spec))
                .setup()
                .await
        }
        LifecycleCommand::Run => handoff(&spec, root, None, lock).await,
        LifecycleCommand::Shell => handoff(&spec, root, Some("/bin/bash".to_string()), lock).await,
        LifecycleCommand::Uptest => {
            let paths = ContainerPaths::derive(&spec, root);
            stage_uptester(&paths)?;
            match uptest_command(&spec, &paths) {
                Some(cmd) => handoff(&spec, root, Some(cmd), lock).await,
                None => {
                    // No uptests shipped with the build: report an empty
                    // result list on stdout for the caller to parse.
                    println!("[]");
                    Ok(())
                }
            }
        }
        LifecycleCommand::Teardown => teardown(&spec, root),
    }
}

/// Removes the process's container tree. Idempotent: a missing tree is
/// already torn down.
pub fn teardown(spec: &ProcessSpec, root: &RunnerRoot) -> ProcboxResult<()> {
    let paths = ContainerPaths::derive(spec, root);
    if paths.proc_path.is_dir() {
        tracing::info!("removing {}", paths.proc_path.display());
        fs::remove_dir_all(&paths.proc_path)?;
    }
    Ok(())
}

/// Copies the uptester executable into the container rootfs.
pub fn stage_uptester(paths: &ContainerPaths) -> ProcboxResult<()> {
    let source = get_uptester_path()?;
    let dest = paths.container_path.join(UPTESTER_FILENAME);
    fs::copy(&source, &dest)?;
    make_executable(&dest)?;
    Ok(())
}

/// The in-container uptest invocation for this proc, or `None` when the
/// build ships no uptest suite for it.
pub fn uptest_command(spec: &ProcessSpec, paths: &ContainerPaths) -> Option<String> {
    let suite = paths.app_path.join(UPTESTS_SUBDIR).join(&spec.proc_name);
    if !suite.is_dir() {
        return None;
    }
    // The trailing space survives the entrypoint's quoting and keeps the
    // uptester's argument parsing happy.
    Some(format!(
        "/{} /app/{}/{} {} {} ",
        UPTESTER_FILENAME, UPTESTS_SUBDIR, spec.proc_name, spec.host, spec.port
    ))
}

/// Replaces this process with the engine start invocation.
///
/// `special_cmd` switches to an ephemeral container running that command
/// instead of the proc's own; `None` runs the primary container with the
/// entrypoint's `run` dispatch. The descriptor lock is released immediately
/// before the process image is replaced.
async fn handoff(
    spec: &ProcessSpec,
    root: &RunnerRoot,
    special_cmd: Option<String>,
    lock: Flock<File>,
) -> ProcboxResult<()> {
    let version = detect_version().await?;
    let dialect = Dialect::for_version(&version);
    let paths = ContainerPaths::derive(spec, root);
    let base_name = container_name(spec);

    let (name, cmd) = match special_cmd {
        Some(cmd) => {
            let name = ephemeral_name(&base_name, &cmd);
            ensure_container(&name, &version).await?;
            (name, cmd)
        }
        None => (base_name, "run".to_string()),
    };

    let args = start_args(
        &name,
        &paths.descriptor_path(),
        &dialect,
        spec.app_folder.as_deref(),
        &spec.user,
        &cmd,
    );
    tracing::info!("handing off to {}", args.join(" "));

    drop(lock);
    exec_engine(&args)
}

/// Takes an exclusive advisory lock on the descriptor file.
fn lock_descriptor(descriptor: &Path) -> ProcboxResult<Flock<File>> {
    let file = File::open(descriptor)?;
    Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| ProcboxError::Os(errno))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
