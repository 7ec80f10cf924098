//! Procbox command-line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use procbox::management::lifecycle::{self, LifecycleCommand};
use procbox::utils::env::get_runner_root;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Provisions and runs containerized processes from YAML descriptors.
#[derive(Debug, Parser)]
#[command(name = "procbox", author, version, about)]
struct ProcboxArgs {
    #[command(subcommand)]
    command: ProcboxCommand,
}

#[derive(Debug, Subcommand)]
enum ProcboxCommand {
    /// Provision the container tree for a process descriptor
    Setup {
        /// Path of the process descriptor file
        file: PathBuf,
    },

    /// Start the process, replacing this one with the engine
    Run {
        /// Path of the process descriptor file
        file: PathBuf,
    },

    /// Open an interactive shell in an ephemeral container
    Shell {
        /// Path of the process descriptor file
        file: PathBuf,
    },

    /// Run the build's uptests for this proc
    Uptest {
        /// Path of the process descriptor file
        file: PathBuf,
    },

    /// Remove the container tree for a process descriptor
    Teardown {
        /// Path of the process descriptor file
        file: PathBuf,
    },
}

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = ProcboxArgs::parse();
    let root = get_runner_root();

    let (command, file) = match args.command {
        ProcboxCommand::Setup { file } => (LifecycleCommand::Setup, file),
        ProcboxCommand::Run { file } => (LifecycleCommand::Run, file),
        ProcboxCommand::Shell { file } => (LifecycleCommand::Shell, file),
        ProcboxCommand::Uptest { file } => (LifecycleCommand::Uptest, file),
        ProcboxCommand::Teardown { file } => (LifecycleCommand::Teardown, file),
    };

    match lifecycle::execute(command, &file, &root).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
