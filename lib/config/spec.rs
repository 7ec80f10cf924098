//! The process descriptor model.
//!
//! A descriptor file declares exactly one process instance to provision. It is
//! deserialized once per invocation and treated as immutable for the duration
//! of the command.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{ProcboxError, ProcboxResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One process instance, as declared by a descriptor file.
///
/// Either `cmd` is set, or the build artifact referenced by `build_url` must
/// contain a `Procfile` entry for `proc_name`; the entrypoint command is
/// resolved from one of the two at setup time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Name of the application this process belongs to.
    pub app_name: String,

    /// Role name of the process within the application (a `Procfile` key).
    pub proc_name: String,

    /// Port the process listens on.
    pub port: u16,

    /// Identifier of the release being deployed.
    pub release_hash: String,

    /// Version string of the application build.
    pub version: String,

    /// Name of the configuration this instance runs with.
    pub config_name: String,

    /// Name of the OS base image, when running inside an image overlay.
    #[serde(default)]
    pub image_name: Option<String>,

    /// Download URL of the OS base image tarball.
    #[serde(default)]
    pub image_url: Option<String>,

    /// Expected MD5 digest of the image tarball.
    #[serde(default)]
    pub image_md5: Option<String>,

    /// Explicit entrypoint command. When unset the command is looked up in
    /// the build's `Procfile` under `proc_name`.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Environment exported to the container, in declaration order. A value
    /// beginning with `$` is resolved from the provisioning host's own
    /// environment at render time.
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// User the containerized process runs as.
    pub user: String,

    /// Group ownership applied to the extracted build.
    pub group: String,

    /// Host this instance is provisioned on, passed to uptests.
    pub host: String,

    /// Bind-mounted volumes as `(outside_path, inside_path)` pairs, emitted
    /// into the descriptor in declaration order.
    #[serde(default)]
    pub volumes: Vec<(String, String)>,

    /// Memory limit in bytes, emitted as a cgroup line when set.
    #[serde(default)]
    pub mem_limit: Option<String>,

    /// Memory+swap limit in bytes, emitted as a cgroup line when set.
    #[serde(default)]
    pub memsw_limit: Option<String>,

    /// Download URL of the application build tarball.
    #[serde(default)]
    pub build_url: Option<String>,

    /// Expected MD5 digest of the build tarball.
    #[serde(default)]
    pub build_md5: Option<String>,

    /// Host folder the build may write to; when set, engine debug logs are
    /// directed into it.
    #[serde(default)]
    pub app_folder: Option<String>,

    /// Application settings, serialized verbatim into the container as
    /// `settings.yaml`.
    #[serde(default)]
    pub settings: serde_yaml::Value,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ProcessSpec {
    /// Loads and validates a process descriptor from a file.
    ///
    /// ## Errors
    ///
    /// Returns a [`ProcboxError::Config`] when the file cannot be parsed or a
    /// required field is missing, before any filesystem mutation happens.
    pub fn load(path: impl AsRef<Path>) -> ProcboxResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let spec: ProcessSpec = serde_yaml::from_str(&text).map_err(|e| {
            ProcboxError::Config(format!("invalid descriptor {}: {}", path.display(), e))
        })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Checks cross-field constraints a plain deserialization cannot express.
    pub fn validate(&self) -> ProcboxResult<()> {
        if self.image_url.is_some() && self.image_name.is_none() {
            return Err(ProcboxError::Config(
                "image_url is set but image_name is missing".to_string(),
            ));
        }
        if self.cmd.is_none() && self.build_url.is_none() {
            return Err(ProcboxError::Config(
                "descriptor must set either cmd or build_url".to_string(),
            ));
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
