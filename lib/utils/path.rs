//! Path derivation for container directory trees.
//!
//! All derived paths are a pure function of the process descriptor and an
//! explicit root configuration, so test runs can use isolated roots without
//! shared process-wide state.

use std::path::{Path, PathBuf};

use crate::config::ProcessSpec;
use crate::{ProcboxError, ProcboxResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Subdirectory of the root holding shared build artifacts.
pub const BUILDS_SUBDIR: &str = "builds";

/// Subdirectory of the root holding shared OS base images.
pub const IMAGES_SUBDIR: &str = "images";

/// Subdirectory of the root holding per-process container trees.
pub const PROCS_SUBDIR: &str = "procs";

/// The writable overlay upper layer inside a proc tree; becomes the
/// container's `/`.
pub const ROOTFS_SUBDIR: &str = "rootfs";

/// The overlay work layer, a sibling of the rootfs.
pub const WORK_SUBDIR: &str = "work";

/// Application directory inside the container rootfs.
pub const APP_SUBDIR: &str = "app";

/// Directory inside a shared image dir that holds the unpacked image tree.
pub const IMAGE_CONTENTS_SUBDIR: &str = "contents";

/// The rendered container descriptor, written next to the rootfs.
pub const PROC_DESCRIPTOR_FILENAME: &str = "proc.lxc";

/// The container entrypoint script.
pub const PROC_SCRIPT_FILENAME: &str = "proc.sh";

/// The rendered environment script.
pub const ENV_SCRIPT_FILENAME: &str = "env.sh";

/// Verbatim serialization of the descriptor's settings object.
pub const SETTINGS_FILENAME: &str = "settings.yaml";

/// The command map shipped inside a build artifact.
pub const PROCFILE_FILENAME: &str = "Procfile";

/// The test-runner executable copied into the container for `uptest`.
pub const UPTESTER_FILENAME: &str = "uptester";

/// Directory inside the build holding per-proc uptest suites.
pub const UPTESTS_SUBDIR: &str = "uptests";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The root directory under which all procbox state lives.
#[derive(Debug, Clone)]
pub struct RunnerRoot(PathBuf);

/// The derived on-disk layout for one process instance.
///
/// Derivation is deterministic and collision-free across distinct
/// `(app_name, config_name, release_hash)` tuples; the container-name scheme
/// preserves that uniqueness.
#[derive(Debug, Clone)]
pub struct ContainerPaths {
    /// Per-instance root, removed wholesale by teardown.
    pub proc_path: PathBuf,

    /// Overlay upper/writable layer; the container's `/`.
    pub container_path: PathBuf,

    /// Overlay work layer, used by modern engine dialects.
    pub work_path: PathBuf,

    /// Application directory inside the rootfs where builds unpack.
    pub app_path: PathBuf,

    /// Shared cache of downloaded build artifacts.
    pub builds_root: PathBuf,

    /// Shared cache of downloaded and unpacked OS images.
    pub images_root: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RunnerRoot {
    /// Creates a root configuration from a directory path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// The root directory itself.
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Shared builds cache directory.
    pub fn builds_root(&self) -> PathBuf {
        self.0.join(BUILDS_SUBDIR)
    }

    /// Shared images cache directory.
    pub fn images_root(&self) -> PathBuf {
        self.0.join(IMAGES_SUBDIR)
    }

    /// Directory holding per-process container trees.
    pub fn procs_root(&self) -> PathBuf {
        self.0.join(PROCS_SUBDIR)
    }
}

impl ContainerPaths {
    /// Derives the full layout for a process instance under a root.
    pub fn derive(spec: &ProcessSpec, root: &RunnerRoot) -> Self {
        let proc_path = root.procs_root().join(container_name(spec));
        let container_path = proc_path.join(ROOTFS_SUBDIR);
        let work_path = proc_path.join(WORK_SUBDIR);
        let app_path = container_path.join(APP_SUBDIR);

        Self {
            proc_path,
            container_path,
            work_path,
            app_path,
            builds_root: root.builds_root(),
            images_root: root.images_root(),
        }
    }

    /// Path of the rendered container descriptor.
    pub fn descriptor_path(&self) -> PathBuf {
        self.proc_path.join(PROC_DESCRIPTOR_FILENAME)
    }

    /// Path in the shared builds cache a build URL downloads to.
    pub fn buildfile_path(&self, build_url: &str) -> ProcboxResult<PathBuf> {
        Ok(self.builds_root.join(url_basename(build_url)?))
    }

    /// Directory a named image's artifacts live in.
    pub fn image_dir(&self, image_name: &str) -> PathBuf {
        self.images_root.join(image_name)
    }

    /// Directory a named image unpacks into.
    pub fn image_contents(&self, image_name: &str) -> PathBuf {
        self.image_dir(image_name).join(IMAGE_CONTENTS_SUBDIR)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Derives the primary container name for a process instance.
pub fn container_name(spec: &ProcessSpec) -> String {
    format!(
        "{}-{}-{}-{}-{}-{}",
        spec.app_name, spec.version, spec.config_name, spec.release_hash, spec.proc_name, spec.port
    )
}

/// Extracts the trailing file name component of a URL.
pub fn url_basename(url: &str) -> ProcboxResult<String> {
    let base = url.rsplit('/').next().unwrap_or("");
    if base.is_empty() {
        return Err(ProcboxError::Config(format!(
            "cannot derive a file name from url {}",
            url
        )));
    }
    Ok(base.to_string())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
