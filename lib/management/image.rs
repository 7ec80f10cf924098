//! OS base image acquisition and image-specific container plumbing.
//!
//! Base images are shared across processes under the images root. An already
//! unpacked image is trusted as-is: no existence recheck, no re-verification.
//! Two concurrent first-time provisionings of the same image are a benign,
//! documented race; the staged extraction's atomic rename makes either run
//! converge the cache to equivalent content.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::sys::stat::{makedev, mknod, umask, Mode, SFlag};

use crate::config::ProcessSpec;
use crate::utils::path::{url_basename, ContainerPaths, IMAGE_CONTENTS_SUBDIR};
use crate::{ProcboxError, ProcboxResult};

use super::{archive, fetch};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Character device nodes provisioned inside the container's `/dev`:
/// `(path inside rootfs, (major, minor), permission bits)`.
pub const CHAR_DEVICES: [(&str, (u64, u64), u32); 4] = [
    ("dev/null", (1, 3), 0o666),
    ("dev/zero", (1, 5), 0o666),
    ("dev/random", (1, 8), 0o444),
    ("dev/urandom", (1, 9), 0o444),
];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A base-image strategy: how (and whether) a container gets a read-only
/// lower layer for its overlay union mount.
#[async_trait]
pub trait BaseImage: Send + Sync {
    /// Makes sure the base image is present and unpacked, returning the path
    /// of the lower layer, or `None` when the container runs without one.
    async fn ensure_base(
        &self,
        spec: &ProcessSpec,
        paths: &ContainerPaths,
    ) -> ProcboxResult<Option<PathBuf>>;
}

/// No base image: the writable rootfs is the container's entire tree.
pub struct NoBaseImage;

/// A base image downloaded from `image_url` and unpacked into the shared
/// images root, keyed by `image_name`.
pub struct RemoteImage;

/// A fixed, pre-baked image tree already present on disk.
pub struct PreparedImage {
    /// Path of the unpacked image contents.
    pub contents: PathBuf,
}

/// Scoped override of the process-wide file-creation mask.
///
/// The previous mask is restored on drop, on every exit path including
/// failure.
struct UmaskGuard {
    prev: Mode,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl BaseImage for NoBaseImage {
    async fn ensure_base(
        &self,
        _spec: &ProcessSpec,
        _paths: &ContainerPaths,
    ) -> ProcboxResult<Option<PathBuf>> {
        Ok(None)
    }
}

#[async_trait]
impl BaseImage for RemoteImage {
    async fn ensure_base(
        &self,
        spec: &ProcessSpec,
        paths: &ContainerPaths,
    ) -> ProcboxResult<Option<PathBuf>> {
        let name = spec
            .image_name
            .as_deref()
            .ok_or_else(|| ProcboxError::Config("image_name is required".to_string()))?;
        let url = spec
            .image_url
            .as_deref()
            .ok_or_else(|| ProcboxError::Config("image_url is required".to_string()))?;

        let contents = paths.image_contents(name);
        if contents.exists() {
            tracing::info!(
                "os image directory {} exists, not overwriting",
                contents.display()
            );
            return Ok(Some(contents));
        }

        ensure_image(
            name,
            url,
            &paths.images_root,
            spec.image_md5.as_deref(),
            Some(&contents),
        )
        .await?;
        Ok(Some(contents))
    }
}

#[async_trait]
impl BaseImage for PreparedImage {
    async fn ensure_base(
        &self,
        _spec: &ProcessSpec,
        _paths: &ContainerPaths,
    ) -> ProcboxResult<Option<PathBuf>> {
        if !self.contents.is_dir() {
            return Err(ProcboxError::Config(format!(
                "prepared image {} does not exist",
                self.contents.display()
            )));
        }
        Ok(Some(self.contents.clone()))
    }
}

impl UmaskGuard {
    fn set(mask: Mode) -> Self {
        Self { prev: umask(mask) }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        umask(self.prev);
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Selects the base-image strategy a descriptor calls for.
pub fn strategy_for(spec: &ProcessSpec) -> Box<dyn BaseImage> {
    if spec.image_name.is_some() || spec.image_url.is_some() {
        Box::new(RemoteImage)
    } else {
        Box::new(NoBaseImage)
    }
}

/// Makes sure the OS image at `url` is downloaded and, when `untar_to` is
/// given, unpacked there.
pub async fn ensure_image(
    name: &str,
    url: &str,
    images_root: &Path,
    md5sum: Option<&str>,
    untar_to: Option<&Path>,
) -> ProcboxResult<()> {
    let image_dir = images_root.join(name);
    std::fs::create_dir_all(&image_dir)?;

    let image_file = image_dir.join(url_basename(url)?);
    fetch::ensure_file(url, &image_file, md5sum).await?;

    if let Some(dest) = untar_to {
        prepare_image(&image_file, dest).await?;
    }
    Ok(())
}

/// Unpacks the OS image stored at `tarpath` to `dest` and prepares it for
/// use as a container lower layer.
pub async fn prepare_image(tarpath: &Path, dest: &Path) -> ProcboxResult<()> {
    let tarpath = tarpath.to_path_buf();
    let dest = dest.to_path_buf();

    let unpack_dest = dest.clone();
    tokio::task::spawn_blocking(move || archive::extract(&tarpath, &unpack_dest, None, true))
        .await
        .map_err(|e| ProcboxError::Extraction(format!("{:?}", e)))??;

    fixup_resolv_conf(&dest)?;
    Ok(())
}

/// Replaces a symlinked `/etc/resolv.conf` inside an unpacked image with an
/// empty regular file.
///
/// Some OSes ship it as a symlink to `/run/resolv.conf`, which cannot safely
/// be bind-mounted onto later.
pub fn fixup_resolv_conf(image_root: &Path) -> ProcboxResult<()> {
    let resolv = image_root.join("etc").join("resolv.conf");
    let is_symlink = std::fs::symlink_metadata(&resolv)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);

    if is_symlink {
        tracing::info!("replacing symlinked {} with an empty file", resolv.display());
        std::fs::remove_file(&resolv)?;
        std::fs::write(&resolv, "")?;
    }
    Ok(())
}

/// Provisions the fixed set of character device nodes under the rootfs.
pub fn ensure_char_devices(container_path: &Path) -> ProcboxResult<()> {
    tracing::info!("making device nodes");
    for (rel, devnums, perms) in CHAR_DEVICES {
        ensure_char_device(&container_path.join(rel), devnums, perms)?;
    }
    Ok(())
}

/// Creates one character device node with exactly the requested permission
/// bits, skipping (with a log message) when a file already exists at the
/// path. No mode or device-number correction is attempted for existing
/// files.
pub fn ensure_char_device(path: &Path, devnums: (u64, u64), perms: u32) -> ProcboxResult<()> {
    if path.exists() {
        tracing::info!("{} already exists, skipping", path.display());
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(
        "mknod -m {:o} {} c {} {}",
        perms,
        path.display(),
        devnums.0,
        devnums.1
    );

    // mknod honors the process umask, which would strip bits from the
    // requested mode; zero it for the duration of the call.
    let _guard = UmaskGuard::set(Mode::empty());
    mknod(
        path,
        SFlag::S_IFCHR,
        Mode::from_bits_truncate(perms),
        makedev(devnums.0, devnums.1),
    )?;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
