//! Idempotent artifact fetching.
//!
//! Downloads go to a temporary file on the destination's filesystem and are
//! renamed into place, so a failed or partial transfer never leaves an
//! inconsistent file at the destination. Concurrent fetches of the same
//! artifact are a benign race: the atomic rename makes either run converge
//! the cache to equivalent content.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::utils::checksum::file_md5;
use crate::{ProcboxError, ProcboxResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Makes sure the resource at `url` is present at `dest`.
///
/// When `dest` already exists and either no digest was given or the file
/// matches it, no network I/O happens at all. A post-download digest mismatch
/// triggers exactly one re-download; a second mismatch is fatal.
///
/// ## Errors
///
/// * [`ProcboxError::Download`] on any transport failure
/// * [`ProcboxError::ChecksumMismatch`] when the re-download still mismatches
pub async fn ensure_file(url: &str, dest: &Path, md5sum: Option<&str>) -> ProcboxResult<()> {
    if dest.is_file() {
        match md5sum {
            None => return Ok(()),
            Some(expected) if file_md5(dest)? == expected => return Ok(()),
            Some(_) => {
                tracing::warn!("{} exists but does not match digest, re-fetching", dest.display());
            }
        }
    }

    download_file(url, dest).await?;

    if let Some(expected) = md5sum {
        let actual = file_md5(dest)?;
        if actual != expected {
            tracing::warn!(
                "downloaded {} hashed to {}, expected {}; retrying once",
                url,
                actual,
                expected
            );
            download_file(url, dest).await?;
            let actual = file_md5(dest)?;
            if actual != expected {
                return Err(ProcboxError::ChecksumMismatch {
                    path: dest.to_path_buf(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
    }

    Ok(())
}

/// Downloads `url` into `dest` through a same-filesystem temp file.
async fn download_file(url: &str, dest: &Path) -> ProcboxResult<()> {
    tracing::info!("downloading {}", url);

    let parent = dest.parent().ok_or_else(|| {
        ProcboxError::Config(format!("destination {} has no parent", dest.display()))
    })?;
    std::fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;

    let mut response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| ProcboxError::Download {
            url: url.to_string(),
            source: e,
        })?;

    while let Some(chunk) = response.chunk().await.map_err(|e| ProcboxError::Download {
        url: url.to_string(),
        source: e,
    })? {
        temp.write_all(&chunk)?;
    }
    temp.flush()?;

    // The temp file is discarded on any error above; only a complete
    // download reaches the atomic rename.
    temp.persist(dest).map_err(|e| ProcboxError::Io(e.error))?;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
