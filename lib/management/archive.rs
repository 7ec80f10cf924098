//! Staged archive extraction.
//!
//! Archives are unpacked into a staging directory co-located with the
//! destination, then renamed into place, so any failure during extraction or
//! permission fixup leaves the destination exactly as it was before the call.

use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use nix::unistd::{chown, Gid, Uid};
use tar::Archive;

use crate::{ProcboxError, ProcboxResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Ownership applied to extracted trees: `(user, group)` names.
pub type Owners<'a> = (&'a str, &'a str);

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Unpacks `archive` to `dest`.
///
/// Compression is selected solely from the archive's file extension; only
/// `gz` and `bz2` are supported, and anything else fails before any I/O.
///
/// When `owners` is given, every extracted directory gets group/owner
/// read+execute added and every extracted regular, non-symlinked file gets
/// group/owner read+write added, and the tree is chowned to the pair.
///
/// When `dest` already exists, `overwrite=true` deletes it first and
/// `overwrite=false` fails with [`ProcboxError::Conflict`], discarding the
/// staged extraction.
pub fn extract(
    archive: &Path,
    dest: &Path,
    owners: Option<Owners<'_>>,
    overwrite: bool,
) -> ProcboxResult<()> {
    let ext = archive
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    if ext != "gz" && ext != "bz2" {
        return Err(ProcboxError::Extraction(format!(
            "{} must be a .gz or .bz2 file",
            archive.display()
        )));
    }

    // Resolve owner names up front so a bad name fails before any unpacking.
    let ids = owners.map(|o| resolve_owners(o)).transpose()?;

    let parent = dest.parent().ok_or_else(|| {
        ProcboxError::Extraction(format!("{} has no parent directory", dest.display()))
    })?;
    fs::create_dir_all(parent)?;

    // Staging lives on dest's filesystem so the final move is an atomic
    // rename rather than a cross-filesystem copy.
    let staging = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(parent)?;

    let file = fs::File::open(archive)?;
    let reader: Box<dyn Read> = match ext {
        "gz" => Box::new(GzDecoder::new(file)),
        _ => Box::new(BzDecoder::new(file)),
    };
    Archive::new(reader).unpack(staging.path()).map_err(|e| {
        ProcboxError::Extraction(format!("failed to unpack {}: {}", archive.display(), e))
    })?;

    if let Some((uid, gid)) = ids {
        fixup_tree(staging.path(), uid, gid)?;
    }

    if dest.exists() {
        if overwrite {
            fs::remove_dir_all(dest)?;
        } else {
            return Err(ProcboxError::Conflict {
                archive: archive.to_path_buf(),
                dest: dest.to_path_buf(),
            });
        }
    }

    let staged = staging.into_path();
    fs::rename(&staged, dest)?;
    Ok(())
}

/// Looks up `(user, group)` names as uid/gid.
fn resolve_owners((user, group): Owners<'_>) -> ProcboxResult<(Uid, Gid)> {
    let uid = uzers::get_user_by_name(user)
        .map(|u| Uid::from_raw(u.uid()))
        .ok_or_else(|| ProcboxError::Config(format!("unknown user {}", user)))?;
    let gid = uzers::get_group_by_name(group)
        .map(|g| Gid::from_raw(g.gid()))
        .ok_or_else(|| ProcboxError::Config(format!("unknown group {}", group)))?;
    Ok((uid, gid))
}

/// Normalizes ownership and permissions across an extracted tree.
///
/// Adds bits to the existing mode rather than replacing it; symlinks are
/// left alone entirely.
fn fixup_tree(dir: &Path, uid: Uid, gid: Gid) -> ProcboxResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let meta = fs::symlink_metadata(&path)?;
        let file_type = meta.file_type();

        if file_type.is_dir() {
            chown(&path, Some(uid), Some(gid))?;
            add_mode_bits(&path, meta.permissions().mode(), 0o550)?;
            fixup_tree(&path, uid, gid)?;
        } else if file_type.is_file() {
            chown(&path, Some(uid), Some(gid))?;
            add_mode_bits(&path, meta.permissions().mode(), 0o660)?;
        }
    }
    Ok(())
}

fn add_mode_bits(path: &Path, mode: u32, bits: u32) -> ProcboxResult<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode | bits))?;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
