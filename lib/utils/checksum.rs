//! Content digest helpers.

use std::io::Read;
use std::path::Path;

use md5::{Digest, Md5};

use crate::ProcboxResult;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Computes the lowercase hex MD5 digest of a file's content.
///
/// MD5 is what the artifact format declares (`build_md5`, `image_md5`); it is
/// an integrity check against truncated or stale downloads, not a security
/// boundary.
pub fn file_md5(path: impl AsRef<Path>) -> ProcboxResult<String> {
    let mut file = std::fs::File::open(path.as_ref())?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
