//! Small filesystem helpers.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::ProcboxResult;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Adds owner/group/other execute bits to a file's existing mode.
pub fn make_executable(path: impl AsRef<Path>) -> ProcboxResult<()> {
    let path = path.as_ref();
    let mode = fs::metadata(path)?.permissions().mode();
    fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o111))?;
    Ok(())
}

/// Checks whether any execute bit is set on a file.
pub fn is_executable(path: impl AsRef<Path>) -> ProcboxResult<bool> {
    let mode = fs::metadata(path.as_ref())?.permissions().mode();
    Ok(mode & 0o111 != 0)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_executable_adds_bits_without_replacing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        fs::write(&path, "#!/bin/bash\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        make_executable(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o751);
        assert!(is_executable(&path).unwrap());
    }
}
