//! Engine version detection and comparison.

use std::fmt;
use std::str::FromStr;

use crate::{ProcboxError, ProcboxResult};

use super::ENGINE_START_BIN;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A three-component engine version, ordered lexicographically.
///
/// This is the single source of branching for all version-dependent config
/// generation; everything else consumes the derived [`Dialect`](super::Dialect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EngineVersion {
    /// Major version component.
    pub major: u32,
    /// Minor version component.
    pub minor: u32,
    /// Patch version component.
    pub patch: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EngineVersion {
    /// Creates a version from its components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for EngineVersion {
    type Err = ProcboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut components = s.trim().split('.').map(|c| {
            // Tolerate distro suffixes like "8~rc1" on the last component.
            let digits: String = c.chars().take_while(|ch| ch.is_ascii_digit()).collect();
            digits.parse::<u32>()
        });

        let major = components
            .next()
            .and_then(|c| c.ok())
            .ok_or_else(|| ProcboxError::EngineVersion(format!("unparseable version {:?}", s)))?;
        let minor = components.next().and_then(|c| c.ok()).unwrap_or(0);
        let patch = components.next().and_then(|c| c.ok()).unwrap_or(0);

        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Detects the installed engine version by asking the engine binary itself.
///
/// ## Errors
///
/// Returns [`ProcboxError::EngineVersion`] when the binary cannot be run or
/// its output does not end in a parseable version.
pub async fn detect_version() -> ProcboxResult<EngineVersion> {
    let output = tokio::process::Command::new(ENGINE_START_BIN)
        .arg("--version")
        .output()
        .await
        .map_err(|e| {
            ProcboxError::EngineVersion(format!("failed to run {}: {}", ENGINE_START_BIN, e))
        })?;

    if !output.status.success() {
        return Err(ProcboxError::EngineVersion(format!(
            "{} --version exited with {}",
            ENGINE_START_BIN, output.status
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let token = text.split_whitespace().last().ok_or_else(|| {
        ProcboxError::EngineVersion(format!("{} --version produced no output", ENGINE_START_BIN))
    })?;

    token.parse()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_version() {
        let v: EngineVersion = "2.0.8".parse().unwrap();
        assert_eq!(v, EngineVersion::new(2, 0, 8));
    }

    #[test]
    fn test_parse_short_version_defaults_missing_components() {
        let v: EngineVersion = "1.0".parse().unwrap();
        assert_eq!(v, EngineVersion::new(1, 0, 0));
    }

    #[test]
    fn test_parse_tolerates_distro_suffix() {
        let v: EngineVersion = "2.0.8~rc1".parse().unwrap();
        assert_eq!(v, EngineVersion::new(2, 0, 8));
    }

    #[test]
    fn test_parse_garbage_is_fatal() {
        let err = "not-a-version".parse::<EngineVersion>().unwrap_err();
        assert!(matches!(err, ProcboxError::EngineVersion(_)));
    }

    #[test]
    fn test_ordering() {
        let old: EngineVersion = "0.9.9".parse().unwrap();
        let one: EngineVersion = "1.0.8".parse().unwrap();
        let two: EngineVersion = "2.0.1".parse().unwrap();
        assert!(old < one);
        assert!(one < two);
        assert!(one >= EngineVersion::new(1, 0, 0));
        assert!(two >= EngineVersion::new(2, 0, 0));
    }
}
