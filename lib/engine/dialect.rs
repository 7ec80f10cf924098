//! The engine config dialect table.
//!
//! The engine's config syntax changed incompatibly across major versions.
//! All version-conditional generation in procbox is driven by the fixed
//! [`Dialect`] derived here; nothing else compares versions.

use super::EngineVersion;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// First version that requires an explicit network isolation stanza.
pub const NETWORK_ISOLATION_MIN: EngineVersion = EngineVersion::new(1, 0, 0);

/// First version of the modern engine generation (renamed overlay keyword,
/// workdir clause, explicit foreground flag).
pub const MODERN_ENGINE_MIN: EngineVersion = EngineVersion::new(2, 0, 0);

/// The stanza emitted to disable engine-managed networking.
pub const NETWORK_ISOLATION_STANZA: &str = "lxc.network.type = none";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The version-specific subset of config syntax and flags the engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    /// Whether the descriptor carries the network isolation stanza.
    pub emits_network_isolation: bool,

    /// Keyword used for the overlay union mount directive.
    pub overlay_keyword: &'static str,

    /// Whether the overlay directive names a work layer.
    pub emits_workdir_clause: bool,

    /// Whether the start invocation must pass an explicit foreground flag.
    pub requires_foreground_flag: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Dialect {
    /// Maps an engine version to its config dialect.
    pub fn for_version(version: &EngineVersion) -> Self {
        if *version >= MODERN_ENGINE_MIN {
            Self {
                emits_network_isolation: true,
                overlay_keyword: "overlay",
                emits_workdir_clause: true,
                requires_foreground_flag: true,
            }
        } else if *version >= NETWORK_ISOLATION_MIN {
            Self {
                emits_network_isolation: true,
                overlay_keyword: "overlayfs",
                emits_workdir_clause: false,
                requires_foreground_flag: false,
            }
        } else {
            Self {
                emits_network_isolation: false,
                overlay_keyword: "overlayfs",
                emits_workdir_clause: false,
                requires_foreground_flag: false,
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
