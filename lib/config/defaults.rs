//! Default values used across procbox.

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default root directory under which all procbox state lives.
pub const DEFAULT_ROOT: &str = "/apps";
