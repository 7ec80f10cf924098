//! Utility functions and types.

pub mod checksum;
pub mod env;
pub mod file;
pub mod path;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use checksum::*;
pub use env::*;
pub use file::*;
pub use path::*;
