//! Engine version detection, config dialect selection, and invocation plumbing.

mod dialect;
mod invocation;
mod version;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use dialect::*;
pub use invocation::*;
pub use version::*;
