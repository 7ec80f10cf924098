//! Process descriptor types and helpers.

mod defaults;
mod spec;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use spec::*;
