//! Container provisioning and lifecycle management.

pub mod archive;
pub mod fetch;
pub mod image;
pub mod lifecycle;
pub mod provision;
