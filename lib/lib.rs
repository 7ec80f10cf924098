//! `procbox` is a provisioning and lifecycle engine for LXC process containers.
//!
//! # Overview
//!
//! procbox turns a declarative process descriptor into a fully configured,
//! launchable container directory tree, and hands process control to the
//! external LXC engine. It handles:
//! - Container skeleton provisioning and boot-time artifact generation
//! - Idempotent build/image artifact acquisition with checksum verification
//! - Overlay layer composition over shared OS base images
//! - Three generations of engine config dialects behind one version table
//! - Per-command descriptor-file locking and process handoff
//!
//! # Architecture
//!
//! procbox consists of several key components:
//!
//! - **Engine**: engine version detection, config dialect selection, and
//!   invocation argument construction
//! - **Management**: artifact fetching, archive extraction, container
//!   provisioning, and the command lifecycle state machine
//! - **Config**: the process descriptor model
//! - **Utils**: path derivation, environment helpers, checksums
//!
//! # Modules
//!
//! - [`config`] - Process descriptor types and validation
//! - [`engine`] - Engine version, dialect table, and invocation plumbing
//! - [`management`] - Provisioning, image handling, and lifecycle control
//! - [`utils`] - Common utilities and helpers

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod config;
pub mod engine;
pub mod management;
pub mod utils;

pub use error::*;
