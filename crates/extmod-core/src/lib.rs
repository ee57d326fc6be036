//! # extmod-core
//!
//! Core crate for the extmod module host. Contains the collaborator traits
//! (settings repository, permission source, admin notifier),
//! configuration schemas, typed identifiers, the typed setting value, and
//! the unified error system.
//!
//! This crate has **no** internal dependencies on other extmod crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
