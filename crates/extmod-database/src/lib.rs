//! # extmod-database
//!
//! Persistence for module identities and module settings:
//!
//! - PostgreSQL connection management and migrations
//! - [`PgSettingsRepository`], which serializes writers with
//!   transaction-scoped advisory locks and retries deadlocked statements
//! - [`MemorySettingsRepository`] (feature `memory`), an in-process backend
//!   with the same locking contract

pub mod connection;
#[cfg(feature = "memory")]
pub mod memory;
pub mod migration;
pub mod repositories;
pub mod retry;

pub use connection::DatabasePool;
#[cfg(feature = "memory")]
pub use memory::MemorySettingsRepository;
pub use repositories::PgSettingsRepository;
pub use retry::DeadlockRetry;
