//! Core traits defined in `extmod-core` and implemented by other crates.

pub mod notifier;
pub mod permission;
pub mod repository;

pub use notifier::AdminNotifier;
pub use permission::PermissionSource;
pub use repository::{SettingsRepository, SettingsTransaction};
