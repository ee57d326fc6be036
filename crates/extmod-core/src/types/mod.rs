//! Shared domain types used across all extmod crates.

pub mod id;
pub mod manifest;
pub mod setting;
pub mod value;

pub use id::{ModuleId, ProjectId};
pub use manifest::ModuleManifest;
pub use setting::{PrefixedSetting, StoredSetting};
pub use value::{SettingValue, TypeTag};
