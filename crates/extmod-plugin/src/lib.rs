//! # extmod-plugin
//!
//! Module host runtime for extmod. Provides:
//!
//! - Typed, project-scoped module settings with lock-serialized writes
//! - Module registry resolving installed versions and per-project enablement
//! - Hook dispatcher with permission gating, a cooperative delay protocol,
//!   re-entrancy guards, per-module fault containment and result resolution
//! - Compiled-in module loading and the [`ModuleHost`] entry point

pub mod hooks;
pub mod host;
pub mod loader;
pub mod notifier;
pub mod permissions;
pub mod registry;
pub mod settings;

pub use hooks::context::{HookCall, RequestScope};
pub use hooks::definitions::{DispatchOutcome, HookArgs, HookHandler, HookOutcome};
pub use hooks::dispatcher::HookDispatcher;
pub use hooks::runner::HookRunner;
pub use host::ModuleHost;
pub use loader::{ModuleInstance, ModuleLoader, StaticModuleLoader};
pub use notifier::TracingNotifier;
pub use permissions::ManifestPermissions;
pub use registry::ModuleRegistry;
pub use settings::{ModuleSettings, SettingsStore};
