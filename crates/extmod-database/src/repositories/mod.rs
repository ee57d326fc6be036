//! PostgreSQL repository implementations.

pub mod module;
pub mod settings;

pub use module::ModuleRepository;
pub use settings::PgSettingsRepository;
