//! Hook system: handler contract, per-dispatch runner, request scope and
//! dispatcher.

pub mod context;
pub mod definitions;
pub mod dispatcher;
pub mod runner;
