//! Gateway HTTP API module.
pub mod error;
pub mod locale;
pub mod openapi;
pub mod rbac;
pub mod sessions;
pub mod system;
pub mod types;
