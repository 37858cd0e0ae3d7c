//! Declarative reconciliation of cloud resources over an action-style API.
//!
//! - [`engine`] - attribute trees, wire encoding, call orchestration
//! - [`api`] - HTTP executor for the remote API
//! - [`resource`] - resource definitions and implementations
//! - [`config`] - persistent configuration

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod resource;

/// Version injected at compile time via CLOUDRECON_VERSION env var (set by
/// CI/CD), or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUDRECON_VERSION") {
    Some(v) => v,
    None => "dev",
};
