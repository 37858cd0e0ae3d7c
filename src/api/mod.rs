//! Remote API interaction
//!
//! - [`client`] - [`ApiClient`], the HTTP [`ActionExecutor`](crate::engine::ActionExecutor)
//! - [`http`] - transport and error-body parsing
//! - [`projects`] - account project listing

pub mod client;
pub mod http;
pub mod projects;

pub use client::{ApiClient, Route};
