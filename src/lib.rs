//! # WhyStack API Library
//!
//! Keeps a decision record next to every GitHub pull request of an imported
//! repository. GitHub webhooks drive pull request state; users document the
//! decision behind each change through the REST API.

pub mod auth;
pub mod cascade;
pub mod config;
pub mod crypto;
pub mod db;
pub mod decisions;
pub mod error;
pub mod github;
pub mod handlers;
pub mod initial_sync;
pub mod models;
pub mod reconciler;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod webhook_events;
pub mod webhook_verification;
pub use migration;

#[cfg(test)]
pub(crate) mod test_support;
