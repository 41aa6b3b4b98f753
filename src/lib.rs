//! Authentication and credential-lifecycle core.
//!
//! Login with lockout policy, refresh-token rotation with replay
//! detection, email verification and password reset with attempt
//! budgets, and a maintenance sweep. Persistence, rate limiting, mail
//! and access-token minting sit behind collaborator traits; a transport
//! layer wraps the orchestrator's methods.

pub mod config;
pub mod error;
pub mod models;
pub mod security;
pub mod services;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod tests;

pub use config::AuthConfig;
pub use error::{AuthError, Result};
pub use services::{AuthenticationOrchestrator, ClientContext};
