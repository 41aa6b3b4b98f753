//! Domain services. Each service owns one concern and talks to durable
//! state through the store traits; the orchestrator composes them into
//! the public operations.

pub mod authentication;
pub mod ledger;
pub mod lockout;
pub mod maintenance;
pub mod verification;

pub use authentication::{
    AuthOutcome, AuthenticationOrchestrator, ChangeEmailOutcome, LogoutOutcome, RefreshOutcome,
    RegisterCommand, RegisterOutcome, ResendOutcome, ResetExecuteOutcome, ResetRequestOutcome,
    ResetTokenProbe, RiskAssessment, RiskLevel, VerifyEmailOutcome,
};
pub use ledger::{IssuedToken, TokenLedger, TokenValidation};
pub use lockout::LockoutManager;
pub use maintenance::{MaintenanceSweeper, SweepReport};
pub use verification::{VerificationTokenEngine, VerifyOutcome};

/// Request metadata threaded through every operation for audit fields,
/// device binding and rate limiting.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
}

impl ClientContext {
    pub fn ip(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.device_fingerprint.as_deref()
    }
}
