//! Maintenance sweep: auto-unlocks expired lockouts and garbage-collects
//! dead tokens. Intended to run on a schedule; every step is idempotent
//! so overlapping runs are harmless.

use std::sync::Arc;

use chrono::Duration;
use tracing::info;

use crate::config::AuthConfig;
use crate::error::Result;
use crate::store::{Clock, LockoutStore};

use super::{LockoutManager, TokenLedger, VerificationTokenEngine};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub lockouts_unlocked: u64,
    pub verification_tokens_purged: u64,
    pub refresh_tokens_purged: u64,
}

pub struct MaintenanceSweeper {
    lockout_store: Arc<dyn LockoutStore>,
    lockouts: Arc<LockoutManager>,
    ledger: Arc<TokenLedger>,
    verifications: Arc<VerificationTokenEngine>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl MaintenanceSweeper {
    pub fn new(
        lockout_store: Arc<dyn LockoutStore>,
        lockouts: Arc<LockoutManager>,
        ledger: Arc<TokenLedger>,
        verifications: Arc<VerificationTokenEngine>,
        clock: Arc<dyn Clock>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            lockout_store,
            lockouts,
            ledger,
            verifications,
            clock,
            retention: Duration::days(config.token_retention_days),
        }
    }

    pub async fn run(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for lockout in self.lockout_store.find_expired_active(now).await? {
            if self.lockouts.auto_unlock(lockout, now).await? {
                report.lockouts_unlocked += 1;
            }
        }

        report.verification_tokens_purged = self.verifications.purge_dead(now).await?;
        report.refresh_tokens_purged = self.ledger.purge_dead(self.retention, now).await?;

        info!(
            lockouts_unlocked = report.lockouts_unlocked,
            verification_tokens_purged = report.verification_tokens_purged,
            refresh_tokens_purged = report.refresh_tokens_purged,
            "maintenance sweep finished"
        );
        Ok(report)
    }
}
