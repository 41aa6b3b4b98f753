//! Verification token engine: issuance and attempt-limited consumption
//! of email-verification and password-reset tokens.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{VerificationPurpose, VerificationStatus, VerificationToken};
use crate::security::{digest_matches, generate_token, sha256_hex, TOKEN_LENGTH};
use crate::store::VerificationTokenStore;

use super::ClientContext;

/// Outcome of a verification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Token matched and was consumed.
    Verified,
    /// Token mismatched (or came from a different IP); an attempt was
    /// spent. The attempt that spends the last budget locks the token.
    WrongToken { remaining_attempts: i32 },
    /// Token cannot be verified in its current state. Nothing is spent.
    NotCanVerify { status: VerificationStatus },
    /// No record under this locator hash.
    NotFound,
}

pub struct VerificationTokenEngine {
    store: Arc<dyn VerificationTokenStore>,
}

impl VerificationTokenEngine {
    pub fn new(store: Arc<dyn VerificationTokenStore>) -> Self {
        Self { store }
    }

    /// Issue a fresh token for the owner and purpose, deactivating any
    /// prior live token of the same purpose first. Returns the raw token
    /// and the persisted record; only the digest is stored.
    pub async fn issue(
        &self,
        owner_id: Uuid,
        subject_email: &str,
        purpose: VerificationPurpose,
        ttl: Duration,
        context: &ClientContext,
        now: DateTime<Utc>,
    ) -> Result<(String, VerificationToken)> {
        let displaced = self.store.deactivate_live_for(owner_id, purpose, now).await?;
        if displaced > 0 {
            info!(owner_id = %owner_id, ?purpose, displaced, "prior verification tokens deactivated");
        }

        let raw = generate_token(TOKEN_LENGTH);
        let token = VerificationToken::new(
            owner_id,
            subject_email,
            &sha256_hex(&raw),
            purpose,
            now + ttl,
            context.ip(),
            context.user_agent(),
            now,
        )?;
        let token = self.store.insert(token).await?;
        info!(owner_id = %owner_id, ?purpose, "verification token issued");
        Ok((raw, token))
    }

    /// Locate a token record by its raw value.
    pub async fn find(&self, raw: &str) -> Result<Option<VerificationToken>> {
        self.store.find_by_hash(&sha256_hex(raw)).await
    }

    /// Non-consuming probe: reports what `attempt_verify` would return
    /// right now without spending an attempt or consuming the token.
    pub async fn validate(
        &self,
        token_hash: &str,
        presented: &str,
        ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<VerifyOutcome> {
        let Some(token) = self.store.find_by_hash(token_hash).await? else {
            return Ok(VerifyOutcome::NotFound);
        };
        if !token.can_verify(now) {
            return Ok(VerifyOutcome::NotCanVerify {
                status: token.status(now),
            });
        }
        if !digest_matches(presented, &token.token_hash) || !token.matches_ip(ip) {
            return Ok(VerifyOutcome::WrongToken {
                remaining_attempts: token.remaining_attempts(),
            });
        }
        Ok(VerifyOutcome::Verified)
    }

    /// Consuming verification. The hash locates the record; the presented
    /// value proves possession. A match marks the token used; a mismatch
    /// spends an attempt and persists the transition. The IP check is
    /// advisory: a mismatch costs an attempt, never a hard failure,
    /// because client IPs shift under NAT and mobile networks.
    pub async fn attempt_verify(
        &self,
        token_hash: &str,
        presented: &str,
        ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<VerifyOutcome> {
        let Some(token) = self.store.find_by_hash(token_hash).await? else {
            return Ok(VerifyOutcome::NotFound);
        };

        if !token.can_verify(now) {
            return Ok(VerifyOutcome::NotCanVerify {
                status: token.status(now),
            });
        }

        if !digest_matches(presented, &token.token_hash) || !token.matches_ip(ip) {
            let token = token.record_failed_attempt(now);
            let remaining = token.remaining_attempts();
            if token.locked {
                warn!(owner_id = %token.owner_id, ?token.purpose, "verification token locked after exhausted attempts");
            }
            self.store.update(token).await?;
            return Ok(VerifyOutcome::WrongToken {
                remaining_attempts: remaining,
            });
        }

        let owner_id = token.owner_id;
        let purpose = token.purpose;
        self.store.update(token.mark_used(now)).await?;
        info!(owner_id = %owner_id, ?purpose, "verification token consumed");
        Ok(VerifyOutcome::Verified)
    }

    /// Drop everything no longer verifiable: used, locked, deactivated
    /// or expired tokens.
    pub async fn purge_dead(&self, now: DateTime<Utc>) -> Result<u64> {
        self.store.purge_dead(now).await
    }
}
