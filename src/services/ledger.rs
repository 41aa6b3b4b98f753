//! Refresh token ledger: issuance, series validation and rotation.
//!
//! A raw refresh token is `"{series}.{secret}"`. The series locates the
//! record; only the SHA-256 digest of the secret is stored, so a leaked
//! ledger cannot be replayed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::Result;
use crate::models::RefreshToken;
use crate::security::{digest_matches, generate_series, generate_token, sha256_hex, TOKEN_LENGTH};
use crate::store::RefreshTokenStore;

use super::ClientContext;

/// A freshly issued token: the raw value for the caller, the persisted
/// record for bookkeeping.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub raw: String,
    pub series: String,
    pub token: RefreshToken,
}

/// Result of resolving a presented series.
#[derive(Debug, Clone)]
pub enum TokenValidation {
    /// The series has a live, unexpired token.
    Valid(RefreshToken),
    /// No record under this series.
    NotFound,
    /// The series exists but its token is revoked or expired.
    Invalid(RefreshToken),
}

pub struct TokenLedger {
    store: Arc<dyn RefreshTokenStore>,
    ttl: Duration,
    rotation_window: Duration,
}

impl TokenLedger {
    pub fn new(store: Arc<dyn RefreshTokenStore>, config: &AuthConfig) -> Self {
        Self {
            store,
            ttl: Duration::days(config.refresh_token_ttl_days),
            rotation_window: Duration::minutes(config.rotation_window_minutes),
        }
    }

    /// Split a raw token into its series and secret halves.
    pub fn split_raw(raw: &str) -> Option<(&str, &str)> {
        let (series, secret) = raw.split_once('.')?;
        if series.is_empty() || secret.is_empty() {
            return None;
        }
        Some((series, secret))
    }

    /// Issue a new token under a fresh series.
    pub async fn issue(
        &self,
        owner_id: Uuid,
        context: &ClientContext,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        let series = generate_series();
        let secret = generate_token(TOKEN_LENGTH);
        let token = RefreshToken::new(
            owner_id,
            &sha256_hex(&secret),
            &series,
            now + self.ttl,
            context.fingerprint(),
            context.ip(),
            context.user_agent(),
            now,
        )?;
        let token = self.store.insert(token).await?;
        info!(owner_id = %owner_id, series = %series, "refresh token issued");
        Ok(IssuedToken {
            raw: format!("{series}.{secret}"),
            series,
            token,
        })
    }

    /// Resolve the current token of a series.
    pub async fn validate(&self, series: &str, now: DateTime<Utc>) -> Result<TokenValidation> {
        match self.store.find_by_series(series).await? {
            None => Ok(TokenValidation::NotFound),
            Some(token) if token.is_valid(now) => Ok(TokenValidation::Valid(token)),
            Some(token) => Ok(TokenValidation::Invalid(token)),
        }
    }

    /// Check a presented secret against a token's stored digest.
    pub fn matches_secret(&self, token: &RefreshToken, secret: &str) -> bool {
        digest_matches(secret, &token.token_hash)
    }

    /// Rotate the token when its remaining lifetime is at or below the
    /// rotation window; otherwise hand the current token back untouched.
    ///
    /// The successor stays in the predecessor's series and keeps its
    /// device fingerprint; the issuing IP and user agent are stamped
    /// from the current request.
    pub async fn rotate_if_near_expiry(
        &self,
        current: RefreshToken,
        context: &ClientContext,
        now: DateTime<Utc>,
    ) -> Result<(RefreshToken, Option<String>)> {
        if !current.is_near_expiry(self.rotation_window, now) {
            return Ok((current, None));
        }

        let secret = generate_token(TOKEN_LENGTH);
        let successor = RefreshToken::new(
            current.owner_id,
            &sha256_hex(&secret),
            &current.series,
            now + self.ttl,
            current.device_fingerprint.as_deref(),
            context.ip(),
            context.user_agent(),
            now,
        )?;
        let series = current.series.clone();
        let predecessor = current.revoke(None, now);
        let successor = self.store.replace_in_series(predecessor, successor).await?;
        info!(series = %series, "refresh token rotated");
        Ok((successor, Some(format!("{series}.{secret}"))))
    }

    /// Burn a whole series. Idempotent; returns how many tokens were
    /// newly revoked.
    pub async fn revoke_series(
        &self,
        series: &str,
        revoked_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let revoked = self.store.revoke_series(series, revoked_by, now).await?;
        if revoked > 0 {
            warn!(series = %series, revoked, "refresh token series revoked");
        }
        Ok(revoked)
    }

    /// Revoke every live token the owner holds, across all series.
    pub async fn revoke_all_for_owner(
        &self,
        owner_id: Uuid,
        revoked_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let revoked = self
            .store
            .revoke_all_for_owner(owner_id, revoked_by, now)
            .await?;
        info!(owner_id = %owner_id, revoked, "all sessions revoked");
        Ok(revoked)
    }

    /// Garbage-collect tokens dead for longer than the retention period.
    pub async fn purge_dead(&self, retention: Duration, now: DateTime<Utc>) -> Result<u64> {
        self.store.purge_dead(now - retention).await
    }
}
