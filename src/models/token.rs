/// Refresh token model
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AuthError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// SHA-256 digest of the secret half of the raw token. The raw value
    /// is returned to the caller exactly once and never stored.
    pub token_hash: String,
    /// Identifier linking a chain of rotated tokens. Exactly one token
    /// per series is valid at any instant.
    pub series: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<Uuid>,
    pub device_fingerprint: Option<String>,
    pub issuing_ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new(
        owner_id: Uuid,
        token_hash: &str,
        series: &str,
        expires_at: DateTime<Utc>,
        device_fingerprint: Option<&str>,
        issuing_ip: Option<&str>,
        user_agent: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if token_hash.trim().is_empty() {
            return Err(AuthError::Validation("token hash must not be blank".into()));
        }
        if series.trim().is_empty() {
            return Err(AuthError::Validation("token series must not be blank".into()));
        }
        if expires_at <= now {
            return Err(AuthError::Validation("expiry must be in the future".into()));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            owner_id,
            token_hash: token_hash.to_string(),
            series: series.to_string(),
            expires_at,
            revoked: false,
            revoked_at: None,
            revoked_by: None,
            device_fingerprint: device_fingerprint.map(str::to_string),
            issuing_ip: issuing_ip.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            created_at: now,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }

    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
        if self.is_expired(now) {
            return 0;
        }
        (self.expires_at - now).num_minutes()
    }

    /// Remaining lifetime at or below the rotation window.
    pub fn is_near_expiry(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.remaining_minutes(now) <= window.num_minutes()
    }

    /// Device/IP binding check: for each of fingerprint and IP, the
    /// stored and presented values must both be absent or both be equal.
    /// A mismatch on a present stored value is a token-theft signal.
    pub fn matches_context(&self, fingerprint: Option<&str>, ip: Option<&str>) -> bool {
        self.device_fingerprint.as_deref() == fingerprint && self.issuing_ip.as_deref() == ip
    }

    pub fn revoke(mut self, revoked_by: Option<Uuid>, now: DateTime<Utc>) -> Self {
        // Revoking twice is a no-op; the first revocation timestamp wins.
        if self.revoked {
            return self;
        }
        self.revoked = true;
        self.revoked_at = Some(now);
        self.revoked_by = revoked_by;
        self
    }
}
