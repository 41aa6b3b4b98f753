/// Verification token model, shared by email verification and password
/// reset. Single use, attempt limited, expiring.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AuthError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "verification_purpose", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationPurpose {
    Registration,
    EmailChange,
    PasswordReset,
}

impl VerificationPurpose {
    /// Attempt budget per purpose. Password resets get a tighter budget
    /// because a reset token gates a credential change.
    pub fn max_attempts(self) -> i32 {
        match self {
            VerificationPurpose::Registration | VerificationPurpose::EmailChange => 5,
            VerificationPurpose::PasswordReset => 3,
        }
    }
}

/// Why a token cannot (or can) be verified right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Pending,
    Used,
    Locked,
    Expired,
    AttemptsExhausted,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VerificationToken {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub subject_email: String,
    /// SHA-256 digest of the raw token; the raw value is never stored.
    pub token_hash: String,
    pub purpose: VerificationPurpose,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub issuing_ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationToken {
    pub fn new(
        owner_id: Uuid,
        subject_email: &str,
        token_hash: &str,
        purpose: VerificationPurpose,
        expires_at: DateTime<Utc>,
        issuing_ip: Option<&str>,
        user_agent: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if subject_email.trim().is_empty() {
            return Err(AuthError::Validation("subject email must not be blank".into()));
        }
        if token_hash.trim().is_empty() {
            return Err(AuthError::Validation("token hash must not be blank".into()));
        }
        if expires_at <= now {
            return Err(AuthError::Validation("expiry must be in the future".into()));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            owner_id,
            subject_email: subject_email.trim().to_lowercase(),
            token_hash: token_hash.to_string(),
            purpose,
            used: false,
            used_at: None,
            expires_at,
            attempts: 0,
            max_attempts: purpose.max_attempts(),
            locked: false,
            locked_at: None,
            active: true,
            issuing_ip: issuing_ip.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn can_verify(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.used && !self.locked && !self.is_expired(now) && !self.attempts_exhausted()
    }

    pub fn status(&self, now: DateTime<Utc>) -> VerificationStatus {
        if self.used {
            VerificationStatus::Used
        } else if self.locked {
            VerificationStatus::Locked
        } else if self.is_expired(now) {
            VerificationStatus::Expired
        } else if self.attempts_exhausted() {
            VerificationStatus::AttemptsExhausted
        } else if !self.active {
            VerificationStatus::Inactive
        } else {
            VerificationStatus::Pending
        }
    }

    /// Record a failed verification attempt. The attempt that reaches
    /// `max_attempts` locks the token in the same transition.
    pub fn record_failed_attempt(mut self, now: DateTime<Utc>) -> Self {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            self.locked = true;
            self.locked_at = Some(now);
        }
        self.updated_at = now;
        self
    }

    /// Consume the token after a successful verification. Single use:
    /// the token is deactivated in the same transition.
    pub fn mark_used(mut self, now: DateTime<Utc>) -> Self {
        self.used = true;
        self.used_at = Some(now);
        self.active = false;
        self.updated_at = now;
        self
    }

    pub fn deactivate(mut self, now: DateTime<Utc>) -> Self {
        self.active = false;
        self.updated_at = now;
        self
    }

    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
        if self.is_expired(now) {
            return 0;
        }
        (self.expires_at - now).num_minutes()
    }

    pub fn remaining_attempts(&self) -> i32 {
        (self.max_attempts - self.attempts).max(0)
    }

    pub fn is_near_expiry(&self, now: DateTime<Utc>) -> bool {
        self.remaining_minutes(now) <= 10
    }

    /// Advisory IP check: an absent side counts as a match because
    /// client IPs shift under NAT and mobile networks.
    pub fn matches_ip(&self, ip: Option<&str>) -> bool {
        match (self.issuing_ip.as_deref(), ip) {
            (Some(stored), Some(presented)) => stored == presented,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reset_token(now: DateTime<Utc>) -> VerificationToken {
        VerificationToken::new(
            Uuid::new_v4(),
            "user@example.com",
            "digest",
            VerificationPurpose::PasswordReset,
            now + Duration::hours(1),
            Some("10.0.0.1"),
            None,
            now,
        )
        .unwrap()
    }

    #[test]
    fn attempt_budget_per_purpose() {
        assert_eq!(VerificationPurpose::Registration.max_attempts(), 5);
        assert_eq!(VerificationPurpose::EmailChange.max_attempts(), 5);
        assert_eq!(VerificationPurpose::PasswordReset.max_attempts(), 3);
    }

    #[test]
    fn final_attempt_locks_in_same_transition() {
        let now = Utc::now();
        let mut token = reset_token(now);
        token = token.record_failed_attempt(now);
        token = token.record_failed_attempt(now);
        assert!(!token.locked);
        assert_eq!(token.remaining_attempts(), 1);

        token = token.record_failed_attempt(now);
        assert!(token.locked);
        assert_eq!(token.remaining_attempts(), 0);
        assert!(!token.can_verify(now));
        assert_eq!(token.status(now), VerificationStatus::Locked);
    }

    #[test]
    fn mark_used_is_single_use() {
        let now = Utc::now();
        let token = reset_token(now).mark_used(now);
        assert!(token.used);
        assert!(!token.active);
        assert!(!token.can_verify(now));
        assert_eq!(token.status(now), VerificationStatus::Used);
    }

    #[test]
    fn expiry_blocks_verification() {
        let now = Utc::now();
        let token = reset_token(now);
        let later = now + Duration::hours(2);
        assert!(!token.can_verify(later));
        assert_eq!(token.status(later), VerificationStatus::Expired);
        assert_eq!(token.remaining_minutes(later), 0);
    }

    #[test]
    fn ip_check_is_advisory_on_absence() {
        let now = Utc::now();
        let token = reset_token(now);
        assert!(token.matches_ip(Some("10.0.0.1")));
        assert!(!token.matches_ip(Some("10.9.9.9")));
        assert!(token.matches_ip(None));
    }
}
