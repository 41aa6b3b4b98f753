/// Account aggregate: identity, credentials, status and login counters.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AuthError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Pending,
    Active,
    Suspended,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub status: AccountStatus,
    pub email_verified: bool,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub last_failed_login_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency version, bumped by the store on write.
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account in `Pending` status.
    ///
    /// Username and email are normalized to lowercase-trimmed form.
    pub fn new(username: &str, email: &str, password_hash: &str, now: DateTime<Utc>) -> Result<Self> {
        if username.trim().is_empty() {
            return Err(AuthError::Validation("username must not be blank".into()));
        }
        if email.trim().is_empty() {
            return Err(AuthError::Validation("email must not be blank".into()));
        }
        if password_hash.trim().is_empty() {
            return Err(AuthError::Validation("password hash must not be blank".into()));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            username: username.trim().to_lowercase(),
            email: email.trim().to_lowercase(),
            password_hash: password_hash.to_string(),
            status: AccountStatus::Pending,
            email_verified: false,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            last_login_ip: None,
            last_failed_login_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    /// Record a successful login: stamps login metadata, resets the
    /// failed-attempt counter and clears any counter-based lock.
    pub fn record_login_success(mut self, ip: Option<&str>, now: DateTime<Utc>) -> Self {
        self.last_login_at = Some(now);
        self.last_login_ip = ip.map(str::to_string);
        self.failed_login_attempts = 0;
        self.locked_until = None;
        self.updated_at = now;
        self
    }

    /// Record a failed login attempt.
    ///
    /// The account does not lock itself; the orchestrator owns the
    /// threshold policy. Concurrent logins must use the store's atomic
    /// increment instead of persisting this value blindly.
    pub fn record_login_failure(mut self, now: DateTime<Utc>) -> Self {
        self.failed_login_attempts += 1;
        self.last_failed_login_at = Some(now);
        self.updated_at = now;
        self
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }

    pub fn can_login(&self, now: DateTime<Utc>) -> bool {
        self.status == AccountStatus::Active && !self.is_locked(now)
    }

    pub fn is_deleted(&self) -> bool {
        self.status == AccountStatus::Deleted
    }

    /// Transition to `Active`. Deleted accounts are terminal.
    pub fn activate(self, now: DateTime<Utc>) -> Result<Self> {
        self.transition(AccountStatus::Active, now)
    }

    /// Transition to `Suspended`. Deleted accounts are terminal.
    pub fn suspend(self, now: DateTime<Utc>) -> Result<Self> {
        self.transition(AccountStatus::Suspended, now)
    }

    /// Transition to `Deleted`. Terminal; no further transitions.
    pub fn delete(mut self, now: DateTime<Utc>) -> Result<Self> {
        if self.is_deleted() {
            return Err(AuthError::StateConflict("account is already deleted".into()));
        }
        self.status = AccountStatus::Deleted;
        self.updated_at = now;
        Ok(self)
    }

    fn transition(mut self, status: AccountStatus, now: DateTime<Utc>) -> Result<Self> {
        if self.is_deleted() {
            return Err(AuthError::StateConflict(
                "deleted accounts permit no status transition".into(),
            ));
        }
        self.status = status;
        self.updated_at = now;
        Ok(self)
    }

    /// Mark the email verified and activate a pending account.
    pub fn verify_email(mut self, now: DateTime<Utc>) -> Result<Self> {
        self.email_verified = true;
        if self.status == AccountStatus::Pending {
            self = self.transition(AccountStatus::Active, now)?;
        }
        self.updated_at = now;
        Ok(self)
    }

    /// Change the email address; the new address requires re-verification.
    pub fn change_email(mut self, new_email: &str, now: DateTime<Utc>) -> Result<Self> {
        if new_email.trim().is_empty() {
            return Err(AuthError::Validation("email must not be blank".into()));
        }
        self.email = new_email.trim().to_lowercase();
        self.email_verified = false;
        self.updated_at = now;
        Ok(self)
    }

    pub fn update_password(mut self, new_hash: &str, now: DateTime<Utc>) -> Result<Self> {
        if new_hash.trim().is_empty() {
            return Err(AuthError::Validation("password hash must not be blank".into()));
        }
        self.password_hash = new_hash.to_string();
        self.updated_at = now;
        Ok(self)
    }

    pub fn lock_until(mut self, until: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        self.locked_until = Some(until);
        self.updated_at = now;
        self
    }

    pub fn clear_lock(mut self, now: DateTime<Utc>) -> Self {
        self.locked_until = None;
        self.failed_login_attempts = 0;
        self.updated_at = now;
        self
    }
}
