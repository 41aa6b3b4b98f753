/// Account lockout model: time-bounded or permanent denial of login,
/// independent of password correctness.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AuthError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "lock_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    PasswordFailed,
    AccountSuspension,
    AdminAction,
    SecurityRisk,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lockout {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub lock_type: LockType,
    pub reason: String,
    pub permanent: bool,
    pub locked_at: DateTime<Utc>,
    /// None iff permanent.
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub unlock_reason: Option<String>,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub unlocked_by: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub failed_attempts: i32,
    /// Lockouts are treated as append-only/versioned; `extend` bumps this.
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lockout {
    #[allow(clippy::too_many_arguments)]
    pub fn temporary(
        owner_id: Uuid,
        lock_type: LockType,
        reason: &str,
        duration: Duration,
        created_by: Option<Uuid>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        failed_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if duration <= Duration::zero() {
            return Err(AuthError::Validation("lock duration must be positive".into()));
        }
        Ok(Self::build(
            owner_id,
            lock_type,
            reason,
            false,
            Some(now + duration),
            created_by,
            ip_address,
            user_agent,
            failed_attempts,
            now,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn permanent(
        owner_id: Uuid,
        lock_type: LockType,
        reason: &str,
        created_by: Option<Uuid>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        failed_attempts: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self::build(
            owner_id, lock_type, reason, true, None, created_by, ip_address, user_agent,
            failed_attempts, now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        owner_id: Uuid,
        lock_type: LockType,
        reason: &str,
        permanent: bool,
        expires_at: Option<DateTime<Utc>>,
        created_by: Option<Uuid>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        failed_attempts: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            lock_type,
            reason: reason.to_string(),
            permanent,
            locked_at: now,
            expires_at,
            active: true,
            unlock_reason: None,
            unlocked_at: None,
            unlocked_by: None,
            created_by,
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            failed_attempts,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// The read path recomputes expiry instead of relying on the
    /// auto-unlock sweep having run.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.active && (self.permanent || matches!(self.expires_at, Some(at) if at > now))
    }

    /// Remaining lock time; None for permanent or inactive locks.
    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.permanent || !self.is_locked(now) {
            return None;
        }
        self.expires_at.map(|at| (at - now).num_minutes().max(0))
    }

    pub fn is_near_unlock(&self, now: DateTime<Utc>) -> bool {
        matches!(self.remaining_minutes(now), Some(m) if m <= 5)
    }

    /// Explicit unlock. Idempotent: unlocking an inactive lock returns
    /// it unchanged. `expires_at` stays as historical record.
    pub fn unlock(mut self, reason: &str, unlocked_by: Option<Uuid>, now: DateTime<Utc>) -> Self {
        if !self.active {
            return self;
        }
        self.active = false;
        self.unlock_reason = Some(reason.to_string());
        self.unlocked_at = Some(now);
        self.unlocked_by = unlocked_by;
        self.updated_at = now;
        self
    }

    /// Expiry-driven unlock, invoked by the maintenance sweep. Returns
    /// None (no-op) for permanent or already-inactive locks, or when the
    /// lock has not expired yet.
    pub fn auto_unlock(self, now: DateTime<Utc>) -> Option<Self> {
        if !self.active || self.permanent {
            return None;
        }
        match self.expires_at {
            Some(at) if at <= now => Some(self.unlock("system auto-unlock", None, now)),
            _ => None,
        }
    }

    pub fn can_extend(&self) -> bool {
        self.active && !self.permanent && self.expires_at.is_some()
    }

    /// Extend a temporary lock. Produces the successor record with the
    /// new expiry and an incremented version.
    pub fn extend(mut self, additional: Duration, reason: &str, now: DateTime<Utc>) -> Result<Self> {
        if !self.can_extend() {
            return Err(AuthError::StateConflict(
                "only active temporary lockouts can be extended".into(),
            ));
        }
        if additional <= Duration::zero() {
            return Err(AuthError::Validation("extension must be positive".into()));
        }
        let current = self.expires_at.unwrap_or(now);
        self.expires_at = Some(current + additional);
        self.reason = format!(
            "{} (extended {} minutes: {})",
            self.reason,
            additional.num_minutes(),
            reason
        );
        self.version += 1;
        self.updated_at = now;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_lock(now: DateTime<Utc>) -> Lockout {
        Lockout::temporary(
            Uuid::new_v4(),
            LockType::PasswordFailed,
            "too many failed logins",
            Duration::minutes(30),
            None,
            Some("10.0.0.1"),
            None,
            5,
            now,
        )
        .unwrap()
    }

    #[test]
    fn temporary_lock_expires_on_read_path() {
        let now = Utc::now();
        let lock = temp_lock(now);
        assert!(lock.is_locked(now));
        assert_eq!(lock.remaining_minutes(now), Some(30));
        // Expired but never swept: read path must still report unlocked.
        assert!(!lock.is_locked(now + Duration::minutes(31)));
    }

    #[test]
    fn permanent_lock_never_expires() {
        let now = Utc::now();
        let lock = Lockout::permanent(
            Uuid::new_v4(),
            LockType::AdminAction,
            "terms violation",
            None,
            None,
            None,
            0,
            now,
        );
        assert!(lock.is_locked(now + Duration::days(365)));
        assert_eq!(lock.remaining_minutes(now), None);
        assert!(lock.auto_unlock(now + Duration::days(365)).is_none());
    }

    #[test]
    fn unlock_is_idempotent() {
        let now = Utc::now();
        let once = temp_lock(now).unlock("manual", None, now);
        let twice = once.clone().unlock("again", None, now + Duration::minutes(1));
        assert!(!once.active);
        assert_eq!(once.unlock_reason, twice.unlock_reason);
        assert_eq!(once.unlocked_at, twice.unlocked_at);
    }

    #[test]
    fn auto_unlock_only_past_expiry() {
        let now = Utc::now();
        let lock = temp_lock(now);
        assert!(lock.clone().auto_unlock(now + Duration::minutes(29)).is_none());

        let unlocked = lock.auto_unlock(now + Duration::minutes(30)).unwrap();
        assert!(!unlocked.active);
        assert_eq!(unlocked.unlock_reason.as_deref(), Some("system auto-unlock"));
        // expires_at kept as history
        assert!(unlocked.expires_at.is_some());
    }

    #[test]
    fn extend_rejected_for_permanent_or_inactive() {
        let now = Utc::now();
        let permanent = Lockout::permanent(
            Uuid::new_v4(),
            LockType::SecurityRisk,
            "risk",
            None,
            None,
            None,
            0,
            now,
        );
        assert!(matches!(
            permanent.extend(Duration::minutes(10), "more", now),
            Err(AuthError::StateConflict(_))
        ));

        let inactive = temp_lock(now).unlock("done", None, now);
        assert!(matches!(
            inactive.extend(Duration::minutes(10), "more", now),
            Err(AuthError::StateConflict(_))
        ));
    }

    #[test]
    fn extend_bumps_version_and_expiry() {
        let now = Utc::now();
        let lock = temp_lock(now);
        let extended = lock.extend(Duration::minutes(15), "still suspicious", now).unwrap();
        assert_eq!(extended.version, 2);
        assert_eq!(extended.remaining_minutes(now), Some(45));
    }
}
