//! Lockout manager: creation, querying and release of account locks.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::models::{LockType, Lockout};
use crate::store::LockoutStore;

use super::ClientContext;

pub struct LockoutManager {
    store: Arc<dyn LockoutStore>,
}

impl LockoutManager {
    pub fn new(store: Arc<dyn LockoutStore>) -> Self {
        Self { store }
    }

    /// All active lockouts for the account, oldest first.
    pub async fn active_for(&self, owner_id: Uuid) -> Result<Vec<Lockout>> {
        self.store.find_active_for(owner_id).await
    }

    /// Whether any active lockout still holds at `now`. Expired entries
    /// the sweep has not reached yet do not count.
    pub async fn currently_locked(&self, owner_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let active = self.store.find_active_for(owner_id).await?;
        Ok(active.iter().any(|l| l.is_locked(now)))
    }

    /// Create a temporary lockout. Refused while the account holds any
    /// live lockout, whatever its type.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_temporary(
        &self,
        owner_id: Uuid,
        lock_type: LockType,
        reason: &str,
        duration: Duration,
        created_by: Option<Uuid>,
        failed_attempts: i32,
        context: &ClientContext,
        now: DateTime<Utc>,
    ) -> Result<Lockout> {
        self.ensure_not_locked(owner_id, now).await?;
        let lockout = Lockout::temporary(
            owner_id,
            lock_type,
            reason,
            duration,
            created_by,
            context.ip(),
            context.user_agent(),
            failed_attempts,
            now,
        )?;
        let lockout = self.store.insert(lockout).await?;
        warn!(owner_id = %owner_id, ?lock_type, minutes = duration.num_minutes(), "account locked");
        Ok(lockout)
    }

    /// Create a permanent lockout. Refused while the account holds any
    /// live lockout, whatever its type.
    pub async fn create_permanent(
        &self,
        owner_id: Uuid,
        lock_type: LockType,
        reason: &str,
        created_by: Option<Uuid>,
        context: &ClientContext,
        now: DateTime<Utc>,
    ) -> Result<Lockout> {
        self.ensure_not_locked(owner_id, now).await?;
        let lockout = Lockout::permanent(
            owner_id,
            lock_type,
            reason,
            created_by,
            context.ip(),
            context.user_agent(),
            0,
            now,
        );
        let lockout = self.store.insert(lockout).await?;
        warn!(owner_id = %owner_id, ?lock_type, "account locked permanently");
        Ok(lockout)
    }

    /// One active lockout per account, regardless of type. The store's
    /// insert enforces the same rule atomically; this check exists to
    /// fail fast without an insert attempt.
    async fn ensure_not_locked(&self, owner_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let active = self.store.find_active_for(owner_id).await?;
        if active.iter().any(|l| l.is_locked(now)) {
            return Err(AuthError::StateConflict(
                "account already holds an active lockout".into(),
            ));
        }
        Ok(())
    }

    /// Release every active lockout of the given types. Idempotent;
    /// returns how many were newly released.
    pub async fn unlock(
        &self,
        owner_id: Uuid,
        lock_types: &[LockType],
        reason: &str,
        unlocked_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let active = self.store.find_active_for(owner_id).await?;
        let mut released = 0;
        for lockout in active {
            if !lock_types.contains(&lockout.lock_type) {
                continue;
            }
            self.store
                .update(lockout.unlock(reason, unlocked_by, now))
                .await?;
            released += 1;
        }
        if released > 0 {
            info!(owner_id = %owner_id, released, reason, "account unlocked");
        }
        Ok(released)
    }

    /// Release one expired lockout on behalf of the sweep. Returns false
    /// when the lock turned out not to be releasable (permanent, already
    /// inactive or not yet expired).
    pub async fn auto_unlock(&self, lockout: Lockout, now: DateTime<Utc>) -> Result<bool> {
        match lockout.auto_unlock(now) {
            Some(released) => {
                let owner_id = released.owner_id;
                self.store.update(released).await?;
                info!(owner_id = %owner_id, "lockout auto-unlocked");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Extend a temporary lockout by `additional`.
    pub async fn extend(
        &self,
        lockout: Lockout,
        additional: Duration,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Lockout> {
        let extended = lockout.extend(additional, reason, now)?;
        self.store.update(extended.clone()).await?;
        warn!(owner_id = %extended.owner_id, minutes = additional.num_minutes(), "lockout extended");
        Ok(extended)
    }
}
