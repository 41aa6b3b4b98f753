//! In-memory store backed by a single mutex.
//!
//! Every trait method takes the lock once, so read-modify-write
//! sequences (counter increments, rotation swaps) are atomic with
//! respect to each other. Used by the test suite and useful for
//! embedding.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::models::{Account, Lockout, RefreshToken, VerificationPurpose, VerificationToken};

use super::{AccountStore, LockoutStore, RefreshTokenStore, VerificationTokenStore};

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    tokens: HashMap<Uuid, RefreshToken>,
    verifications: HashMap<Uuid, VerificationToken>,
    lockouts: HashMap<Uuid, Lockout>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert(&self, account: Account) -> Result<Account> {
        let mut inner = self.locked();
        let duplicate = inner.accounts.values().any(|existing| {
            existing.username == account.username || existing.email == account.email
        });
        if duplicate {
            return Err(AuthError::StateConflict(
                "username or email already registered".into(),
            ));
        }
        inner.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.locked().accounts.get(&id).cloned())
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Account>> {
        let needle = identifier.trim().to_lowercase();
        Ok(self
            .locked()
            .accounts
            .values()
            .find(|a| a.username == needle || a.email == needle)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let needle = email.trim().to_lowercase();
        Ok(self
            .locked()
            .accounts
            .values()
            .find(|a| a.email == needle)
            .cloned())
    }

    async fn update(&self, mut account: Account) -> Result<Account> {
        let mut inner = self.locked();
        let stored = inner
            .accounts
            .get(&account.id)
            .ok_or(AuthError::NotFound("account"))?;
        if stored.version != account.version {
            return Err(AuthError::StateConflict(
                "account was modified concurrently".into(),
            ));
        }
        account.version += 1;
        inner.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn increment_failed_attempts(&self, id: Uuid, now: DateTime<Utc>) -> Result<i32> {
        let mut inner = self.locked();
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or(AuthError::NotFound("account"))?;
        account.failed_login_attempts += 1;
        account.last_failed_login_at = Some(now);
        account.updated_at = now;
        Ok(account.failed_login_attempts)
    }

    async fn reset_failed_attempts(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.locked();
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or(AuthError::NotFound("account"))?;
        account.failed_login_attempts = 0;
        account.locked_until = None;
        account.updated_at = now;
        Ok(())
    }

    async fn set_locked_until(
        &self,
        id: Uuid,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.locked();
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or(AuthError::NotFound("account"))?;
        account.locked_until = until;
        account.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn insert(&self, token: RefreshToken) -> Result<RefreshToken> {
        self.locked().tokens.insert(token.id, token.clone());
        Ok(token)
    }

    async fn find_by_series(&self, series: &str) -> Result<Option<RefreshToken>> {
        // The live token of a series is the one that is not revoked; if
        // the whole series is burned, return the most recent record so
        // callers can observe the revocation.
        let inner = self.locked();
        let mut candidates: Vec<&RefreshToken> = inner
            .tokens
            .values()
            .filter(|t| t.series == series)
            .collect();
        candidates.sort_by_key(|t| t.created_at);
        Ok(candidates
            .iter()
            .rev()
            .find(|t| !t.revoked)
            .or_else(|| candidates.last())
            .map(|t| (*t).clone()))
    }

    async fn update(&self, token: RefreshToken) -> Result<()> {
        let mut inner = self.locked();
        if !inner.tokens.contains_key(&token.id) {
            return Err(AuthError::NotFound("refresh token"));
        }
        inner.tokens.insert(token.id, token);
        Ok(())
    }

    async fn replace_in_series(
        &self,
        predecessor: RefreshToken,
        successor: RefreshToken,
    ) -> Result<RefreshToken> {
        let mut inner = self.locked();
        inner.tokens.insert(predecessor.id, predecessor);
        inner.tokens.insert(successor.id, successor.clone());
        Ok(successor)
    }

    async fn revoke_series(
        &self,
        series: &str,
        revoked_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut inner = self.locked();
        let mut revoked = 0;
        for token in inner.tokens.values_mut() {
            if token.series == series && !token.revoked {
                token.revoked = true;
                token.revoked_at = Some(now);
                token.revoked_by = revoked_by;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn revoke_all_for_owner(
        &self,
        owner_id: Uuid,
        revoked_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut inner = self.locked();
        let mut revoked = 0;
        for token in inner.tokens.values_mut() {
            if token.owner_id == owner_id && !token.revoked {
                token.revoked = true;
                token.revoked_at = Some(now);
                token.revoked_by = revoked_by;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn purge_dead(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.locked();
        let before = inner.tokens.len();
        inner.tokens.retain(|_, t| {
            let dead_since = t.revoked_at.unwrap_or(t.expires_at);
            !(t.revoked || t.is_expired(cutoff)) || dead_since > cutoff
        });
        Ok((before - inner.tokens.len()) as u64)
    }
}

#[async_trait]
impl VerificationTokenStore for MemoryStore {
    async fn insert(&self, token: VerificationToken) -> Result<VerificationToken> {
        self.locked().verifications.insert(token.id, token.clone());
        Ok(token)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<VerificationToken>> {
        Ok(self
            .locked()
            .verifications
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn update(&self, token: VerificationToken) -> Result<()> {
        let mut inner = self.locked();
        if !inner.verifications.contains_key(&token.id) {
            return Err(AuthError::NotFound("verification token"));
        }
        inner.verifications.insert(token.id, token);
        Ok(())
    }

    async fn deactivate_live_for(
        &self,
        owner_id: Uuid,
        purpose: VerificationPurpose,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut inner = self.locked();
        let mut deactivated = 0;
        for token in inner.verifications.values_mut() {
            if token.owner_id == owner_id && token.purpose == purpose && token.active && !token.used
            {
                token.active = false;
                token.updated_at = now;
                deactivated += 1;
            }
        }
        Ok(deactivated)
    }

    async fn purge_dead(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.locked();
        let before = inner.verifications.len();
        inner
            .verifications
            .retain(|_, t| t.active && !t.used && !t.locked && !t.is_expired(now));
        Ok((before - inner.verifications.len()) as u64)
    }
}

#[async_trait]
impl LockoutStore for MemoryStore {
    async fn insert(&self, lockout: Lockout) -> Result<Lockout> {
        let mut inner = self.locked();
        // Check and insert under one lock acquisition, so two racing
        // creators cannot both land an active lockout.
        let conflict = inner
            .lockouts
            .values()
            .any(|l| l.owner_id == lockout.owner_id && l.is_locked(lockout.locked_at));
        if conflict {
            return Err(AuthError::StateConflict(
                "account already holds an active lockout".into(),
            ));
        }
        inner.lockouts.insert(lockout.id, lockout.clone());
        Ok(lockout)
    }

    async fn find_active_for(&self, owner_id: Uuid) -> Result<Vec<Lockout>> {
        let inner = self.locked();
        let mut active: Vec<Lockout> = inner
            .lockouts
            .values()
            .filter(|l| l.owner_id == owner_id && l.active)
            .cloned()
            .collect();
        active.sort_by_key(|l| l.locked_at);
        Ok(active)
    }

    async fn update(&self, lockout: Lockout) -> Result<()> {
        let mut inner = self.locked();
        if !inner.lockouts.contains_key(&lockout.id) {
            return Err(AuthError::NotFound("lockout"));
        }
        inner.lockouts.insert(lockout.id, lockout);
        Ok(())
    }

    async fn find_expired_active(&self, now: DateTime<Utc>) -> Result<Vec<Lockout>> {
        Ok(self
            .locked()
            .lockouts
            .values()
            .filter(|l| l.active && !l.permanent && matches!(l.expires_at, Some(at) if at <= now))
            .cloned()
            .collect())
    }
}
