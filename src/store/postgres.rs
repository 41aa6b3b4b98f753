//! Postgres store implementation.
//!
//! Counter increments and rotation swaps run server-side (single
//! `UPDATE ... RETURNING`, or one transaction) so concurrent requests
//! against the same account serialize in the database, not in
//! application memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::models::{Account, Lockout, RefreshToken, VerificationPurpose, VerificationToken};

use super::{AccountStore, LockoutStore, RefreshTokenStore, VerificationTokenStore};

#[derive(Clone)]
pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAuthStore {
    async fn insert(&self, account: Account) -> Result<Account> {
        let inserted = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (id, username, email, password_hash, status, email_verified,
                                  failed_login_attempts, locked_until, last_login_at, last_login_ip,
                                  last_failed_login_at, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(account.id)
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.status)
        .bind(account.email_verified)
        .bind(account.failed_login_attempts)
        .bind(account.locked_until)
        .bind(account.last_login_at)
        .bind(&account.last_login_ip)
        .bind(account.last_failed_login_at)
        .bind(account.version)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("unique constraint") {
                AuthError::StateConflict("username or email already registered".into())
            } else {
                AuthError::Store(e.to_string())
            }
        })?;

        Ok(inserted)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Account>> {
        let needle = identifier.trim().to_lowercase();
        let account = sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts WHERE username = $1 OR email = $1",
        )
        .bind(needle)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE email = $1")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn update(&self, account: Account) -> Result<Account> {
        let updated = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET username = $2, email = $3, password_hash = $4, status = $5, email_verified = $6,
                failed_login_attempts = $7, locked_until = $8, last_login_at = $9,
                last_login_ip = $10, last_failed_login_at = $11, version = version + 1,
                updated_at = $12
            WHERE id = $1 AND version = $13
            RETURNING *
            "#,
        )
        .bind(account.id)
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.status)
        .bind(account.email_verified)
        .bind(account.failed_login_attempts)
        .bind(account.locked_until)
        .bind(account.last_login_at)
        .bind(&account.last_login_ip)
        .bind(account.last_failed_login_at)
        .bind(account.updated_at)
        .bind(account.version)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or_else(|| AuthError::StateConflict("account was modified concurrently".into()))
    }

    async fn increment_failed_attempts(&self, id: Uuid, now: DateTime<Utc>) -> Result<i32> {
        let count: i32 = sqlx::query_scalar(
            r#"
            UPDATE accounts
            SET failed_login_attempts = failed_login_attempts + 1,
                last_failed_login_at = $2, updated_at = $2
            WHERE id = $1
            RETURNING failed_login_attempts
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn reset_failed_attempts(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET failed_login_attempts = 0, locked_until = NULL, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_locked_until(
        &self,
        id: Uuid,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE accounts SET locked_until = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(until)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for PgAuthStore {
    async fn insert(&self, token: RefreshToken) -> Result<RefreshToken> {
        let inserted = sqlx::query_as::<_, RefreshToken>(
            r#"
            INSERT INTO refresh_tokens (id, owner_id, token_hash, series, expires_at, revoked,
                                        revoked_at, revoked_by, device_fingerprint, issuing_ip,
                                        user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(token.id)
        .bind(token.owner_id)
        .bind(&token.token_hash)
        .bind(&token.series)
        .bind(token.expires_at)
        .bind(token.revoked)
        .bind(token.revoked_at)
        .bind(token.revoked_by)
        .bind(&token.device_fingerprint)
        .bind(&token.issuing_ip)
        .bind(&token.user_agent)
        .bind(token.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted)
    }

    async fn find_by_series(&self, series: &str) -> Result<Option<RefreshToken>> {
        // Prefer the live token; fall back to the newest record so a
        // burned series still reads as revoked rather than absent.
        let token = sqlx::query_as::<_, RefreshToken>(
            r#"
            SELECT * FROM refresh_tokens
            WHERE series = $1
            ORDER BY revoked ASC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(series)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    async fn update(&self, token: RefreshToken) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = $2, revoked_at = $3, revoked_by = $4
            WHERE id = $1
            "#,
        )
        .bind(token.id)
        .bind(token.revoked)
        .bind(token.revoked_at)
        .bind(token.revoked_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_in_series(
        &self,
        predecessor: RefreshToken,
        successor: RefreshToken,
    ) -> Result<RefreshToken> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = $2, revoked_at = $3, revoked_by = $4
            WHERE id = $1
            "#,
        )
        .bind(predecessor.id)
        .bind(predecessor.revoked)
        .bind(predecessor.revoked_at)
        .bind(predecessor.revoked_by)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query_as::<_, RefreshToken>(
            r#"
            INSERT INTO refresh_tokens (id, owner_id, token_hash, series, expires_at, revoked,
                                        revoked_at, revoked_by, device_fingerprint, issuing_ip,
                                        user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(successor.id)
        .bind(successor.owner_id)
        .bind(&successor.token_hash)
        .bind(&successor.series)
        .bind(successor.expires_at)
        .bind(successor.revoked)
        .bind(successor.revoked_at)
        .bind(successor.revoked_by)
        .bind(&successor.device_fingerprint)
        .bind(&successor.issuing_ip)
        .bind(&successor.user_agent)
        .bind(successor.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn revoke_series(
        &self,
        series: &str,
        revoked_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = $2, revoked_by = $3
            WHERE series = $1 AND revoked = FALSE
            "#,
        )
        .bind(series)
        .bind(now)
        .bind(revoked_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn revoke_all_for_owner(
        &self,
        owner_id: Uuid,
        revoked_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = $2, revoked_by = $3
            WHERE owner_id = $1 AND revoked = FALSE
            "#,
        )
        .bind(owner_id)
        .bind(now)
        .bind(revoked_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_dead(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE (revoked = TRUE AND revoked_at <= $1)
               OR expires_at <= $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl VerificationTokenStore for PgAuthStore {
    async fn insert(&self, token: VerificationToken) -> Result<VerificationToken> {
        let inserted = sqlx::query_as::<_, VerificationToken>(
            r#"
            INSERT INTO verification_tokens (id, owner_id, subject_email, token_hash, purpose,
                                             used, used_at, expires_at, attempts, max_attempts,
                                             locked, locked_at, active, issuing_ip, user_agent,
                                             created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING *
            "#,
        )
        .bind(token.id)
        .bind(token.owner_id)
        .bind(&token.subject_email)
        .bind(&token.token_hash)
        .bind(token.purpose)
        .bind(token.used)
        .bind(token.used_at)
        .bind(token.expires_at)
        .bind(token.attempts)
        .bind(token.max_attempts)
        .bind(token.locked)
        .bind(token.locked_at)
        .bind(token.active)
        .bind(&token.issuing_ip)
        .bind(&token.user_agent)
        .bind(token.created_at)
        .bind(token.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<VerificationToken>> {
        let token = sqlx::query_as::<_, VerificationToken>(
            "SELECT * FROM verification_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    async fn update(&self, token: VerificationToken) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE verification_tokens
            SET used = $2, used_at = $3, attempts = $4, locked = $5, locked_at = $6,
                active = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(token.id)
        .bind(token.used)
        .bind(token.used_at)
        .bind(token.attempts)
        .bind(token.locked)
        .bind(token.locked_at)
        .bind(token.active)
        .bind(token.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deactivate_live_for(
        &self,
        owner_id: Uuid,
        purpose: VerificationPurpose,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE verification_tokens
            SET active = FALSE, updated_at = $3
            WHERE owner_id = $1 AND purpose = $2 AND active = TRUE AND used = FALSE
            "#,
        )
        .bind(owner_id)
        .bind(purpose)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_dead(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM verification_tokens
            WHERE used = TRUE OR locked = TRUE OR active = FALSE OR expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LockoutStore for PgAuthStore {
    async fn insert(&self, lockout: Lockout) -> Result<Lockout> {
        // Single statement, so concurrent creators cannot both observe
        // "no active lockout" and insert. A lockout still holds when it
        // is active and permanent, or active with an unexpired horizon.
        let inserted = sqlx::query_as::<_, Lockout>(
            r#"
            INSERT INTO lockouts (id, owner_id, lock_type, reason, permanent, locked_at,
                                  expires_at, active, unlock_reason, unlocked_at, unlocked_by,
                                  created_by, ip_address, user_agent, failed_attempts, version,
                                  created_at, updated_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18
            WHERE NOT EXISTS (
                SELECT 1 FROM lockouts
                WHERE owner_id = $2 AND active = TRUE
                  AND (permanent = TRUE OR expires_at > $6)
            )
            RETURNING *
            "#,
        )
        .bind(lockout.id)
        .bind(lockout.owner_id)
        .bind(lockout.lock_type)
        .bind(&lockout.reason)
        .bind(lockout.permanent)
        .bind(lockout.locked_at)
        .bind(lockout.expires_at)
        .bind(lockout.active)
        .bind(&lockout.unlock_reason)
        .bind(lockout.unlocked_at)
        .bind(lockout.unlocked_by)
        .bind(lockout.created_by)
        .bind(&lockout.ip_address)
        .bind(&lockout.user_agent)
        .bind(lockout.failed_attempts)
        .bind(lockout.version)
        .bind(lockout.created_at)
        .bind(lockout.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        inserted.ok_or_else(|| {
            AuthError::StateConflict("account already holds an active lockout".into())
        })
    }

    async fn find_active_for(&self, owner_id: Uuid) -> Result<Vec<Lockout>> {
        let lockouts = sqlx::query_as::<_, Lockout>(
            "SELECT * FROM lockouts WHERE owner_id = $1 AND active = TRUE ORDER BY locked_at",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lockouts)
    }

    async fn update(&self, lockout: Lockout) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE lockouts
            SET reason = $2, expires_at = $3, active = $4, unlock_reason = $5, unlocked_at = $6,
                unlocked_by = $7, version = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(lockout.id)
        .bind(&lockout.reason)
        .bind(lockout.expires_at)
        .bind(lockout.active)
        .bind(&lockout.unlock_reason)
        .bind(lockout.unlocked_at)
        .bind(lockout.unlocked_by)
        .bind(lockout.version)
        .bind(lockout.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_expired_active(&self, now: DateTime<Utc>) -> Result<Vec<Lockout>> {
        let lockouts = sqlx::query_as::<_, Lockout>(
            r#"
            SELECT * FROM lockouts
            WHERE active = TRUE AND permanent = FALSE AND expires_at <= $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(lockouts)
    }
}
