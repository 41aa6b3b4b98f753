//! Collaborator contracts consumed by the domain services.
//!
//! Durable state lives behind these traits; the services hold entities
//! only for the duration of a single operation and persist mutations
//! explicitly. Implementations must provide the atomic operations noted
//! below — per-account counters are never read-then-written from
//! application memory.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Account, Lockout, RefreshToken, VerificationPurpose, VerificationToken};

pub use memory::MemoryStore;
pub use postgres::PgAuthStore;

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert(&self, account: Account) -> Result<Account>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>>;
    /// Lookup by username or email (both stored lowercase-normalized).
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Account>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;
    /// Optimistic-version write: fails with `StateConflict` when the
    /// stored version no longer matches, and bumps the version on success.
    async fn update(&self, account: Account) -> Result<Account>;
    /// Atomic read-modify-write of the failed-login counter; returns the
    /// post-increment count.
    async fn increment_failed_attempts(&self, id: Uuid, now: DateTime<Utc>) -> Result<i32>;
    async fn reset_failed_attempts(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;
    async fn set_locked_until(
        &self,
        id: Uuid,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, token: RefreshToken) -> Result<RefreshToken>;
    async fn find_by_series(&self, series: &str) -> Result<Option<RefreshToken>>;
    async fn update(&self, token: RefreshToken) -> Result<()>;
    /// Atomic rotation swap: persists the revoked predecessor and the
    /// successor in one step so a series never has two valid tokens or
    /// none observable between the writes.
    async fn replace_in_series(
        &self,
        predecessor: RefreshToken,
        successor: RefreshToken,
    ) -> Result<RefreshToken>;
    /// Idempotent: already-revoked tokens are untouched. Returns the
    /// number of tokens newly revoked.
    async fn revoke_series(
        &self,
        series: &str,
        revoked_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64>;
    async fn revoke_all_for_owner(
        &self,
        owner_id: Uuid,
        revoked_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64>;
    /// Garbage-collect revoked or expired tokens older than `cutoff`.
    async fn purge_dead(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait VerificationTokenStore: Send + Sync {
    async fn insert(&self, token: VerificationToken) -> Result<VerificationToken>;
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<VerificationToken>>;
    async fn update(&self, token: VerificationToken) -> Result<()>;
    /// At-most-one-live-token-per-purpose: deactivate all active, unused
    /// tokens for the owner+purpose pair.
    async fn deactivate_live_for(
        &self,
        owner_id: Uuid,
        purpose: VerificationPurpose,
        now: DateTime<Utc>,
    ) -> Result<u64>;
    async fn purge_dead(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait LockoutStore: Send + Sync {
    /// Enforces at most one live lockout per owner atomically with the
    /// write: inserting while another lockout still holds at the new
    /// record's `locked_at` fails with `StateConflict`.
    async fn insert(&self, lockout: Lockout) -> Result<Lockout>;
    async fn find_active_for(&self, owner_id: Uuid) -> Result<Vec<Lockout>>;
    async fn update(&self, lockout: Lockout) -> Result<()>;
    /// Active, non-permanent lockouts whose expiry has passed — the
    /// auto-unlock sweep's work queue.
    async fn find_expired_active(&self, now: DateTime<Utc>) -> Result<Vec<Lockout>>;
}

// ---------------------------------------------------------------------------
// External collaborators
// ---------------------------------------------------------------------------

/// Cross-account, IP-keyed rate limiting — separate from per-account
/// lockout policy.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn is_limited(&self, ip: &str) -> Result<bool>;
    async fn record_failure(&self, ip: &str, identifier: &str, reason: &str) -> Result<()>;
    async fn clear_failures(&self, ip: &str, identifier: &str) -> Result<()>;
}

/// Outbound mail. Callers treat dispatch as fire-and-forget; failures
/// are logged, never surfaced on token-issuance paths.
#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// Risk-scoring and password-hygiene hooks.
#[async_trait]
pub trait SecurityPolicy: Send + Sync {
    async fn is_password_reused(&self, owner_id: Uuid, candidate: &str) -> Result<bool>;
    async fn is_suspicious_location(&self, owner_id: Uuid, ip: Option<&str>) -> Result<bool>;
    async fn is_suspicious_device(&self, owner_id: Uuid, user_agent: Option<&str>) -> Result<bool>;
    async fn is_abnormal_frequency(&self, owner_id: Uuid) -> Result<bool>;
}

/// Access-token minting is outside the core; tokens are opaque here.
pub trait AccessTokenIssuer: Send + Sync {
    fn issue(&self, account: &Account) -> Result<String>;
}

/// Injected time source; all expiry logic reads time through this.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
