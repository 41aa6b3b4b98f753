//! Authentication orchestrator: composes the account store, token
//! ledger, verification engine and lockout manager into the public
//! credential-lifecycle operations.
//!
//! Expected outcomes (wrong password, locked account, dead token) are
//! typed enum variants; `AuthError` is reserved for malformed input and
//! infrastructure failures.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;
use validator::{Validate, ValidateEmail};

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::models::{Account, AccountStatus, LockType, Lockout, VerificationPurpose, VerificationStatus};
use crate::security::{hash_password, validate_password_strength, verify_password};
use crate::store::{
    AccessTokenIssuer, AccountStore, Clock, EmailDispatcher, RateLimiter, SecurityPolicy,
};

use super::{
    ClientContext, LockoutManager, TokenLedger, TokenValidation, VerificationTokenEngine,
    VerifyOutcome,
};

static USERNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_]{3,32}$").expect("static pattern"));

/// Outcome of `authenticate`, in the order the checks run.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    RateLimited,
    UserNotFound,
    AccountNotUsable { status: AccountStatus },
    EmailNotVerified,
    AccountLocked { remaining_minutes: Option<i64> },
    InvalidCredentials,
    Success {
        account: Account,
        access_token: String,
        refresh_token: String,
    },
}

impl AuthOutcome {
    /// Caller-facing failure text. Identity-probing outcomes share one
    /// message so a response never confirms whether the account exists.
    /// Lockout messages may reveal remaining time: the attacker's own
    /// attempt already confirmed the account.
    pub fn public_message(&self) -> String {
        match self {
            AuthOutcome::Success { .. } => "authenticated".into(),
            AuthOutcome::RateLimited => "too many attempts, try again later".into(),
            AuthOutcome::AccountLocked {
                remaining_minutes: Some(minutes),
            } => format!("account is locked, try again in {minutes} minutes"),
            AuthOutcome::AccountLocked { .. } => "account is locked".into(),
            AuthOutcome::EmailNotVerified => "email address is not verified".into(),
            AuthOutcome::UserNotFound
            | AuthOutcome::AccountNotUsable { .. }
            | AuthOutcome::InvalidCredentials => "identifier or password incorrect".into(),
        }
    }
}

/// Outcome of `refresh`.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Refreshed {
        access_token: String,
        /// New raw refresh token when rotation happened; None means the
        /// presented token stays valid.
        refresh_token: Option<String>,
    },
    /// Malformed, unknown, revoked or expired token.
    InvalidToken,
    /// Replay or binding-context mismatch; the whole series is burned.
    SecurityViolation,
    /// The token was fine but its account no longer may log in.
    AccountNotUsable,
}

/// Outcome of `logout` and `revoke_all_sessions`. Both are best-effort:
/// revocation trouble is reported but never surfaced as failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    LoggedOut { revoked: u64 },
    PartialSuccess,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterCommand {
    #[validate(regex(
        path = *USERNAME_PATTERN,
        message = "username must be 3-32 characters of letters, digits or underscore"
    ))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub enum RegisterOutcome {
    Registered { account: Account },
    DuplicateIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyEmailOutcome {
    Verified,
    WrongToken { remaining_attempts: i32 },
    NotVerifiable { status: VerificationStatus },
    InvalidToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendOutcome {
    Sent,
    AlreadyVerified,
    UserNotFound,
}

/// Outcome of `change_email`. The address only changes once the token
/// sent to the new mailbox is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEmailOutcome {
    VerificationSent,
    InvalidPassword,
    EmailInUse,
}

/// Outcome of `request_password_reset`. Success-shaped whether or not
/// the address exists, so responses cannot be used to enumerate accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetRequestOutcome {
    Accepted,
    RateLimited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetTokenProbe {
    Usable {
        remaining_minutes: i64,
        remaining_attempts: i32,
    },
    WrongToken { remaining_attempts: i32 },
    NotUsable { status: VerificationStatus },
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetExecuteOutcome {
    Completed,
    PasswordReused,
    WrongToken { remaining_attempts: i32 },
    NotUsable { status: VerificationStatus },
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub signals: Vec<&'static str>,
}

pub struct AuthenticationOrchestrator {
    accounts: Arc<dyn AccountStore>,
    ledger: Arc<TokenLedger>,
    verifications: Arc<VerificationTokenEngine>,
    lockouts: Arc<LockoutManager>,
    rate_limiter: Arc<dyn RateLimiter>,
    mailer: Arc<dyn EmailDispatcher>,
    policy: Arc<dyn SecurityPolicy>,
    issuer: Arc<dyn AccessTokenIssuer>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
}

impl AuthenticationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<TokenLedger>,
        verifications: Arc<VerificationTokenEngine>,
        lockouts: Arc<LockoutManager>,
        rate_limiter: Arc<dyn RateLimiter>,
        mailer: Arc<dyn EmailDispatcher>,
        policy: Arc<dyn SecurityPolicy>,
        issuer: Arc<dyn AccessTokenIssuer>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        Self {
            accounts,
            ledger,
            verifications,
            lockouts,
            rate_limiter,
            mailer,
            policy,
            issuer,
            clock,
            config,
        }
    }

    // -----------------------------------------------------------------
    // Login
    // -----------------------------------------------------------------

    /// Authenticate an identifier/password pair. Checks run in a fixed
    /// order and the first failing one wins; every failure before the
    /// password check also feeds the cross-account rate limiter.
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
        context: &ClientContext,
    ) -> Result<AuthOutcome> {
        if identifier.trim().is_empty() || password.is_empty() {
            return Err(AuthError::Validation(
                "identifier and password must not be blank".into(),
            ));
        }
        let now = self.clock.now();

        if let Some(ip) = context.ip() {
            if self.rate_limiter.is_limited(ip).await? {
                return Ok(AuthOutcome::RateLimited);
            }
        }

        let Some(account) = self.accounts.find_by_identifier(identifier).await? else {
            self.note_failure(context, identifier, "user not found").await;
            return Ok(AuthOutcome::UserNotFound);
        };

        match account.status {
            AccountStatus::Active => {}
            AccountStatus::Pending => {
                self.note_failure(context, identifier, "email not verified").await;
                return Ok(AuthOutcome::EmailNotVerified);
            }
            status => {
                self.note_failure(context, identifier, "account not usable").await;
                return Ok(AuthOutcome::AccountNotUsable { status });
            }
        }
        if !account.email_verified {
            self.note_failure(context, identifier, "email not verified").await;
            return Ok(AuthOutcome::EmailNotVerified);
        }

        if let Some(minutes) = self.lock_remaining(&account, now).await? {
            self.note_failure(context, identifier, "account locked").await;
            return Ok(AuthOutcome::AccountLocked {
                remaining_minutes: minutes,
            });
        }

        if !verify_password(password, &account.password_hash)? {
            self.handle_failed_password(&account, context, now).await?;
            self.note_failure(context, identifier, "invalid credentials").await;
            return Ok(AuthOutcome::InvalidCredentials);
        }

        if let Some(ip) = context.ip() {
            if let Err(err) = self.rate_limiter.clear_failures(ip, identifier).await {
                warn!(error = %err, "failed to clear rate-limit record");
            }
        }

        let account = self
            .accounts
            .update(account.record_login_success(context.ip(), now))
            .await?;
        let issued = self.ledger.issue(account.id, context, now).await?;
        let access_token = self.issuer.issue(&account)?;
        info!(account_id = %account.id, "login succeeded");

        Ok(AuthOutcome::Success {
            account,
            access_token,
            refresh_token: issued.raw,
        })
    }

    /// Active-lock check for the login path. Reports the largest
    /// remaining duration across the counter-based lock and managed
    /// lockouts; `Some(None)` means locked without a known horizon.
    async fn lock_remaining(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<Option<Option<i64>>> {
        let mut locked = false;
        let mut remaining: Option<i64> = None;

        if account.is_locked(now) {
            locked = true;
            remaining = account.locked_until.map(|until| (until - now).num_minutes());
        }
        for lockout in self.lockouts.active_for(account.id).await? {
            if !lockout.is_locked(now) {
                continue;
            }
            locked = true;
            match lockout.remaining_minutes(now) {
                Some(minutes) => remaining = Some(remaining.unwrap_or(0).max(minutes)),
                // Permanent lock: no horizon to report.
                None => return Ok(Some(None)),
            }
        }

        Ok(locked.then_some(remaining))
    }

    async fn handle_failed_password(
        &self,
        account: &Account,
        context: &ClientContext,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // The increment is atomic in the store, so two concurrent
        // failures cannot both observe the pre-threshold count.
        let failures = self.accounts.increment_failed_attempts(account.id, now).await?;
        if failures < self.config.max_failed_logins {
            return Ok(());
        }

        let duration = Duration::minutes(self.config.lockout_minutes);
        let created = self
            .lockouts
            .create_temporary(
                account.id,
                LockType::PasswordFailed,
                "too many failed login attempts",
                duration,
                None,
                failures,
                context,
                now,
            )
            .await;
        match created {
            Ok(_) => {
                self.accounts
                    .set_locked_until(account.id, Some(now + duration), now)
                    .await?;
            }
            // Lost the race to a concurrent failure that already locked.
            Err(AuthError::StateConflict(_)) => {}
            Err(err) => return Err(err),
        }
        Ok(())
    }

    async fn note_failure(&self, context: &ClientContext, identifier: &str, reason: &str) {
        let Some(ip) = context.ip() else { return };
        if let Err(err) = self.rate_limiter.record_failure(ip, identifier, reason).await {
            warn!(error = %err, "failed to record rate-limit failure");
        }
    }

    // -----------------------------------------------------------------
    // Refresh and logout
    // -----------------------------------------------------------------

    /// Validate a presented refresh token, re-check the account, mint a
    /// fresh access token and rotate the refresh token when it is near
    /// expiry.
    ///
    /// A valid series presented with a stale secret means a rotated
    /// predecessor is being replayed; a binding-context mismatch means
    /// the token travels on unexpected hardware. Either way the whole
    /// series is burned, not just denied.
    pub async fn refresh(&self, raw_token: &str, context: &ClientContext) -> Result<RefreshOutcome> {
        let now = self.clock.now();
        let Some((series, secret)) = TokenLedger::split_raw(raw_token) else {
            return Ok(RefreshOutcome::InvalidToken);
        };

        let token = match self.ledger.validate(series, now).await? {
            TokenValidation::Valid(token) => token,
            TokenValidation::NotFound | TokenValidation::Invalid(_) => {
                return Ok(RefreshOutcome::InvalidToken);
            }
        };

        if !self.ledger.matches_secret(&token, secret) {
            warn!(series = %series, "stale refresh secret replayed, burning series");
            self.ledger.revoke_series(series, None, now).await?;
            return Ok(RefreshOutcome::SecurityViolation);
        }
        if !token.matches_context(context.fingerprint(), context.ip()) {
            warn!(series = %series, "refresh binding context mismatch, burning series");
            self.ledger.revoke_series(series, None, now).await?;
            return Ok(RefreshOutcome::SecurityViolation);
        }

        let Some(account) = self.accounts.find_by_id(token.owner_id).await? else {
            self.ledger.revoke_series(series, None, now).await?;
            return Ok(RefreshOutcome::InvalidToken);
        };
        if !account.can_login(now) || self.lockouts.currently_locked(account.id, now).await? {
            return Ok(RefreshOutcome::AccountNotUsable);
        }

        let (_, rotated_raw) = self.ledger.rotate_if_near_expiry(token, context, now).await?;
        let access_token = self.issuer.issue(&account)?;
        Ok(RefreshOutcome::Refreshed {
            access_token,
            refresh_token: rotated_raw,
        })
    }

    /// End the session behind one refresh token. Never fails from the
    /// caller's perspective; trouble is logged and reported as partial.
    pub async fn logout(&self, raw_token: &str, actor: Option<Uuid>) -> LogoutOutcome {
        let Some((series, _)) = TokenLedger::split_raw(raw_token) else {
            return LogoutOutcome::LoggedOut { revoked: 0 };
        };
        match self.ledger.revoke_series(series, actor, self.clock.now()).await {
            Ok(revoked) => LogoutOutcome::LoggedOut { revoked },
            Err(err) => {
                warn!(error = %err, "logout revocation incomplete");
                LogoutOutcome::PartialSuccess
            }
        }
    }

    /// Revoke every session the owner holds. Best-effort like `logout`.
    pub async fn revoke_all_sessions(&self, owner_id: Uuid, actor: Option<Uuid>) -> LogoutOutcome {
        match self
            .ledger
            .revoke_all_for_owner(owner_id, actor, self.clock.now())
            .await
        {
            Ok(revoked) => LogoutOutcome::LoggedOut { revoked },
            Err(err) => {
                warn!(error = %err, owner_id = %owner_id, "session revocation incomplete");
                LogoutOutcome::PartialSuccess
            }
        }
    }

    // -----------------------------------------------------------------
    // Registration and email verification
    // -----------------------------------------------------------------

    /// Register a new account in `Pending` status and send the email
    /// verification token.
    pub async fn register(
        &self,
        command: RegisterCommand,
        context: &ClientContext,
    ) -> Result<RegisterOutcome> {
        command.validate()?;
        validate_password_strength(&command.password)?;
        let now = self.clock.now();

        let account = Account::new(
            &command.username,
            &command.email,
            &hash_password(&command.password)?,
            now,
        )?;
        let account = match self.accounts.insert(account).await {
            Ok(account) => account,
            Err(AuthError::StateConflict(_)) => return Ok(RegisterOutcome::DuplicateIdentity),
            Err(err) => return Err(err),
        };

        self.send_verification(&account, &account.email, VerificationPurpose::Registration, context, now)
            .await?;
        info!(account_id = %account.id, "account registered");
        Ok(RegisterOutcome::Registered { account })
    }

    /// Issue (or reissue) an email verification token and dispatch it to
    /// `subject_email` (the current address, or the candidate address
    /// for an email change).
    async fn send_verification(
        &self,
        account: &Account,
        subject_email: &str,
        purpose: VerificationPurpose,
        context: &ClientContext,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let ttl = Duration::hours(self.config.email_verification_ttl_hours);
        let (raw, _) = self
            .verifications
            .issue(account.id, subject_email, purpose, ttl, context, now)
            .await?;
        let (subject, body) = if purpose == VerificationPurpose::EmailChange {
            (
                "Confirm your new email address",
                format!("Use this code to confirm your new email address: {raw}"),
            )
        } else {
            (
                "Verify your email address",
                format!("Use this code to verify your email address: {raw}"),
            )
        };
        self.dispatch_email(subject_email.to_string(), subject.into(), body);
        Ok(())
    }

    /// Start an email change: the current password re-authenticates the
    /// request, the candidate address must be free, and the change only
    /// takes effect when the token mailed to that address is verified.
    pub async fn change_email(
        &self,
        owner_id: Uuid,
        current_password: &str,
        new_email: &str,
        context: &ClientContext,
    ) -> Result<ChangeEmailOutcome> {
        let candidate = new_email.trim().to_lowercase();
        if !candidate.validate_email() {
            return Err(AuthError::Validation("invalid email address".into()));
        }
        let now = self.clock.now();

        let account = self
            .accounts
            .find_by_id(owner_id)
            .await?
            .ok_or(AuthError::NotFound("account"))?;
        if !verify_password(current_password, &account.password_hash)? {
            return Ok(ChangeEmailOutcome::InvalidPassword);
        }
        if self.accounts.find_by_email(&candidate).await?.is_some() {
            return Ok(ChangeEmailOutcome::EmailInUse);
        }

        self.send_verification(&account, &candidate, VerificationPurpose::EmailChange, context, now)
            .await?;
        info!(account_id = %account.id, "email change verification sent");
        Ok(ChangeEmailOutcome::VerificationSent)
    }

    /// Consume an email verification token and activate the account.
    pub async fn verify_email(
        &self,
        raw_token: &str,
        context: &ClientContext,
    ) -> Result<VerifyEmailOutcome> {
        let now = self.clock.now();
        let Some(token) = self.verifications.find(raw_token).await? else {
            return Ok(VerifyEmailOutcome::InvalidToken);
        };
        if token.purpose == VerificationPurpose::PasswordReset {
            return Ok(VerifyEmailOutcome::InvalidToken);
        }

        let outcome = self
            .verifications
            .attempt_verify(&token.token_hash, raw_token, context.ip(), now)
            .await?;
        match outcome {
            VerifyOutcome::Verified => {}
            VerifyOutcome::WrongToken { remaining_attempts } => {
                return Ok(VerifyEmailOutcome::WrongToken { remaining_attempts });
            }
            VerifyOutcome::NotCanVerify { status } => {
                return Ok(VerifyEmailOutcome::NotVerifiable { status });
            }
            VerifyOutcome::NotFound => return Ok(VerifyEmailOutcome::InvalidToken),
        }

        let account = self
            .accounts
            .find_by_id(token.owner_id)
            .await?
            .ok_or(AuthError::NotFound("account"))?;
        // An email-change token carries the candidate address; it is
        // installed only now that control of the mailbox is proven.
        let account = if token.purpose == VerificationPurpose::EmailChange {
            account.change_email(&token.subject_email, now)?
        } else {
            account
        };
        let account = self.accounts.update(account.verify_email(now)?).await?;
        info!(account_id = %account.id, "email verified");
        Ok(VerifyEmailOutcome::Verified)
    }

    /// Reissue the registration verification email.
    pub async fn resend_verification(
        &self,
        email: &str,
        context: &ClientContext,
    ) -> Result<ResendOutcome> {
        let Some(account) = self.accounts.find_by_email(email).await? else {
            return Ok(ResendOutcome::UserNotFound);
        };
        if account.email_verified {
            return Ok(ResendOutcome::AlreadyVerified);
        }
        self.send_verification(&account, &account.email, VerificationPurpose::Registration, context, self.clock.now())
            .await?;
        Ok(ResendOutcome::Sent)
    }

    // -----------------------------------------------------------------
    // Password reset
    // -----------------------------------------------------------------

    /// Start a password reset. The response shape never depends on
    /// whether the address exists; unknown addresses create no record.
    pub async fn request_password_reset(
        &self,
        email: &str,
        context: &ClientContext,
    ) -> Result<ResetRequestOutcome> {
        if let Some(ip) = context.ip() {
            if self.rate_limiter.is_limited(ip).await? {
                return Ok(ResetRequestOutcome::RateLimited);
            }
        }
        let now = self.clock.now();

        let Some(account) = self.accounts.find_by_email(email).await? else {
            info!("password reset requested for unknown address");
            return Ok(ResetRequestOutcome::Accepted);
        };
        if account.is_deleted() {
            return Ok(ResetRequestOutcome::Accepted);
        }

        let ttl = Duration::hours(self.config.password_reset_ttl_hours);
        let (raw, _) = self
            .verifications
            .issue(
                account.id,
                &account.email,
                VerificationPurpose::PasswordReset,
                ttl,
                context,
                now,
            )
            .await?;
        self.dispatch_email(
            account.email.clone(),
            "Reset your password".into(),
            format!("Use this code to reset your password: {raw}"),
        );
        Ok(ResetRequestOutcome::Accepted)
    }

    /// Check a reset token without consuming it. An IP mismatch is the
    /// exception: it is charged as a failed attempt, like a wrong token.
    pub async fn validate_reset_token(
        &self,
        raw_token: &str,
        context: &ClientContext,
    ) -> Result<ResetTokenProbe> {
        let now = self.clock.now();
        let Some(token) = self.find_reset_token(raw_token).await? else {
            return Ok(ResetTokenProbe::NotFound);
        };

        let outcome = if token.matches_ip(context.ip()) {
            self.verifications
                .validate(&token.token_hash, raw_token, context.ip(), now)
                .await?
        } else {
            self.verifications
                .attempt_verify(&token.token_hash, raw_token, context.ip(), now)
                .await?
        };

        Ok(match outcome {
            VerifyOutcome::Verified => ResetTokenProbe::Usable {
                remaining_minutes: token.remaining_minutes(now),
                remaining_attempts: token.remaining_attempts(),
            },
            VerifyOutcome::WrongToken { remaining_attempts } => {
                ResetTokenProbe::WrongToken { remaining_attempts }
            }
            VerifyOutcome::NotCanVerify { status } => ResetTokenProbe::NotUsable { status },
            VerifyOutcome::NotFound => ResetTokenProbe::NotFound,
        })
    }

    /// Consume a reset token and install the new password. On success
    /// every session is revoked, counter-based and password-failure
    /// locks are cleared.
    pub async fn execute_password_reset(
        &self,
        raw_token: &str,
        new_password: &str,
        context: &ClientContext,
    ) -> Result<ResetExecuteOutcome> {
        validate_password_strength(new_password)?;
        let now = self.clock.now();

        let Some(token) = self.find_reset_token(raw_token).await? else {
            return Ok(ResetExecuteOutcome::NotFound);
        };
        if !token.can_verify(now) {
            return Ok(ResetExecuteOutcome::NotUsable {
                status: token.status(now),
            });
        }

        // Reuse is checked before the token is consumed so a rejected
        // password does not cost the user their reset token.
        if self.policy.is_password_reused(token.owner_id, new_password).await? {
            return Ok(ResetExecuteOutcome::PasswordReused);
        }

        match self
            .verifications
            .attempt_verify(&token.token_hash, raw_token, context.ip(), now)
            .await?
        {
            VerifyOutcome::Verified => {}
            VerifyOutcome::WrongToken { remaining_attempts } => {
                return Ok(ResetExecuteOutcome::WrongToken { remaining_attempts });
            }
            VerifyOutcome::NotCanVerify { status } => {
                return Ok(ResetExecuteOutcome::NotUsable { status });
            }
            VerifyOutcome::NotFound => return Ok(ResetExecuteOutcome::NotFound),
        }

        let account = self
            .accounts
            .find_by_id(token.owner_id)
            .await?
            .ok_or(AuthError::NotFound("account"))?;
        let account = self
            .accounts
            .update(account.update_password(&hash_password(new_password)?, now)?)
            .await?;

        self.ledger.revoke_all_for_owner(account.id, None, now).await?;
        self.lockouts
            .unlock(
                account.id,
                &[LockType::PasswordFailed],
                "password reset",
                None,
                now,
            )
            .await?;
        self.accounts.reset_failed_attempts(account.id, now).await?;

        info!(account_id = %account.id, "password reset completed");
        Ok(ResetExecuteOutcome::Completed)
    }

    async fn find_reset_token(
        &self,
        raw_token: &str,
    ) -> Result<Option<crate::models::VerificationToken>> {
        Ok(self
            .verifications
            .find(raw_token)
            .await?
            .filter(|t| t.purpose == VerificationPurpose::PasswordReset))
    }

    // -----------------------------------------------------------------
    // Administrative locking and risk
    // -----------------------------------------------------------------

    /// Lock an account. Temporary when `duration` is given, permanent
    /// otherwise. Locking also revokes every live session.
    pub async fn lock_account(
        &self,
        owner_id: Uuid,
        lock_type: LockType,
        reason: &str,
        duration: Option<Duration>,
        actor: Option<Uuid>,
        context: &ClientContext,
    ) -> Result<Lockout> {
        let now = self.clock.now();
        let lockout = match duration {
            Some(duration) => {
                self.lockouts
                    .create_temporary(owner_id, lock_type, reason, duration, actor, 0, context, now)
                    .await?
            }
            None => {
                self.lockouts
                    .create_permanent(owner_id, lock_type, reason, actor, context, now)
                    .await?
            }
        };
        self.accounts
            .set_locked_until(owner_id, lockout.expires_at, now)
            .await?;
        self.revoke_all_sessions(owner_id, actor).await;
        Ok(lockout)
    }

    /// Release every active lockout and clear the counter-based lock.
    /// Idempotent; returns how many lockouts were newly released.
    pub async fn unlock_account(
        &self,
        owner_id: Uuid,
        reason: &str,
        actor: Option<Uuid>,
    ) -> Result<u64> {
        let now = self.clock.now();
        let released = self
            .lockouts
            .unlock(
                owner_id,
                &[
                    LockType::PasswordFailed,
                    LockType::AccountSuspension,
                    LockType::AdminAction,
                    LockType::SecurityRisk,
                ],
                reason,
                actor,
                now,
            )
            .await?;
        self.accounts.reset_failed_attempts(owner_id, now).await?;
        Ok(released)
    }

    /// Score the request against the security policy hooks. A high
    /// assessment locks the account for the configured risk duration.
    pub async fn assess_risk(
        &self,
        owner_id: Uuid,
        context: &ClientContext,
    ) -> Result<RiskAssessment> {
        let mut signals = Vec::new();
        if self.policy.is_suspicious_location(owner_id, context.ip()).await? {
            signals.push("suspicious location");
        }
        if self
            .policy
            .is_suspicious_device(owner_id, context.user_agent())
            .await?
        {
            signals.push("suspicious device");
        }
        if self.policy.is_abnormal_frequency(owner_id).await? {
            signals.push("abnormal request frequency");
        }

        let level = match signals.len() {
            0 => RiskLevel::Low,
            1 => RiskLevel::Medium,
            _ => RiskLevel::High,
        };

        if level == RiskLevel::High {
            let now = self.clock.now();
            let duration = Duration::minutes(self.config.risk_lockout_minutes);
            let created = self
                .lockouts
                .create_temporary(
                    owner_id,
                    LockType::SecurityRisk,
                    &format!("risk signals: {}", signals.join(", ")),
                    duration,
                    None,
                    0,
                    context,
                    now,
                )
                .await;
            match created {
                Ok(lockout) => {
                    self.accounts
                        .set_locked_until(owner_id, lockout.expires_at, now)
                        .await?;
                    self.revoke_all_sessions(owner_id, None).await;
                }
                // Already under an active risk lock.
                Err(AuthError::StateConflict(_)) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(RiskAssessment { level, signals })
    }

    fn dispatch_email(&self, to: String, subject: String, body: String) {
        let mailer = Arc::clone(&self.mailer);
        tokio::spawn(async move {
            if let Err(err) = mailer.send(&to, &subject, &body).await {
                warn!(error = %err, "email dispatch failed");
            }
        });
    }
}
