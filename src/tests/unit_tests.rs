//! End-to-end tests of the orchestrator flows over the in-memory store.

use std::sync::Arc;

use chrono::Duration;

use crate::error::AuthError;
use crate::models::{Account, AccountStatus, LockType, VerificationStatus};
use crate::store::Clock;
use crate::services::{
    AuthOutcome, ChangeEmailOutcome, LogoutOutcome, RefreshOutcome, RegisterCommand,
    RegisterOutcome, ResendOutcome, ResetExecuteOutcome, ResetRequestOutcome, ResetTokenProbe,
    RiskLevel, VerifyEmailOutcome,
};

use super::fixtures::{
    client, harness, token_from_body, wait_for_emails, TestHarness, TEST_EMAIL, TEST_PASSWORD,
    TEST_USERNAME, WRONG_PASSWORD,
};

fn register_command() -> RegisterCommand {
    RegisterCommand {
        username: TEST_USERNAME.into(),
        email: TEST_EMAIL.into(),
        password: TEST_PASSWORD.into(),
    }
}

/// Register and verify the fixture user, consuming the first email.
async fn active_account(h: &TestHarness) -> Account {
    let outcome = h
        .orchestrator
        .register(register_command(), &client())
        .await
        .unwrap();
    let RegisterOutcome::Registered { account } = outcome else {
        panic!("registration failed: {outcome:?}");
    };

    wait_for_emails(&h.mailer, 1).await;
    let (_, _, body) = h.mailer.last().unwrap();
    let raw = token_from_body(&body);
    let outcome = h.orchestrator.verify_email(&raw, &client()).await.unwrap();
    assert_eq!(outcome, VerifyEmailOutcome::Verified);

    h.store_account().await
}

impl TestHarness {
    async fn store_account(&self) -> Account {
        use crate::store::AccountStore;
        self.store
            .find_by_email(TEST_EMAIL)
            .await
            .unwrap()
            .expect("fixture account")
    }
}

#[tokio::test]
async fn registration_and_verification_activate_the_account() {
    let h = harness();
    let account = active_account(&h).await;
    assert_eq!(account.status, AccountStatus::Active);
    assert!(account.email_verified);

    let outcome = h
        .orchestrator
        .authenticate(TEST_USERNAME, TEST_PASSWORD, &client())
        .await
        .unwrap();
    match outcome {
        AuthOutcome::Success {
            account,
            access_token,
            refresh_token,
        } => {
            assert_eq!(access_token, format!("access-{}", account.id));
            assert!(refresh_token.contains('.'));
            assert_eq!(account.failed_login_attempts, 0);
        }
        other => panic!("expected success, got {other:?}"),
    }
    // A successful login clears the identifier's rate-limit record.
    assert_eq!(h.limiter.cleared.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let h = harness();
    active_account(&h).await;

    let outcome = h
        .orchestrator
        .register(register_command(), &client())
        .await
        .unwrap();
    assert!(matches!(outcome, RegisterOutcome::DuplicateIdentity));
}

#[tokio::test]
async fn weak_registration_password_is_a_validation_error() {
    let h = harness();
    let command = RegisterCommand {
        password: "alllowercase".into(),
        ..register_command()
    };
    assert!(matches!(
        h.orchestrator.register(command, &client()).await,
        Err(AuthError::Validation(_))
    ));
}

#[tokio::test]
async fn pending_account_cannot_authenticate() {
    let h = harness();
    h.orchestrator
        .register(register_command(), &client())
        .await
        .unwrap();

    let outcome = h
        .orchestrator
        .authenticate(TEST_USERNAME, TEST_PASSWORD, &client())
        .await
        .unwrap();
    assert!(matches!(outcome, AuthOutcome::EmailNotVerified));
}

#[test]
fn unknown_user_and_wrong_password_share_a_public_message() {
    tokio_test::block_on(async {
        let h = harness();
        active_account(&h).await;

        let not_found = h
            .orchestrator
            .authenticate("nobody", TEST_PASSWORD, &client())
            .await
            .unwrap();
        let wrong = h
            .orchestrator
            .authenticate(TEST_USERNAME, WRONG_PASSWORD, &client())
            .await
            .unwrap();

        assert!(matches!(not_found, AuthOutcome::UserNotFound));
        assert!(matches!(wrong, AuthOutcome::InvalidCredentials));
        assert_eq!(not_found.public_message(), wrong.public_message());
    });
}

#[tokio::test]
async fn rate_limited_ip_short_circuits() {
    let h = harness();
    active_account(&h).await;
    h.limiter.limited.store(true, std::sync::atomic::Ordering::SeqCst);

    let outcome = h
        .orchestrator
        .authenticate(TEST_USERNAME, TEST_PASSWORD, &client())
        .await
        .unwrap();
    assert!(matches!(outcome, AuthOutcome::RateLimited));
}

#[tokio::test]
async fn fifth_failure_locks_for_thirty_minutes() {
    let h = harness();
    let account = active_account(&h).await;

    for _ in 0..5 {
        let outcome = h
            .orchestrator
            .authenticate(TEST_USERNAME, WRONG_PASSWORD, &client())
            .await
            .unwrap();
        assert!(matches!(outcome, AuthOutcome::InvalidCredentials));
    }

    let now = h.clock.now();
    let locks = h.lockouts.active_for(account.id).await.unwrap();
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].lock_type, LockType::PasswordFailed);
    assert_eq!(locks[0].failed_attempts, 5);
    assert!(locks[0].is_locked(now));
    assert!(!h.store_account().await.can_login(now));

    // Even the correct password is refused one second later.
    h.clock.advance(Duration::seconds(1));
    let outcome = h
        .orchestrator
        .authenticate(TEST_USERNAME, TEST_PASSWORD, &client())
        .await
        .unwrap();
    match outcome {
        AuthOutcome::AccountLocked { remaining_minutes } => {
            assert_eq!(remaining_minutes, Some(29));
        }
        other => panic!("expected locked, got {other:?}"),
    }

    // Past expiry the read path unlocks without waiting for the sweep.
    h.clock.advance(Duration::minutes(31));
    let outcome = h
        .orchestrator
        .authenticate(TEST_USERNAME, TEST_PASSWORD, &client())
        .await
        .unwrap();
    assert!(matches!(outcome, AuthOutcome::Success { .. }));
    assert_eq!(h.store_account().await.failed_login_attempts, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_create_exactly_one_lockout() {
    let h = harness();
    let account = active_account(&h).await;

    // One short of the threshold, then race several failures at it.
    for _ in 0..4 {
        h.orchestrator
            .authenticate(TEST_USERNAME, WRONG_PASSWORD, &client())
            .await
            .unwrap();
    }

    let orchestrator = Arc::new(h.orchestrator);
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let orchestrator = orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            orchestrator
                .authenticate(TEST_USERNAME, WRONG_PASSWORD, &client())
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        let outcome = task.await.unwrap();
        assert!(
            matches!(
                outcome,
                AuthOutcome::InvalidCredentials | AuthOutcome::AccountLocked { .. }
            ),
            "unexpected outcome under contention: {outcome:?}"
        );
    }

    // The increments are atomic and lockout creation is first-wins:
    // however the failures interleave, exactly one lockout lands.
    let locks = h.lockouts.active_for(account.id).await.unwrap();
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].lock_type, LockType::PasswordFailed);
    assert!(locks[0].is_locked(h.clock.now()));
}

async fn login(h: &TestHarness) -> String {
    let outcome = h
        .orchestrator
        .authenticate(TEST_USERNAME, TEST_PASSWORD, &client())
        .await
        .unwrap();
    match outcome {
        AuthOutcome::Success { refresh_token, .. } => refresh_token,
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn refresh_rotates_near_expiry_and_burns_replays() {
    let h = harness();
    active_account(&h).await;
    let raw = login(&h).await;

    // Fresh token: refreshed without rotation.
    let outcome = h.orchestrator.refresh(&raw, &client()).await.unwrap();
    let RefreshOutcome::Refreshed { refresh_token, .. } = outcome else {
        panic!("expected refresh, got {outcome:?}");
    };
    assert!(refresh_token.is_none());

    // Inside the rotation window: a successor replaces it in-series.
    h.clock.advance(Duration::days(7) - Duration::minutes(10));
    let outcome = h.orchestrator.refresh(&raw, &client()).await.unwrap();
    let RefreshOutcome::Refreshed {
        refresh_token: Some(rotated),
        ..
    } = outcome
    else {
        panic!("expected rotation, got {outcome:?}");
    };

    // Replaying the predecessor is token theft: the series burns.
    let outcome = h.orchestrator.refresh(&raw, &client()).await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::SecurityViolation));

    // The burned series takes the successor with it.
    let outcome = h.orchestrator.refresh(&rotated, &client()).await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::InvalidToken));
}

#[tokio::test]
async fn refresh_context_mismatch_burns_the_series() {
    let h = harness();
    active_account(&h).await;
    let raw = login(&h).await;

    let mut stranger = client();
    stranger.device_fingerprint = Some("fp-other".into());
    let outcome = h.orchestrator.refresh(&raw, &stranger).await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::SecurityViolation));

    // The legitimate holder is locked out of the series too.
    let outcome = h.orchestrator.refresh(&raw, &client()).await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::InvalidToken));
}

#[tokio::test]
async fn logout_is_idempotent_and_never_fails() {
    let h = harness();
    active_account(&h).await;
    let raw = login(&h).await;

    assert_eq!(
        h.orchestrator.logout(&raw, None).await,
        LogoutOutcome::LoggedOut { revoked: 1 }
    );
    assert_eq!(
        h.orchestrator.logout(&raw, None).await,
        LogoutOutcome::LoggedOut { revoked: 0 }
    );
    assert_eq!(
        h.orchestrator.logout("garbage", None).await,
        LogoutOutcome::LoggedOut { revoked: 0 }
    );

    let outcome = h.orchestrator.refresh(&raw, &client()).await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::InvalidToken));
}

#[tokio::test]
async fn revoke_all_sessions_ends_every_series() {
    let h = harness();
    let account = active_account(&h).await;
    let first = login(&h).await;
    let second = login(&h).await;

    assert_eq!(
        h.orchestrator.revoke_all_sessions(account.id, None).await,
        LogoutOutcome::LoggedOut { revoked: 2 }
    );
    for raw in [first, second] {
        let outcome = h.orchestrator.refresh(&raw, &client()).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::InvalidToken));
    }
}

#[tokio::test]
async fn resend_displaces_the_previous_verification_token() {
    let h = harness();
    h.orchestrator
        .register(register_command(), &client())
        .await
        .unwrap();
    wait_for_emails(&h.mailer, 1).await;
    let (_, _, body) = h.mailer.last().unwrap();
    let old_raw = token_from_body(&body);

    assert_eq!(
        h.orchestrator
            .resend_verification("ghost@example.com", &client())
            .await
            .unwrap(),
        ResendOutcome::UserNotFound
    );

    assert_eq!(
        h.orchestrator
            .resend_verification(TEST_EMAIL, &client())
            .await
            .unwrap(),
        ResendOutcome::Sent
    );
    wait_for_emails(&h.mailer, 2).await;

    // The superseded token no longer verifies.
    let outcome = h.orchestrator.verify_email(&old_raw, &client()).await.unwrap();
    assert_eq!(
        outcome,
        VerifyEmailOutcome::NotVerifiable {
            status: VerificationStatus::Inactive
        }
    );

    let (_, _, body) = h.mailer.last().unwrap();
    let new_raw = token_from_body(&body);
    let outcome = h.orchestrator.verify_email(&new_raw, &client()).await.unwrap();
    assert_eq!(outcome, VerifyEmailOutcome::Verified);

    assert_eq!(
        h.orchestrator
            .resend_verification(TEST_EMAIL, &client())
            .await
            .unwrap(),
        ResendOutcome::AlreadyVerified
    );
}

#[tokio::test]
async fn change_email_takes_effect_only_after_confirmation() {
    use crate::store::AccountStore;

    let h = harness();
    let account = active_account(&h).await;
    const NEW_EMAIL: &str = "alice@new.example.com";

    assert!(matches!(
        h.orchestrator
            .change_email(account.id, TEST_PASSWORD, "not-an-address", &client())
            .await,
        Err(AuthError::Validation(_))
    ));
    assert_eq!(
        h.orchestrator
            .change_email(account.id, WRONG_PASSWORD, NEW_EMAIL, &client())
            .await
            .unwrap(),
        ChangeEmailOutcome::InvalidPassword
    );
    assert_eq!(
        h.orchestrator
            .change_email(account.id, TEST_PASSWORD, TEST_EMAIL, &client())
            .await
            .unwrap(),
        ChangeEmailOutcome::EmailInUse
    );

    assert_eq!(
        h.orchestrator
            .change_email(account.id, TEST_PASSWORD, NEW_EMAIL, &client())
            .await
            .unwrap(),
        ChangeEmailOutcome::VerificationSent
    );
    wait_for_emails(&h.mailer, 2).await;
    let (to, subject, body) = h.mailer.last().unwrap();
    assert_eq!(to, NEW_EMAIL);
    assert!(subject.contains("new email"));

    // The old address stays in force until the mailbox is proven.
    let pending = h.store.find_by_id(account.id).await.unwrap().unwrap();
    assert_eq!(pending.email, TEST_EMAIL);
    assert!(pending.email_verified);

    let raw = token_from_body(&body);
    let outcome = h.orchestrator.verify_email(&raw, &client()).await.unwrap();
    assert_eq!(outcome, VerifyEmailOutcome::Verified);

    let changed = h.store.find_by_id(account.id).await.unwrap().unwrap();
    assert_eq!(changed.email, NEW_EMAIL);
    assert!(changed.email_verified);

    let outcome = h
        .orchestrator
        .authenticate(NEW_EMAIL, TEST_PASSWORD, &client())
        .await
        .unwrap();
    assert!(matches!(outcome, AuthOutcome::Success { .. }));
    let outcome = h
        .orchestrator
        .authenticate(TEST_EMAIL, TEST_PASSWORD, &client())
        .await
        .unwrap();
    assert!(matches!(outcome, AuthOutcome::UserNotFound));
}

#[tokio::test]
async fn ghost_reset_request_is_success_shaped_and_writes_nothing() {
    let h = harness();
    active_account(&h).await;
    let emails_before = h.mailer.count();

    let outcome = h
        .orchestrator
        .request_password_reset("ghost@example.com", &client())
        .await
        .unwrap();
    assert_eq!(outcome, ResetRequestOutcome::Accepted);

    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.mailer.count(), emails_before);
}

async fn reset_token(h: &TestHarness) -> String {
    let before = h.mailer.count();
    let outcome = h
        .orchestrator
        .request_password_reset(TEST_EMAIL, &client())
        .await
        .unwrap();
    assert_eq!(outcome, ResetRequestOutcome::Accepted);
    wait_for_emails(&h.mailer, before + 1).await;
    let (_, _, body) = h.mailer.last().unwrap();
    token_from_body(&body)
}

#[tokio::test]
async fn password_reset_end_to_end() {
    let h = harness();
    active_account(&h).await;
    let session = login(&h).await;
    let raw = reset_token(&h).await;

    let probe = h
        .orchestrator
        .validate_reset_token(&raw, &client())
        .await
        .unwrap();
    assert_eq!(
        probe,
        ResetTokenProbe::Usable {
            remaining_minutes: 60,
            remaining_attempts: 3
        }
    );

    // Reuse rejection must not consume the token.
    h.policy
        .password_reused
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let outcome = h
        .orchestrator
        .execute_password_reset(&raw, "FreshPass456", &client())
        .await
        .unwrap();
    assert_eq!(outcome, ResetExecuteOutcome::PasswordReused);
    h.policy
        .password_reused
        .store(false, std::sync::atomic::Ordering::SeqCst);

    assert!(matches!(
        h.orchestrator
            .execute_password_reset(&raw, "weak", &client())
            .await,
        Err(AuthError::Validation(_))
    ));

    let outcome = h
        .orchestrator
        .execute_password_reset(&raw, "FreshPass456", &client())
        .await
        .unwrap();
    assert_eq!(outcome, ResetExecuteOutcome::Completed);

    // Token is single use.
    let outcome = h
        .orchestrator
        .execute_password_reset(&raw, "FreshPass456", &client())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ResetExecuteOutcome::NotUsable {
            status: VerificationStatus::Used
        }
    );

    // Old sessions are dead, the old password is dead, the new one works.
    let outcome = h.orchestrator.refresh(&session, &client()).await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::InvalidToken));
    let outcome = h
        .orchestrator
        .authenticate(TEST_USERNAME, TEST_PASSWORD, &client())
        .await
        .unwrap();
    assert!(matches!(outcome, AuthOutcome::InvalidCredentials));
    let outcome = h
        .orchestrator
        .authenticate(TEST_USERNAME, "FreshPass456", &client())
        .await
        .unwrap();
    assert!(matches!(outcome, AuthOutcome::Success { .. }));
}

#[tokio::test]
async fn reset_probe_from_wrong_ip_costs_an_attempt() {
    let h = harness();
    active_account(&h).await;
    let raw = reset_token(&h).await;

    let mut elsewhere = client();
    elsewhere.ip_address = Some("10.9.9.9".into());
    let probe = h
        .orchestrator
        .validate_reset_token(&raw, &elsewhere)
        .await
        .unwrap();
    assert_eq!(probe, ResetTokenProbe::WrongToken { remaining_attempts: 2 });

    // From the issuing IP the probe is free.
    let probe = h
        .orchestrator
        .validate_reset_token(&raw, &client())
        .await
        .unwrap();
    assert_eq!(
        probe,
        ResetTokenProbe::Usable {
            remaining_minutes: 60,
            remaining_attempts: 2
        }
    );
}

#[tokio::test]
async fn admin_lock_revokes_sessions_and_unlock_restores_access() {
    let h = harness();
    let account = active_account(&h).await;
    let session = login(&h).await;

    h.orchestrator
        .lock_account(
            account.id,
            LockType::AdminAction,
            "terms violation",
            None,
            None,
            &client(),
        )
        .await
        .unwrap();

    let outcome = h.orchestrator.refresh(&session, &client()).await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::InvalidToken));
    let outcome = h
        .orchestrator
        .authenticate(TEST_USERNAME, TEST_PASSWORD, &client())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        AuthOutcome::AccountLocked {
            remaining_minutes: None
        }
    ));

    let released = h
        .orchestrator
        .unlock_account(account.id, "appeal accepted", None)
        .await
        .unwrap();
    assert_eq!(released, 1);
    // Unlocking twice releases nothing further.
    let released = h
        .orchestrator
        .unlock_account(account.id, "appeal accepted", None)
        .await
        .unwrap();
    assert_eq!(released, 0);

    let outcome = h
        .orchestrator
        .authenticate(TEST_USERNAME, TEST_PASSWORD, &client())
        .await
        .unwrap();
    assert!(matches!(outcome, AuthOutcome::Success { .. }));
}

#[tokio::test]
async fn risk_signals_escalate_to_a_lockout() {
    let h = harness();
    let account = active_account(&h).await;

    let assessment = h.orchestrator.assess_risk(account.id, &client()).await.unwrap();
    assert_eq!(assessment.level, RiskLevel::Low);

    h.policy
        .suspicious_location
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let assessment = h.orchestrator.assess_risk(account.id, &client()).await.unwrap();
    assert_eq!(assessment.level, RiskLevel::Medium);
    assert!(!h.lockouts.currently_locked(account.id, h.clock.now()).await.unwrap());

    h.policy
        .suspicious_device
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let assessment = h.orchestrator.assess_risk(account.id, &client()).await.unwrap();
    assert_eq!(assessment.level, RiskLevel::High);
    assert_eq!(assessment.signals.len(), 2);

    let locks = h.lockouts.active_for(account.id).await.unwrap();
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].lock_type, LockType::SecurityRisk);
    assert_eq!(
        locks[0].remaining_minutes(h.clock.now()),
        Some(60)
    );
}

#[tokio::test]
async fn maintenance_sweep_unlocks_and_purges() {
    let h = harness();
    active_account(&h).await;
    login(&h).await;
    reset_token(&h).await;

    for _ in 0..5 {
        h.orchestrator
            .authenticate(TEST_USERNAME, WRONG_PASSWORD, &client())
            .await
            .unwrap();
    }

    // Past lockout expiry, past token retention.
    h.clock.advance(Duration::days(40));
    let report = h.sweeper.run().await.unwrap();
    assert_eq!(report.lockouts_unlocked, 1);
    assert!(report.verification_tokens_purged >= 1);
    assert!(report.refresh_tokens_purged >= 1);

    // Idempotent: a second sweep finds nothing.
    let report = h.sweeper.run().await.unwrap();
    assert_eq!(report.lockouts_unlocked, 0);
    assert_eq!(report.verification_tokens_purged, 0);
    assert_eq!(report.refresh_tokens_purged, 0);
}
