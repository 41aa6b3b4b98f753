/// Configuration management
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Consecutive failed logins that trigger a lockout.
    #[serde(default = "default_max_failed_logins")]
    pub max_failed_logins: i32,
    /// Duration of the automatic password-failure lockout.
    #[serde(default = "default_lockout_minutes")]
    pub lockout_minutes: i64,
    /// Duration of the lockout created on a high risk assessment.
    #[serde(default = "default_risk_lockout_minutes")]
    pub risk_lockout_minutes: i64,
    /// Refresh token lifetime.
    #[serde(default = "default_refresh_token_ttl_days")]
    pub refresh_token_ttl_days: i64,
    /// Remaining lifetime at or below which a refresh token is rotated.
    #[serde(default = "default_rotation_window_minutes")]
    pub rotation_window_minutes: i64,
    /// Email verification token lifetime.
    #[serde(default = "default_email_verification_ttl_hours")]
    pub email_verification_ttl_hours: i64,
    /// Password reset token lifetime.
    #[serde(default = "default_password_reset_ttl_hours")]
    pub password_reset_ttl_hours: i64,
    /// Age past which revoked/expired tokens are garbage-collected.
    #[serde(default = "default_token_retention_days")]
    pub token_retention_days: i64,
}

fn default_max_failed_logins() -> i32 {
    5
}

fn default_lockout_minutes() -> i64 {
    30
}

fn default_risk_lockout_minutes() -> i64 {
    60
}

fn default_refresh_token_ttl_days() -> i64 {
    7
}

fn default_rotation_window_minutes() -> i64 {
    30
}

fn default_email_verification_ttl_hours() -> i64 {
    24
}

fn default_password_reset_ttl_hours() -> i64 {
    1
}

fn default_token_retention_days() -> i64 {
    30
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_failed_logins: default_max_failed_logins(),
            lockout_minutes: default_lockout_minutes(),
            risk_lockout_minutes: default_risk_lockout_minutes(),
            refresh_token_ttl_days: default_refresh_token_ttl_days(),
            rotation_window_minutes: default_rotation_window_minutes(),
            email_verification_ttl_hours: default_email_verification_ttl_hours(),
            password_reset_ttl_hours: default_password_reset_ttl_hours(),
            token_retention_days: default_token_retention_days(),
        }
    }
}

impl AuthConfig {
    /// Load configuration from `AUTH_`-prefixed environment variables,
    /// falling back to the defaults above for anything unset.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("AUTH_").from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = AuthConfig::default();
        assert_eq!(config.max_failed_logins, 5);
        assert_eq!(config.lockout_minutes, 30);
        assert_eq!(config.refresh_token_ttl_days, 7);
        assert_eq!(config.rotation_window_minutes, 30);
    }
}
