/// Data models for authentication
pub mod account;
pub mod lockout;
pub mod token;
pub mod verification;

pub use account::{Account, AccountStatus};
pub use lockout::{LockType, Lockout};
pub use token::RefreshToken;
pub use verification::{VerificationPurpose, VerificationStatus, VerificationToken};
