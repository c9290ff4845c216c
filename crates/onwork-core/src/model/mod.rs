//! Domain records and the status enums that drive the lifecycle.

pub mod application;
pub mod job;
pub mod milestone;
pub mod review;
pub mod transaction;
pub mod user;
pub mod value;

use rand::Rng;
use std::fmt;

pub use application::{ApplicationStatus, JobApplication};
pub use job::{InvalidTransition, Job, JobDraft, JobStatus};
pub use milestone::{Milestone, MilestoneSpec, MilestoneStatus};
pub use review::Review;
pub use transaction::{EscrowTransaction, TxKind, TxPayload, TxStatus};
pub use user::{CreditSource, Role, UnclaimedEarning, User};
pub use value::{Amount, CommitmentHash, WalletAddress};

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

/// Record kinds that carry generated identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Job,
    Milestone,
    Application,
    User,
    Review,
}

impl IdKind {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Milestone => "ms",
            Self::Application => "app",
            Self::User => "usr",
            Self::Review => "rev",
        }
    }
}

/// Generate a short prefixed identifier such as `job-3f9a1c0b2d`.
///
/// The suffix is a BLAKE3 digest over the seed, the current time, and a
/// random nonce, truncated to 10 hex digits.
#[must_use]
pub fn new_id(kind: IdKind, seed: &str) -> String {
    let nonce: u64 = rand::thread_rng().r#gen();
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.prefix().as_bytes());
    hasher.update(seed.as_bytes());
    hasher.update(&now_us().to_le_bytes());
    hasher.update(&nonce.to_le_bytes());
    let digest = hasher.finalize().to_hex();
    format!("{}-{}", kind.prefix(), &digest[..10])
}

/// Wall clock in microseconds since the Unix epoch.
#[must_use]
pub fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

#[cfg(test)]
mod tests {
    use super::{IdKind, new_id};

    #[test]
    fn ids_are_prefixed_and_unique() {
        let a = new_id(IdKind::Job, "same seed");
        let b = new_id(IdKind::Job, "same seed");
        assert!(a.starts_with("job-"));
        assert_eq!(a.len(), "job-".len() + 10);
        assert_ne!(a, b);
        assert!(new_id(IdKind::Milestone, "x").starts_with("ms-"));
    }
}
