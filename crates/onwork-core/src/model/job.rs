use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::ParseEnumError;
use super::milestone::MilestoneSpec;
use super::value::{Amount, CommitmentHash, WalletAddress};

/// Lifecycle states of a job, mirroring the escrow contract's job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    WaitingFunding,
    Funded,
    InProgress,
    Disputed,
    Completed,
    Cancelled,
    Resolved,
}

impl JobStatus {
    pub const ALL: [Self; 8] = [
        Self::Created,
        Self::WaitingFunding,
        Self::Funded,
        Self::InProgress,
        Self::Disputed,
        Self::Completed,
        Self::Cancelled,
        Self::Resolved,
    ];

    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::WaitingFunding => "WAITING_FUNDING",
            Self::Funded => "FUNDED",
            Self::InProgress => "IN_PROGRESS",
            Self::Disputed => "DISPUTED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Resolved => "RESOLVED",
        }
    }

    /// Terminal states accept no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Resolved)
    }

    /// True once the client's deposit sits in escrow.
    #[must_use]
    pub const fn holds_funds(self) -> bool {
        matches!(self, Self::Funded | Self::InProgress | Self::Disputed)
    }

    /// Validate whether a transition from self to `target` is allowed.
    ///
    /// Valid transitions:
    /// - `created -> waiting_funding | funded | cancelled`
    /// - `waiting_funding -> funded | cancelled`
    /// - `funded -> in_progress | disputed`
    /// - `in_progress -> disputed | completed`
    /// - `disputed -> resolved | completed | cancelled`
    pub const fn can_transition_to(self, target: Self) -> Result<(), InvalidTransition<Self>> {
        if self as u8 == target as u8 {
            return Err(InvalidTransition {
                from: self,
                to: target,
                reason: "no-op transition is not allowed",
            });
        }

        let allowed = matches!(
            (self, target),
            (
                Self::Created,
                Self::WaitingFunding | Self::Funded | Self::Cancelled
            ) | (Self::WaitingFunding, Self::Funded | Self::Cancelled)
                | (Self::Funded, Self::InProgress | Self::Disputed)
                | (Self::InProgress, Self::Disputed | Self::Completed)
                | (
                    Self::Disputed,
                    Self::Resolved | Self::Completed | Self::Cancelled
                )
        );

        if allowed {
            Ok(())
        } else if self.is_terminal() {
            Err(InvalidTransition {
                from: self,
                to: target,
                reason: "job is in a terminal state",
            })
        } else {
            Err(InvalidTransition {
                from: self,
                to: target,
                reason: "transition not allowed by job lifecycle rules",
            })
        }
    }
}

/// Error returned when a state transition is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition<S> {
    pub from: S,
    pub to: S,
    pub reason: &'static str,
}

impl<S: fmt::Display> fmt::Display for InvalidTransition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot move from {} to {}: {}", self.from, self.to, self.reason)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ParseEnumError {
                expected: "job status",
                got: s.to_string(),
            })
    }
}

/// A job as stored in the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    /// Owning user (the client).
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    /// Contract-side job id; known once the creation transaction confirms.
    pub on_chain_id: Option<u64>,
    pub job_hash: CommitmentHash,
    pub client_wallet: WalletAddress,
    pub freelancer_wallet: Option<WalletAddress>,
    pub arbiter: WalletAddress,
    /// `None` means the chain's native currency.
    pub token_address: Option<WalletAddress>,
    pub total_amount: Amount,
    pub status: JobStatus,
    pub created_at_us: i64,
    pub updated_at_us: i64,
}

impl Job {
    /// True when `wallet` is the assigned freelancer.
    #[must_use]
    pub fn is_freelancer(&self, wallet: Option<&WalletAddress>) -> bool {
        matches!((self.freelancer_wallet.as_ref(), wallet), (Some(a), Some(b)) if a == b)
    }

    #[must_use]
    pub fn is_arbiter(&self, wallet: Option<&WalletAddress>) -> bool {
        wallet.is_some_and(|w| *w == self.arbiter)
    }
}

/// A job as submitted to the escrow contract, before the creation
/// transaction confirms and the job gets an on-chain id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDraft {
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub job_hash: CommitmentHash,
    pub client_wallet: WalletAddress,
    pub arbiter: WalletAddress,
    pub token_address: Option<WalletAddress>,
    pub total_amount: Amount,
    pub milestones: Vec<MilestoneSpec>,
}

impl JobDraft {
    /// Commitment over title and description.
    #[must_use]
    pub fn commit(title: &str, description: &str) -> CommitmentHash {
        CommitmentHash::digest_fields(&[title, description])
    }

    /// Sum of milestone amounts; `None` on overflow.
    #[must_use]
    pub fn milestone_sum(&self) -> Option<Amount> {
        Amount::checked_sum(self.milestones.iter().map(|m| m.amount))
    }
}
