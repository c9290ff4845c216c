use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::ParseEnumError;
use super::job::InvalidTransition;
use super::value::{Amount, CommitmentHash};

/// Per-milestone lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Submitted,
    Completed,
}

impl MilestoneStatus {
    pub const ALL: [Self; 4] = [
        Self::Pending,
        Self::InProgress,
        Self::Submitted,
        Self::Completed,
    ];

    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Submitted => "SUBMITTED",
            Self::Completed => "COMPLETED",
        }
    }

    /// Only `pending -> in_progress -> submitted -> completed` is allowed.
    pub const fn can_transition_to(self, target: Self) -> Result<(), InvalidTransition<Self>> {
        let allowed = matches!(
            (self, target),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Submitted)
                | (Self::Submitted, Self::Completed)
        );

        if allowed {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self,
                to: target,
                reason: "milestones move pending -> in_progress -> submitted -> completed",
            })
        }
    }
}

impl fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MilestoneStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ParseEnumError {
                expected: "milestone status",
                got: s.to_string(),
            })
    }
}

/// One payable step of a job, addressed on-chain by `(job, on_chain_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: String,
    pub job_id: String,
    pub on_chain_index: u32,
    pub amount: Amount,
    pub description_hash: CommitmentHash,
    pub submission_hash: Option<CommitmentHash>,
    pub status: MilestoneStatus,
    pub created_at_us: i64,
    pub updated_at_us: i64,
}

/// Milestone input as submitted to the contract, in contract order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneSpec {
    pub amount: Amount,
    pub description_hash: CommitmentHash,
}

/// True when `indices` is exactly `0..indices.len()` in any order.
#[must_use]
pub fn is_dense_from_zero(indices: &[u32]) -> bool {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .enumerate()
        .all(|(position, index)| u32::try_from(position).is_ok_and(|p| p == *index))
}
