//! Outbox records for on-chain calls awaiting reconciliation.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::ParseEnumError;
use super::job::JobDraft;
use super::value::{Amount, CommitmentHash, WalletAddress};

/// Which escrow call a transaction carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    CreateJob,
    FundJob,
    AssignFreelancer,
    SubmitMilestone,
    ApproveMilestone,
    RaiseDispute,
    ResolveDispute,
}

impl TxKind {
    pub const ALL: [Self; 7] = [
        Self::CreateJob,
        Self::FundJob,
        Self::AssignFreelancer,
        Self::SubmitMilestone,
        Self::ApproveMilestone,
        Self::RaiseDispute,
        Self::ResolveDispute,
    ];

    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::CreateJob => "create_job",
            Self::FundJob => "fund_job",
            Self::AssignFreelancer => "assign_freelancer",
            Self::SubmitMilestone => "submit_milestone",
            Self::ApproveMilestone => "approve_milestone",
            Self::RaiseDispute => "raise_dispute",
            Self::ResolveDispute => "resolve_dispute",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ParseEnumError {
                expected: "transaction kind",
                got: s.to_string(),
            })
    }
}

/// Reconciliation state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Applied,
    Reverted,
    /// Confirmed on-chain, but the stored state no longer admits the effect.
    Rejected,
}

impl TxStatus {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Reverted => "reverted",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "applied" => Ok(Self::Applied),
            "reverted" => Ok(Self::Reverted),
            "rejected" => Ok(Self::Rejected),
            _ => Err(ParseEnumError {
                expected: "transaction status",
                got: s.to_string(),
            }),
        }
    }
}

/// What to reconcile once the transaction confirms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxPayload {
    CreateJob {
        draft: JobDraft,
    },
    FundJob {
        amount: Amount,
    },
    AssignFreelancer {
        application_id: String,
        freelancer_wallet: WalletAddress,
    },
    SubmitMilestone {
        milestone_id: String,
        submission_hash: CommitmentHash,
    },
    ApproveMilestone {
        milestone_id: String,
    },
    RaiseDispute,
    ResolveDispute {
        client_refund: Amount,
        freelancer_payment: Amount,
    },
}

impl TxPayload {
    #[must_use]
    pub const fn kind(&self) -> TxKind {
        match self {
            Self::CreateJob { .. } => TxKind::CreateJob,
            Self::FundJob { .. } => TxKind::FundJob,
            Self::AssignFreelancer { .. } => TxKind::AssignFreelancer,
            Self::SubmitMilestone { .. } => TxKind::SubmitMilestone,
            Self::ApproveMilestone { .. } => TxKind::ApproveMilestone,
            Self::RaiseDispute => TxKind::RaiseDispute,
            Self::ResolveDispute { .. } => TxKind::ResolveDispute,
        }
    }

    /// Milestone addressed by the call, if any.
    #[must_use]
    pub fn milestone_id(&self) -> Option<&str> {
        match self {
            Self::SubmitMilestone { milestone_id, .. } | Self::ApproveMilestone { milestone_id } => {
                Some(milestone_id)
            }
            _ => None,
        }
    }
}

/// One row of the escrow outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowTransaction {
    /// Transaction hash reported by the escrow client.
    pub tx_ref: String,
    pub idempotency_key: String,
    pub kind: TxKind,
    /// `None` for job creation until the job row exists.
    pub job_id: Option<String>,
    pub milestone_id: Option<String>,
    pub payload: TxPayload,
    pub initiated_by: String,
    pub status: TxStatus,
    pub revert_reason: Option<String>,
    pub created_at_us: i64,
    pub resolved_at_us: Option<i64>,
}

/// Stable key for one reconciliation: kind, job and transaction reference.
#[must_use]
pub fn idempotency_key(kind: TxKind, job_id: Option<&str>, tx_ref: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    for field in [kind.as_str(), job_id.unwrap_or("-"), tx_ref] {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::{TxKind, TxPayload, TxStatus, idempotency_key};
    use crate::model::Amount;
    use std::str::FromStr;

    #[test]
    fn kinds_parse_from_display() {
        for kind in TxKind::ALL {
            assert_eq!(TxKind::from_str(&kind.to_string()).unwrap(), kind);
        }
        assert_eq!(TxKind::from_str("fund-job").unwrap(), TxKind::FundJob);
        assert_eq!(TxStatus::from_str("APPLIED").unwrap(), TxStatus::Applied);
    }

    #[test]
    fn payload_json_is_tagged_by_kind() {
        let payload = TxPayload::ResolveDispute {
            client_refund: Amount::new(300),
            freelancer_payment: Amount::new(700),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "resolve_dispute");
        assert_eq!(json["freelancer_payment"], "700");
        assert_eq!(payload.kind(), TxKind::ResolveDispute);

        let back: TxPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn idempotency_key_depends_on_every_field() {
        let base = idempotency_key(TxKind::FundJob, Some("job-1"), "0xaa");
        assert_eq!(base, idempotency_key(TxKind::FundJob, Some("job-1"), "0xaa"));
        assert_ne!(base, idempotency_key(TxKind::RaiseDispute, Some("job-1"), "0xaa"));
        assert_ne!(base, idempotency_key(TxKind::FundJob, Some("job-2"), "0xaa"));
        assert_ne!(base, idempotency_key(TxKind::FundJob, None, "0xaa"));
        assert_ne!(base, idempotency_key(TxKind::FundJob, Some("job-1"), "0xab"));
    }
}
