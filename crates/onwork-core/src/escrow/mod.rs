//! Escrow contract client.
//!
//! The contract is reached through [`EscrowClient`]: write calls are
//! submitted and answered with a transaction hash, their outcome is read
//! later from a [`TxReceipt`], and the contract's job record can be read
//! directly. Nothing here touches the store.

pub mod sim;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::model::{Amount, CommitmentHash, JobStatus, MilestoneStatus, WalletAddress};
use crate::model::value::ParseValueError;

pub use sim::SimulatedEscrow;

/// Hash identifying a submitted transaction (`0x` + 64 hex digits).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash(String);

impl TxHash {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_digest(digest: &blake3::Hash) -> Self {
        Self(format!("0x{}", digest.to_hex()))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TxHash {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // same shape as a commitment
        s.parse::<CommitmentHash>()
            .map(|hash| Self(String::from(hash)))
            .map_err(|_| ParseValueError {
                expected: "transaction hash",
                got: s.to_string(),
            })
    }
}

impl TryFrom<String> for TxHash {
    type Error = ParseValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TxHash> for String {
    fn from(value: TxHash) -> Self {
        value.0
    }
}

/// A write call against the escrow contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "camelCase")]
pub enum EscrowCall {
    #[serde(rename_all = "camelCase")]
    CreateJob {
        token_address: Option<WalletAddress>,
        total_amount: Amount,
        arbiter: WalletAddress,
        job_hash: CommitmentHash,
        milestone_amounts: Vec<Amount>,
        milestone_hashes: Vec<CommitmentHash>,
    },
    #[serde(rename_all = "camelCase")]
    FundJob { job_id: u64 },
    #[serde(rename_all = "camelCase")]
    AssignFreelancer {
        job_id: u64,
        freelancer: WalletAddress,
    },
    #[serde(rename_all = "camelCase")]
    SubmitMilestone {
        job_id: u64,
        index: u32,
        submission_hash: CommitmentHash,
    },
    #[serde(rename_all = "camelCase")]
    ApproveMilestone { job_id: u64, index: u32 },
    #[serde(rename_all = "camelCase")]
    RaiseDispute { job_id: u64 },
    #[serde(rename_all = "camelCase")]
    ResolveDispute {
        job_id: u64,
        client_refund: Amount,
        freelancer_payment: Amount,
    },
}

/// A signed call: sender, attached native value, and the call itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowTx {
    pub from: WalletAddress,
    pub value: Amount,
    pub call: EscrowCall,
}

/// Events emitted by a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "PascalCase")]
pub enum EscrowEvent {
    #[serde(rename_all = "camelCase")]
    JobCreated {
        job_id: u64,
        client: WalletAddress,
        total_amount: Amount,
    },
    #[serde(rename_all = "camelCase")]
    JobFunded { job_id: u64, amount: Amount },
    #[serde(rename_all = "camelCase")]
    FreelancerAssigned {
        job_id: u64,
        freelancer: WalletAddress,
    },
    #[serde(rename_all = "camelCase")]
    MilestoneSubmitted {
        job_id: u64,
        index: u32,
        submission_hash: CommitmentHash,
    },
    #[serde(rename_all = "camelCase")]
    MilestoneApproved {
        job_id: u64,
        index: u32,
        amount: Amount,
    },
    #[serde(rename_all = "camelCase")]
    DisputeRaised { job_id: u64, by: WalletAddress },
    #[serde(rename_all = "camelCase")]
    DisputeResolved {
        job_id: u64,
        client_refund: Amount,
        freelancer_payment: Amount,
    },
}

/// Outcome of a submitted transaction as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TxReceipt {
    Pending,
    Confirmed {
        block: u64,
        /// Position within the block.
        #[serde(default)]
        index: u32,
        events: Vec<EscrowEvent>,
    },
    Reverted {
        reason: String,
    },
}

/// Contract-side job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnChainJobState {
    Open,
    Funded,
    Disputed,
    Resolved,
    /// Every milestone approved and released.
    Settled,
}

impl OnChainJobState {
    /// Whether a stored job status is consistent with this contract state.
    #[must_use]
    pub const fn is_consistent_with(self, status: JobStatus) -> bool {
        match self {
            Self::Open => matches!(
                status,
                JobStatus::Created | JobStatus::WaitingFunding | JobStatus::Cancelled
            ),
            Self::Funded => matches!(status, JobStatus::Funded | JobStatus::InProgress),
            Self::Disputed => matches!(status, JobStatus::Disputed),
            Self::Resolved => matches!(status, JobStatus::Resolved),
            Self::Settled => matches!(status, JobStatus::InProgress | JobStatus::Completed),
        }
    }
}

impl fmt::Display for OnChainJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Funded => "funded",
            Self::Disputed => "disputed",
            Self::Resolved => "resolved",
            Self::Settled => "settled",
        })
    }
}

/// Contract-side milestone state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnChainMilestoneState {
    Pending,
    Submitted,
    Approved,
}

impl OnChainMilestoneState {
    /// The contract does not know about `IN_PROGRESS`; it reads as pending.
    #[must_use]
    pub const fn is_consistent_with(self, status: MilestoneStatus) -> bool {
        match self {
            Self::Pending => matches!(status, MilestoneStatus::Pending | MilestoneStatus::InProgress),
            Self::Submitted => matches!(status, MilestoneStatus::Submitted),
            Self::Approved => matches!(status, MilestoneStatus::Completed),
        }
    }
}

impl fmt::Display for OnChainMilestoneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainMilestone {
    pub amount: Amount,
    pub description_hash: CommitmentHash,
    pub submission_hash: Option<CommitmentHash>,
    pub state: OnChainMilestoneState,
}

/// The contract's record of a job, as returned by the read call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainJob {
    pub id: u64,
    pub client: WalletAddress,
    pub freelancer: Option<WalletAddress>,
    pub arbiter: WalletAddress,
    pub token_address: Option<WalletAddress>,
    pub job_hash: CommitmentHash,
    pub total_amount: Amount,
    pub deposited: Amount,
    /// Paid out to the freelancer through milestone approvals.
    pub released: Amount,
    pub state: OnChainJobState,
    pub milestones: Vec<OnChainMilestone>,
}

/// Failures talking to the contract. A reverted transaction is not an
/// error; it is a [`TxReceipt::Reverted`].
#[derive(Debug, thiserror::Error)]
pub enum EscrowError {
    #[error("unknown transaction {0}")]
    UnknownTransaction(String),

    #[error("escrow client unavailable: {0}")]
    Unavailable(String),
}

impl From<EscrowError> for crate::error::OnworkError {
    fn from(error: EscrowError) -> Self {
        Self::Escrow(error.to_string())
    }
}

/// Read/write access to the escrow contract.
pub trait EscrowClient {
    /// Submit a write call. The transaction is pending until mined.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot reach the contract.
    fn submit(&self, tx: &EscrowTx) -> Result<TxHash, EscrowError>;

    /// Current outcome of a submitted transaction.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown hash or an unreachable contract.
    fn receipt(&self, hash: &TxHash) -> Result<TxReceipt, EscrowError>;

    /// Read the contract's record of a job.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot reach the contract.
    fn job(&self, on_chain_id: u64) -> Result<Option<OnChainJob>, EscrowError>;
}

impl<E: EscrowClient + ?Sized> EscrowClient for &E {
    fn submit(&self, tx: &EscrowTx) -> Result<TxHash, EscrowError> {
        (**self).submit(tx)
    }

    fn receipt(&self, hash: &TxHash) -> Result<TxReceipt, EscrowError> {
        (**self).receipt(hash)
    }

    fn job(&self, on_chain_id: u64) -> Result<Option<OnChainJob>, EscrowError> {
        (**self).job(on_chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::{EscrowEvent, OnChainJobState, OnChainMilestoneState, TxHash, TxReceipt};
    use crate::model::{Amount, JobStatus, MilestoneStatus};

    #[test]
    fn tx_hash_parses_and_normalizes() {
        let raw = format!("0x{}", "AB".repeat(32));
        let hash: TxHash = raw.parse().unwrap();
        assert_eq!(hash.as_str(), format!("0x{}", "ab".repeat(32)));
        assert!("0x1234".parse::<TxHash>().is_err());
    }

    #[test]
    fn receipt_json_is_tagged() {
        let receipt = TxReceipt::Confirmed {
            block: 7,
            index: 0,
            events: vec![EscrowEvent::JobFunded {
                job_id: 1,
                amount: Amount::new(1000),
            }],
        };
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["status"], "confirmed");
        assert_eq!(json["events"][0]["event"], "JobFunded");
        assert_eq!(json["events"][0]["amount"], "1000");
    }

    #[test]
    fn state_consistency_tables() {
        assert!(OnChainJobState::Open.is_consistent_with(JobStatus::WaitingFunding));
        assert!(!OnChainJobState::Open.is_consistent_with(JobStatus::Funded));
        assert!(OnChainJobState::Funded.is_consistent_with(JobStatus::InProgress));
        assert!(!OnChainJobState::Disputed.is_consistent_with(JobStatus::InProgress));
        assert!(OnChainMilestoneState::Pending.is_consistent_with(MilestoneStatus::InProgress));
        assert!(!OnChainMilestoneState::Approved.is_consistent_with(MilestoneStatus::Submitted));
    }
}
