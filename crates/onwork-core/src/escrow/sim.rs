//! Deterministic in-process escrow contract.
//!
//! Transactions queue in a mempool and execute on [`SimulatedEscrow::mine`]
//! (or immediately with auto-mine). Execution applies the contract's rules:
//! sender authorization, exact deposits, per-milestone progress, disputes,
//! and split checking on resolution. A failed rule reverts the transaction
//! and leaves contract state untouched.
//!
//! State can be saved as JSON so separate processes share one chain.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{
    EscrowCall, EscrowClient, EscrowError, EscrowEvent, EscrowTx, OnChainJob, OnChainJobState,
    OnChainMilestone, OnChainMilestoneState, TxHash, TxReceipt,
};
use crate::model::{Amount, WalletAddress};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainState {
    next_job_id: u64,
    block: u64,
    nonce: u64,
    jobs: BTreeMap<u64, OnChainJob>,
    mempool: Vec<(TxHash, EscrowTx)>,
    receipts: BTreeMap<TxHash, TxReceipt>,
}

/// Simulated escrow contract. Interior mutability lets it sit behind the
/// shared-reference [`EscrowClient`] trait.
#[derive(Debug)]
pub struct SimulatedEscrow {
    state: Mutex<ChainState>,
    auto_mine: bool,
}

type Revert = String;

impl SimulatedEscrow {
    /// Fresh chain; job ids start at 1.
    #[must_use]
    pub fn new(auto_mine: bool) -> Self {
        Self {
            state: Mutex::new(ChainState {
                next_job_id: 1,
                ..ChainState::default()
            }),
            auto_mine,
        }
    }

    /// Load chain state from `path`, or start a fresh chain if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path, auto_mine: bool) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(auto_mine));
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read chain state {}", path.display()))?;
        let state: ChainState = serde_json::from_str(&raw)
            .with_context(|| format!("parse chain state {}", path.display()))?;
        Ok(Self {
            state: Mutex::new(state),
            auto_mine,
        })
    }

    /// Write chain state to `path` atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be serialized or written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = {
            let state = self.lock()?;
            serde_json::to_string_pretty(&*state).context("serialize chain state")?
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
        Ok(())
    }

    /// Execute every queued transaction in one new block.
    ///
    /// Returns the hashes that were mined, in submission order.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain state lock is poisoned.
    pub fn mine(&self) -> Result<Vec<TxHash>, EscrowError> {
        let mut state = self.lock()?;
        Ok(state.mine_block())
    }

    /// Number of queued, unmined transactions.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain state lock is poisoned.
    pub fn pending_count(&self) -> Result<usize, EscrowError> {
        Ok(self.lock()?.mempool.len())
    }

    /// Current block height.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain state lock is poisoned.
    pub fn block_height(&self) -> Result<u64, EscrowError> {
        Ok(self.lock()?.block)
    }

    /// Every job the contract knows, by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain state lock is poisoned.
    pub fn jobs(&self) -> Result<Vec<OnChainJob>, EscrowError> {
        Ok(self.lock()?.jobs.values().cloned().collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChainState>, EscrowError> {
        self.state
            .lock()
            .map_err(|_| EscrowError::Unavailable("chain state lock poisoned".to_string()))
    }
}

impl EscrowClient for SimulatedEscrow {
    fn submit(&self, tx: &EscrowTx) -> Result<TxHash, EscrowError> {
        let mut state = self.lock()?;
        state.nonce += 1;

        let encoded = serde_json::to_vec(tx)
            .map_err(|error| EscrowError::Unavailable(format!("encode transaction: {error}")))?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&state.nonce.to_le_bytes());
        hasher.update(&encoded);
        let hash = TxHash::from_digest(&hasher.finalize());

        debug!(tx = %hash, from = %tx.from, "escrow transaction queued");
        state.mempool.push((hash.clone(), tx.clone()));
        if self.auto_mine {
            state.mine_block();
        }
        Ok(hash)
    }

    fn receipt(&self, hash: &TxHash) -> Result<TxReceipt, EscrowError> {
        let state = self.lock()?;
        if let Some(receipt) = state.receipts.get(hash) {
            return Ok(receipt.clone());
        }
        if state.mempool.iter().any(|(queued, _)| queued == hash) {
            return Ok(TxReceipt::Pending);
        }
        Err(EscrowError::UnknownTransaction(hash.to_string()))
    }

    fn job(&self, on_chain_id: u64) -> Result<Option<OnChainJob>, EscrowError> {
        Ok(self.lock()?.jobs.get(&on_chain_id).cloned())
    }
}

impl ChainState {
    fn mine_block(&mut self) -> Vec<TxHash> {
        if self.mempool.is_empty() {
            return Vec::new();
        }
        self.block += 1;
        let block = self.block;
        let queued = std::mem::take(&mut self.mempool);
        let mut mined = Vec::with_capacity(queued.len());

        for (position, (hash, tx)) in (0_u32..).zip(queued) {
            let receipt = match self.execute(&tx) {
                Ok(events) => TxReceipt::Confirmed {
                    block,
                    index: position,
                    events,
                },
                Err(reason) => {
                    debug!(tx = %hash, %reason, "escrow transaction reverted");
                    TxReceipt::Reverted { reason }
                }
            };
            self.receipts.insert(hash.clone(), receipt);
            mined.push(hash);
        }
        mined
    }

    fn execute(&mut self, tx: &EscrowTx) -> Result<Vec<EscrowEvent>, Revert> {
        if !matches!(tx.call, EscrowCall::FundJob { .. }) && !tx.value.is_zero() {
            return Err("call is not payable".to_string());
        }

        match &tx.call {
            EscrowCall::CreateJob {
                token_address,
                total_amount,
                arbiter,
                job_hash,
                milestone_amounts,
                milestone_hashes,
            } => {
                if milestone_amounts.is_empty() {
                    return Err("job needs at least one milestone".to_string());
                }
                if milestone_amounts.len() != milestone_hashes.len() {
                    return Err("milestone amounts and hashes differ in length".to_string());
                }
                if Amount::checked_sum(milestone_amounts.iter().copied()) != Some(*total_amount) {
                    return Err("milestone amounts must sum to total".to_string());
                }
                if *arbiter == tx.from {
                    return Err("client cannot arbitrate own job".to_string());
                }

                let id = self.next_job_id;
                self.next_job_id += 1;
                self.jobs.insert(
                    id,
                    OnChainJob {
                        id,
                        client: tx.from.clone(),
                        freelancer: None,
                        arbiter: arbiter.clone(),
                        token_address: token_address.clone(),
                        job_hash: job_hash.clone(),
                        total_amount: *total_amount,
                        deposited: Amount::ZERO,
                        released: Amount::ZERO,
                        state: OnChainJobState::Open,
                        milestones: milestone_amounts
                            .iter()
                            .zip(milestone_hashes)
                            .map(|(amount, hash)| OnChainMilestone {
                                amount: *amount,
                                description_hash: hash.clone(),
                                submission_hash: None,
                                state: OnChainMilestoneState::Pending,
                            })
                            .collect(),
                    },
                );
                Ok(vec![EscrowEvent::JobCreated {
                    job_id: id,
                    client: tx.from.clone(),
                    total_amount: *total_amount,
                }])
            }

            EscrowCall::FundJob { job_id } => {
                let job = self.job_mut(*job_id)?;
                require_sender(&job.client, &tx.from, "client")?;
                if job.state != OnChainJobState::Open {
                    return Err(format!("job is {}, not open", job.state));
                }
                if tx.value != job.total_amount {
                    return Err(format!(
                        "deposit {} does not equal total {}",
                        tx.value, job.total_amount
                    ));
                }
                job.deposited = tx.value;
                job.state = OnChainJobState::Funded;
                Ok(vec![EscrowEvent::JobFunded {
                    job_id: *job_id,
                    amount: tx.value,
                }])
            }

            EscrowCall::AssignFreelancer { job_id, freelancer } => {
                let job = self.job_mut(*job_id)?;
                require_sender(&job.client, &tx.from, "client")?;
                if job.freelancer.is_some() {
                    return Err("freelancer already assigned".to_string());
                }
                if !matches!(job.state, OnChainJobState::Open | OnChainJobState::Funded) {
                    return Err(format!("job is {}", job.state));
                }
                if *freelancer == job.client || *freelancer == job.arbiter {
                    return Err("freelancer must differ from client and arbiter".to_string());
                }
                job.freelancer = Some(freelancer.clone());
                Ok(vec![EscrowEvent::FreelancerAssigned {
                    job_id: *job_id,
                    freelancer: freelancer.clone(),
                }])
            }

            EscrowCall::SubmitMilestone {
                job_id,
                index,
                submission_hash,
            } => {
                let job = self.job_mut(*job_id)?;
                match job.freelancer.as_ref() {
                    Some(freelancer) => require_sender(freelancer, &tx.from, "freelancer")?,
                    None => return Err("no freelancer assigned".to_string()),
                }
                if job.state != OnChainJobState::Funded {
                    return Err(format!("job is {}, not funded", job.state));
                }
                let milestone = milestone_mut(job, *index)?;
                if milestone.state != OnChainMilestoneState::Pending {
                    return Err(format!("milestone {index} is {}", milestone.state));
                }
                milestone.state = OnChainMilestoneState::Submitted;
                milestone.submission_hash = Some(submission_hash.clone());
                Ok(vec![EscrowEvent::MilestoneSubmitted {
                    job_id: *job_id,
                    index: *index,
                    submission_hash: submission_hash.clone(),
                }])
            }

            EscrowCall::ApproveMilestone { job_id, index } => {
                let job = self.job_mut(*job_id)?;
                require_sender(&job.client, &tx.from, "client")?;
                if job.state != OnChainJobState::Funded {
                    return Err(format!("job is {}, not funded", job.state));
                }
                let released = job.released;
                let milestone = milestone_mut(job, *index)?;
                if milestone.state != OnChainMilestoneState::Submitted {
                    return Err(format!("milestone {index} is {}", milestone.state));
                }
                let amount = milestone.amount;
                let released = released
                    .checked_add(amount)
                    .ok_or_else(|| "release overflow".to_string())?;
                milestone.state = OnChainMilestoneState::Approved;
                job.released = released;
                if job
                    .milestones
                    .iter()
                    .all(|m| m.state == OnChainMilestoneState::Approved)
                {
                    job.state = OnChainJobState::Settled;
                }
                Ok(vec![EscrowEvent::MilestoneApproved {
                    job_id: *job_id,
                    index: *index,
                    amount,
                }])
            }

            EscrowCall::RaiseDispute { job_id } => {
                let job = self.job_mut(*job_id)?;
                let is_party =
                    tx.from == job.client || job.freelancer.as_ref() == Some(&tx.from);
                if !is_party {
                    return Err("only client or freelancer may dispute".to_string());
                }
                if job.state != OnChainJobState::Funded {
                    return Err(format!("job is {}, not funded", job.state));
                }
                job.state = OnChainJobState::Disputed;
                Ok(vec![EscrowEvent::DisputeRaised {
                    job_id: *job_id,
                    by: tx.from.clone(),
                }])
            }

            EscrowCall::ResolveDispute {
                job_id,
                client_refund,
                freelancer_payment,
            } => {
                let job = self.job_mut(*job_id)?;
                require_sender(&job.arbiter, &tx.from, "arbiter")?;
                if job.state != OnChainJobState::Disputed {
                    return Err(format!("job is {}, not disputed", job.state));
                }
                if client_refund.checked_add(*freelancer_payment) != Some(job.total_amount) {
                    return Err("refund and payment must sum to total".to_string());
                }
                if *freelancer_payment < job.released {
                    return Err("payment is below amount already released".to_string());
                }
                job.released = *freelancer_payment;
                job.state = OnChainJobState::Resolved;
                Ok(vec![EscrowEvent::DisputeResolved {
                    job_id: *job_id,
                    client_refund: *client_refund,
                    freelancer_payment: *freelancer_payment,
                }])
            }
        }
    }

    fn job_mut(&mut self, job_id: u64) -> Result<&mut OnChainJob, Revert> {
        self.jobs
            .get_mut(&job_id)
            .ok_or_else(|| format!("job {job_id} does not exist"))
    }
}

fn require_sender(expected: &WalletAddress, from: &WalletAddress, role: &str) -> Result<(), Revert> {
    if expected == from {
        Ok(())
    } else {
        Err(format!("sender is not the {role}"))
    }
}

fn milestone_mut(job: &mut OnChainJob, index: u32) -> Result<&mut OnChainMilestone, Revert> {
    usize::try_from(index)
        .ok()
        .and_then(|i| job.milestones.get_mut(i))
        .ok_or_else(|| format!("milestone {index} does not exist"))
}
