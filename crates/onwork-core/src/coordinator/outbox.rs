//! Escrow intents and their confirmation.
//!
//! An intent is validated, submitted through the [`EscrowClient`], and
//! recorded as a pending outbox row keyed by its transaction hash.
//! [`Coordinator::confirm_transaction`] later reads the receipt and applies
//! the matching reconciliation exactly once: the row's status is checked
//! and flipped inside the same immediate transaction as the writes it
//! guards, so replays and concurrent confirmations see `AlreadyApplied`.
//!
//! Rows of one job are applied in the order the chain executed them. A
//! confirmed effect the stored state still refuses ends the row as
//! `rejected` instead of leaving it pending.

use rusqlite::{Connection, Transaction};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{
    Applied, Caller, Change, ChangeSet, Coordinator, acting_user, chain_id, lifecycle, linked_wallet,
    load_application, load_job, load_milestone, reconcile,
};
use crate::db::{self, query, write};
use crate::error::{Entity, OnworkError, Result};
use crate::escrow::{
    EscrowCall, EscrowClient, EscrowError, EscrowEvent, EscrowTx, TxHash, TxReceipt,
};
use crate::model::transaction::idempotency_key;
use crate::model::{
    Amount, CommitmentHash, EscrowTransaction, JobDraft, TxKind, TxPayload, TxStatus, User,
    WalletAddress, now_us,
};

/// What a confirmation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Confirmation {
    /// The receipt confirmed and its effects were written.
    Applied { kind: TxKind, job_id: String },
    /// An earlier confirmation already wrote the effects.
    AlreadyApplied {
        kind: TxKind,
        job_id: Option<String>,
    },
    /// Not mined yet; nothing changed.
    Pending,
    /// The contract rejected the call; nothing to reconcile.
    Reverted { reason: String },
    /// Mined, but the stored state refused the effect; nothing changed.
    Rejected { kind: TxKind, reason: String },
}

/// A checked call ready to send, plus the outbox columns it belongs under.
struct Prepared {
    job_id: Option<String>,
    milestone_id: Option<String>,
    tx: EscrowTx,
}

/// Outcome of a row that no longer waits on the chain.
fn settled(row: &EscrowTransaction) -> Option<Confirmation> {
    let reason = || row.revert_reason.clone().unwrap_or_default();
    match row.status {
        TxStatus::Pending => None,
        TxStatus::Applied => Some(Confirmation::AlreadyApplied {
            kind: row.kind,
            job_id: row.job_id.clone(),
        }),
        TxStatus::Reverted => Some(Confirmation::Reverted { reason: reason() }),
        TxStatus::Rejected => Some(Confirmation::Rejected {
            kind: row.kind,
            reason: reason(),
        }),
    }
}

fn stored_hash(row: &EscrowTransaction) -> Result<TxHash> {
    row.tx_ref
        .parse()
        .map_err(|err| OnworkError::Internal(format!("stored tx_ref is malformed: {err}")))
}

/// Close a pending row. Another writer closing it first is a bug, since
/// every caller holds the immediate transaction.
fn close(
    conn: &Connection,
    row: &EscrowTransaction,
    status: TxStatus,
    job_id: Option<&str>,
    reason: Option<&str>,
    now: i64,
) -> Result<()> {
    if write::resolve_escrow_tx(conn, &row.tx_ref, status, job_id, reason, now)? == 1 {
        Ok(())
    } else {
        Err(OnworkError::Internal(format!(
            "transaction {} changed while confirming",
            row.tx_ref
        )))
    }
}

/// The caller must sign with `expected`.
fn signer(user: &User, expected: &WalletAddress) -> Result<WalletAddress> {
    let wallet = linked_wallet(user)?;
    if wallet == *expected {
        Ok(wallet)
    } else {
        Err(OnworkError::forbidden(format!(
            "this call must be signed by {expected}; your linked wallet is {wallet}"
        )))
    }
}

impl<E: EscrowClient> Coordinator<'_, E> {
    /// Identity and state guards for an intent, and the call it sends.
    fn prepare(
        &self,
        conn: &Connection,
        user: &User,
        job_id: Option<&str>,
        payload: &TxPayload,
    ) -> Result<Prepared> {
        if let TxPayload::CreateJob { draft } = payload {
            if job_id.is_some() {
                return Err(OnworkError::validation("job creation does not take a job id"));
            }
            lifecycle::check_draft(draft, &self.config.escrow)?;
            let from = signer(user, &draft.client_wallet)?;
            return Ok(Prepared {
                job_id: None,
                milestone_id: None,
                tx: EscrowTx {
                    from,
                    value: Amount::ZERO,
                    call: EscrowCall::CreateJob {
                        token_address: draft.token_address.clone(),
                        total_amount: draft.total_amount,
                        arbiter: draft.arbiter.clone(),
                        job_hash: draft.job_hash.clone(),
                        milestone_amounts: draft.milestones.iter().map(|m| m.amount).collect(),
                        milestone_hashes: draft
                            .milestones
                            .iter()
                            .map(|m| m.description_hash.clone())
                            .collect(),
                    },
                },
            });
        }

        let milestone = payload
            .milestone_id()
            .map(|id| load_milestone(conn, id))
            .transpose()?;
        let job_id = match (&milestone, job_id) {
            (Some(m), Some(given)) if m.job_id != given => {
                return Err(OnworkError::validation(format!(
                    "milestone {} belongs to {}, not {given}",
                    m.id, m.job_id
                )));
            }
            (Some(m), _) => m.job_id.clone(),
            (None, Some(given)) => given.to_string(),
            (None, None) => return Err(OnworkError::validation("a job id is required")),
        };
        let job = load_job(conn, &job_id)?;
        let on_chain = chain_id(&job)?;
        let user = &acting_user(conn, &job, user.clone())?;

        let kind = payload.kind();
        if let Some(pending) = query::pending_escrow_txs(conn, Some(&job.id))?
            .into_iter()
            .find(|tx| tx.kind == kind && tx.milestone_id.as_deref() == payload.milestone_id())
        {
            return Err(OnworkError::guard(format!(
                "a {kind} transaction for {} is already pending ({})",
                job.id, pending.tx_ref
            )));
        }

        let (from, value, call) = match payload {
            TxPayload::CreateJob { .. } => {
                return Err(OnworkError::Internal("create handled above".to_string()));
            }
            TxPayload::FundJob { amount } => {
                lifecycle::require_client(&job, user)?;
                let from = signer(user, &job.client_wallet)?;
                let milestones = query::milestones_for_job(conn, &job.id)?;
                lifecycle::check_fund(&job, &milestones)?;
                if *amount != job.total_amount {
                    return Err(OnworkError::amount_mismatch(format!(
                        "deposit {amount} does not equal job total {}",
                        job.total_amount
                    )));
                }
                (from, *amount, EscrowCall::FundJob { job_id: on_chain })
            }
            TxPayload::AssignFreelancer {
                application_id,
                freelancer_wallet,
            } => {
                lifecycle::require_client(&job, user)?;
                let from = signer(user, &job.client_wallet)?;
                let application = load_application(conn, application_id)?;
                let accepted = query::accepted_application(conn, &job.id)?;
                lifecycle::check_assign(&job, &application, accepted.as_ref(), freelancer_wallet)?;
                let call = EscrowCall::AssignFreelancer {
                    job_id: on_chain,
                    freelancer: freelancer_wallet.clone(),
                };
                (from, Amount::ZERO, call)
            }
            TxPayload::SubmitMilestone {
                submission_hash, ..
            } => {
                let milestone = milestone
                    .as_ref()
                    .ok_or_else(|| OnworkError::Internal("milestone not loaded".to_string()))?;
                lifecycle::require_freelancer(&job, user)?;
                lifecycle::check_submit(&job, milestone)?;
                let call = EscrowCall::SubmitMilestone {
                    job_id: on_chain,
                    index: milestone.on_chain_index,
                    submission_hash: submission_hash.clone(),
                };
                (linked_wallet(user)?, Amount::ZERO, call)
            }
            TxPayload::ApproveMilestone { .. } => {
                let milestone = milestone
                    .as_ref()
                    .ok_or_else(|| OnworkError::Internal("milestone not loaded".to_string()))?;
                lifecycle::require_client(&job, user)?;
                let from = signer(user, &job.client_wallet)?;
                lifecycle::check_approve(&job, milestone)?;
                let call = EscrowCall::ApproveMilestone {
                    job_id: on_chain,
                    index: milestone.on_chain_index,
                };
                (from, Amount::ZERO, call)
            }
            TxPayload::RaiseDispute => {
                lifecycle::require_participant(&job, user)?;
                let from = if lifecycle::is_client(&job, user) {
                    signer(user, &job.client_wallet)?
                } else {
                    linked_wallet(user)?
                };
                let milestones = query::milestones_for_job(conn, &job.id)?;
                lifecycle::check_dispute(&job, &milestones)?;
                (from, Amount::ZERO, EscrowCall::RaiseDispute { job_id: on_chain })
            }
            TxPayload::ResolveDispute {
                client_refund,
                freelancer_payment,
            } => {
                lifecycle::require_arbiter(&job, user)?;
                let milestones = query::milestones_for_job(conn, &job.id)?;
                let released = lifecycle::released(&job, &milestones)?;
                lifecycle::check_resolve(&job, released, *client_refund, *freelancer_payment)?;
                let call = EscrowCall::ResolveDispute {
                    job_id: on_chain,
                    client_refund: *client_refund,
                    freelancer_payment: *freelancer_payment,
                };
                (linked_wallet(user)?, Amount::ZERO, call)
            }
        };

        Ok(Prepared {
            job_id: Some(job.id),
            milestone_id: milestone.map(|m| m.id),
            tx: EscrowTx { from, value, call },
        })
    }

    fn record(
        conn: &Connection,
        changes: &mut ChangeSet,
        user: &User,
        prepared: Prepared,
        tx_hash: &TxHash,
        payload: TxPayload,
    ) -> Result<EscrowTransaction> {
        let kind = payload.kind();
        let tx_ref = tx_hash.to_string();
        let row = EscrowTransaction {
            idempotency_key: idempotency_key(kind, prepared.job_id.as_deref(), &tx_ref),
            tx_ref,
            kind,
            job_id: prepared.job_id,
            milestone_id: prepared.milestone_id,
            payload,
            initiated_by: user.id.clone(),
            status: TxStatus::Pending,
            revert_reason: None,
            created_at_us: now_us(),
            resolved_at_us: None,
        };
        if !write::insert_escrow_tx(conn, &row)? {
            return Err(OnworkError::Internal(format!(
                "transaction {} is already recorded",
                row.tx_ref
            )));
        }
        changes.push(Change::Transaction(row.tx_ref.clone()));
        info!(
            tx_ref = %row.tx_ref,
            kind = %kind,
            job_id = ?row.job_id,
            user_id = %user.id,
            "escrow transaction pending"
        );
        Ok(row)
    }

    /// Validate an intent, send it to the contract, and record it pending.
    ///
    /// # Errors
    ///
    /// Returns the guard error if the intent is not allowed now, or an
    /// escrow error if the call could not be sent. If the call was sent but
    /// its row could not be stored, the hash is logged so the call can be
    /// recorded with [`Coordinator::record_pending_transaction`].
    pub fn submit_intent(
        &self,
        caller: &Caller,
        job_id: Option<&str>,
        payload: TxPayload,
    ) -> Result<Applied<EscrowTransaction>> {
        let user = self.authenticate(caller)?;
        let tx = db::begin_immediate(self.conn)?;
        let prepared = self.prepare(&tx, &user, job_id, &payload)?;
        let hash = self.escrow.submit(&prepared.tx)?;

        let mut changes = ChangeSet::default();
        let kind = payload.kind();
        let stored = Self::record(&tx, &mut changes, &user, prepared, &hash, payload)
            .and_then(|row| tx.commit().map(|()| row).map_err(OnworkError::from));
        match stored {
            Ok(row) => Ok(Applied::new(row, changes)),
            Err(err) => {
                warn!(
                    tx_ref = %hash,
                    kind = %kind,
                    job_id = ?job_id,
                    error = %err,
                    "escrow transaction sent but not recorded"
                );
                Err(err)
            }
        }
    }

    /// Record a transaction sent outside the coordinator, after running the
    /// same guards. Recording the same hash twice returns the first row.
    ///
    /// # Errors
    ///
    /// Returns the guard error if the intent would not be allowed, or a
    /// validation error if the hash is already recorded for another call.
    pub fn record_pending_transaction(
        &self,
        caller: &Caller,
        tx_hash: &TxHash,
        job_id: Option<&str>,
        payload: TxPayload,
    ) -> Result<Applied<EscrowTransaction>> {
        let user = self.authenticate(caller)?;
        let tx = db::begin_immediate(self.conn)?;
        if let Some(existing) = query::get_escrow_tx(&tx, tx_hash.as_str())? {
            if existing.payload != payload {
                return Err(OnworkError::validation(format!(
                    "transaction {tx_hash} is already recorded as {}",
                    existing.kind
                )));
            }
            return Ok(Applied::new(existing, ChangeSet::default()));
        }

        let prepared = self.prepare(&tx, &user, job_id, &payload)?;
        let mut changes = ChangeSet::default();
        let row = Self::record(&tx, &mut changes, &user, prepared, tx_hash, payload)?;
        tx.commit()?;
        Ok(Applied::new(row, changes))
    }

    /// Read the receipt for a recorded transaction and reconcile it once.
    ///
    /// Pending rows of the same job that the chain executed earlier are
    /// settled first, in execution order, within the same store
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns not-found for an unknown reference, or an escrow or store
    /// error; the row then stays pending. A confirmed effect the stored
    /// state refuses is not an error: the row ends `rejected`.
    pub fn confirm_transaction(&self, caller: &Caller, tx_ref: &str) -> Result<Applied<Confirmation>> {
        self.authenticate(caller)?;
        let mut tx = db::begin_immediate(self.conn)?;
        let row = query::get_escrow_tx(&tx, tx_ref)?
            .ok_or_else(|| OnworkError::not_found(Entity::Transaction, tx_ref))?;
        let mut changes = ChangeSet::default();
        if let Some(outcome) = settled(&row) {
            return Ok(Applied::new(outcome, changes));
        }

        let receipt = self.escrow.receipt(&stored_hash(&row)?)?;
        if let (TxReceipt::Confirmed { block, index, .. }, Some(job_id)) = (&receipt, row.job_id.as_deref()) {
            for (earlier, earlier_receipt) in self.executed_before(&tx, job_id, &row.tx_ref, (*block, *index))? {
                let outcome = self.settle(&mut tx, &mut changes, &earlier, earlier_receipt)?;
                debug!(tx_ref = %earlier.tx_ref, before = %row.tx_ref, ?outcome, "settled earlier transaction");
            }
        }
        let outcome = self.settle(&mut tx, &mut changes, &row, receipt)?;
        tx.commit()?;
        Ok(Applied::new(outcome, changes))
    }

    /// Other pending rows of `job_id` the chain executed before `position`
    /// (block, index), oldest first.
    fn executed_before(
        &self,
        conn: &Connection,
        job_id: &str,
        tx_ref: &str,
        position: (u64, u32),
    ) -> Result<Vec<(EscrowTransaction, TxReceipt)>> {
        let mut earlier = Vec::new();
        for row in query::pending_escrow_txs(conn, Some(job_id))? {
            if row.tx_ref == tx_ref {
                continue;
            }
            let receipt = match self.escrow.receipt(&stored_hash(&row)?) {
                Ok(receipt) => receipt,
                // recorded by hand under a hash the contract never saw
                Err(EscrowError::UnknownTransaction(_)) => continue,
                Err(err) => return Err(err.into()),
            };
            if let TxReceipt::Confirmed { block, index, .. } = &receipt {
                let at = (*block, *index);
                if at < position {
                    earlier.push((at, row, receipt));
                }
            }
        }
        earlier.sort_by_key(|(at, ..)| *at);
        Ok(earlier.into_iter().map(|(_, row, receipt)| (row, receipt)).collect())
    }

    /// Close one pending row according to its receipt.
    fn settle(
        &self,
        tx: &mut Transaction<'_>,
        changes: &mut ChangeSet,
        row: &EscrowTransaction,
        receipt: TxReceipt,
    ) -> Result<Confirmation> {
        let now = now_us();
        let outcome = match receipt {
            TxReceipt::Pending => return Ok(Confirmation::Pending),
            TxReceipt::Reverted { reason } => {
                close(tx, row, TxStatus::Reverted, None, Some(&reason), now)?;
                warn!(tx_ref = %row.tx_ref, kind = %row.kind, job_id = ?row.job_id, reason = %reason, "escrow transaction reverted");
                Confirmation::Reverted { reason }
            }
            TxReceipt::Confirmed { block, events, .. } => {
                let mut staged = ChangeSet::default();
                let savepoint = tx.savepoint()?;
                match self.reconcile_confirmed(&savepoint, &mut staged, row, &events, now) {
                    Ok(job_id) => {
                        savepoint.commit()?;
                        changes.merge(staged);
                        close(tx, row, TxStatus::Applied, Some(&job_id), None, now)?;
                        info!(tx_ref = %row.tx_ref, kind = %row.kind, job_id = %job_id, block, "escrow transaction applied");
                        Confirmation::Applied {
                            kind: row.kind,
                            job_id,
                        }
                    }
                    Err(err) if err.is_rejection() => {
                        drop(savepoint);
                        let reason = err.to_string();
                        close(tx, row, TxStatus::Rejected, None, Some(&reason), now)?;
                        warn!(
                            tx_ref = %row.tx_ref,
                            kind = %row.kind,
                            job_id = ?row.job_id,
                            code = %err.code(),
                            reason = %reason,
                            block,
                            "confirmed escrow transaction rejected by stored state"
                        );
                        Confirmation::Rejected {
                            kind: row.kind,
                            reason,
                        }
                    }
                    Err(err) => return Err(err),
                }
            }
        };
        changes.push(Change::Transaction(row.tx_ref.clone()));
        Ok(outcome)
    }

    /// Write the effects of a confirmed transaction. Returns the job it
    /// touched.
    fn reconcile_confirmed(
        &self,
        conn: &Connection,
        changes: &mut ChangeSet,
        row: &EscrowTransaction,
        events: &[EscrowEvent],
        now: i64,
    ) -> Result<String> {
        let settings = &self.config.reconcile;

        if let TxPayload::CreateJob { draft } = &row.payload {
            return self.reconcile_create(conn, changes, row, draft, events, now);
        }

        let job_id = row
            .job_id
            .as_deref()
            .ok_or_else(|| OnworkError::Internal(format!("transaction {} has no job", row.tx_ref)))?;
        let job = load_job(conn, job_id)?;

        match &row.payload {
            TxPayload::CreateJob { .. } => {}
            TxPayload::FundJob { .. } => {
                let deposit = events
                    .iter()
                    .find_map(|event| match event {
                        EscrowEvent::JobFunded { job_id, amount } if Some(*job_id) == job.on_chain_id => {
                            Some(*amount)
                        }
                        _ => None,
                    })
                    .ok_or_else(|| {
                        OnworkError::Internal(format!("receipt for {} has no JobFunded event", row.tx_ref))
                    })?;
                reconcile::apply_fund(conn, changes, &job, deposit, now)?;
            }
            TxPayload::AssignFreelancer {
                application_id,
                freelancer_wallet,
            } => {
                let application = load_application(conn, application_id)?;
                reconcile::apply_assign(conn, changes, &job, &application, freelancer_wallet, now)?;
            }
            TxPayload::SubmitMilestone {
                milestone_id,
                submission_hash,
            } => {
                let milestone = load_milestone(conn, milestone_id)?;
                reconcile::apply_submit(conn, changes, &job, &milestone, submission_hash, now)?;
            }
            TxPayload::ApproveMilestone { milestone_id } => {
                let milestone = load_milestone(conn, milestone_id)?;
                reconcile::apply_approve(conn, changes, settings, &job, &milestone, now)?;
            }
            TxPayload::RaiseDispute => {
                reconcile::apply_dispute(conn, changes, &job, now)?;
            }
            TxPayload::ResolveDispute {
                client_refund,
                freelancer_payment,
            } => {
                reconcile::apply_resolve(
                    conn,
                    changes,
                    settings,
                    &job,
                    *client_refund,
                    *freelancer_payment,
                    now,
                )?;
            }
        }
        Ok(job.id)
    }

    fn reconcile_create(
        &self,
        conn: &Connection,
        changes: &mut ChangeSet,
        row: &EscrowTransaction,
        draft: &JobDraft,
        events: &[EscrowEvent],
        now: i64,
    ) -> Result<String> {
        let on_chain_id = events
            .iter()
            .find_map(|event| match event {
                EscrowEvent::JobCreated { job_id, .. } => Some(*job_id),
                _ => None,
            })
            .ok_or_else(|| {
                OnworkError::Internal(format!("receipt for {} has no JobCreated event", row.tx_ref))
            })?;

        // a direct createJob call may have recorded it already
        if let Some(existing) = query::get_job_by_on_chain_id(conn, on_chain_id)? {
            return Ok(existing.id);
        }

        let owner = query::get_user(conn, &row.initiated_by)?
            .ok_or_else(|| OnworkError::not_found(Entity::User, row.initiated_by.clone()))?;
        lifecycle::check_draft(draft, &self.config.escrow)?;
        let (job, _) = reconcile::insert_job_with_milestones(conn, changes, &owner, draft, on_chain_id, now)?;
        Ok(job.id)
    }

    // -----------------------------------------------------------------------
    // Intent shorthands
    // -----------------------------------------------------------------------

    /// Send `createJob` for a draft.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::submit_intent`].
    pub fn send_create_job(&self, caller: &Caller, draft: JobDraft) -> Result<Applied<EscrowTransaction>> {
        self.submit_intent(caller, None, TxPayload::CreateJob { draft })
    }

    /// Send `fundJob` with a deposit of the job total.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::submit_intent`].
    pub fn send_fund_job(&self, caller: &Caller, job_id: &str) -> Result<Applied<EscrowTransaction>> {
        let job = load_job(self.conn, job_id)?;
        self.submit_intent(
            caller,
            Some(job_id),
            TxPayload::FundJob {
                amount: job.total_amount,
            },
        )
    }

    /// Send `assignFreelancer` for the accepted application.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::submit_intent`].
    pub fn send_assign_freelancer(
        &self,
        caller: &Caller,
        job_id: &str,
        application_id: &str,
    ) -> Result<Applied<EscrowTransaction>> {
        let application = load_application(self.conn, application_id)?;
        self.submit_intent(
            caller,
            Some(job_id),
            TxPayload::AssignFreelancer {
                application_id: application.id,
                freelancer_wallet: application.freelancer_wallet,
            },
        )
    }

    /// Send `submitMilestone` with a submission commitment.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::submit_intent`].
    pub fn send_submit_milestone(
        &self,
        caller: &Caller,
        milestone_id: &str,
        submission_hash: CommitmentHash,
    ) -> Result<Applied<EscrowTransaction>> {
        self.submit_intent(
            caller,
            None,
            TxPayload::SubmitMilestone {
                milestone_id: milestone_id.to_string(),
                submission_hash,
            },
        )
    }

    /// Send `approveMilestone`.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::submit_intent`].
    pub fn send_approve_milestone(&self, caller: &Caller, milestone_id: &str) -> Result<Applied<EscrowTransaction>> {
        self.submit_intent(
            caller,
            None,
            TxPayload::ApproveMilestone {
                milestone_id: milestone_id.to_string(),
            },
        )
    }

    /// Send `raiseDispute`.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::submit_intent`].
    pub fn send_raise_dispute(&self, caller: &Caller, job_id: &str) -> Result<Applied<EscrowTransaction>> {
        self.submit_intent(caller, Some(job_id), TxPayload::RaiseDispute)
    }

    /// Send `resolveDispute` with the arbiter's split.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::submit_intent`].
    pub fn send_resolve_dispute(
        &self,
        caller: &Caller,
        job_id: &str,
        client_refund: Amount,
        freelancer_payment: Amount,
    ) -> Result<Applied<EscrowTransaction>> {
        self.submit_intent(
            caller,
            Some(job_id),
            TxPayload::ResolveDispute {
                client_refund,
                freelancer_payment,
            },
        )
    }
}
