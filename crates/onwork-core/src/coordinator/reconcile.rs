//! Store writes for confirmed lifecycle effects.
//!
//! Every `apply_*` function re-runs the state guards for its step against
//! rows read on the same connection, then writes. Callers hold one
//! immediate transaction around a call so the read, the guard, and the
//! write cannot interleave with another writer. Identity checks live with
//! the callers; by the time an effect is confirmed on-chain the contract
//! has already checked the sender.

use rusqlite::Connection;
use tracing::{info, warn};

use super::{Change, ChangeSet, lifecycle};
use crate::config::ReconcileConfig;
use crate::db::{query, write};
use crate::error::{Entity, OnworkError, Result};
use crate::model::{
    Amount, ApplicationStatus, CommitmentHash, CreditSource, IdKind, Job, JobApplication,
    JobDraft, JobStatus, Milestone, MilestoneSpec, MilestoneStatus, User, WalletAddress, new_id,
};

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

pub(super) fn new_milestone(job_id: &str, index: u32, spec: &MilestoneSpec, now: i64) -> Milestone {
    Milestone {
        id: new_id(IdKind::Milestone, &format!("{job_id}/{index}")),
        job_id: job_id.to_string(),
        on_chain_index: index,
        amount: spec.amount,
        description_hash: spec.description_hash.clone(),
        submission_hash: None,
        status: MilestoneStatus::Pending,
        created_at_us: now,
        updated_at_us: now,
    }
}

fn require_unused_chain_id(conn: &Connection, on_chain_id: u64) -> Result<()> {
    match query::get_job_by_on_chain_id(conn, on_chain_id)? {
        Some(existing) => Err(OnworkError::guard(format!(
            "on-chain job {on_chain_id} is already recorded as {}",
            existing.id
        ))),
        None => Ok(()),
    }
}

/// Insert a bare job row (no milestones yet).
pub(super) fn insert_job(
    conn: &Connection,
    changes: &mut ChangeSet,
    job: &Job,
) -> Result<()> {
    if let Some(on_chain_id) = job.on_chain_id {
        require_unused_chain_id(conn, on_chain_id)?;
    }
    write::insert_job(conn, job)?;
    changes.job(&job.id);
    info!(job_id = %job.id, on_chain_id = ?job.on_chain_id, total = %job.total_amount, "job created");
    Ok(())
}

/// Insert a job and all of its milestones from a validated draft.
pub(super) fn insert_job_with_milestones(
    conn: &Connection,
    changes: &mut ChangeSet,
    owner: &User,
    draft: &JobDraft,
    on_chain_id: u64,
    now: i64,
) -> Result<(Job, Vec<Milestone>)> {
    let job = Job {
        id: new_id(IdKind::Job, &draft.title),
        user_id: owner.id.clone(),
        title: draft.title.clone(),
        description: draft.description.clone(),
        category: draft.category.clone(),
        on_chain_id: Some(on_chain_id),
        job_hash: draft.job_hash.clone(),
        client_wallet: draft.client_wallet.clone(),
        freelancer_wallet: None,
        arbiter: draft.arbiter.clone(),
        token_address: draft.token_address.clone(),
        total_amount: draft.total_amount,
        status: JobStatus::Created,
        created_at_us: now,
        updated_at_us: now,
    };
    insert_job(conn, changes, &job)?;
    let milestones = insert_milestones(conn, changes, &job.id, &draft.milestones, now)?.0;
    Ok((job, milestones))
}

/// Insert milestones at indices `0..specs.len()`, skipping indices that
/// already hold identical terms.
///
/// Returns the milestones in index order and the number of skipped rows.
pub(super) fn insert_milestones(
    conn: &Connection,
    changes: &mut ChangeSet,
    job_id: &str,
    specs: &[MilestoneSpec],
    now: i64,
) -> Result<(Vec<Milestone>, usize)> {
    let existing = query::milestones_for_job(conn, job_id)?;
    if let Some(extra) = existing
        .iter()
        .find(|m| !usize::try_from(m.on_chain_index).is_ok_and(|i| i < specs.len()))
    {
        return Err(OnworkError::validation(format!(
            "job {job_id} already has milestone index {} beyond the submitted list",
            extra.on_chain_index
        )));
    }

    let mut skipped = 0;
    for (position, spec) in specs.iter().enumerate() {
        let index = u32::try_from(position)
            .map_err(|_| OnworkError::validation("too many milestones"))?;
        if let Some(current) = existing.iter().find(|m| m.on_chain_index == index) {
            if current.amount != spec.amount || current.description_hash != spec.description_hash {
                return Err(OnworkError::validation(format!(
                    "milestone index {index} of {job_id} already exists with different terms"
                )));
            }
            skipped += 1;
            continue;
        }
        let milestone = new_milestone(job_id, index, spec, now);
        if write::insert_milestone_if_absent(conn, &milestone)? {
            changes.milestone(&milestone.id);
        } else {
            skipped += 1;
        }
    }

    let milestones = query::milestones_for_job(conn, job_id)?;
    let indices: Vec<u32> = milestones.iter().map(|m| m.on_chain_index).collect();
    if !crate::model::milestone::is_dense_from_zero(&indices) {
        return Err(OnworkError::Internal(format!(
            "milestone indices of {job_id} are not contiguous"
        )));
    }
    Ok((milestones, skipped))
}

// ---------------------------------------------------------------------------
// Applications and assignment
// ---------------------------------------------------------------------------

pub(super) fn apply_accept(
    conn: &Connection,
    changes: &mut ChangeSet,
    job: &Job,
    application: &JobApplication,
) -> Result<JobApplication> {
    let accepted = query::accepted_application(conn, &job.id)?;
    lifecycle::check_accept(job, application, accepted.as_ref())?;
    write::set_application_status(conn, &application.id, ApplicationStatus::Accepted)?;
    changes.application(&application.id);
    info!(job_id = %job.id, application_id = %application.id, "application accepted");
    Ok(JobApplication {
        status: ApplicationStatus::Accepted,
        ..application.clone()
    })
}

/// Record the assigned freelancer. A job still awaiting a freelancer moves
/// to `WAITING_FUNDING`; a job funded before assignment stays `FUNDED`.
pub(super) fn apply_assign(
    conn: &Connection,
    changes: &mut ChangeSet,
    job: &Job,
    application: &JobApplication,
    wallet: &WalletAddress,
    now: i64,
) -> Result<(Job, JobApplication)> {
    let accepted = query::accepted_application(conn, &job.id)?;
    lifecycle::check_assign(job, application, accepted.as_ref(), wallet)?;

    write::set_job_freelancer(conn, &job.id, wallet, now)?;
    let status = if job.status == JobStatus::Created {
        lifecycle::check_transition(job, JobStatus::WaitingFunding)?;
        write::set_job_status(conn, &job.id, JobStatus::WaitingFunding, now)?;
        JobStatus::WaitingFunding
    } else {
        job.status
    };
    changes.job(&job.id);
    info!(job_id = %job.id, freelancer = %wallet, status = %status, "freelancer assigned");

    let job = Job {
        freelancer_wallet: Some(wallet.clone()),
        status,
        updated_at_us: now,
        ..job.clone()
    };
    Ok((job, application.clone()))
}

// ---------------------------------------------------------------------------
// Funding and work
// ---------------------------------------------------------------------------

pub(super) fn apply_fund(
    conn: &Connection,
    changes: &mut ChangeSet,
    job: &Job,
    deposit: Amount,
    now: i64,
) -> Result<Job> {
    let milestones = query::milestones_for_job(conn, &job.id)?;
    lifecycle::check_fund(job, &milestones)?;
    if deposit != job.total_amount {
        return Err(OnworkError::amount_mismatch(format!(
            "deposit {deposit} does not equal job total {}",
            job.total_amount
        )));
    }
    apply_status(conn, changes, job, JobStatus::Funded, now)
}

/// Move one milestone to `IN_PROGRESS`; the job follows on its first start.
pub(super) fn apply_start(
    conn: &Connection,
    changes: &mut ChangeSet,
    job: &Job,
    milestone: &Milestone,
    now: i64,
) -> Result<(Job, Milestone)> {
    lifecycle::check_start(job, milestone)?;
    let milestone = set_milestone(conn, changes, job, milestone, MilestoneStatus::InProgress, now)?;
    let job = if job.status == JobStatus::Funded {
        apply_status(conn, changes, job, JobStatus::InProgress, now)?
    } else {
        job.clone()
    };
    Ok((job, milestone))
}

pub(super) fn apply_submit(
    conn: &Connection,
    changes: &mut ChangeSet,
    job: &Job,
    milestone: &Milestone,
    submission_hash: &CommitmentHash,
    now: i64,
) -> Result<Milestone> {
    lifecycle::check_submit(job, milestone)?;
    let submitted = Milestone {
        submission_hash: Some(submission_hash.clone()),
        ..milestone.clone()
    };
    set_milestone(conn, changes, job, &submitted, MilestoneStatus::Submitted, now)
}

/// Complete a submitted milestone and credit its amount.
pub(super) fn apply_approve(
    conn: &Connection,
    changes: &mut ChangeSet,
    config: &ReconcileConfig,
    job: &Job,
    milestone: &Milestone,
    now: i64,
) -> Result<Milestone> {
    lifecycle::check_approve(job, milestone)?;
    let completed = set_milestone(conn, changes, job, milestone, MilestoneStatus::Completed, now)?;
    credit_settlement(
        conn,
        changes,
        config,
        job,
        Some(&milestone.id),
        milestone.amount,
        CreditSource::Approval,
        now,
    )?;
    Ok(completed)
}

fn set_milestone(
    conn: &Connection,
    changes: &mut ChangeSet,
    job: &Job,
    milestone: &Milestone,
    status: MilestoneStatus,
    now: i64,
) -> Result<Milestone> {
    if milestone.job_id != job.id {
        return Err(OnworkError::validation(format!(
            "milestone {} does not belong to {}",
            milestone.id, job.id
        )));
    }
    lifecycle::check_milestone_transition(job, milestone, status)?;
    write::set_milestone_status(conn, milestone, status, now)?;
    changes.milestone(&milestone.id);
    info!(
        job_id = %job.id,
        milestone_id = %milestone.id,
        from = %milestone.status,
        to = %status,
        "milestone transition"
    );
    Ok(Milestone {
        status,
        updated_at_us: now,
        ..milestone.clone()
    })
}

// ---------------------------------------------------------------------------
// Disputes and status
// ---------------------------------------------------------------------------

pub(super) fn apply_dispute(
    conn: &Connection,
    changes: &mut ChangeSet,
    job: &Job,
    now: i64,
) -> Result<Job> {
    let milestones = query::milestones_for_job(conn, &job.id)?;
    lifecycle::check_dispute(job, &milestones)?;
    apply_status(conn, changes, job, JobStatus::Disputed, now)
}

/// Resolve a dispute. The part of the payment not already released through
/// approved milestones is credited like an approval; the refund is not.
pub(super) fn apply_resolve(
    conn: &Connection,
    changes: &mut ChangeSet,
    config: &ReconcileConfig,
    job: &Job,
    client_refund: Amount,
    freelancer_payment: Amount,
    now: i64,
) -> Result<Job> {
    let milestones = query::milestones_for_job(conn, &job.id)?;
    let released = lifecycle::released(job, &milestones)?;
    lifecycle::check_resolve(job, released, client_refund, freelancer_payment)?;

    let resolved = apply_status(conn, changes, job, JobStatus::Resolved, now)?;
    let outstanding = freelancer_payment
        .checked_sub(released)
        .ok_or_else(|| OnworkError::Internal("payment below released amount".to_string()))?;
    credit_settlement(
        conn,
        changes,
        config,
        job,
        None,
        outstanding,
        CreditSource::Resolution,
        now,
    )?;
    info!(
        job_id = %job.id,
        client_refund = %client_refund,
        freelancer_payment = %freelancer_payment,
        "dispute resolved"
    );
    Ok(resolved)
}

pub(super) fn apply_complete(
    conn: &Connection,
    changes: &mut ChangeSet,
    job: &Job,
    now: i64,
) -> Result<Job> {
    let milestones = query::milestones_for_job(conn, &job.id)?;
    lifecycle::check_complete(job, &milestones)?;
    apply_status(conn, changes, job, JobStatus::Completed, now)
}

/// Write a validated job status change.
pub(super) fn apply_status(
    conn: &Connection,
    changes: &mut ChangeSet,
    job: &Job,
    status: JobStatus,
    now: i64,
) -> Result<Job> {
    lifecycle::check_transition(job, status)?;
    write::set_job_status(conn, &job.id, status, now)?;
    changes.job(&job.id);
    info!(job_id = %job.id, from = %job.status, to = %status, "job transition");
    Ok(Job {
        status,
        updated_at_us: now,
        ..job.clone()
    })
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

fn add(total: Amount, amount: Amount, user_id: &str) -> Result<Amount> {
    total
        .checked_add(amount)
        .ok_or_else(|| OnworkError::Internal(format!("aggregate overflow for {user_id}")))
}

/// Credit a settled amount: the client's `total_spent` and the freelancer's
/// `total_earned` both grow by `amount`.
///
/// The client always exists. A freelancer wallet with no linked user gets
/// an unclaimed ledger row instead of a credit.
#[allow(clippy::too_many_arguments)]
pub(super) fn credit_settlement(
    conn: &Connection,
    changes: &mut ChangeSet,
    config: &ReconcileConfig,
    job: &Job,
    milestone_id: Option<&str>,
    amount: Amount,
    source: CreditSource,
    now: i64,
) -> Result<()> {
    if amount.is_zero() {
        return Ok(());
    }

    let client = query::get_user(conn, &job.user_id)?.ok_or_else(|| {
        OnworkError::Internal(format!("client {} of {} is missing", job.user_id, job.id))
    })?;
    let spent = add(client.total_spent, amount, &client.id)?;
    write::set_user_totals(conn, &client.id, client.total_earned, spent)?;
    changes.user(&client.id);

    let Some(wallet) = job.freelancer_wallet.as_ref() else {
        return Err(OnworkError::Internal(format!(
            "job {} settled without a freelancer",
            job.id
        )));
    };

    match query::get_user_by_wallet(conn, wallet)? {
        Some(freelancer) => {
            let earned = add(freelancer.total_earned, amount, &freelancer.id)?;
            write::set_user_totals(conn, &freelancer.id, earned, freelancer.total_spent)?;
            changes.user(&freelancer.id);
            info!(
                job_id = %job.id,
                milestone_id = ?milestone_id,
                client = %client.id,
                freelancer = %freelancer.id,
                amount = %amount,
                source = %source,
                "aggregates credited"
            );
        }
        None => {
            let entry = write::insert_unclaimed(conn, wallet, &job.id, milestone_id, amount, source, now)?;
            warn!(
                job_id = %job.id,
                milestone_id = ?milestone_id,
                wallet = %wallet,
                amount = %amount,
                entry,
                credit_on_link = config.credit_unlinked_earnings,
                "freelancer wallet not linked to a user; earnings credit skipped"
            );
        }
    }
    Ok(())
}

/// Credit every unclaimed ledger row for `wallet` to `user` and mark the
/// rows claimed. Returns the credited amount.
pub(super) fn claim_unclaimed(
    conn: &Connection,
    changes: &mut ChangeSet,
    config: &ReconcileConfig,
    user_id: &str,
    wallet: &WalletAddress,
    now: i64,
) -> Result<Amount> {
    if !config.credit_unlinked_earnings {
        return Ok(Amount::ZERO);
    }
    let entries = query::unclaimed_for_wallet(conn, wallet)?;
    if entries.is_empty() {
        return Ok(Amount::ZERO);
    }

    let user = query::get_user(conn, user_id)?
        .ok_or_else(|| OnworkError::not_found(Entity::User, user_id))?;
    let credited = Amount::checked_sum(entries.iter().map(|e| e.amount))
        .ok_or_else(|| OnworkError::Internal(format!("unclaimed total overflows for {wallet}")))?;
    let earned = add(user.total_earned, credited, &user.id)?;
    write::set_user_totals(conn, &user.id, earned, user.total_spent)?;

    let ids: Vec<i64> = entries.iter().map(|e| e.entry_id).collect();
    let claimed = write::claim_unclaimed(conn, &ids, &user.id, now)?;
    if claimed != ids.len() {
        return Err(OnworkError::Internal(format!(
            "claimed {claimed} of {} unclaimed rows for {wallet}",
            ids.len()
        )));
    }
    changes.user(&user.id);
    info!(user_id = %user.id, wallet = %wallet, amount = %credited, rows = ids.len(), "unclaimed earnings credited");
    Ok(credited)
}

/// Record an id-bearing change for a review row.
pub(super) fn review_written(changes: &mut ChangeSet, review_id: &str) {
    changes.push(Change::Review(review_id.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::model::Role;

    fn wallet(n: u8) -> WalletAddress {
        format!("0x{n:040x}").parse().unwrap()
    }

    fn user(conn: &Connection, id: &str, wallet_no: Option<u8>) -> User {
        let user = User {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{id}@example.com"),
            wallet_address: wallet_no.map(wallet),
            role: Role::Client,
            total_earned: Amount::ZERO,
            total_spent: Amount::ZERO,
            created_at_us: 0,
        };
        write::insert_user(conn, &user).unwrap();
        user
    }

    fn draft(amounts: &[u128]) -> JobDraft {
        JobDraft {
            title: "Logo".to_string(),
            description: "A logo".to_string(),
            category: None,
            job_hash: JobDraft::commit("Logo", "A logo"),
            client_wallet: wallet(1),
            arbiter: wallet(3),
            token_address: None,
            total_amount: Amount::new(amounts.iter().sum()),
            milestones: amounts
                .iter()
                .map(|a| MilestoneSpec {
                    amount: Amount::new(*a),
                    description_hash: CommitmentHash::digest(&a.to_string()),
                })
                .collect(),
        }
    }

    fn assigned_job(conn: &Connection, amounts: &[u128]) -> (Job, Vec<Milestone>) {
        let owner = query::get_user(conn, "usr-client").unwrap().unwrap();
        let mut changes = ChangeSet::default();
        let (job, milestones) =
            insert_job_with_milestones(conn, &mut changes, &owner, &draft(amounts), 1, 10).unwrap();
        write::set_job_freelancer(conn, &job.id, &wallet(2), 11).unwrap();
        let job = query::get_job(conn, &job.id).unwrap().unwrap();
        (job, milestones)
    }

    #[test]
    fn creation_writes_dense_milestones() {
        let conn = open_in_memory().unwrap();
        let owner = user(&conn, "usr-client", Some(1));
        let mut changes = ChangeSet::default();
        let (job, milestones) =
            insert_job_with_milestones(&conn, &mut changes, &owner, &draft(&[600, 400]), 7, 10)
                .unwrap();
        assert_eq!(job.on_chain_id, Some(7));
        assert_eq!(
            milestones.iter().map(|m| m.on_chain_index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(changes.0.len(), 3);

        let mut again = ChangeSet::default();
        let err = insert_job_with_milestones(&conn, &mut again, &owner, &draft(&[1000]), 7, 10)
            .unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn replayed_milestones_are_skipped() {
        let conn = open_in_memory().unwrap();
        let owner = user(&conn, "usr-client", Some(1));
        let job = Job {
            id: "job-bare".to_string(),
            user_id: owner.id.clone(),
            title: "t".to_string(),
            description: "d".to_string(),
            category: None,
            on_chain_id: None,
            job_hash: CommitmentHash::digest("t"),
            client_wallet: wallet(1),
            freelancer_wallet: None,
            arbiter: wallet(3),
            token_address: None,
            total_amount: Amount::new(1000),
            status: JobStatus::Created,
            created_at_us: 0,
            updated_at_us: 0,
        };
        let mut changes = ChangeSet::default();
        insert_job(&conn, &mut changes, &job).unwrap();

        let specs = draft(&[600, 400]).milestones;
        let (first, skipped) = insert_milestones(&conn, &mut changes, &job.id, &specs, 1).unwrap();
        assert_eq!((first.len(), skipped), (2, 0));

        let mut replay = ChangeSet::default();
        let (second, skipped) = insert_milestones(&conn, &mut replay, &job.id, &specs, 2).unwrap();
        assert_eq!(second, first);
        assert_eq!(skipped, 2);
        assert!(replay.0.is_empty());

        let different = draft(&[500, 500]).milestones;
        assert!(insert_milestones(&conn, &mut replay, &job.id, &different, 3).unwrap_err().is_validation());
        assert!(insert_milestones(&conn, &mut replay, &job.id, &specs[..1], 3).is_err());
    }

    #[test]
    fn approval_credits_both_sides() {
        let conn = open_in_memory().unwrap();
        user(&conn, "usr-client", Some(1));
        user(&conn, "usr-free", Some(2));
        let (job, milestones) = assigned_job(&conn, &[250, 750]);
        let job = Job {
            status: JobStatus::InProgress,
            ..job
        };
        let submitted = Milestone {
            status: MilestoneStatus::Submitted,
            ..milestones[0].clone()
        };
        write::set_milestone_status(&conn, &submitted, MilestoneStatus::Submitted, 12).unwrap();

        let mut changes = ChangeSet::default();
        let done = apply_approve(&conn, &mut changes, &ReconcileConfig::default(), &job, &submitted, 13)
            .unwrap();
        assert_eq!(done.status, MilestoneStatus::Completed);

        let client = query::get_user(&conn, "usr-client").unwrap().unwrap();
        let freelancer = query::get_user(&conn, "usr-free").unwrap().unwrap();
        assert_eq!(client.total_spent, Amount::new(250));
        assert_eq!(freelancer.total_earned, Amount::new(250));
        assert!(changes.0.contains(&Change::User("usr-free".to_string())));
    }

    #[test]
    fn unlinked_freelancer_lands_in_ledger_and_is_claimed() {
        let conn = open_in_memory().unwrap();
        user(&conn, "usr-client", Some(1));
        let (job, _) = assigned_job(&conn, &[1000]);
        let config = ReconcileConfig::default();

        let mut changes = ChangeSet::default();
        credit_settlement(
            &conn,
            &mut changes,
            &config,
            &job,
            None,
            Amount::new(400),
            CreditSource::Resolution,
            20,
        )
        .unwrap();
        assert_eq!(query::unclaimed_for_wallet(&conn, &wallet(2)).unwrap().len(), 1);
        assert_eq!(
            query::get_user(&conn, "usr-client").unwrap().unwrap().total_spent,
            Amount::new(400)
        );

        let late = user(&conn, "usr-late", None);
        write::update_user_identity(&conn, &late.id, Role::Freelancer, Some(&wallet(2))).unwrap();
        let credited =
            claim_unclaimed(&conn, &mut changes, &config, &late.id, &wallet(2), 30).unwrap();
        assert_eq!(credited, Amount::new(400));
        assert!(query::unclaimed_for_wallet(&conn, &wallet(2)).unwrap().is_empty());
        assert_eq!(
            query::get_user(&conn, "usr-late").unwrap().unwrap().total_earned,
            Amount::new(400)
        );

        let again = claim_unclaimed(&conn, &mut changes, &config, &late.id, &wallet(2), 31).unwrap();
        assert_eq!(again, Amount::ZERO);
    }

    #[test]
    fn claiming_disabled_leaves_rows() {
        let conn = open_in_memory().unwrap();
        user(&conn, "usr-client", Some(1));
        let (job, _) = assigned_job(&conn, &[1000]);
        let config = ReconcileConfig {
            credit_unlinked_earnings: false,
        };
        let mut changes = ChangeSet::default();
        credit_settlement(&conn, &mut changes, &config, &job, None, Amount::new(5), CreditSource::Approval, 1)
            .unwrap();
        let late = user(&conn, "usr-late", Some(2));
        let credited = claim_unclaimed(&conn, &mut changes, &config, &late.id, &wallet(2), 2).unwrap();
        assert_eq!(credited, Amount::ZERO);
        assert_eq!(query::unclaimed_for_wallet(&conn, &wallet(2)).unwrap().len(), 1);
    }

    #[test]
    fn resolution_credits_only_unreleased_payment() {
        let conn = open_in_memory().unwrap();
        user(&conn, "usr-client", Some(1));
        user(&conn, "usr-free", Some(2));
        let (job, milestones) = assigned_job(&conn, &[600, 400]);
        write::set_milestone_status(&conn, &milestones[0], MilestoneStatus::Completed, 12).unwrap();
        write::set_job_status(&conn, &job.id, JobStatus::Disputed, 13).unwrap();
        let job = query::get_job(&conn, &job.id).unwrap().unwrap();

        let mut changes = ChangeSet::default();
        let resolved = apply_resolve(
            &conn,
            &mut changes,
            &ReconcileConfig::default(),
            &job,
            Amount::new(100),
            Amount::new(900),
            14,
        )
        .unwrap();
        assert_eq!(resolved.status, JobStatus::Resolved);
        assert_eq!(
            query::get_user(&conn, "usr-free").unwrap().unwrap().total_earned,
            Amount::new(300)
        );
        assert_eq!(
            query::get_user(&conn, "usr-client").unwrap().unwrap().total_spent,
            Amount::new(300)
        );
    }
}
