//! Row-level writes over the marketplace store.
//!
//! These helpers never open transactions themselves; the coordinator wraps
//! each operation's writes in one transaction so partial updates cannot be
//! observed.

use rusqlite::{Connection, params};

use crate::model::{
    Amount, ApplicationStatus, CreditSource, EscrowTransaction, Job, JobApplication, JobStatus,
    Milestone, MilestoneStatus, Review, Role, TxStatus, User, WalletAddress,
};

fn to_sql_i64<T: TryInto<i64>>(value: T) -> rusqlite::Result<i64>
where
    T::Error: std::error::Error + Send + Sync + 'static,
{
    value
        .try_into()
        .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Insert a new user row.
///
/// # Errors
///
/// Returns an error on constraint violation (duplicate email or wallet).
pub fn insert_user(conn: &Connection, user: &User) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO users (
            user_id, name, email, wallet_address, role, total_earned, total_spent, created_at_us
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            user.id,
            user.name,
            user.email,
            user.wallet_address.as_ref().map(WalletAddress::as_str),
            user.role.as_str(),
            user.total_earned.to_string(),
            user.total_spent.to_string(),
            user.created_at_us,
        ],
    )?;
    Ok(())
}

/// Set role and (optionally) wallet for a user.
///
/// # Errors
///
/// Returns an error if the wallet is already linked to another user.
pub fn update_user_identity(
    conn: &Connection,
    user_id: &str,
    role: Role,
    wallet: Option<&WalletAddress>,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE users
         SET role = ?2, wallet_address = COALESCE(?3, wallet_address)
         WHERE user_id = ?1",
        params![user_id, role.as_str(), wallet.map(WalletAddress::as_str)],
    )
}

/// Write new aggregate totals for a user.
///
/// Callers compute the totals with checked addition from the values they
/// read in the same transaction.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn set_user_totals(
    conn: &Connection,
    user_id: &str,
    total_earned: Amount,
    total_spent: Amount,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE users SET total_earned = ?2, total_spent = ?3 WHERE user_id = ?1",
        params![user_id, total_earned.to_string(), total_spent.to_string()],
    )
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Insert a job row.
///
/// # Errors
///
/// Returns an error on constraint violation (duplicate id or on-chain id).
pub fn insert_job(conn: &Connection, job: &Job) -> rusqlite::Result<()> {
    let on_chain_id = job.on_chain_id.map(to_sql_i64).transpose()?;
    conn.execute(
        "INSERT INTO jobs (
            job_id, user_id, title, description, category, on_chain_id, job_hash,
            client_wallet, freelancer_wallet, arbiter, token_address, total_amount,
            status, created_at_us, updated_at_us
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            job.id,
            job.user_id,
            job.title,
            job.description,
            job.category,
            on_chain_id,
            job.job_hash.as_str(),
            job.client_wallet.as_str(),
            job.freelancer_wallet.as_ref().map(WalletAddress::as_str),
            job.arbiter.as_str(),
            job.token_address.as_ref().map(WalletAddress::as_str),
            job.total_amount.to_string(),
            job.status.as_str(),
            job.created_at_us,
            job.updated_at_us,
        ],
    )?;
    Ok(())
}

/// Set a job's status.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn set_job_status(
    conn: &Connection,
    job_id: &str,
    status: JobStatus,
    now_us: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE jobs SET status = ?2, updated_at_us = ?3 WHERE job_id = ?1",
        params![job_id, status.as_str(), now_us],
    )
}

/// Record the assigned freelancer wallet.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn set_job_freelancer(
    conn: &Connection,
    job_id: &str,
    wallet: &WalletAddress,
    now_us: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE jobs SET freelancer_wallet = ?2, updated_at_us = ?3 WHERE job_id = ?1",
        params![job_id, wallet.as_str(), now_us],
    )
}

/// Replace a job's total (only used when all milestones are replaced).
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn set_job_total(
    conn: &Connection,
    job_id: &str,
    total: Amount,
    now_us: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE jobs SET total_amount = ?2, updated_at_us = ?3 WHERE job_id = ?1",
        params![job_id, total.to_string(), now_us],
    )
}

/// Delete a job; milestones, applications and reviews cascade.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn delete_job(conn: &Connection, job_id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id])
}

// ---------------------------------------------------------------------------
// Milestones
// ---------------------------------------------------------------------------

/// Insert a milestone unless `(job_id, on_chain_index)` already exists.
///
/// Returns `true` when a row was written.
///
/// # Errors
///
/// Returns an error if the insert fails for a reason other than the
/// duplicate index.
pub fn insert_milestone_if_absent(conn: &Connection, milestone: &Milestone) -> rusqlite::Result<bool> {
    let written = conn.execute(
        "INSERT INTO milestones (
            milestone_id, job_id, on_chain_index, amount, description_hash,
            submission_hash, status, created_at_us, updated_at_us
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT (job_id, on_chain_index) DO NOTHING",
        params![
            milestone.id,
            milestone.job_id,
            milestone.on_chain_index,
            milestone.amount.to_string(),
            milestone.description_hash.as_str(),
            milestone.submission_hash.as_ref().map(|hash| hash.as_str()),
            milestone.status.as_str(),
            milestone.created_at_us,
            milestone.updated_at_us,
        ],
    )?;
    Ok(written > 0)
}

/// Remove every milestone of a job.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn delete_milestones_for_job(conn: &Connection, job_id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM milestones WHERE job_id = ?1", params![job_id])
}

/// Set a milestone's status, and its submission hash when given.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn set_milestone_status(
    conn: &Connection,
    milestone: &Milestone,
    status: MilestoneStatus,
    now_us: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE milestones
         SET status = ?2, submission_hash = ?3, updated_at_us = ?4
         WHERE milestone_id = ?1",
        params![
            milestone.id,
            status.as_str(),
            milestone.submission_hash.as_ref().map(|hash| hash.as_str()),
            now_us,
        ],
    )
}

// ---------------------------------------------------------------------------
// Applications
// ---------------------------------------------------------------------------

/// Insert an application row.
///
/// # Errors
///
/// Returns an error on constraint violation (same wallet applying twice).
pub fn insert_application(conn: &Connection, application: &JobApplication) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO job_applications (
            application_id, job_id, applicant_id, freelancer_wallet, cover_letter, status,
            created_at_us
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            application.id,
            application.job_id,
            application.applicant_id,
            application.freelancer_wallet.as_str(),
            application.cover_letter,
            application.status.as_str(),
            application.created_at_us,
        ],
    )?;
    Ok(())
}

/// Set an application's status.
///
/// # Errors
///
/// Returns an error if the update fails, including a second ACCEPTED row.
pub fn set_application_status(
    conn: &Connection,
    application_id: &str,
    status: ApplicationStatus,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE job_applications SET status = ?2 WHERE application_id = ?1",
        params![application_id, status.as_str()],
    )
}

// ---------------------------------------------------------------------------
// Reviews
// ---------------------------------------------------------------------------

/// Insert a review row.
///
/// # Errors
///
/// Returns an error on constraint violation (second review for a job).
pub fn insert_review(conn: &Connection, review: &Review) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO reviews (review_id, job_id, rating, comment, created_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            review.id,
            review.job_id,
            review.rating,
            review.comment,
            review.created_at_us,
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Insert a pending outbox row.
///
/// Returns `false` when the transaction reference is already recorded.
///
/// # Errors
///
/// Returns an error if the payload cannot be encoded or the insert fails.
pub fn insert_escrow_tx(conn: &Connection, tx: &EscrowTransaction) -> rusqlite::Result<bool> {
    let payload_json = serde_json::to_string(&tx.payload)
        .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    let written = conn.execute(
        "INSERT INTO escrow_transactions (
            tx_ref, idempotency_key, kind, job_id, milestone_id, payload_json,
            initiated_by, status, revert_reason, created_at_us, resolved_at_us
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT (tx_ref) DO NOTHING",
        params![
            tx.tx_ref,
            tx.idempotency_key,
            tx.kind.as_str(),
            tx.job_id,
            tx.milestone_id,
            payload_json,
            tx.initiated_by,
            tx.status.as_str(),
            tx.revert_reason,
            tx.created_at_us,
            tx.resolved_at_us,
        ],
    )?;
    Ok(written > 0)
}

/// Move a pending outbox row to a final status.
///
/// Only rows still `pending` are touched; the returned count is 0 when
/// another writer resolved the row first.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn resolve_escrow_tx(
    conn: &Connection,
    tx_ref: &str,
    status: TxStatus,
    job_id: Option<&str>,
    revert_reason: Option<&str>,
    now_us: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE escrow_transactions
         SET status = ?2,
             job_id = COALESCE(job_id, ?3),
             revert_reason = ?4,
             resolved_at_us = ?5
         WHERE tx_ref = ?1 AND status = 'pending'",
        params![tx_ref, status.as_str(), job_id, revert_reason, now_us],
    )
}

// ---------------------------------------------------------------------------
// Unclaimed earnings
// ---------------------------------------------------------------------------

/// Record a freelancer credit that had no linked user to land on.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_unclaimed(
    conn: &Connection,
    wallet: &WalletAddress,
    job_id: &str,
    milestone_id: Option<&str>,
    amount: Amount,
    source: CreditSource,
    now_us: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO unclaimed_earnings (
            wallet_address, job_id, milestone_id, amount, source, created_at_us
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            wallet.as_str(),
            job_id,
            milestone_id,
            amount.to_string(),
            source.as_str(),
            now_us,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Mark ledger rows as claimed by a user.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn claim_unclaimed(
    conn: &Connection,
    entry_ids: &[i64],
    user_id: &str,
    now_us: i64,
) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(
        "UPDATE unclaimed_earnings
         SET claimed_by = ?2, claimed_at_us = ?3
         WHERE entry_id = ?1 AND claimed_at_us IS NULL",
    )?;
    let mut claimed = 0;
    for entry_id in entry_ids {
        claimed += stmt.execute(params![entry_id, user_id, now_us])?;
    }
    Ok(claimed)
}
