//! Typed reads over the marketplace store.
//!
//! All functions take a shared `&Connection` and return domain records, never
//! raw rows. They return `rusqlite::Result` so the coordinator can fold store
//! failures into its own error type with `?`.

use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};
use std::str::FromStr;

use crate::model::{
    Amount, EscrowTransaction, Job, JobApplication, JobStatus, Milestone, Review, TxPayload,
    UnclaimedEarning, User, WalletAddress,
};

// ---------------------------------------------------------------------------
// Column lists
// ---------------------------------------------------------------------------

const JOB_COLUMNS: &str = "job_id, user_id, title, description, category, on_chain_id, \
     job_hash, client_wallet, freelancer_wallet, arbiter, token_address, total_amount, \
     status, created_at_us, updated_at_us";

const MILESTONE_COLUMNS: &str = "milestone_id, job_id, on_chain_index, amount, \
     description_hash, submission_hash, status, created_at_us, updated_at_us";

const APPLICATION_COLUMNS: &str = "application_id, job_id, applicant_id, freelancer_wallet, \
     cover_letter, status, created_at_us";

const USER_COLUMNS: &str =
    "user_id, name, email, wallet_address, role, total_earned, total_spent, created_at_us";

const REVIEW_COLUMNS: &str = "review_id, job_id, rating, comment, created_at_us";

const ESCROW_TX_COLUMNS: &str = "tx_ref, idempotency_key, kind, job_id, milestone_id, \
     payload_json, initiated_by, status, revert_reason, created_at_us, resolved_at_us";

const UNCLAIMED_COLUMNS: &str = "entry_id, wallet_address, job_id, milestone_id, amount, \
     source, created_at_us, claimed_by, claimed_at_us";

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Fetch a job by id.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn get_job(conn: &Connection, job_id: &str) -> rusqlite::Result<Option<Job>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
        params![job_id],
        row_to_job,
    )
    .optional()
}

/// Fetch a job by its contract-side id.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn get_job_by_on_chain_id(conn: &Connection, on_chain_id: u64) -> rusqlite::Result<Option<Job>> {
    let on_chain_id = i64::try_from(on_chain_id)
        .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE on_chain_id = ?1"),
        params![on_chain_id],
        row_to_job,
    )
    .optional()
}

/// All jobs, newest first.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn list_jobs(conn: &Connection) -> rusqlite::Result<Vec<Job>> {
    collect(
        conn,
        &format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at_us DESC, job_id ASC"),
        [],
        row_to_job,
    )
}

/// Jobs where the user is the client, or the freelancer when `wallet` is set.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn list_jobs_for_participant(
    conn: &Connection,
    user_id: &str,
    wallet: Option<&WalletAddress>,
) -> rusqlite::Result<Vec<Job>> {
    collect(
        conn,
        &format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE user_id = ?1 OR (?2 IS NOT NULL AND freelancer_wallet = ?2)
             ORDER BY created_at_us DESC, job_id ASC"
        ),
        params![user_id, wallet.map(WalletAddress::as_str)],
        row_to_job,
    )
}

/// Jobs in `status` arbitrated by `arbiter`, newest first.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn list_jobs_for_arbiter(
    conn: &Connection,
    arbiter: &WalletAddress,
    status: JobStatus,
) -> rusqlite::Result<Vec<Job>> {
    collect(
        conn,
        &format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE arbiter = ?1 AND status = ?2
             ORDER BY created_at_us DESC, job_id ASC"
        ),
        params![arbiter.as_str(), status.as_str()],
        row_to_job,
    )
}

/// Number of jobs currently in `status`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_jobs_in_status(conn: &Connection, status: JobStatus) -> rusqlite::Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Count jobs where the user is client, and where `wallet` is freelancer.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_jobs_by_role(
    conn: &Connection,
    user_id: &str,
    wallet: Option<&WalletAddress>,
) -> rusqlite::Result<(u64, u64)> {
    let (as_client, as_freelancer): (i64, i64) = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM jobs WHERE user_id = ?1),
            (SELECT COUNT(*) FROM jobs WHERE ?2 IS NOT NULL AND freelancer_wallet = ?2)",
        params![user_id, wallet.map(WalletAddress::as_str)],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok((
        u64::try_from(as_client).unwrap_or(0),
        u64::try_from(as_freelancer).unwrap_or(0),
    ))
}

/// Most recently created jobs, optionally filtered by a free-text needle
/// matched against title, description, wallets, and the job hash.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn recent_jobs(
    conn: &Connection,
    needle: Option<&str>,
    limit: u32,
) -> rusqlite::Result<Vec<Job>> {
    let pattern = needle.map(like_pattern);
    collect(
        conn,
        &format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE ?1 IS NULL
                OR title LIKE ?1 ESCAPE '\\'
                OR description LIKE ?1 ESCAPE '\\'
                OR client_wallet LIKE ?1 ESCAPE '\\'
                OR IFNULL(freelancer_wallet, '') LIKE ?1 ESCAPE '\\'
                OR arbiter LIKE ?1 ESCAPE '\\'
                OR job_hash LIKE ?1 ESCAPE '\\'
             ORDER BY created_at_us DESC, job_id ASC
             LIMIT ?2"
        ),
        params![pattern, limit],
        row_to_job,
    )
}

// ---------------------------------------------------------------------------
// Milestones
// ---------------------------------------------------------------------------

/// Milestones of a job in on-chain order.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn milestones_for_job(conn: &Connection, job_id: &str) -> rusqlite::Result<Vec<Milestone>> {
    collect(
        conn,
        &format!(
            "SELECT {MILESTONE_COLUMNS} FROM milestones
             WHERE job_id = ?1
             ORDER BY on_chain_index ASC"
        ),
        params![job_id],
        row_to_milestone,
    )
}

/// Fetch a milestone by id.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn get_milestone(conn: &Connection, milestone_id: &str) -> rusqlite::Result<Option<Milestone>> {
    conn.query_row(
        &format!("SELECT {MILESTONE_COLUMNS} FROM milestones WHERE milestone_id = ?1"),
        params![milestone_id],
        row_to_milestone,
    )
    .optional()
}

/// A milestone update paired with the title of its job, for the explorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestoneActivity {
    pub milestone: Milestone,
    pub job_title: String,
}

/// Most recently updated milestones, optionally filtered like
/// [`recent_jobs`] (job title, milestone hashes).
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn recent_milestone_activity(
    conn: &Connection,
    needle: Option<&str>,
    limit: u32,
) -> rusqlite::Result<Vec<MilestoneActivity>> {
    let pattern = needle.map(like_pattern);
    let columns = MILESTONE_COLUMNS
        .split(',')
        .map(|column| format!("m.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    collect(
        conn,
        &format!(
            "SELECT {columns}, j.title FROM milestones m
             JOIN jobs j ON j.job_id = m.job_id
             WHERE ?1 IS NULL
                OR j.title LIKE ?1 ESCAPE '\\'
                OR m.description_hash LIKE ?1 ESCAPE '\\'
                OR IFNULL(m.submission_hash, '') LIKE ?1 ESCAPE '\\'
                OR IFNULL(j.freelancer_wallet, '') LIKE ?1 ESCAPE '\\'
             ORDER BY m.updated_at_us DESC, m.milestone_id ASC
             LIMIT ?2"
        ),
        params![pattern, limit],
        |row| {
            Ok(MilestoneActivity {
                milestone: row_to_milestone(row)?,
                job_title: row.get(9)?,
            })
        },
    )
}

// ---------------------------------------------------------------------------
// Applications
// ---------------------------------------------------------------------------

/// Applications for a job, oldest first.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn applications_for_job(
    conn: &Connection,
    job_id: &str,
) -> rusqlite::Result<Vec<JobApplication>> {
    collect(
        conn,
        &format!(
            "SELECT {APPLICATION_COLUMNS} FROM job_applications
             WHERE job_id = ?1
             ORDER BY created_at_us ASC, application_id ASC"
        ),
        params![job_id],
        row_to_application,
    )
}

/// Fetch an application by id.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn get_application(
    conn: &Connection,
    application_id: &str,
) -> rusqlite::Result<Option<JobApplication>> {
    conn.query_row(
        &format!("SELECT {APPLICATION_COLUMNS} FROM job_applications WHERE application_id = ?1"),
        params![application_id],
        row_to_application,
    )
    .optional()
}

/// The accepted application of a job, if one exists.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn accepted_application(
    conn: &Connection,
    job_id: &str,
) -> rusqlite::Result<Option<JobApplication>> {
    conn.query_row(
        &format!(
            "SELECT {APPLICATION_COLUMNS} FROM job_applications
             WHERE job_id = ?1 AND status = 'ACCEPTED'"
        ),
        params![job_id],
        row_to_application,
    )
    .optional()
}

/// Whether `wallet` has already applied to `job_id`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn has_applied(conn: &Connection, job_id: &str, wallet: &WalletAddress) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM job_applications WHERE job_id = ?1 AND freelancer_wallet = ?2
         )",
        params![job_id, wallet.as_str()],
        |row| row.get(0),
    )
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Fetch a user by id.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn get_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
        params![user_id],
        row_to_user,
    )
    .optional()
}

/// Look a user up by linked wallet.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn get_user_by_wallet(
    conn: &Connection,
    wallet: &WalletAddress,
) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE wallet_address = ?1"),
        params![wallet.as_str()],
        row_to_user,
    )
    .optional()
}

/// Look a user up by email (case-insensitive).
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn get_user_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower(?1)"),
        params![email.trim()],
        row_to_user,
    )
    .optional()
}

// ---------------------------------------------------------------------------
// Reviews
// ---------------------------------------------------------------------------

/// Reviews attached to a job.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn reviews_for_job(conn: &Connection, job_id: &str) -> rusqlite::Result<Vec<Review>> {
    collect(
        conn,
        &format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE job_id = ?1 ORDER BY created_at_us"),
        params![job_id],
        row_to_review,
    )
}

/// Reviews on jobs the user took part in, as client or as freelancer.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn reviews_for_participant(
    conn: &Connection,
    user_id: &str,
    wallet: Option<&WalletAddress>,
) -> rusqlite::Result<Vec<Review>> {
    let columns = REVIEW_COLUMNS
        .split(',')
        .map(|column| format!("r.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    collect(
        conn,
        &format!(
            "SELECT {columns} FROM reviews r
             JOIN jobs j ON j.job_id = r.job_id
             WHERE j.user_id = ?1 OR (?2 IS NOT NULL AND j.freelancer_wallet = ?2)
             ORDER BY r.created_at_us"
        ),
        params![user_id, wallet.map(WalletAddress::as_str)],
        row_to_review,
    )
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Fetch an outbox row by transaction reference.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn get_escrow_tx(conn: &Connection, tx_ref: &str) -> rusqlite::Result<Option<EscrowTransaction>> {
    conn.query_row(
        &format!("SELECT {ESCROW_TX_COLUMNS} FROM escrow_transactions WHERE tx_ref = ?1"),
        params![tx_ref],
        row_to_escrow_tx,
    )
    .optional()
}

/// Outbox rows still awaiting confirmation, oldest first.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn pending_escrow_txs(
    conn: &Connection,
    job_id: Option<&str>,
) -> rusqlite::Result<Vec<EscrowTransaction>> {
    collect(
        conn,
        &format!(
            "SELECT {ESCROW_TX_COLUMNS} FROM escrow_transactions
             WHERE status = 'pending' AND (?1 IS NULL OR job_id = ?1)
             ORDER BY created_at_us ASC, tx_ref ASC"
        ),
        params![job_id],
        row_to_escrow_tx,
    )
}

/// All outbox rows for a job, oldest first.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn escrow_txs_for_job(
    conn: &Connection,
    job_id: &str,
) -> rusqlite::Result<Vec<EscrowTransaction>> {
    collect(
        conn,
        &format!(
            "SELECT {ESCROW_TX_COLUMNS} FROM escrow_transactions
             WHERE job_id = ?1
             ORDER BY created_at_us ASC, tx_ref ASC"
        ),
        params![job_id],
        row_to_escrow_tx,
    )
}

// ---------------------------------------------------------------------------
// Unclaimed earnings
// ---------------------------------------------------------------------------

/// Unclaimed ledger rows for a wallet.
///
/// # Errors
///
/// Returns an error if the query fails or a stored column cannot be decoded.
pub fn unclaimed_for_wallet(
    conn: &Connection,
    wallet: &WalletAddress,
) -> rusqlite::Result<Vec<UnclaimedEarning>> {
    collect(
        conn,
        &format!(
            "SELECT {UNCLAIMED_COLUMNS} FROM unclaimed_earnings
             WHERE wallet_address = ?1 AND claimed_at_us IS NULL
             ORDER BY entry_id ASC"
        ),
        params![wallet.as_str()],
        row_to_unclaimed,
    )
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn collect<T, P, F>(conn: &Connection, sql: &str, params: P, map: F) -> rusqlite::Result<Vec<T>>
where
    P: rusqlite::Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?;
    rows.collect()
}

/// `%needle%` with LIKE wildcards escaped.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error)))
}

fn parsed_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| {
        value.parse().map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error))
        })
    })
    .transpose()
}

fn unsigned<T: TryFrom<i64>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T::Error: std::error::Error + Send + Sync + 'static,
{
    let raw: i64 = row.get(idx)?;
    T::try_from(raw)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(error)))
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let on_chain_id: Option<i64> = row.get(5)?;
    let on_chain_id = on_chain_id
        .map(|raw| {
            u64::try_from(raw).map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(5, Type::Integer, Box::new(error))
            })
        })
        .transpose()?;

    Ok(Job {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        on_chain_id,
        job_hash: parsed(row, 6)?,
        client_wallet: parsed(row, 7)?,
        freelancer_wallet: parsed_opt(row, 8)?,
        arbiter: parsed(row, 9)?,
        token_address: parsed_opt(row, 10)?,
        total_amount: parsed::<Amount>(row, 11)?,
        status: parsed(row, 12)?,
        created_at_us: row.get(13)?,
        updated_at_us: row.get(14)?,
    })
}

fn row_to_milestone(row: &Row<'_>) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: row.get(0)?,
        job_id: row.get(1)?,
        on_chain_index: unsigned(row, 2)?,
        amount: parsed(row, 3)?,
        description_hash: parsed(row, 4)?,
        submission_hash: parsed_opt(row, 5)?,
        status: parsed(row, 6)?,
        created_at_us: row.get(7)?,
        updated_at_us: row.get(8)?,
    })
}

fn row_to_application(row: &Row<'_>) -> rusqlite::Result<JobApplication> {
    Ok(JobApplication {
        id: row.get(0)?,
        job_id: row.get(1)?,
        applicant_id: row.get(2)?,
        freelancer_wallet: parsed(row, 3)?,
        cover_letter: row.get(4)?,
        status: parsed(row, 5)?,
        created_at_us: row.get(6)?,
    })
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        wallet_address: parsed_opt(row, 3)?,
        role: parsed(row, 4)?,
        total_earned: parsed(row, 5)?,
        total_spent: parsed(row, 6)?,
        created_at_us: row.get(7)?,
    })
}

fn row_to_review(row: &Row<'_>) -> rusqlite::Result<Review> {
    Ok(Review {
        id: row.get(0)?,
        job_id: row.get(1)?,
        rating: unsigned(row, 2)?,
        comment: row.get(3)?,
        created_at_us: row.get(4)?,
    })
}

fn row_to_escrow_tx(row: &Row<'_>) -> rusqlite::Result<EscrowTransaction> {
    let payload_json: String = row.get(5)?;
    let payload: TxPayload = serde_json::from_str(&payload_json)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(error)))?;

    Ok(EscrowTransaction {
        tx_ref: row.get(0)?,
        idempotency_key: row.get(1)?,
        kind: parsed(row, 2)?,
        job_id: row.get(3)?,
        milestone_id: row.get(4)?,
        payload,
        initiated_by: row.get(6)?,
        status: parsed(row, 7)?,
        revert_reason: row.get(8)?,
        created_at_us: row.get(9)?,
        resolved_at_us: row.get(10)?,
    })
}

fn row_to_unclaimed(row: &Row<'_>) -> rusqlite::Result<UnclaimedEarning> {
    Ok(UnclaimedEarning {
        entry_id: row.get(0)?,
        wallet_address: parsed(row, 1)?,
        job_id: row.get(2)?,
        milestone_id: row.get(3)?,
        amount: parsed(row, 4)?,
        source: parsed(row, 5)?,
        created_at_us: row.get(6)?,
        claimed_by: row.get(7)?,
        claimed_at_us: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_in_memory, write};
    use crate::model::{CommitmentHash, JobStatus, MilestoneStatus, Role};

    fn wallet(n: u8) -> WalletAddress {
        format!("0x{n:040x}").parse().unwrap()
    }

    fn seed_user(conn: &Connection, id: &str, wallet_addr: Option<WalletAddress>) -> User {
        let user = User {
            id: id.into(),
            name: id.into(),
            email: format!("{id}@example.com"),
            wallet_address: wallet_addr,
            role: Role::Client,
            total_earned: Amount::ZERO,
            total_spent: Amount::ZERO,
            created_at_us: 1,
        };
        write::insert_user(conn, &user).unwrap();
        user
    }

    fn seed_job(conn: &Connection, id: &str, owner: &str, created: i64, title: &str) -> Job {
        let job = Job {
            id: id.into(),
            user_id: owner.into(),
            title: title.into(),
            description: "Build the thing".into(),
            category: Some("dev".into()),
            on_chain_id: Some(u64::try_from(created).unwrap()),
            job_hash: CommitmentHash::digest(title),
            client_wallet: wallet(1),
            freelancer_wallet: None,
            arbiter: wallet(9),
            token_address: None,
            total_amount: Amount::new(1000),
            status: JobStatus::Created,
            created_at_us: created,
            updated_at_us: created,
        };
        write::insert_job(conn, &job).unwrap();
        job
    }

    #[test]
    fn job_roundtrips_through_store() {
        let conn = open_in_memory().unwrap();
        seed_user(&conn, "usr-a", Some(wallet(1)));
        let job = seed_job(&conn, "job-a", "usr-a", 10, "Audit");

        assert_eq!(get_job(&conn, "job-a").unwrap(), Some(job.clone()));
        assert_eq!(get_job_by_on_chain_id(&conn, 10).unwrap(), Some(job));
        assert_eq!(get_job(&conn, "job-missing").unwrap(), None);
    }

    #[test]
    fn list_jobs_is_newest_first() {
        let conn = open_in_memory().unwrap();
        seed_user(&conn, "usr-a", None);
        seed_job(&conn, "job-old", "usr-a", 1, "Old");
        seed_job(&conn, "job-new", "usr-a", 2, "New");

        let ids: Vec<String> = list_jobs(&conn).unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["job-new", "job-old"]);
    }

    #[test]
    fn participant_jobs_include_freelancer_side() {
        let conn = open_in_memory().unwrap();
        seed_user(&conn, "usr-a", Some(wallet(1)));
        seed_user(&conn, "usr-b", Some(wallet(2)));
        seed_job(&conn, "job-a", "usr-a", 1, "A");
        seed_job(&conn, "job-b", "usr-a", 2, "B");
        write::set_job_freelancer(&conn, "job-b", &wallet(2), 3).unwrap();

        let for_b = list_jobs_for_participant(&conn, "usr-b", Some(&wallet(2))).unwrap();
        assert_eq!(for_b.len(), 1);
        assert_eq!(for_b[0].id, "job-b");

        let for_b_unlinked = list_jobs_for_participant(&conn, "usr-b", None).unwrap();
        assert!(for_b_unlinked.is_empty());

        assert_eq!(count_jobs_by_role(&conn, "usr-a", Some(&wallet(1))).unwrap(), (2, 0));
    }

    #[test]
    fn recent_jobs_filter_escapes_wildcards() {
        let conn = open_in_memory().unwrap();
        seed_user(&conn, "usr-a", None);
        seed_job(&conn, "job-a", "usr-a", 1, "Logo design");
        seed_job(&conn, "job-b", "usr-a", 2, "100% rust port");

        let hits = recent_jobs(&conn, Some("logo"), 20).unwrap();
        assert_eq!(hits.len(), 1);
        let hits = recent_jobs(&conn, Some("%"), 20).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "job-b");
        assert_eq!(recent_jobs(&conn, None, 1).unwrap().len(), 1);
    }

    #[test]
    fn milestones_come_back_in_index_order() {
        let conn = open_in_memory().unwrap();
        seed_user(&conn, "usr-a", None);
        seed_job(&conn, "job-a", "usr-a", 1, "A");
        for (id, index) in [("ms-b", 1_u32), ("ms-a", 0)] {
            let inserted = write::insert_milestone_if_absent(
                &conn,
                &Milestone {
                    id: id.into(),
                    job_id: "job-a".into(),
                    on_chain_index: index,
                    amount: Amount::new(500),
                    description_hash: CommitmentHash::digest(id),
                    submission_hash: None,
                    status: MilestoneStatus::Pending,
                    created_at_us: 1,
                    updated_at_us: 1,
                },
            )
            .unwrap();
            assert!(inserted);
        }

        let indices: Vec<u32> = milestones_for_job(&conn, "job-a")
            .unwrap()
            .into_iter()
            .map(|m| m.on_chain_index)
            .collect();
        assert_eq!(indices, vec![0, 1]);

        let activity = recent_milestone_activity(&conn, Some("A"), 20).unwrap();
        assert_eq!(activity.len(), 2);
        assert_eq!(activity[0].job_title, "A");
    }

    #[test]
    fn corrupt_amount_surfaces_as_conversion_error() {
        let conn = open_in_memory().unwrap();
        seed_user(&conn, "usr-a", None);
        conn.execute("UPDATE users SET total_earned = 'lots' WHERE user_id = 'usr-a'", [])
            .unwrap();
        assert!(matches!(
            get_user(&conn, "usr-a"),
            Err(rusqlite::Error::FromSqlConversionFailure(5, Type::Text, _))
        ));
    }
}
