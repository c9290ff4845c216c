//! Canonical SQLite schema for the marketplace store.
//!
//! - `users`, `jobs`, `milestones`, `job_applications`, `reviews` hold the
//!   relational model; a job owns its milestones, applications and reviews
//!   (`ON DELETE CASCADE`)
//! - amounts are decimal TEXT in the smallest on-chain unit
//! - `escrow_transactions` is the outbox of submitted on-chain calls and the
//!   exactly-once ledger for their reconciliation
//! - `unclaimed_earnings` records freelancer credits skipped because no user
//!   had linked the receiving wallet yet
//! - `store_meta` tracks the schema version

/// Migration v1: core relational tables plus outbox and store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
    email TEXT NOT NULL UNIQUE,
    wallet_address TEXT UNIQUE,
    role TEXT NOT NULL DEFAULT 'CLIENT' CHECK (role IN ('CLIENT', 'FREELANCER')),
    total_earned TEXT NOT NULL DEFAULT '0',
    total_spent TEXT NOT NULL DEFAULT '0',
    created_at_us INTEGER NOT NULL,
    CHECK (user_id LIKE 'usr-%')
);

CREATE TABLE IF NOT EXISTS jobs (
    job_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(user_id),
    title TEXT NOT NULL CHECK (length(trim(title)) > 0),
    description TEXT NOT NULL,
    category TEXT,
    on_chain_id INTEGER UNIQUE,
    job_hash TEXT NOT NULL,
    client_wallet TEXT NOT NULL,
    freelancer_wallet TEXT,
    arbiter TEXT NOT NULL,
    token_address TEXT,
    total_amount TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'CREATED' CHECK (status IN (
        'CREATED', 'WAITING_FUNDING', 'FUNDED', 'IN_PROGRESS',
        'DISPUTED', 'COMPLETED', 'CANCELLED', 'RESOLVED'
    )),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL,
    CHECK (job_id LIKE 'job-%')
);

CREATE TABLE IF NOT EXISTS milestones (
    milestone_id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
    on_chain_index INTEGER NOT NULL CHECK (on_chain_index >= 0),
    amount TEXT NOT NULL,
    description_hash TEXT NOT NULL,
    submission_hash TEXT,
    status TEXT NOT NULL DEFAULT 'PENDING' CHECK (status IN (
        'PENDING', 'IN_PROGRESS', 'SUBMITTED', 'COMPLETED'
    )),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL,
    UNIQUE (job_id, on_chain_index)
);

CREATE TABLE IF NOT EXISTS job_applications (
    application_id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
    applicant_id TEXT NOT NULL,
    freelancer_wallet TEXT NOT NULL,
    cover_letter TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING' CHECK (status IN ('PENDING', 'ACCEPTED')),
    created_at_us INTEGER NOT NULL,
    UNIQUE (job_id, freelancer_wallet)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_job_applications_one_accepted
    ON job_applications(job_id)
    WHERE status = 'ACCEPTED';

CREATE TABLE IF NOT EXISTS reviews (
    review_id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL UNIQUE REFERENCES jobs(job_id) ON DELETE CASCADE,
    rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
    comment TEXT,
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS escrow_transactions (
    tx_ref TEXT PRIMARY KEY,
    idempotency_key TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL CHECK (kind IN (
        'create_job', 'fund_job', 'assign_freelancer', 'submit_milestone',
        'approve_milestone', 'raise_dispute', 'resolve_dispute'
    )),
    job_id TEXT,
    milestone_id TEXT,
    payload_json TEXT NOT NULL,
    initiated_by TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'applied', 'reverted')),
    revert_reason TEXT,
    created_at_us INTEGER NOT NULL,
    resolved_at_us INTEGER
);

CREATE TABLE IF NOT EXISTS unclaimed_earnings (
    entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
    wallet_address TEXT NOT NULL,
    job_id TEXT NOT NULL,
    milestone_id TEXT,
    amount TEXT NOT NULL,
    source TEXT NOT NULL CHECK (source IN ('approval', 'resolution')),
    created_at_us INTEGER NOT NULL,
    claimed_by TEXT REFERENCES users(user_id),
    claimed_at_us INTEGER
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    created_at_us INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO store_meta (id, schema_version, created_at_us)
VALUES (1, 1, 0);
";

/// Migration v2: read-path indexes for dashboards, arbiter queue and explorer.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_jobs_user_created
    ON jobs(user_id, created_at_us DESC);

CREATE INDEX IF NOT EXISTS idx_jobs_freelancer_created
    ON jobs(freelancer_wallet, created_at_us DESC);

CREATE INDEX IF NOT EXISTS idx_jobs_arbiter_status
    ON jobs(arbiter, status);

CREATE INDEX IF NOT EXISTS idx_jobs_status
    ON jobs(status);

CREATE INDEX IF NOT EXISTS idx_jobs_created
    ON jobs(created_at_us DESC);

CREATE INDEX IF NOT EXISTS idx_milestones_updated
    ON milestones(updated_at_us DESC);

CREATE INDEX IF NOT EXISTS idx_job_applications_job_created
    ON job_applications(job_id, created_at_us);

CREATE INDEX IF NOT EXISTS idx_escrow_transactions_job_status
    ON escrow_transactions(job_id, status);

CREATE INDEX IF NOT EXISTS idx_unclaimed_earnings_wallet
    ON unclaimed_earnings(wallet_address, claimed_at_us);

UPDATE store_meta
SET schema_version = 2
WHERE id = 1;
";

/// Migration v3: outbox rows can end `rejected` when a confirmed effect no
/// longer fits the stored state. SQLite cannot widen a CHECK in place, so
/// the table is rebuilt.
pub const MIGRATION_V3_SQL: &str = r"
CREATE TABLE escrow_transactions_v3 (
    tx_ref TEXT PRIMARY KEY,
    idempotency_key TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL CHECK (kind IN (
        'create_job', 'fund_job', 'assign_freelancer', 'submit_milestone',
        'approve_milestone', 'raise_dispute', 'resolve_dispute'
    )),
    job_id TEXT,
    milestone_id TEXT,
    payload_json TEXT NOT NULL,
    initiated_by TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'applied', 'reverted', 'rejected')),
    revert_reason TEXT,
    created_at_us INTEGER NOT NULL,
    resolved_at_us INTEGER
);

INSERT INTO escrow_transactions_v3 (
    tx_ref, idempotency_key, kind, job_id, milestone_id, payload_json,
    initiated_by, status, revert_reason, created_at_us, resolved_at_us
)
SELECT
    tx_ref, idempotency_key, kind, job_id, milestone_id, payload_json,
    initiated_by, status, revert_reason, created_at_us, resolved_at_us
FROM escrow_transactions;

DROP TABLE escrow_transactions;
ALTER TABLE escrow_transactions_v3 RENAME TO escrow_transactions;

CREATE INDEX IF NOT EXISTS idx_escrow_transactions_job_status
    ON escrow_transactions(job_id, status);
";

/// Indexes expected by list/filter query paths.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_job_applications_one_accepted",
    "idx_jobs_user_created",
    "idx_jobs_freelancer_created",
    "idx_jobs_arbiter_status",
    "idx_jobs_status",
    "idx_jobs_created",
    "idx_milestones_updated",
    "idx_job_applications_job_created",
    "idx_escrow_transactions_job_status",
    "idx_unclaimed_earnings_wallet",
];

#[cfg(test)]
mod tests {
    use crate::db::migrations;
    use rusqlite::{Connection, params};

    fn seeded_conn() -> rusqlite::Result<Connection> {
        let mut conn = Connection::open_in_memory()?;
        migrations::migrate(&mut conn)?;

        conn.execute(
            "INSERT INTO users (user_id, name, email, created_at_us)
             VALUES ('usr-client', 'Client', 'client@example.com', 1)",
            [],
        )?;

        for idx in 0..24_u32 {
            let status = match idx % 3 {
                0 => "DISPUTED",
                1 => "FUNDED",
                _ => "CREATED",
            };
            conn.execute(
                "INSERT INTO jobs (
                    job_id, user_id, title, description, job_hash, client_wallet,
                    arbiter, total_amount, status, created_at_us, updated_at_us
                 ) VALUES (?1, 'usr-client', ?2, 'desc', '0xhash', '0xclient', ?3, '100', ?4, ?5, ?5)",
                params![
                    format!("job-{idx:03}"),
                    format!("Job {idx}"),
                    if idx % 2 == 0 { "0xarbiter-a" } else { "0xarbiter-b" },
                    status,
                    i64::from(idx),
                ],
            )?;
        }

        Ok(conn)
    }

    fn query_plan_details(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {sql}"))?;
        stmt.query_map([], |row| row.get::<_, String>(3))?
            .collect::<Result<Vec<_>, _>>()
    }

    #[test]
    fn query_plan_uses_arbiter_index() -> rusqlite::Result<()> {
        let conn = seeded_conn()?;
        let details = query_plan_details(
            &conn,
            "SELECT job_id FROM jobs WHERE arbiter = '0xarbiter-a' AND status = 'DISPUTED'",
        )?;

        assert!(
            details
                .iter()
                .any(|detail| detail.contains("idx_jobs_arbiter_status")),
            "expected arbiter index in plan, got: {details:?}"
        );
        Ok(())
    }

    #[test]
    fn duplicate_milestone_index_is_ignored_with_or_ignore() -> rusqlite::Result<()> {
        let conn = seeded_conn()?;
        for _ in 0..2 {
            conn.execute(
                "INSERT OR IGNORE INTO milestones (
                    milestone_id, job_id, on_chain_index, amount, description_hash,
                    created_at_us, updated_at_us
                 ) VALUES (lower(hex(randomblob(8))), 'job-000', 0, '100', '0xd', 1, 1)",
                [],
            )?;
        }
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM milestones WHERE job_id = 'job-000'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[test]
    fn second_accepted_application_violates_unique_index() -> rusqlite::Result<()> {
        let conn = seeded_conn()?;
        conn.execute(
            "INSERT INTO job_applications (application_id, job_id, applicant_id, freelancer_wallet, cover_letter, status, created_at_us)
             VALUES ('app-1', 'job-001', 'usr-1', '0xf1', 'hi', 'ACCEPTED', 1)",
            [],
        )?;
        let second = conn.execute(
            "INSERT INTO job_applications (application_id, job_id, applicant_id, freelancer_wallet, cover_letter, status, created_at_us)
             VALUES ('app-2', 'job-001', 'usr-2', '0xf2', 'hi', 'ACCEPTED', 2)",
            [],
        );
        assert!(second.is_err());
        Ok(())
    }
}
