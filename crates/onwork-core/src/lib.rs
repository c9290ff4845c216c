//! onwork-core: off-chain mirror of an on-chain escrow marketplace.
//!
//! Jobs, milestones, and applications live in SQLite. The [`Coordinator`]
//! checks lifecycle guards, sends escrow calls through an [`EscrowClient`],
//! and reconciles confirmed effects (including user earnings and spend)
//! into the store exactly once.
//!
//! # Conventions
//!
//! - **Errors**: the coordinator returns [`error::Result`]; setup code
//!   (store open, config) uses `anyhow::Result`.
//! - **Logging**: `tracing` macros; `info!` for applied transitions,
//!   `warn!` for skipped credits and reverts, `debug!` for guard rejections.

pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod escrow;
pub mod lock;
pub mod model;

pub use coordinator::{Applied, Caller, Change, Coordinator};
pub use error::{ErrorCode, OnworkError};
pub use escrow::EscrowClient;
pub use escrow::sim::SimulatedEscrow;
