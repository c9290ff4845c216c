use std::fmt;

/// Machine-readable error codes so callers can branch without parsing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    InvalidInput,
    AmountMismatch,
    InvalidStateTransition,
    GuardFailed,
    JobNotFound,
    MilestoneNotFound,
    ApplicationNotFound,
    UserNotFound,
    TransactionNotFound,
    Unauthenticated,
    Forbidden,
    EscrowUnavailable,
    StoreFailure,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::InvalidInput => "E2001",
            Self::AmountMismatch => "E2002",
            Self::InvalidStateTransition => "E3001",
            Self::GuardFailed => "E3002",
            Self::JobNotFound => "E4001",
            Self::MilestoneNotFound => "E4002",
            Self::ApplicationNotFound => "E4003",
            Self::UserNotFound => "E4004",
            Self::TransactionNotFound => "E4005",
            Self::Unauthenticated => "E5001",
            Self::Forbidden => "E5002",
            Self::EscrowUnavailable => "E6001",
            Self::StoreFailure => "E7001",
            Self::LockContention => "E7002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Project not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidInput => "Invalid input",
            Self::AmountMismatch => "Milestone amounts do not match job total",
            Self::InvalidStateTransition => "Invalid state transition",
            Self::GuardFailed => "Transition precondition not met",
            Self::JobNotFound => "Job not found",
            Self::MilestoneNotFound => "Milestone not found",
            Self::ApplicationNotFound => "Application not found",
            Self::UserNotFound => "User not found",
            Self::TransactionNotFound => "Escrow transaction not found",
            Self::Unauthenticated => "Authentication required",
            Self::Forbidden => "Caller not permitted",
            Self::EscrowUnavailable => "Escrow contract call failed",
            Self::StoreFailure => "Persistent store failure",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `onwork init` to initialize this directory."),
            Self::ConfigParseError => Some("Fix syntax in .onwork/config.toml and retry."),
            Self::InvalidInput => None,
            Self::AmountMismatch => {
                Some("Make the milestone amounts add up exactly to the job total.")
            }
            Self::InvalidStateTransition => Some(
                "Follow valid transitions: created -> waiting_funding -> funded -> in_progress -> completed.",
            ),
            Self::GuardFailed => Some("Check the job and milestone status with `onwork show`."),
            Self::JobNotFound
            | Self::MilestoneNotFound
            | Self::ApplicationNotFound
            | Self::TransactionNotFound => None,
            Self::UserNotFound => Some("Register first with `onwork user register`."),
            Self::Unauthenticated => Some("Pass --user or set ONWORK_USER."),
            Self::Forbidden => Some("Only the job's client, freelancer, or arbiter may do this."),
            Self::EscrowUnavailable => Some("Retry the on-chain call; nothing was reconciled."),
            Self::StoreFailure => Some("Check disk space and permissions on .onwork/."),
            Self::LockContention => Some("Retry after the other `onwork` process releases its lock."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The kind of record a [`OnworkError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Job,
    Milestone,
    Application,
    User,
    Transaction,
}

impl Entity {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Milestone => "milestone",
            Self::Application => "application",
            Self::User => "user",
            Self::Transaction => "transaction",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by coordinator operations.
///
/// The variants keep validation, precondition, and not-found failures
/// apart so callers can tell them from each other.
#[derive(Debug, thiserror::Error)]
pub enum OnworkError {
    /// Malformed input, rejected before any write.
    #[error("{message}")]
    Validation { code: ErrorCode, message: String },

    /// A state-machine guard failed; nothing was changed.
    #[error("{message}")]
    Precondition { code: ErrorCode, message: String },

    /// The caller is authenticated but is not the party this step requires.
    #[error("{0}")]
    Forbidden(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: Entity, id: String },

    #[error("no authenticated caller")]
    Unauthenticated,

    #[error("escrow call failed: {0}")]
    Escrow(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OnworkError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            code: ErrorCode::InvalidInput,
            message: message.into(),
        }
    }

    pub fn amount_mismatch(message: impl Into<String>) -> Self {
        Self::Validation {
            code: ErrorCode::AmountMismatch,
            message: message.into(),
        }
    }

    pub fn guard(message: impl Into<String>) -> Self {
        Self::Precondition {
            code: ErrorCode::GuardFailed,
            message: message.into(),
        }
    }

    pub fn transition(message: impl Into<String>) -> Self {
        Self::Precondition {
            code: ErrorCode::InvalidStateTransition,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { code, .. } | Self::Precondition { code, .. } => *code,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::NotFound { entity, .. } => match entity {
                Entity::Job => ErrorCode::JobNotFound,
                Entity::Milestone => ErrorCode::MilestoneNotFound,
                Entity::Application => ErrorCode::ApplicationNotFound,
                Entity::User => ErrorCode::UserNotFound,
                Entity::Transaction => ErrorCode::TransactionNotFound,
            },
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::Escrow(_) => ErrorCode::EscrowUnavailable,
            Self::Store(_) => ErrorCode::StoreFailure,
            Self::Internal(_) => ErrorCode::InternalUnexpected,
        }
    }

    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// True for guard and transition failures, including caller-identity guards.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition { .. } | Self::Forbidden(_))
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when the request itself was refused, as opposed to a store,
    /// escrow, or internal failure. Repeating a refused request cannot
    /// succeed.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        self.is_validation() || self.is_precondition() || self.is_not_found()
    }

    /// Suggestion text for CLI rendering.
    #[must_use]
    pub fn suggestion(&self) -> String {
        self.code()
            .hint()
            .unwrap_or_else(|| self.code().message())
            .to_string()
    }
}

pub type Result<T, E = OnworkError> = std::result::Result<T, E>;
