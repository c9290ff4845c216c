use crate::output::CliError;
use onwork_core::ErrorCode;
use onwork_core::coordinator::ExplorerFilter;
use onwork_core::model::review::{MAX_RATING, MIN_RATING};
use onwork_core::model::{
    Amount, CommitmentHash, JobStatus, MilestoneSpec, MilestoneStatus, Role, WalletAddress,
};

pub const MAX_TITLE_LEN: usize = 200;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: &'static str,
    pub value: String,
    pub reason: String,
    pub suggestion: String,
}

impl ValidationError {
    pub fn new(
        field: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            field,
            value: value.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn to_cli_error(&self) -> CliError {
        CliError::with_details(
            self.to_string(),
            Some(self.suggestion.clone()),
            ErrorCode::InvalidInput.code(),
        )
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {} '{}': {}", self.field, self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_title(s: &str) -> Result<(), ValidationError> {
    if s.trim().is_empty() {
        return Err(ValidationError::new(
            "title",
            s,
            "must not be empty",
            "provide a non-empty --title",
        ));
    }
    if s.chars().count() > MAX_TITLE_LEN {
        return Err(ValidationError::new(
            "title",
            s,
            format!("must be <= {MAX_TITLE_LEN} characters"),
            "shorten the title",
        ));
    }
    if s.chars().any(char::is_control) {
        return Err(ValidationError::new(
            "title",
            s,
            "must not contain control characters",
            "remove control characters from the title",
        ));
    }
    Ok(())
}

pub fn parse_amount(field: &'static str, s: &str) -> Result<Amount, ValidationError> {
    s.parse().map_err(|_| {
        ValidationError::new(
            field,
            s,
            "expected a whole number of base units",
            "amounts are integers in the smallest unit, e.g. 1000000000000000000 for 1 ETH",
        )
    })
}

pub fn parse_wallet(field: &'static str, s: &str) -> Result<WalletAddress, ValidationError> {
    s.parse().map_err(|_| {
        ValidationError::new(
            field,
            s,
            "expected 0x followed by 40 hex digits",
            "pass a full wallet address like 0x70997970c51812dc3a010c7d01b50e0d17dc79c8",
        )
    })
}

pub fn parse_hash(field: &'static str, s: &str) -> Result<CommitmentHash, ValidationError> {
    s.parse().map_err(|_| {
        ValidationError::new(
            field,
            s,
            "expected 0x followed by 64 hex digits",
            "pass the commitment hash, or the content itself with --work",
        )
    })
}

/// `AMOUNT:DESCRIPTION`; the description is committed by hash.
pub fn parse_milestone(s: &str) -> Result<MilestoneSpec, ValidationError> {
    let Some((amount, description)) = s.split_once(':') else {
        return Err(ValidationError::new(
            "milestone",
            s,
            "expected AMOUNT:DESCRIPTION",
            "use --milestone 400:\"Wireframes\"",
        ));
    };
    let description = description.trim();
    if description.is_empty() {
        return Err(ValidationError::new(
            "milestone",
            s,
            "description must not be empty",
            "describe the deliverable after the colon",
        ));
    }
    Ok(MilestoneSpec {
        amount: parse_amount("milestone amount", amount)?,
        description_hash: CommitmentHash::digest(description),
    })
}

pub fn parse_milestones(raw: &[String]) -> Result<Vec<MilestoneSpec>, ValidationError> {
    raw.iter().map(|s| parse_milestone(s)).collect()
}

pub fn parse_rating(rating: u8) -> Result<u8, ValidationError> {
    if (MIN_RATING..=MAX_RATING).contains(&rating) {
        Ok(rating)
    } else {
        Err(ValidationError::new(
            "rating",
            rating.to_string(),
            format!("must be between {MIN_RATING} and {MAX_RATING}"),
            "use --rating 1..5",
        ))
    }
}

pub fn parse_role(s: &str) -> Result<Role, ValidationError> {
    s.parse().map_err(|_| {
        ValidationError::new("role", s, "expected client or freelancer", "use --role client|freelancer")
    })
}

pub fn parse_job_status(s: &str) -> Result<JobStatus, ValidationError> {
    s.parse().map_err(|_| {
        ValidationError::new(
            "status",
            s,
            "expected one of CREATED, WAITING_FUNDING, FUNDED, IN_PROGRESS, DISPUTED, RESOLVED, COMPLETED, CANCELLED",
            "status names are case-insensitive, e.g. funded or in_progress",
        )
    })
}

pub fn parse_milestone_status(s: &str) -> Result<MilestoneStatus, ValidationError> {
    s.parse().map_err(|_| {
        ValidationError::new(
            "status",
            s,
            "expected one of PENDING, IN_PROGRESS, SUBMITTED, COMPLETED",
            "status names are case-insensitive, e.g. submitted",
        )
    })
}

pub fn parse_filter(s: &str) -> Result<ExplorerFilter, ValidationError> {
    s.parse().map_err(|_| {
        ValidationError::new("filter", s, "expected all, jobs, or milestones", "use --filter jobs")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milestone_specs_parse() {
        let spec = parse_milestone("400:Wireframes").unwrap();
        assert_eq!(spec.amount, Amount::new(400));
        assert_eq!(spec.description_hash, CommitmentHash::digest("Wireframes"));
        assert!(parse_milestone("400").is_err());
        assert!(parse_milestone("400:  ").is_err());
        assert!(parse_milestone("-5:Refund").is_err());
    }

    #[test]
    fn wallets_need_full_length() {
        assert!(parse_wallet("wallet", &format!("0x{:040x}", 7)).is_ok());
        assert!(parse_wallet("wallet", "0x1234").is_err());
    }

    #[test]
    fn rating_bounds() {
        assert!(parse_rating(1).is_ok());
        assert!(parse_rating(5).is_ok());
        assert!(parse_rating(0).is_err());
        assert!(parse_rating(6).is_err());
    }

    #[test]
    fn titles() {
        assert!(validate_title("Landing page").is_ok());
        assert!(validate_title("   ").is_err());
        assert!(validate_title(&"x".repeat(MAX_TITLE_LEN + 1)).is_err());
    }

    #[test]
    fn errors_carry_the_input_code() {
        let err = parse_amount("total", "lots").unwrap_err();
        let cli = err.to_cli_error();
        assert_eq!(cli.error_code.as_deref(), Some("E2001"));
        assert!(cli.message.contains("total"));
    }
}
