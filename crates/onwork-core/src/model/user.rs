use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::ParseEnumError;
use super::value::{Amount, WalletAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Client,
    Freelancer,
}

impl Role {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "CLIENT",
            Self::Freelancer => "FREELANCER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CLIENT" => Ok(Self::Client),
            "FREELANCER" => Ok(Self::Freelancer),
            _ => Err(ParseEnumError {
                expected: "role",
                got: s.to_string(),
            }),
        }
    }
}

/// An account. `total_earned` and `total_spent` only ever grow, and only
/// reconciliation writes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub wallet_address: Option<WalletAddress>,
    pub role: Role,
    pub total_earned: Amount,
    pub total_spent: Amount,
    pub created_at_us: i64,
}

/// Where an unclaimed credit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditSource {
    Approval,
    Resolution,
}

impl CreditSource {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Approval => "approval",
            Self::Resolution => "resolution",
        }
    }
}

impl fmt::Display for CreditSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreditSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "approval" => Ok(Self::Approval),
            "resolution" => Ok(Self::Resolution),
            _ => Err(ParseEnumError {
                expected: "credit source",
                got: s.to_string(),
            }),
        }
    }
}

/// Freelancer earnings recorded against a wallet no user had linked yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnclaimedEarning {
    pub entry_id: i64,
    pub wallet_address: WalletAddress,
    pub job_id: String,
    pub milestone_id: Option<String>,
    pub amount: Amount,
    pub source: CreditSource,
    pub created_at_us: i64,
    pub claimed_by: Option<String>,
    pub claimed_at_us: Option<i64>,
}
