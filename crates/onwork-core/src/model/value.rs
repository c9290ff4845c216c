//! Scalar value types shared by every record: on-chain amounts, wallet
//! addresses, and commitment hashes.
//!
//! All three parse from text, render back to a canonical text form, and
//! serialize as JSON strings. Amounts are never floating point.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

/// Error returned when a scalar value cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseValueError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseValueError {}

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

/// An amount in the smallest on-chain unit (e.g. wei).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(units: u128) -> Self {
        Self(units)
    }

    #[must_use]
    pub const fn units(self) -> u128 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition; `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }

    /// Checked subtraction; `None` if `other` is larger.
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(diff) => Some(Self(diff)),
            None => None,
        }
    }

    /// Sum a sequence of amounts, `None` on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Self>>(amounts: I) -> Option<Self> {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, |acc, amount| acc.checked_add(amount))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseValueError {
                expected: "amount",
                got: s.to_string(),
            });
        }
        trimmed.parse::<u128>().map(Self).map_err(|_| ParseValueError {
            expected: "amount",
            got: s.to_string(),
        })
    }
}

impl TryFrom<String> for Amount {
    type Error = ParseValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Amount> for String {
    fn from(value: Amount) -> Self {
        value.to_string()
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(u128::from(value))
    }
}

impl Sum for Amount {
    /// Saturating sum; use [`Amount::checked_sum`] where overflow matters.
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.fold(0_u128, |acc, a| acc.saturating_add(a.0)))
    }
}

// ---------------------------------------------------------------------------
// WalletAddress
// ---------------------------------------------------------------------------

/// A 20-byte account address, stored lowercase so comparisons ignore case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against raw text.
    #[must_use]
    pub fn matches(&self, raw: &str) -> bool {
        self.0.eq_ignore_ascii_case(raw.trim())
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WalletAddress {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_prefixed(s, 40, "wallet address").map(Self)
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = ParseValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// CommitmentHash
// ---------------------------------------------------------------------------

/// A 32-byte commitment to off-chain content (description, submission, job).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitmentHash(String);

impl CommitmentHash {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Commit to `content` with BLAKE3.
    #[must_use]
    pub fn digest(content: &str) -> Self {
        Self(format!("0x{}", blake3::hash(content.as_bytes()).to_hex()))
    }

    /// Commit to several fields; each field is length-prefixed so
    /// `("ab", "c")` and `("a", "bc")` differ.
    #[must_use]
    pub fn digest_fields(fields: &[&str]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for field in fields {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        Self(format!("0x{}", hasher.finalize().to_hex()))
    }
}

impl fmt::Display for CommitmentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CommitmentHash {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_prefixed(s, 64, "commitment hash").map(Self)
    }
}

impl TryFrom<String> for CommitmentHash {
    type Error = ParseValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CommitmentHash> for String {
    fn from(value: CommitmentHash) -> Self {
        value.0
    }
}

fn parse_hex_prefixed(
    raw: &str,
    digits: usize,
    expected: &'static str,
) -> Result<String, ParseValueError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"));

    match body {
        Some(hex) if hex.len() == digits && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
            Ok(format!("0x{}", hex.to_ascii_lowercase()))
        }
        _ => Err(ParseValueError {
            expected,
            got: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{Amount, CommitmentHash, WalletAddress};
    use proptest::prelude::*;

    #[test]
    fn amount_parses_decimal_strings() {
        assert_eq!("1000".parse::<Amount>().unwrap(), Amount::new(1000));
        assert_eq!(
            "340282366920938463463374607431768211455"
                .parse::<Amount>()
                .unwrap(),
            Amount::new(u128::MAX)
        );
        assert!("-5".parse::<Amount>().is_err());
        assert!("1.5".parse::<Amount>().is_err());
        assert!("".parse::<Amount>().is_err());
        assert!("340282366920938463463374607431768211456".parse::<Amount>().is_err());
    }

    #[test]
    fn amount_serializes_as_string() {
        let json = serde_json::to_string(&Amount::new(250)).unwrap();
        assert_eq!(json, "\"250\"");
        let back: Amount = serde_json::from_str("\"250\"").unwrap();
        assert_eq!(back, Amount::new(250));
    }

    #[test]
    fn checked_sum_detects_overflow() {
        assert_eq!(
            Amount::checked_sum([Amount::new(600), Amount::new(400)]),
            Some(Amount::new(1000))
        );
        assert_eq!(Amount::checked_sum([Amount::new(u128::MAX), Amount::new(1)]), None);
    }

    #[test]
    fn wallet_is_normalized_lowercase() {
        let wallet: WalletAddress = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".parse().unwrap();
        assert_eq!(wallet.as_str(), "0x70997970c51812dc3a010c7d01b50e0d17dc79c8");
        assert!(wallet.matches("0x70997970C51812DC3A010C7D01B50E0D17DC79C8"));
        assert!("0x1234".parse::<WalletAddress>().is_err());
        assert!("70997970c51812dc3a010c7d01b50e0d17dc79c8".parse::<WalletAddress>().is_err());
    }

    #[test]
    fn commitment_digest_is_32_bytes_hex() {
        let hash = CommitmentHash::digest("deliver the audit report");
        assert_eq!(hash.as_str().len(), 66);
        assert!(hash.as_str().parse::<CommitmentHash>().is_ok());
        assert_ne!(
            CommitmentHash::digest_fields(&["ab", "c"]),
            CommitmentHash::digest_fields(&["a", "bc"])
        );
    }

    proptest! {
        #[test]
        fn amount_text_roundtrip(units in any::<u128>()) {
            let amount = Amount::new(units);
            prop_assert_eq!(amount.to_string().parse::<Amount>().unwrap(), amount);
        }

        #[test]
        fn checked_add_never_decreases(a in any::<u64>(), b in any::<u64>()) {
            let sum = Amount::from(a).checked_add(Amount::from(b)).unwrap();
            prop_assert!(sum >= Amount::from(a));
            prop_assert!(sum >= Amount::from(b));
        }
    }
}
