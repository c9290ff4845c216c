use serde::{Deserialize, Serialize};

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

/// A client's rating of a finished job. Read-side only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub job_id: String,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at_us: i64,
}

/// Mean rating, `None` for no reviews.
#[must_use]
pub fn average_rating(reviews: &[Review]) -> Option<f64> {
    if reviews.is_empty() {
        return None;
    }
    let total: u32 = reviews.iter().map(|r| u32::from(r.rating)).sum();
    Some(f64::from(total) / f64::from(u32::try_from(reviews.len()).unwrap_or(u32::MAX)))
}
