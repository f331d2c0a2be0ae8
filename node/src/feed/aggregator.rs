//! Consensus over independent numeric submissions.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AggregatorError;

/// Named aggregation strategy for one feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregatorKind {
    Mean,
    Median,
}

impl FromStr for AggregatorKind {
    type Err = AggregatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MEAN" => Ok(AggregatorKind::Mean),
            "MEDIAN" => Ok(AggregatorKind::Median),
            other => Err(AggregatorError::UnknownAggregator(other.to_string())),
        }
    }
}

impl AggregatorKind {
    /// Reduce `values` to a single integer. Both strategies round with
    /// [`round_half_up`] so every node lands on the same answer.
    pub fn aggregate(&self, values: &[f64]) -> Result<i64, AggregatorError> {
        if values.is_empty() {
            return Err(AggregatorError::EmptyInput);
        }
        let raw = match self {
            AggregatorKind::Mean => values.iter().sum::<f64>() / values.len() as f64,
            AggregatorKind::Median => median(values),
        };
        round_half_up(raw)
    }
}

/// `floor(x + 0.5)`: ties go toward positive infinity. Values that are not
/// finite or do not fit in an `i64` are errors rather than saturating.
pub fn round_half_up(value: f64) -> Result<i64, AggregatorError> {
    let rounded = (value + 0.5).floor();
    // i64::MIN is -2^63 and exact as an f64; 2^63 is the first value past i64::MAX.
    let limit = 9_223_372_036_854_775_808.0;
    if !rounded.is_finite() || rounded < -limit || rounded >= limit {
        return Err(AggregatorError::OutOfRange(value.to_string()));
    }
    Ok(rounded as i64)
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// One oracle's value for a feed round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorSubmission {
    pub aggregator_id: String,
    pub oracle_address: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub aggregator_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: i64,
}

/// Aggregate one round of submissions. Submissions for other aggregators
/// than the first one are ignored; the result carries the newest timestamp.
pub fn aggregate_submissions(
    kind: AggregatorKind,
    submissions: &[AggregatorSubmission],
) -> Result<AggregateResult, AggregatorError> {
    let first = submissions.first().ok_or(AggregatorError::EmptyInput)?;
    let round: Vec<&AggregatorSubmission> = submissions
        .iter()
        .filter(|s| s.aggregator_id == first.aggregator_id)
        .collect();

    let values: Vec<f64> = round.iter().map(|s| s.value).collect();
    let value = kind.aggregate(&values)?;
    let timestamp = round
        .iter()
        .map(|s| s.timestamp)
        .max()
        .unwrap_or(first.timestamp);

    Ok(AggregateResult {
        aggregator_id: first.aggregator_id.clone(),
        timestamp,
        value,
    })
}
