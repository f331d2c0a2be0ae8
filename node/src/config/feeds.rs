use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::feed::aggregator::AggregatorKind;
use crate::feed::reducer::{build_reducers, Reducer, ReducerConfig};

/// One data feed as declared in the feeds file.
#[derive(Clone, Debug, Deserialize)]
pub struct FeedConfig {
    pub aggregator_id: String,
    pub name: String,
    pub address: String,
    pub heartbeat_ms: u64,
    /// Relative change against the last on-chain answer that triggers a
    /// submission before the heartbeat, e.g. `0.005` for half a percent.
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Absolute change that triggers an early submission.
    #[serde(default)]
    pub absolute_threshold: Option<f64>,
    /// How often deviation is checked between heartbeats.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_aggregator")]
    pub aggregator: String,
    pub sources: Vec<SourceConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default)]
    pub reducers: Vec<ReducerConfig>,
}

fn default_aggregator() -> String {
    "MEDIAN".to_string()
}

fn default_check_interval_ms() -> u64 {
    2_000
}

/// A feed with every name resolved to its strategy.
#[derive(Clone, Debug)]
pub struct Feed {
    pub aggregator_id: String,
    pub name: String,
    pub address: Address,
    pub heartbeat: Duration,
    pub threshold: Option<f64>,
    pub absolute_threshold: Option<f64>,
    pub check_interval: Duration,
    pub aggregator: AggregatorKind,
    pub sources: Vec<Source>,
}

impl Feed {
    /// Whether the feed submits between heartbeats at all.
    pub fn tracks_deviation(&self) -> bool {
        self.threshold.is_some() || self.absolute_threshold.is_some()
    }

    /// Whether `value` moved far enough from the last on-chain answer to be
    /// submitted early. A last answer of zero counts any change as relative
    /// deviation.
    pub fn deviates(&self, last: i128, value: i64) -> bool {
        let change = (i128::from(value) - last).unsigned_abs() as f64;
        let absolute = self.absolute_threshold.is_some_and(|limit| change >= limit);
        let relative = self.threshold.is_some_and(|limit| {
            if last == 0 {
                change > 0.0
            } else {
                change / last.unsigned_abs() as f64 >= limit
            }
        });
        absolute || relative
    }
}

#[derive(Clone, Debug)]
pub struct Source {
    pub url: String,
    pub reducers: Vec<Reducer>,
}

impl FeedConfig {
    pub fn resolve(&self) -> Result<Feed> {
        let address = Address::from_str(self.address.trim())
            .with_context(|| format!("feed {}: invalid address", self.name))?;
        let aggregator = AggregatorKind::from_str(&self.aggregator)
            .with_context(|| format!("feed {}", self.name))?;
        let sources = self
            .sources
            .iter()
            .map(|source| {
                Ok(Source {
                    url: source.url.clone(),
                    reducers: build_reducers(&source.reducers)
                        .with_context(|| format!("feed {}: source {}", self.name, source.url))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        for (label, limit) in [
            ("threshold", self.threshold),
            ("absolute_threshold", self.absolute_threshold),
        ] {
            if let Some(limit) = limit.filter(|limit| !limit.is_finite() || *limit <= 0.0) {
                bail!("feed {}: {label} must be positive, got {limit}", self.name);
            }
        }

        Ok(Feed {
            aggregator_id: self.aggregator_id.clone(),
            name: self.name.clone(),
            address,
            heartbeat: Duration::from_millis(self.heartbeat_ms.max(1)),
            threshold: self.threshold,
            absolute_threshold: self.absolute_threshold,
            check_interval: Duration::from_millis(
                self.check_interval_ms.clamp(1, self.heartbeat_ms.max(1)),
            ),
            aggregator,
            sources,
        })
    }
}

pub fn parse_feeds(json: &str) -> Result<Vec<Feed>> {
    let configs: Vec<FeedConfig> = serde_json::from_str(json).context("malformed feeds file")?;
    configs.iter().map(FeedConfig::resolve).collect()
}

pub async fn load_feeds(path: &Path) -> Result<Vec<Feed>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading feeds file {}", path.display()))?;
    parse_feeds(&content)
}
