//! Node configuration, read from the environment (and `.env`).

pub mod contracts;
pub mod feeds;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::B256;
use anyhow::{bail, Context, Result};

use crate::crypto::{KeyPair, PublicKey, SecretKey};

pub use contracts::ContractsConfig;
pub use feeds::{load_feeds, Feed, FeedConfig};

#[derive(Clone, Debug)]
pub struct ListenerSettings {
    pub poll_interval: Duration,
    pub max_block_range: u64,
    /// Blocks to stay behind the head.
    pub confirmations: u64,
}

#[derive(Clone, Debug)]
pub struct ReporterSettings {
    pub max_attempts: u32,
    pub backoff: Duration,
}

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub chain: String,
    pub chain_id: u64,
    pub provider_url: String,
    pub database_url: Option<String>,
    pub port: u16,
    pub vrf_sk: Option<String>,
    pub vrf_pk: Option<String>,
    pub vrf_key_hash: Option<String>,
    pub reporter_private_key: Option<String>,
    pub contracts: ContractsConfig,
    pub listener: ListenerSettings,
    pub reporter: ReporterSettings,
    pub processing_timeout: Duration,
    pub max_requeues: u32,
    pub worker_concurrency: usize,
    pub data_feeds_file: Option<PathBuf>,
}

impl NodeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |name: &str| get(name).filter(|v| !v.trim().is_empty());
        let number = |name: &str, default: u64| -> Result<u64> {
            match non_empty(name) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{name} must be a number")),
                None => Ok(default),
            }
        };

        let port = number("PORT", 3030)?;
        let port = u16::try_from(port).context("PORT out of range")?;

        Ok(Self {
            chain: non_empty("CHAIN").unwrap_or_else(|| "localhost".to_string()),
            chain_id: number("CHAIN_ID", 31337)?,
            provider_url: non_empty("PROVIDER_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8545".to_string()),
            database_url: non_empty("DATABASE_URL"),
            port,
            vrf_sk: non_empty("VRF_SK"),
            vrf_pk: non_empty("VRF_PK"),
            vrf_key_hash: non_empty("VRF_KEY_HASH"),
            reporter_private_key: non_empty("REPORTER_PRIVATE_KEY"),
            contracts: ContractsConfig::from_vars(&get),
            listener: ListenerSettings {
                poll_interval: Duration::from_millis(number("LISTENER_POLL_INTERVAL_MS", 500)?),
                max_block_range: number("LISTENER_MAX_BLOCK_RANGE", 200)?.max(1),
                confirmations: number("LISTENER_CONFIRMATIONS", 0)?,
            },
            reporter: ReporterSettings {
                max_attempts: number("REPORTER_MAX_ATTEMPTS", 3)?.max(1) as u32,
                backoff: Duration::from_millis(number("REPORTER_BACKOFF_MS", 1000)?),
            },
            processing_timeout: Duration::from_secs(number("PROCESSING_TIMEOUT_SECONDS", 60)?.max(1)),
            max_requeues: number("MAX_REQUEUES", 1)? as u32,
            worker_concurrency: number("WORKER_CONCURRENCY", 1)?.max(1) as usize,
            data_feeds_file: non_empty("DATA_FEEDS_FILE").map(PathBuf::from),
        })
    }

    /// VRF key pair, if one is configured. A configured public key must
    /// match the one derived from the secret key.
    pub fn vrf_keys(&self) -> Result<Option<KeyPair>> {
        let Some(sk) = &self.vrf_sk else {
            return Ok(None);
        };
        let keys = KeyPair::from_secret(SecretKey::from_hex(sk).context("VRF_SK")?);

        if let Some(pk) = &self.vrf_pk {
            let configured = PublicKey::from_hex(pk).context("VRF_PK")?;
            if configured != keys.public_key {
                bail!("VRF_PK does not match the key derived from VRF_SK");
            }
        }
        Ok(Some(keys))
    }

    /// Key hash the VRF listener accepts requests for.
    pub fn vrf_key_hash(&self, keys: &KeyPair) -> Result<B256> {
        match &self.vrf_key_hash {
            Some(raw) => B256::from_str(raw.trim()).context("VRF_KEY_HASH"),
            None => Ok(keys.public_key.key_hash()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<NodeConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_vars(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.port, 3030);
        assert_eq!(cfg.chain, "localhost");
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.listener.poll_interval, Duration::from_millis(500));
        assert_eq!(cfg.listener.max_block_range, 200);
        assert_eq!(cfg.reporter.max_attempts, 3);
        assert_eq!(cfg.processing_timeout, Duration::from_secs(60));
        assert_eq!(cfg.max_requeues, 1);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert!(config(&[("PORT", "eighty")]).is_err());
        assert!(config(&[("PORT", "70000")]).is_err());
    }

    #[test]
    fn vrf_public_key_must_match_secret() {
        let sk = "c9afa9d845ba75166b5c215767b1d6934e50c3db36e89b127b8a622b120f6721";
        let keys = config(&[("VRF_SK", sk)]).unwrap().vrf_keys().unwrap().unwrap();
        let pk = hex::encode(keys.public_key.compressed());

        let matching = config(&[("VRF_SK", sk), ("VRF_PK", &pk)]).unwrap();
        assert!(matching.vrf_keys().unwrap().is_some());
        assert_eq!(matching.vrf_key_hash(&keys).unwrap(), keys.public_key.key_hash());

        let other = crate::crypto::keygen().unwrap();
        let mismatched = config(&[
            ("VRF_SK", sk),
            ("VRF_PK", &hex::encode(other.public_key.compressed())),
        ])
        .unwrap();
        assert!(mismatched.vrf_keys().is_err());
    }
}
