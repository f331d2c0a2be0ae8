//! Oracle node
//!
//! Runs the listener, worker and reporter for each enabled service, the
//! recovery sweeper, the data feeds, and a small status API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use oracle_node::app_state::AppState;
use oracle_node::chain::{ChainClient, JsonRpcClient, Wallet};
use oracle_node::config::{load_feeds, NodeConfig};
use oracle_node::crypto::keygen;
use oracle_node::feed::{DataSource, FeedService, HttpFetcher};
use oracle_node::listener::Listener;
use oracle_node::models::Service;
use oracle_node::recovery::RecoverySweeper;
use oracle_node::reporter::{Reporter, ReporterConfig};
use oracle_node::routes;
use oracle_node::store::{MemoryStore, PostgresStore, StateStore};
use oracle_node::supervisor::supervise;
use oracle_node::worker::Worker;

const SOURCE_TIMEOUT_SECONDS: u64 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if std::env::args().nth(1).as_deref() == Some("keygen") {
        let keys = keygen()?;
        let output = json!({
            "sk": hex::encode(keys.secret_key.to_bytes()),
            "pk": hex::encode(keys.public_key.compressed()),
            "pkX": hex::encode(keys.public_key.x()),
            "pkY": hex::encode(keys.public_key.y()),
            "keyHash": keys.public_key.key_hash().to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let config = NodeConfig::from_env()?;

    let store: Arc<dyn StateStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url).await.context("connecting to database")?;
            store.migrate().await.context("running migrations")?;
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; pipeline state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    let chain: Arc<dyn ChainClient> = Arc::new(JsonRpcClient::new(config.provider_url.clone()));
    let source: Arc<dyn DataSource> =
        Arc::new(HttpFetcher::new(Duration::from_secs(SOURCE_TIMEOUT_SECONDS))?);
    let wallet = match config.reporter_private_key.as_deref() {
        Some(key) => Some(Arc::new(Mutex::new(
            Wallet::from_hex(key).context("REPORTER_PRIVATE_KEY")?,
        ))),
        None => {
            warn!("REPORTER_PRIVATE_KEY not set; fulfillments will be computed but not submitted");
            None
        }
    };

    let vrf_keys = config.vrf_keys()?;
    let mut services = Vec::new();
    for service in [Service::Vrf, Service::RequestResponse] {
        let addresses = config.contracts.monitored_addresses(service)?;
        if addresses.is_empty() {
            info!(%service, "service disabled: no coordinators configured");
            continue;
        }
        let key_hash = match (service, &vrf_keys) {
            (Service::Vrf, Some(keys)) => Some(config.vrf_key_hash(keys)?),
            (Service::Vrf, None) => {
                warn!("VRF coordinators configured but VRF_SK is not set; VRF disabled");
                continue;
            }
            _ => None,
        };
        services.push(service);

        let (listener_chain, listener_store) = (chain.clone(), store.clone());
        let (settings, chain_name) = (config.listener.clone(), config.chain.clone());
        supervise("listener", move || {
            Listener::new(
                service,
                chain_name.clone(),
                listener_chain.clone(),
                listener_store.clone(),
                addresses.clone(),
                settings.clone(),
                key_hash,
            )
            .run()
        });

        let worker = Arc::new(Worker::new(
            service,
            store.clone(),
            vrf_keys,
            source.clone(),
            config.processing_timeout,
        ));
        let concurrency = config.worker_concurrency;
        supervise("worker", move || worker.clone().run(concurrency));
    }

    let mut enabled_services = services;
    let mut feed_service = None;
    if let (Some(path), Some(wallet)) = (&config.data_feeds_file, &wallet) {
        let feeds = load_feeds(path).await?;
        let operator = wallet.lock().await.address();
        let service = Arc::new(FeedService::new(
            chain.clone(),
            store.clone(),
            source.clone(),
            operator,
            feeds,
        ));
        let runner = service.clone();
        supervise("data-feeds", move || runner.clone().run());
        enabled_services.push(Service::DataFeed);
        feed_service = Some(service);
    }

    if let Some(wallet) = &wallet {
        for &service in &enabled_services {
            let reporter = Arc::new(Reporter::new(
                ReporterConfig::new(service, config.reporter.max_attempts, config.reporter.backoff),
                chain.clone(),
                store.clone(),
                wallet.clone(),
                config.chain_id,
            ));
            supervise("reporter", move || reporter.clone().run());
        }
    }

    let sweeper_store = store.clone();
    let (timeout, max_requeues) = (config.processing_timeout, config.max_requeues);
    supervise("recovery", move || {
        RecoverySweeper::new(
            sweeper_store.clone(),
            enabled_services.clone(),
            timeout,
            max_requeues,
        )
        .run()
    });

    let app = routes::app(AppState::new(store, feed_service));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
