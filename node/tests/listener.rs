mod common;

use std::sync::Arc;

use alloy_primitives::{keccak256, B256, U256};

use common::*;
use oracle_node::listener::Listener;
use oracle_node::models::{QueueKind, RequestPayload, Service};
use oracle_node::store::{checkpoint_key, MemoryStore, StateStore};

fn listener(
    service: Service,
    chain: Arc<MockChain>,
    store: Arc<MemoryStore>,
    key_hash: Option<B256>,
    confirmations: u64,
    max_block_range: u64,
) -> Listener {
    let mut settings = listener_settings();
    settings.confirmations = confirmations;
    settings.max_block_range = max_block_range;
    Listener::new(
        service,
        "localhost",
        chain,
        store,
        vec![COORDINATOR],
        settings,
        key_hash,
    )
}

#[tokio::test]
async fn vrf_log_is_normalized() {
    let key_hash = vrf_keys().public_key.key_hash();
    let listener = listener(
        Service::Vrf,
        Arc::new(MockChain::new(10)),
        Arc::new(MemoryStore::new()),
        Some(key_hash),
        0,
        100,
    );
    let log = vrf_log(key_hash, 7, 10, 2);

    let request = listener.normalize(&log).unwrap().unwrap();
    assert_eq!(request.request_id, "7");
    assert_eq!(request.job_id, key_hash);
    assert_eq!(request.nonce, "1007");
    assert_eq!(request.callback_gas_limit, 500_000);
    assert_eq!(request.block_hash, log.block_hash);
    assert_eq!(request.chain, "localhost");
    match request.payload {
        RequestPayload::Vrf { seed, num_words, sender, .. } => {
            assert_eq!(seed, U256::from(1_007u64));
            assert_eq!(num_words, 2);
            assert_eq!(sender, CONSUMER);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn data_log_is_normalized() {
    let listener = listener(
        Service::RequestResponse,
        Arc::new(MockChain::new(10)),
        Arc::new(MemoryStore::new()),
        None,
        0,
        100,
    );
    let log = data_log(&["get", "https://api.example.com/price"], 4, 10, 0);

    let request = listener.normalize(&log).unwrap().unwrap();
    assert_eq!(request.request_id, "4");
    assert_eq!(request.job_id, keccak256("request-response-int256"));
    assert_eq!(request.nonce, "3");
    assert_eq!(request.callback_gas_limit, 300_000);
    assert!(matches!(
        request.payload,
        RequestPayload::RequestResponse { num_submission: 1, is_direct_payment: true, .. }
    ));
}

#[tokio::test]
async fn malformed_log_is_rejected() {
    let listener = listener(
        Service::RequestResponse,
        Arc::new(MockChain::new(10)),
        Arc::new(MemoryStore::new()),
        None,
        0,
        100,
    );
    let mut log = data_log(&["get", "https://api.example.com/price"], 4, 10, 0);
    log.data = log.data.slice(..8);

    assert!(listener.normalize(&log).is_err());
}

#[tokio::test]
async fn polls_stay_behind_head_and_within_range() {
    let chain = Arc::new(MockChain::new(20));
    let store = Arc::new(MemoryStore::new());
    let key_hash = vrf_keys().public_key.key_hash();
    let listener = listener(Service::Vrf, chain.clone(), store.clone(), Some(key_hash), 2, 5);
    let key = checkpoint_key(Service::Vrf, "localhost");

    // First start anchors at the confirmed head.
    let summary = listener.poll_once().await.unwrap();
    assert_eq!((summary.from_block, summary.to_block), (18, 18));
    assert_eq!(store.load_checkpoint(&key).await.unwrap().unwrap().next_block, 19);

    chain.add_log(vrf_log(key_hash, 1, 21, 0));
    chain.add_log(vrf_log(key_hash, 2, 30, 0));
    chain.set_block_number(40);

    let summary = listener.poll_once().await.unwrap();
    assert_eq!((summary.from_block, summary.to_block), (19, 23));
    assert_eq!(summary.added, 1);

    let summary = listener.poll_once().await.unwrap();
    assert_eq!((summary.from_block, summary.to_block), (24, 28));
    assert_eq!(summary.added, 0);

    let summary = listener.poll_once().await.unwrap();
    assert_eq!((summary.from_block, summary.to_block), (29, 33));
    assert_eq!(summary.added, 1);
    assert_eq!(store.queue_len(Service::Vrf, QueueKind::Worker).await.unwrap(), 2);
}

#[tokio::test]
async fn listener_waits_when_caught_up() {
    let chain = Arc::new(MockChain::new(5));
    let store = Arc::new(MemoryStore::new());
    let listener = listener(Service::Vrf, chain.clone(), store.clone(), None, 0, 10);

    listener.poll_once().await.unwrap();
    let summary = listener.poll_once().await.unwrap();
    assert_eq!(summary.logs, 0);
    assert_eq!(
        store
            .load_checkpoint(&checkpoint_key(Service::Vrf, "localhost"))
            .await
            .unwrap()
            .unwrap()
            .next_block,
        6
    );
}

#[tokio::test]
async fn transport_failures_leave_the_checkpoint_alone() {
    let chain = Arc::new(MockChain::new(10));
    let store = Arc::new(MemoryStore::new());
    let key_hash = vrf_keys().public_key.key_hash();
    let listener = listener(Service::Vrf, chain.clone(), store.clone(), Some(key_hash), 0, 100);
    let key = checkpoint_key(Service::Vrf, "localhost");

    listener.poll_once().await.unwrap();
    assert_eq!(store.load_checkpoint(&key).await.unwrap().unwrap().next_block, 11);

    chain.add_log(vrf_log(key_hash, 1, 12, 0));
    chain.set_block_number(15);

    chain.fail_head_queries(1);
    assert!(listener.poll_once().await.is_err());
    assert_eq!(store.load_checkpoint(&key).await.unwrap().unwrap().next_block, 11);

    chain.fail_log_queries(1);
    assert!(listener.poll_once().await.is_err());
    assert_eq!(store.load_checkpoint(&key).await.unwrap().unwrap().next_block, 11);
    assert_eq!(store.queue_len(Service::Vrf, QueueKind::Worker).await.unwrap(), 0);

    let summary = listener.poll_once().await.unwrap();
    assert_eq!((summary.from_block, summary.to_block), (11, 15));
    assert_eq!(summary.added, 1);
    assert_eq!(store.load_checkpoint(&key).await.unwrap().unwrap().next_block, 16);
    assert_eq!(store.queue_len(Service::Vrf, QueueKind::Worker).await.unwrap(), 1);
}
