//! Oracle node library
//!
//! Listens for VRF and data requests on EVM coordinator contracts, computes
//! their fulfillments, and submits them back on chain. Data feeds are
//! aggregated from off-chain sources and submitted every heartbeat, or
//! earlier once they move past a deviation threshold.

pub mod app_state;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod feed;
pub mod handlers;
pub mod listener;
pub mod models;
pub mod recovery;
pub mod reporter;
pub mod routes;
pub mod store;
pub mod supervisor;
pub mod worker;
