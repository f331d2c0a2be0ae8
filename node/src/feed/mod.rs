//! Off-chain data: fetching sources, reducing responses and aggregating
//! them into feed submissions.

pub mod aggregator;
pub mod fetcher;
pub mod reducer;
pub mod service;

pub use aggregator::{aggregate_submissions, AggregateResult, AggregatorKind, AggregatorSubmission};
pub use fetcher::{DataSource, HttpFetcher};
pub use reducer::{apply_all, Reducer, RequestPlan};
pub use service::FeedService;
