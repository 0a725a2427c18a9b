pub mod aggregate;
pub mod alliances;
pub mod config;
pub mod match_key;
pub mod pipeline;
pub mod rating;
pub mod reconcile;
pub mod records;
pub mod sink;
pub mod store;
pub mod synthetic;

pub use pipeline::{RunSummary, run_once};
