//! Verse-level text reuse detection and quotation classification.
//!
//! The library surface exists for the CLI and the integration tests; it is
//! not a stable API.

pub mod aggregate;
pub mod common;
pub mod config;
pub mod features;
pub mod lsh;
pub mod minhash;
pub mod model;
pub mod report;
pub mod similarity;
pub mod store;
pub mod threshold;
pub mod tokenize;
pub mod train;

// Re-export the subcommand entry points for convenience
pub use config::{read_config, Config};
pub use model::execute_predict;
pub use report::execute_report;
pub use similarity::execute_similarity;
pub use train::execute_train;
