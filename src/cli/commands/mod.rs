//! CLI command implementations.

mod ask;
mod check;
mod config;
mod evaluate;
mod export;
mod feedback;
mod ground_truth;
mod ingest;
mod list;
mod search;
mod serve;
mod stats;

pub use ask::run_ask;
pub use check::run_check;
pub use config::run_config;
pub use evaluate::{run_evaluate, run_sweep};
pub use export::run_export;
pub use feedback::run_feedback;
pub use ground_truth::run_ground_truth;
pub use ingest::run_ingest;
pub use list::run_list;
pub use search::run_search;
pub use serve::run_serve;
pub use stats::run_stats;
