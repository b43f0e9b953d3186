//! Message processing pipeline.
//!
//! Every message in a swept folder flows through:
//! 1. `Mailbox::fetch_message()`: header-only view
//! 2. `RuleEngine::process_message()`: ordered rule evaluation
//! 3. `execute::apply()`: non-destructive actions, then at most one move or delete
//! 4. `RunCounters`: end-of-run report

pub mod counters;
pub mod engine;
pub mod execute;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testing;

pub use counters::RunCounters;
pub use engine::{Clock, EngineSettings, FixedClock, RuleEngine, SweepStatus, SystemClock};
pub use sweep::{SweepScope, folders_to_sweep, is_folder_excluded, run_once, sweep_folders};
