//! Periodic jobs around the orchestrator.
//!
//! Each job owns a [`RunGuard`] so a tick that fires while the previous one is
//! still running is skipped. Update and maintenance also name each other as
//! peers: both spend the same margin budget and must never overlap.

pub mod discover_pairs;
pub mod maintain_pairs;
pub mod run_guard;
pub mod update_trades;
pub mod worker_pool;

pub use discover_pairs::DiscoverPairsJob;
pub use maintain_pairs::{MaintainPairsJob, MaintainReport};
pub use run_guard::{try_enter, AtomicRunGuard, RunGuard, RunPermit};
pub use update_trades::UpdateTradesJob;
pub use worker_pool::{Batch, BatchReport, WorkerPool};
