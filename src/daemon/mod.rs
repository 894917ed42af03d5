//! Daemon Core - the scheduler actor and its periodic tick
//!
//! The daemon is the long-running process that:
//! - Serializes every scheduling decision through one actor per name
//! - Ticks periodically to refresh metrics, reclassify and start batches
//! - Resumes a batch job left running by a previous process

pub mod actor;
pub mod tick;

pub use actor::{SchedulerActor, SchedulerDeps, SchedulerHandle, SchedulerStats};
pub use tick::{TickConfig, TickReport, TickState};
