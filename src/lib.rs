//! Repowatch - quota-aware repository discovery, tiering and analysis
//!
//! Repowatch tracks repositories in three priority tiers, refreshes their
//! metrics on a per-tier cadence and runs deep LLM analyses in chunked,
//! resumable batch jobs. Every external call passes through a per-channel
//! token-bucket rate limiter and a retry-with-backoff executor, and all
//! scheduling decisions are serialized through a single actor.

pub mod batch;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod id;
pub mod provider;
pub mod scheduler;
pub mod store;

pub use error::{RepowatchError, Result};
