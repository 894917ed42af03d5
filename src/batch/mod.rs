//! Batch analysis - candidate building, item processing and orchestration
//!
//! A batch job walks an ordered list of repositories, running a deep scan
//! (metrics + LLM analysis) on each:
//! 1. CandidateBuilder resolves a target into ordered, deduplicated items
//! 2. BatchOrchestrator creates the job and executes it chunk by chunk
//! 3. ItemProcessor performs the rate-limited, retried provider calls

pub mod candidates;
pub mod orchestrator;
pub mod processor;

pub use candidates::{BatchConfig, CandidateBuilder, CandidateSet};
pub use orchestrator::{BatchOrchestrator, StepOutcome, StopSignal};
pub use processor::{ItemProcessor, analysis_input};
