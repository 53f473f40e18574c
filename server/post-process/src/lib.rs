//! Post-processing pipeline for ingested error events.
//!
//! Saves each event against its group (by fingerprint), then fans out side
//! effects as typed tasks: affected-user tags, affected-code tags, and rule
//! execution once per seen -> new transition of the group.
//!
//! No DB, no network; in-memory state + a task channel drained by the engine.

pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod interfaces;
pub mod normalize;
pub mod pipeline;
pub mod queue;
pub mod rules;
pub mod store;
pub mod tags;
pub mod types;

pub use config::Config;
pub use engine::{Drained, Engine, Ingested};
pub use error::PipelineError;
pub use pipeline::PostProcessor;
pub use queue::{MemoryQueue, Task, TaskQueue};
pub use rules::Registry;
pub use types::{InboundEvent, Notification};
