//! Structured error types for the post-processing pipeline.

use thiserror::Error;

use crate::types::{GroupId, RuleId};

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("config: {0}")]
  Config(String),

  #[error("rule {0} not found")]
  RuleNotFound(RuleId),

  #[error("group {0} not found")]
  GroupNotFound(GroupId),

  #[error("unknown action: {0}")]
  UnknownAction(String),

  #[error("unknown condition: {0}")]
  UnknownCondition(String),

  #[error("task queue closed while enqueuing {0}")]
  QueueClosed(&'static str),
}

impl PipelineError {
  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn config(msg: impl Into<String>) -> Self {
    Self::Config(msg.into())
  }
}
