//! Binary entrypoint: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line is an InboundEvent. Output lines are either:
//! - A Notification (one per fired notify action)
//! - An ErrorOutput (when input validation or a task fails)
//!
//! Events that fire no rule produce no output line. Logs go to stderr.

use post_process::config::{Config, ENV_CONFIG_PATH};
use post_process::types::ErrorOutput;
use post_process::{Engine, InboundEvent, PipelineError, Registry};
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> Option<String> {
  std::env::args()
    .nth(1)
    .or_else(|| std::env::var(ENV_CONFIG_PATH).ok())
    .filter(|path| !path.trim().is_empty())
}

fn init_tracing(config: &Config) {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.log_level))
    .unwrap_or_else(|_| EnvFilter::new("info"));

  if config.log_json {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(io::stderr)
      .json()
      .init();
  } else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(io::stderr)
      .init();
  }
}

fn error_output(e: &PipelineError) -> ErrorOutput {
  match e {
    PipelineError::Validation { field, reason } => {
      ErrorOutput::new(reason.clone()).with_field(field.clone())
    }
    _ => ErrorOutput::new(e.to_string()),
  }
}

fn write_line<T: serde::Serialize>(out: &mut impl Write, value: &T) {
  let _ = serde_json::to_writer(&mut *out, value);
  let _ = writeln!(out);
}

#[tokio::main]
async fn main() {
  let config_path = resolve_config_path();
  let config = match Config::load(config_path.as_deref()) {
    Ok(c) => c,
    Err(e) => {
      let _ = writeln!(io::stderr(), "post-process: {}", e);
      std::process::exit(1);
    }
  };
  init_tracing(&config);
  tracing::info!(
    path = config_path.as_deref().unwrap_or("<defaults>"),
    rules = config.rules.len(),
    explore_users = config.explore_users,
    explore_code = config.explore_code,
    "configuration loaded"
  );

  let mut engine = match Engine::new(config, Registry::with_builtins()) {
    Ok(engine) => engine,
    Err(e) => {
      tracing::error!(error = %e, "invalid rule configuration");
      std::process::exit(1);
    }
  };
  let mut out = io::BufWriter::new(io::stdout());
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  loop {
    let line = match lines.next_line().await {
      Ok(Some(l)) => l,
      Ok(None) => break,
      Err(e) => {
        tracing::error!(error = %e, "stdin read failed");
        let _ = out.flush();
        std::process::exit(1);
      }
    };

    // Skip blank lines.
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let raw: InboundEvent = match serde_json::from_str(trimmed) {
      Ok(v) => v,
      Err(e) => {
        tracing::warn!(error = %e, "rejected input line");
        write_line(&mut out, &ErrorOutput::new(format!("json parse: {}", e)));
        continue;
      }
    };

    match engine.process(&raw) {
      Ok(drained) => {
        for notification in &drained.notifications {
          write_line(&mut out, notification);
        }
        for (task, e) in &drained.failed {
          write_line(&mut out, &ErrorOutput::new(format!("{}: {}", task, e)));
        }
      }
      Err(e) => {
        tracing::warn!(error = %e, "rejected event");
        write_line(&mut out, &error_output(&e));
      }
    }
    let _ = out.flush();
  }

  let _ = out.flush();
}
