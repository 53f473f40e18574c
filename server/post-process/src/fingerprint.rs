//! Stable fingerprint computation for grouping events.

use crate::interfaces::StackFrame;
use crate::types::{Event, Fingerprint};

/// Compute a stable fingerprint from an event.
///
/// Key components: project + exception type + top N frames (in-app frames when
/// the stack has any). Events without a stack group by message instead.
/// Uses blake3 for a fast, deterministic hash.
pub fn compute(event: &Event, max_frames: usize) -> Fingerprint {
  let mut hasher = blake3::Hasher::new();
  hasher.update(event.project.to_string().as_bytes());
  hasher.update(b"|");
  let exception_type = event
    .interfaces
    .exception
    .as_ref()
    .and_then(|exc| exc.first_type())
    .unwrap_or_default();
  hasher.update(exception_type.as_bytes());

  let frames = event.interfaces.grouping_frames();
  let in_app: Vec<&StackFrame> = frames.iter().copied().filter(|f| f.is_in_app()).collect();
  let selected = if in_app.is_empty() { frames } else { in_app };

  if selected.is_empty() {
    hasher.update(b"|");
    hasher.update(event.message.as_bytes());
  }
  for frame in selected.iter().take(max_frames) {
    hasher.update(b"|");
    hasher.update(frame.filename.as_deref().unwrap_or_default().as_bytes());
    hasher.update(b":");
    hasher.update(frame.function.as_deref().unwrap_or_default().as_bytes());
  }

  let hash = hasher.finalize();
  // Use first 16 bytes (32 hex chars) for a compact but collision-resistant ID.
  let hex = hash.to_hex();
  Fingerprint(hex[..32].to_string())
}
