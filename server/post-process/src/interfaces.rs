//! Structured event interfaces (user, exception, stacktrace).
//!
//! Interfaces arrive as top-level keys of the inbound event, under either the
//! legacy dotted name (`sentry.interfaces.User`) or the short name (`user`).

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::PipelineError;

const DOTTED_PREFIX: &str = "sentry.interfaces.";

/// Short names accepted as interface keys without the dotted prefix.
const SHORT_NAMES: &[&str] = &["user", "exception", "stacktrace", "request", "template"];

/// Interfaces attached to an event, keyed by canonical lowercase name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interfaces {
  pub user: Option<UserInterface>,
  pub exception: Option<ExceptionInterface>,
  pub stacktrace: Option<Stacktrace>,
  /// Interfaces we carry but never inspect.
  pub other: BTreeMap<String, Value>,
}

impl Interfaces {
  /// Pick interface payloads out of the inbound top-level keys.
  pub fn from_fields(fields: &BTreeMap<String, Value>) -> Result<Self, PipelineError> {
    let mut out = Self::default();
    for (key, value) in fields {
      let Some(name) = canonical_name(key) else {
        continue;
      };
      match name.as_str() {
        "user" if out.user.is_none() => out.user = Some(parse(key, value)?),
        "exception" if out.exception.is_none() => out.exception = Some(parse(key, value)?),
        "stacktrace" if out.stacktrace.is_none() => out.stacktrace = Some(parse(key, value)?),
        "user" | "exception" | "stacktrace" => {
          tracing::debug!(key = %key, "duplicate interface ignored");
        }
        _ => {
          out.other.entry(name.clone()).or_insert_with(|| value.clone());
        }
      }
    }
    Ok(out)
  }

  /// Frames used for grouping: exception stacktraces first, else the bare stacktrace.
  pub fn grouping_frames(&self) -> Vec<&StackFrame> {
    match &self.exception {
      Some(exc) if exc.frames().next().is_some() => exc.frames().collect(),
      _ => self
        .stacktrace
        .iter()
        .flat_map(|st| st.frames.iter())
        .collect(),
    }
  }
}

fn canonical_name(key: &str) -> Option<String> {
  if let Some(rest) = key.strip_prefix(DOTTED_PREFIX) {
    if rest.is_empty() {
      return None;
    }
    return Some(rest.to_ascii_lowercase());
  }
  SHORT_NAMES
    .iter()
    .find(|name| **name == key)
    .map(|name| (*name).to_string())
}

fn parse<T: for<'de> Deserialize<'de>>(key: &str, value: &Value) -> Result<T, PipelineError> {
  T::deserialize(value).map_err(|e| PipelineError::validation(key, &e.to_string()))
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInterface {
  /// Kept as sent; ids arrive as strings or numbers.
  #[serde(default)]
  pub id: Option<Value>,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub username: Option<String>,
  #[serde(default)]
  pub data: Option<Value>,
}

impl UserInterface {
  /// The most specific identifier as `(field, value)`: email, then username, then id.
  pub fn ident(&self) -> Option<(&'static str, String)> {
    [
      ("email", self.email.clone()),
      ("username", self.username.clone()),
      ("id", self.id_string()),
    ]
    .into_iter()
    .find_map(|(field, value)| value.filter(|v| !v.is_empty()).map(|v| (field, v)))
  }

  /// The id as tag text. Only strings and numbers count.
  pub fn id_string(&self) -> Option<String> {
    match self.id.as_ref()? {
      Value::String(s) => Some(s.clone()),
      Value::Number(n) => Some(n.to_string()),
      _ => None,
    }
  }
}

// ---------------------------------------------------------------------------
// Exception / stacktrace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
  #[serde(default)]
  pub filename: Option<String>,
  #[serde(default)]
  pub function: Option<String>,
  #[serde(default)]
  pub module: Option<String>,
  #[serde(default)]
  pub lineno: Option<u32>,
  #[serde(default)]
  pub in_app: Option<bool>,
}

impl StackFrame {
  pub fn is_in_app(&self) -> bool {
    self.in_app.unwrap_or(false)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stacktrace {
  #[serde(default)]
  pub frames: Vec<StackFrame>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionValue {
  #[serde(default, rename = "type")]
  pub ty: Option<String>,
  #[serde(default)]
  pub value: Option<String>,
  #[serde(default)]
  pub module: Option<String>,
  #[serde(default)]
  pub stacktrace: Option<Stacktrace>,
}

/// Accepts `{"values": [...]}` or a single exception object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExceptionInterface {
  pub values: Vec<ExceptionValue>,
}

impl<'de> Deserialize<'de> for ExceptionInterface {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    let values = match raw.get("values") {
      Some(values) => Vec::<ExceptionValue>::deserialize(values).map_err(de::Error::custom)?,
      None => vec![ExceptionValue::deserialize(&raw).map_err(de::Error::custom)?],
    };
    Ok(Self { values })
  }
}

impl ExceptionInterface {
  /// Every frame of every exception value, in order.
  pub fn frames(&self) -> impl Iterator<Item = &StackFrame> {
    self
      .values
      .iter()
      .filter_map(|v| v.stacktrace.as_ref())
      .flat_map(|st| st.frames.iter())
  }

  pub fn first_type(&self) -> Option<&str> {
    self.values.iter().find_map(|v| v.ty.as_deref())
  }
}
