//! Parameter normalization: turn a scalar, list, or mapping into the
//! comma-joinable positional argument sequence the wire protocol expects.

use serde_json::Value;

/// A parameter value as a caller supplies it to [`crate::session::rexec`].
#[derive(Debug, Clone)]
pub enum Param {
    Null,
    Scalar(Value),
    List(Vec<Value>),
    /// Ordered `key -> value` pairs. Caller-provided order is preserved so
    /// that encoding is deterministic (spec: "mapping iteration order is
    /// the caller-provided order").
    Map(Vec<(String, Value)>),
}

impl Param {
    pub fn none() -> Self {
        Param::Null
    }

    pub fn scalar(v: impl Into<Value>) -> Self {
        Param::Scalar(v.into())
    }

    pub fn list(items: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Param::List(items.into_iter().map(Into::into).collect())
    }

    pub fn map(pairs: impl IntoIterator<Item = (impl Into<String>, impl Into<Value>)>) -> Self {
        Param::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Normalize into an ordered list of positional argument strings.
    ///
    /// Idempotent: normalizing an already-normalized `Param::List` of
    /// strings produces the same list (spec §8: "Parameter normalization
    /// idempotence").
    pub fn normalize(&self) -> Vec<String> {
        match self {
            Param::Null => Vec::new(),
            Param::Scalar(v) => vec![canonical_scalar(v)],
            Param::List(items) => items.iter().map(canonical_scalar).collect(),
            Param::Map(pairs) => pairs
                .iter()
                .map(|(k, v)| format!("{k}={}", canonical_scalar(v)))
                .collect(),
        }
    }
}

/// Canonical wire string form for a scalar JSON value.
fn canonical_scalar(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        // Arrays/objects should not reach here via the public constructors,
        // but fall back to compact JSON rather than panicking.
        other => other.to_string(),
    }
}

/// Join normalized positional arguments into the wire `parameter` string.
/// An empty list means "no `parameter` key at all" (returns `None`).
pub fn join(args: &[String]) -> Option<String> {
    if args.is_empty() {
        None
    } else {
        Some(args.join(","))
    }
}
