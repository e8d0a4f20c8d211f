//! Per-event evaluation context for the HyperFleet adapter runtime.
//!
//! Every inbound event gets its own [`EvaluationContext`]: a concurrency-safe,
//! versioned mapping from variable name to JSON value. Rule evaluation,
//! captures, and template rendering all read and write through it.
//!
//! # Versioning
//!
//! The context carries a monotonic version counter that increments only when
//! a write *materially* changes the stored data (checked by deep equality).
//! The cached expression evaluator keys its variable bindings off this
//! counter, so rewriting a key with an identical value never forces a
//! rebuild, while adding a capture mid-event makes the new variable visible
//! to the next expression evaluation.
//!
//! # Examples
//!
//! ```rust
//! use hyperfleet_adapter::context::EvaluationContext;
//! use serde_json::json;
//!
//! let ctx = EvaluationContext::new();
//! ctx.set("clusterPhase", json!("Ready"));
//! ctx.set("nodeCount", json!(5));
//!
//! let (value, found) = ctx.get("clusterPhase");
//! assert!(found);
//! assert_eq!(value, json!("Ready"));
//!
//! // Writing the same value back does not move the version.
//! let v = ctx.version();
//! ctx.set("nodeCount", json!(5));
//! assert_eq!(ctx.version(), v);
//! ```

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::extract::{self, FieldResult, PathError};

/// Concurrency-safe, versioned variable store scoped to a single event.
///
/// Cloning an `EvaluationContext` is cheap and yields a handle to the *same*
/// underlying store; use [`snapshot`](Self::snapshot) when an independent
/// copy is needed.
///
/// # Invariants
///
/// - Readers always observe a consistent snapshot of the data map.
/// - [`version`](Self::version) is non-decreasing and increases exactly when
///   a write changes at least one key by deep equality.
/// - [`merge`](Self::merge) snapshots the source under *its* read lock before
///   taking the local write lock, so `a.merge(&b)` racing `b.merge(&a)`
///   cannot deadlock.
#[derive(Clone, Debug, Default)]
pub struct EvaluationContext {
    inner: Arc<RwLock<ContextInner>>,
}

#[derive(Debug, Default)]
struct ContextInner {
    data: FxHashMap<String, Value>,
    version: u64,
}

impl EvaluationContext {
    /// Creates an empty context at version 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context pre-populated from an iterator of `(name, value)`
    /// pairs. The initial population counts as one version step when it is
    /// non-empty.
    pub fn from_vars<I, K>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let ctx = Self::new();
        ctx.set_many(vars);
        ctx
    }

    /// Creates a builder for fluent construction.
    ///
    /// ```rust
    /// use hyperfleet_adapter::context::EvaluationContext;
    /// use serde_json::json;
    ///
    /// let ctx = EvaluationContext::builder()
    ///     .with_var("cloudProvider", json!("aws"))
    ///     .with_var("vpcId", json!("vpc-12345"))
    ///     .build();
    /// assert_eq!(ctx.get("cloudProvider").0, json!("aws"));
    /// ```
    #[must_use]
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Stores `value` under `key`. Returns `true` when the write changed the
    /// stored data (and therefore advanced the version).
    pub fn set(&self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        let mut inner = self.inner.write();
        let changed = inner.data.get(&key) != Some(&value);
        if changed {
            inner.data.insert(key, value);
            inner.version += 1;
        }
        changed
    }

    /// Looks up `key`, returning the value (or `Null`) and a found flag.
    #[must_use]
    pub fn get(&self, key: &str) -> (Value, bool) {
        let inner = self.inner.read();
        match inner.data.get(key) {
            Some(v) => (v.clone(), true),
            None => (Value::Null, false),
        }
    }

    /// Stores every pair from `vars`. The version advances at most once, and
    /// only if at least one key actually changed.
    pub fn set_many<I, K>(&self, vars: I) -> bool
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut inner = self.inner.write();
        let mut changed = false;
        for (key, value) in vars {
            let key = key.into();
            if inner.data.get(&key) != Some(&value) {
                inner.data.insert(key, value);
                changed = true;
            }
        }
        if changed {
            inner.version += 1;
        }
        changed
    }

    /// Merges every variable from `other` into this context.
    ///
    /// The source is snapshotted under its read lock first and the local
    /// write lock is taken only afterwards. Cross-merges from two threads
    /// terminate regardless of ordering.
    pub fn merge(&self, other: &EvaluationContext) -> bool {
        let source = other.snapshot();
        self.set_many(source)
    }

    /// Returns a shallow copy of the data map, safe to share across threads.
    #[must_use]
    pub fn snapshot(&self) -> FxHashMap<String, Value> {
        self.inner.read().data.clone()
    }

    /// Renders the whole context as one JSON object, keyed by variable name.
    #[must_use]
    pub fn as_json(&self) -> Value {
        let inner = self.inner.read();
        let map: Map<String, Value> = inner
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(map)
    }

    /// Extracts a value by dot-path or path expression (see [`crate::extract`]).
    ///
    /// Parse errors surface as [`PathError`]; runtime absence yields a
    /// [`FieldResult`] holding `Null`.
    pub fn extract(&self, path: &str) -> Result<FieldResult, PathError> {
        let tree = self.as_json();
        extract::extract_value(&tree, path)
    }

    /// Current version counter.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Number of variables currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    /// True when no variables are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().data.is_empty()
    }
}

/// Fluent builder for [`EvaluationContext`].
#[derive(Debug, Default)]
pub struct ContextBuilder {
    vars: Vec<(String, Value)>,
}

impl ContextBuilder {
    /// Adds one variable.
    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.push((name.into(), value));
        self
    }

    /// Adds every field of a JSON object as a top-level variable.
    ///
    /// Non-object values are ignored; event payloads are always objects by
    /// the time they reach the context.
    #[must_use]
    pub fn with_object(mut self, value: &Value) -> Self {
        if let Value::Object(map) = value {
            for (k, v) in map {
                self.vars.push((k.clone(), v.clone()));
            }
        }
        self
    }

    /// Builds the context. A non-empty builder yields version 1.
    #[must_use]
    pub fn build(self) -> EvaluationContext {
        EvaluationContext::from_vars(self.vars)
    }
}
