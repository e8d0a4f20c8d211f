//! Adapter configuration: model, loader, and lookup indexes.
//!
//! An adapter binds event types to tasks. Config is parsed from YAML once at
//! startup, validated eagerly (unknown operators, empty field paths,
//! uncompilable expressions, dangling references, templates without a
//! generation annotation are all load-time failures), and treated as
//! immutable afterwards.
//!
//! The loader is pure: no I/O beyond reading the file it is pointed at.

mod loader;
mod model;

use rustc_hash::FxHashMap;
use std::sync::Arc;

pub use loader::{load_path, load_str, ConfigError};
pub use model::{
    Capture, CaptureSet, EnrichSpec, RuleSet, TargetSpec, TaskSpec, TemplateSpec, TransportKind,
};

/// One validated adapter with its lookup indexes. Built by the loader,
/// never mutated afterwards.
#[derive(Clone, Debug)]
pub struct Adapter {
    name: String,
    event_type_prefix: String,
    source: Option<String>,
    rules: FxHashMap<String, RuleSet>,
    captures: FxHashMap<String, CaptureSet>,
    templates: FxHashMap<String, TemplateSpec>,
    tasks: Vec<TaskSpec>,
    enrich: Option<EnrichSpec>,
}

impl Adapter {
    /// Adapter name as declared.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Event-type prefix this adapter routes on.
    #[must_use]
    pub fn event_type_prefix(&self) -> &str {
        &self.event_type_prefix
    }

    /// Optional event-source match.
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Named rule set lookup.
    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&RuleSet> {
        self.rules.get(name)
    }

    /// Named capture-set lookup.
    #[must_use]
    pub fn capture_set(&self, name: &str) -> Option<&CaptureSet> {
        self.captures.get(name)
    }

    /// Named template lookup.
    #[must_use]
    pub fn template(&self, name: &str) -> Option<&TemplateSpec> {
        self.templates.get(name)
    }

    /// Tasks in declaration order.
    #[must_use]
    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    /// Optional fleet-state enrichment.
    #[must_use]
    pub fn enrich(&self) -> Option<&EnrichSpec> {
        self.enrich.as_ref()
    }

    /// True when this adapter should handle `(event_type, source)`.
    #[must_use]
    pub fn matches(&self, event_type: &str, source: &str) -> bool {
        if !event_type.starts_with(&self.event_type_prefix) {
            return false;
        }
        match &self.source {
            Some(expected) => expected == source,
            None => true,
        }
    }
}

/// Immutable set of loaded adapters with event routing.
#[derive(Clone, Debug, Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<Adapter>>,
}

impl AdapterRegistry {
    /// Builds a registry from loaded adapters.
    #[must_use]
    pub fn new(adapters: Vec<Adapter>) -> Self {
        Self {
            adapters: adapters.into_iter().map(Arc::new).collect(),
        }
    }

    /// Routes an event to the adapter with the longest matching event-type
    /// prefix (source match required where declared).
    #[must_use]
    pub fn route(&self, event_type: &str, source: &str) -> Option<Arc<Adapter>> {
        self.adapters
            .iter()
            .filter(|a| a.matches(event_type, source))
            .max_by_key(|a| a.event_type_prefix().len())
            .cloned()
    }

    /// All adapters, in load order.
    #[must_use]
    pub fn adapters(&self) -> &[Arc<Adapter>] {
        &self.adapters
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }
}
