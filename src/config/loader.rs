//! YAML loader and load-time validation.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

use super::model::{AdapterDoc, Capture, ConfigDoc, RuleSet, TransportKind};
use super::Adapter;
use crate::extract::{PathError, PathQuery};
use crate::generation::GENERATION_ANNOTATION;

/// Load-time configuration failure. All of these are fatal at startup.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    #[diagnostic(code(hyperfleet::config::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config YAML: {0}")]
    #[diagnostic(
        code(hyperfleet::config::yaml),
        help("Unknown fields and unknown operators are rejected; check spelling.")
    )]
    Yaml(#[from] serde_yaml::Error),

    #[error("duplicate {kind} name {name:?}")]
    #[diagnostic(code(hyperfleet::config::duplicate))]
    Duplicate { kind: &'static str, name: String },

    #[error("rule set {rule:?} declares both conditions and an expression")]
    #[diagnostic(
        code(hyperfleet::config::rule_shape),
        help("A rule set is either an ordered condition list or one expression.")
    )]
    RuleShape { rule: String },

    #[error("invalid field path in {location}")]
    #[diagnostic(code(hyperfleet::config::field_path))]
    FieldPath {
        location: String,
        #[source]
        source: PathError,
    },

    #[error("invalid expression in {location}: {message}")]
    #[diagnostic(code(hyperfleet::config::expression))]
    Expression { location: String, message: String },

    #[error("capture {capture:?} declares both field and expression")]
    #[diagnostic(
        code(hyperfleet::config::capture_ambiguous),
        help("A capture source is exactly one of `field` or `expression`.")
    )]
    CaptureAmbiguous { capture: String },

    #[error("capture {capture:?} declares neither field nor expression")]
    #[diagnostic(code(hyperfleet::config::capture_source))]
    CaptureSource { capture: String },

    #[error("template {template:?} manifest must be a mapping")]
    #[diagnostic(code(hyperfleet::config::template_shape))]
    TemplateShape { template: String },

    #[error("template {template:?} carries no {GENERATION_ANNOTATION} annotation")]
    #[diagnostic(
        code(hyperfleet::config::template_generation),
        help("Add the generation annotation (a `${{...}}` placeholder is fine) under metadata.annotations.")
    )]
    TemplateGeneration { template: String },

    #[error("task {task:?} references unknown {kind} {name:?}")]
    #[diagnostic(code(hyperfleet::config::unknown_reference))]
    UnknownReference {
        task: String,
        kind: &'static str,
        name: String,
    },

    #[error("task {task:?} targets the shipper transport without a clusterRef")]
    #[diagnostic(
        code(hyperfleet::config::missing_cluster_ref),
        help("Shipper targets must name the context variable holding the consumer cluster.")
    )]
    MissingClusterRef { task: String },
}

/// Loads adapters from a file. Accepts a single adapter document or a
/// `adapters:` list.
pub fn load_path(path: impl AsRef<Path>) -> Result<Vec<Adapter>, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_str(&raw)
}

/// Loads adapters from YAML text.
pub fn load_str(raw: &str) -> Result<Vec<Adapter>, ConfigError> {
    let probe: serde_yaml::Value = serde_yaml::from_str(raw)?;
    let docs = if probe.get("adapters").is_some() {
        serde_yaml::from_str::<ConfigDoc>(raw)?.adapters
    } else {
        vec![serde_yaml::from_str::<AdapterDoc>(raw)?]
    };

    let mut seen = FxHashMap::default();
    let mut adapters = Vec::with_capacity(docs.len());
    for doc in docs {
        if seen.insert(doc.name.clone(), ()).is_some() {
            return Err(ConfigError::Duplicate {
                kind: "adapter",
                name: doc.name,
            });
        }
        adapters.push(validate(doc)?);
    }
    Ok(adapters)
}

fn validate(doc: AdapterDoc) -> Result<Adapter, ConfigError> {
    let mut rules = FxHashMap::default();
    for rule in doc.rules {
        validate_rule(&rule)?;
        if rules.contains_key(&rule.name) {
            return Err(ConfigError::Duplicate {
                kind: "rule",
                name: rule.name,
            });
        }
        rules.insert(rule.name.clone(), rule);
    }

    let mut captures = FxHashMap::default();
    for set in doc.captures {
        for item in &set.items {
            validate_capture(&set.name, item)?;
        }
        if captures.contains_key(&set.name) {
            return Err(ConfigError::Duplicate {
                kind: "capture set",
                name: set.name,
            });
        }
        captures.insert(set.name.clone(), set);
    }

    let mut templates = FxHashMap::default();
    for template in doc.templates {
        let manifest = template
            .manifest
            .as_object()
            .ok_or_else(|| ConfigError::TemplateShape {
                template: template.name.clone(),
            })?;
        let has_generation = manifest
            .get("metadata")
            .and_then(Value::as_object)
            .and_then(|m| m.get("annotations"))
            .and_then(Value::as_object)
            .is_some_and(|a| a.contains_key(GENERATION_ANNOTATION));
        if !has_generation {
            return Err(ConfigError::TemplateGeneration {
                template: template.name.clone(),
            });
        }
        if templates.contains_key(&template.name) {
            return Err(ConfigError::Duplicate {
                kind: "template",
                name: template.name,
            });
        }
        templates.insert(template.name.clone(), template);
    }

    if let Some(enrich) = &doc.enrich {
        parse_path(&enrich.cluster_ref, format!("enrich of {:?}", doc.name))?;
    }

    let mut task_names = FxHashMap::default();
    for task in &doc.tasks {
        if task_names.insert(task.name.clone(), ()).is_some() {
            return Err(ConfigError::Duplicate {
                kind: "task",
                name: task.name.clone(),
            });
        }
        for name in task.preconditions.iter().chain(&task.postconditions) {
            if !rules.contains_key(name) {
                return Err(ConfigError::UnknownReference {
                    task: task.name.clone(),
                    kind: "rule",
                    name: name.clone(),
                });
            }
        }
        for name in &task.captures {
            if !captures.contains_key(name) {
                return Err(ConfigError::UnknownReference {
                    task: task.name.clone(),
                    kind: "capture set",
                    name: name.clone(),
                });
            }
        }
        for name in &task.templates {
            if !templates.contains_key(name) {
                return Err(ConfigError::UnknownReference {
                    task: task.name.clone(),
                    kind: "template",
                    name: name.clone(),
                });
            }
        }
        if task.target.transport == TransportKind::Shipper && task.target.cluster_ref.is_none() {
            return Err(ConfigError::MissingClusterRef {
                task: task.name.clone(),
            });
        }
    }

    Ok(Adapter {
        name: doc.name,
        event_type_prefix: doc.event_type_prefix,
        source: doc.source,
        rules,
        captures,
        templates,
        tasks: doc.tasks,
        enrich: doc.enrich,
    })
}

fn validate_rule(rule: &RuleSet) -> Result<(), ConfigError> {
    if !rule.conditions.is_empty() && rule.expression.is_some() {
        return Err(ConfigError::RuleShape {
            rule: rule.name.clone(),
        });
    }
    for (index, condition) in rule.conditions.iter().enumerate() {
        parse_path(
            &condition.field,
            format!("condition {index} of rule {:?}", rule.name),
        )?;
    }
    if let Some(expression) = &rule.expression {
        compile_expression(expression, format!("rule {:?}", rule.name))?;
    }
    Ok(())
}

fn validate_capture(set: &str, capture: &Capture) -> Result<(), ConfigError> {
    match (&capture.field, &capture.expression) {
        (Some(_), Some(_)) => Err(ConfigError::CaptureAmbiguous {
            capture: format!("{set}/{}", capture.name),
        }),
        (None, None) => Err(ConfigError::CaptureSource {
            capture: format!("{set}/{}", capture.name),
        }),
        (Some(field), None) => {
            parse_path(field, format!("capture {set}/{}", capture.name))?;
            Ok(())
        }
        (None, Some(expression)) => {
            compile_expression(expression, format!("capture {set}/{}", capture.name))?;
            Ok(())
        }
    }
}

fn parse_path(path: &str, location: String) -> Result<PathQuery, ConfigError> {
    PathQuery::parse(path).map_err(|source| ConfigError::FieldPath { location, source })
}

// Expressions are strictly parsed at load: a compile failure here is a
// config bug, not a runtime condition.
fn compile_expression(expression: &str, location: String) -> Result<(), ConfigError> {
    cel::Program::compile(expression)
        .map(|_| ())
        .map_err(|err| ConfigError::Expression {
            location,
            message: err.to_string(),
        })
}

