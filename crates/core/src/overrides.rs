//! Parameter override engine.
//!
//! Rewrites workflow inputs before submission in two phases:
//!
//! 1. Every node with a literal `seed` / `noise_seed` input gets a
//!    fresh random 64-bit seed. This runs even with no overrides, so
//!    re-running a stored workflow never silently reuses the baked-in
//!    seed. When several nodes carry seeds, the recorded `seed` value
//!    is the last one written (known quirk, kept for compatibility
//!    with stored metadata).
//! 2. Caller-supplied overrides are applied. Simple-form entries are
//!    resolved by field-name aliases at the first matching node;
//!    structured entries name an exact node and dot path. Simple
//!    entries are applied before structured ones so an explicit
//!    node/path override always wins over a heuristic match.
//!
//! Every value actually written is reported back to the caller so it
//! can be attached to output metadata.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::graph::{is_connection, WorkflowGraph};

/// Input field names checked by the seed randomization pass.
const SEED_FIELDS: &[&str] = &["seed", "noise_seed"];

/// Field-name aliases for simple-form overrides. Unknown names match
/// a field of the same name.
fn alias_fields(param_name: &str) -> Vec<&str> {
    match param_name {
        "seed" => vec!["seed", "noise_seed"],
        "sampler" => vec!["sampler_name", "sampler"],
        "steps" => vec!["steps"],
        "cfg" => vec!["cfg"],
        "scheduler" => vec!["scheduler"],
        "denoise" => vec!["denoise"],
        "width" => vec!["width"],
        "height" => vec!["height"],
        "batch_size" => vec!["batch_size"],
        other => vec![other],
    }
}

/// An override targeting an explicit node and field path.
#[derive(Debug, Clone, Deserialize)]
pub struct StructuredOverride {
    pub node_id: String,
    pub path: String,
    pub value: Value,
}

/// Result of an override application.
#[derive(Debug, Default)]
pub struct AppliedOverrides {
    /// Logical parameter name to the value actually written,
    /// including generated seeds.
    pub values: Map<String, Value>,
    /// Simple-form entries that matched no node. Reported, never fatal.
    pub unmatched: Vec<String>,
}

/// Apply overrides to a workflow graph, using the thread-local RNG for
/// seed generation.
pub fn apply_overrides(
    graph: &mut WorkflowGraph,
    overrides: &Map<String, Value>,
) -> AppliedOverrides {
    let mut rng = rand::rng();
    apply_overrides_with(graph, overrides, &mut || rand::Rng::random::<u64>(&mut rng))
}

/// Apply overrides with an injectable seed generator (deterministic in
/// tests).
pub fn apply_overrides_with(
    graph: &mut WorkflowGraph,
    overrides: &Map<String, Value>,
    next_seed: &mut dyn FnMut() -> u64,
) -> AppliedOverrides {
    let mut applied = AppliedOverrides::default();

    randomize_seeds(graph, next_seed, &mut applied);

    // Simple entries first, structured second: an explicit node/path
    // wins when both target the same input.
    for (name, value) in overrides {
        if as_structured(value).is_none() {
            apply_simple(graph, name, value, next_seed, &mut applied);
        }
    }
    for (name, value) in overrides {
        if let Some(structured) = as_structured(value) {
            apply_structured(graph, name, &structured, next_seed, &mut applied);
        }
    }

    applied
}

/// Phase 1: replace every literal seed input with a fresh random value.
fn randomize_seeds(
    graph: &mut WorkflowGraph,
    next_seed: &mut dyn FnMut() -> u64,
    applied: &mut AppliedOverrides,
) {
    for (node_id, node) in graph.0.iter_mut() {
        let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) else {
            continue;
        };
        for field in SEED_FIELDS {
            let Some(existing) = inputs.get(*field) else {
                continue;
            };
            if is_connection(existing) {
                continue;
            }
            let seed = next_seed();
            inputs.insert(field.to_string(), json!(seed));
            // Logical key is always "seed"; last seed-bearing node wins.
            applied.values.insert("seed".to_string(), json!(seed));
            tracing::debug!(node_id = %node_id, field = *field, seed, "Randomized seed");
        }
    }
}

/// Recognize the structured override shape: an object carrying
/// `node_id`, `path`, and `value`.
fn as_structured(value: &Value) -> Option<StructuredOverride> {
    let obj = value.as_object()?;
    if obj.contains_key("node_id") && obj.contains_key("path") && obj.contains_key("value") {
        serde_json::from_value(value.clone()).ok()
    } else {
        None
    }
}

/// `-1` on a seed-named parameter means "generate a random seed"; the
/// literal must never be stored.
fn resolve_seed_sentinel(
    param_name: &str,
    value: &Value,
    next_seed: &mut dyn FnMut() -> u64,
) -> Value {
    if SEED_FIELDS.contains(&param_name) && value.as_i64() == Some(-1) {
        let seed = next_seed();
        tracing::debug!(param = param_name, seed, "Generated random seed for -1 sentinel");
        json!(seed)
    } else {
        value.clone()
    }
}

/// Phase 2a: simple-form override, resolved by scanning nodes for a
/// field matching one of the parameter's aliases. First match wins;
/// connection-references are never overwritten by this form.
fn apply_simple(
    graph: &mut WorkflowGraph,
    param_name: &str,
    value: &Value,
    next_seed: &mut dyn FnMut() -> u64,
    applied: &mut AppliedOverrides,
) {
    let fields = alias_fields(param_name);

    for (node_id, node) in graph.0.iter_mut() {
        let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) else {
            continue;
        };
        for field in &fields {
            let Some(existing) = inputs.get(*field) else {
                continue;
            };
            if is_connection(existing) {
                continue;
            }
            let resolved = resolve_seed_sentinel(param_name, value, next_seed);
            inputs.insert(field.to_string(), resolved.clone());
            applied.values.insert(param_name.to_string(), resolved);
            tracing::info!(
                param = param_name,
                node_id = %node_id,
                field = *field,
                "Applied override"
            );
            return;
        }
    }

    tracing::warn!(param = param_name, "No node found for override");
    applied.unmatched.push(param_name.to_string());
}

/// Phase 2b: structured override, applied at an explicit node and
/// dot-separated path. Intermediate objects are created as needed;
/// this form may overwrite anything, including connections, since the
/// caller named the exact target.
fn apply_structured(
    graph: &mut WorkflowGraph,
    param_name: &str,
    spec: &StructuredOverride,
    next_seed: &mut dyn FnMut() -> u64,
    applied: &mut AppliedOverrides,
) {
    let Some(node) = graph.0.get_mut(&spec.node_id) else {
        tracing::warn!(
            param = param_name,
            node_id = %spec.node_id,
            "Node not found for override"
        );
        applied.unmatched.push(param_name.to_string());
        return;
    };

    let mut parts = spec.path.split('.').collect::<Vec<_>>();
    let Some(leaf) = parts.pop() else {
        return;
    };
    if leaf.is_empty() {
        tracing::warn!(param = param_name, path = %spec.path, "Empty override path");
        applied.unmatched.push(param_name.to_string());
        return;
    }

    let mut current = node;
    for part in parts {
        let Some(obj) = current.as_object_mut() else {
            tracing::warn!(
                param = param_name,
                path = %spec.path,
                "Override path traverses a non-object value"
            );
            applied.unmatched.push(param_name.to_string());
            return;
        };
        current = obj
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let Some(obj) = current.as_object_mut() else {
        tracing::warn!(
            param = param_name,
            path = %spec.path,
            "Override path traverses a non-object value"
        );
        applied.unmatched.push(param_name.to_string());
        return;
    };

    let resolved = resolve_seed_sentinel(param_name, &spec.value, next_seed);
    obj.insert(leaf.to_string(), resolved.clone());
    applied.values.insert(param_name.to_string(), resolved);
    tracing::info!(
        param = param_name,
        node_id = %spec.node_id,
        path = %spec.path,
        "Applied structured override"
    );
}
