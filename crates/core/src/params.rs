//! Configurable-parameter discovery for workflow graphs.
//!
//! A fixed table of known node types maps input fields to
//! user-configurable parameter definitions (label, kind, bounds,
//! dropdown options). Discovery walks the graph and materializes a
//! [`ConfigurableParameter`] for every definition whose input exists
//! on the node as a literal scalar. These definitions describe the
//! workflow; they are never stored on the graph itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::graph::WorkflowGraph;

/// Kind of a configurable parameter, driving the client-side editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Number,
    Dropdown,
    Text,
}

/// A parameter a user may override on a stored workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurableParameter {
    /// Node the parameter lives on.
    pub node_id: String,
    /// Dot-separated field path under the node (e.g. `inputs.seed`).
    pub path: String,
    pub param_type: ParamKind,
    /// Current value from the workflow; `-1` for seeds (meaning
    /// "generate a random seed").
    pub default: Value,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Static definition of one input field on a known node type.
struct ParamDef {
    name: &'static str,
    field: &'static str,
    kind: ParamKind,
    label: &'static str,
    min: Option<f64>,
    max: Option<f64>,
    options: Option<&'static [&'static str]>,
}

const SAMPLERS: &[&str] = &[
    "euler",
    "euler_ancestral",
    "heun",
    "dpm_2",
    "dpm_2_ancestral",
    "lms",
    "dpm_fast",
    "dpm_adaptive",
    "dpmpp_2s_ancestral",
    "dpmpp_sde",
    "dpmpp_2m",
    "ddim",
    "uni_pc",
];

const SCHEDULERS: &[&str] = &["normal", "karras", "exponential", "simple", "ddim_uniform"];

const SEED_MAX: f64 = 9_999_999_999_999_999.0;

const fn number(
    name: &'static str,
    field: &'static str,
    label: &'static str,
    min: f64,
    max: f64,
) -> ParamDef {
    ParamDef {
        name,
        field,
        kind: ParamKind::Number,
        label,
        min: Some(min),
        max: Some(max),
        options: None,
    }
}

const fn dropdown(
    name: &'static str,
    field: &'static str,
    label: &'static str,
    options: &'static [&'static str],
) -> ParamDef {
    ParamDef {
        name,
        field,
        kind: ParamKind::Dropdown,
        label,
        min: None,
        max: None,
        options: Some(options),
    }
}

const KSAMPLER_PARAMS: &[ParamDef] = &[
    number("seed", "seed", "Seed", -1.0, SEED_MAX),
    number("steps", "steps", "Steps", 1.0, 150.0),
    number("cfg", "cfg", "CFG Scale", 0.0, 30.0),
    dropdown("sampler_name", "sampler_name", "Sampler", SAMPLERS),
    dropdown("scheduler", "scheduler", "Scheduler", SCHEDULERS),
    number("denoise", "denoise", "Denoise", 0.0, 1.0),
];

const KSAMPLER_ADVANCED_PARAMS: &[ParamDef] = &[
    number("seed", "seed", "Seed", -1.0, SEED_MAX),
    number("steps", "steps", "Steps", 1.0, 150.0),
    number("cfg", "cfg", "CFG Scale", 0.0, 30.0),
    dropdown("sampler_name", "sampler_name", "Sampler", SAMPLERS),
    dropdown("scheduler", "scheduler", "Scheduler", SCHEDULERS),
    number("noise_seed", "noise_seed", "Noise Seed", -1.0, SEED_MAX),
];

const LATENT_IMAGE_PARAMS: &[ParamDef] = &[
    number("width", "width", "Width", 256.0, 2048.0),
    number("height", "height", "Height", 256.0, 2048.0),
    number("batch_size", "batch_size", "Batch Size", 1.0, 10.0),
];

/// Parameter definitions for a node class type, or `None` for node
/// types with nothing user-configurable.
fn definitions_for(class_type: &str) -> Option<&'static [ParamDef]> {
    match class_type {
        "KSampler" => Some(KSAMPLER_PARAMS),
        "KSamplerAdvanced" => Some(KSAMPLER_ADVANCED_PARAMS),
        "EmptyLatentImage" | "EmptySD3LatentImage" => Some(LATENT_IMAGE_PARAMS),
        _ => None,
    }
}

/// Discover configurable parameters from a workflow graph.
///
/// Connection-reference inputs are skipped (their value comes from
/// another node). Seed-typed parameters report a default of `-1`,
/// the "random seed" sentinel, instead of the stored value. When the
/// same logical name appears on several nodes, later occurrences are
/// keyed `"{name}_{node_id}"` with `:` replaced by `_`.
pub fn detect_configurable_params(
    graph: &WorkflowGraph,
) -> BTreeMap<String, ConfigurableParameter> {
    let mut params = BTreeMap::new();

    for node_id in graph.node_ids() {
        let Some(class_type) = graph.class_type(node_id) else {
            continue;
        };
        let Some(defs) = definitions_for(class_type) else {
            continue;
        };

        for def in defs {
            let Some(value) = graph.scalar_input(node_id, def.field) else {
                continue;
            };

            let default = if matches!(def.name, "seed" | "noise_seed") {
                json!(-1)
            } else {
                value.clone()
            };

            let param = ConfigurableParameter {
                node_id: node_id.to_string(),
                path: format!("inputs.{}", def.field),
                param_type: def.kind,
                default,
                label: def.label.to_string(),
                min_value: def.min,
                max_value: def.max,
                options: def
                    .options
                    .map(|opts| opts.iter().map(|s| s.to_string()).collect()),
            };

            let key = if params.contains_key(def.name) {
                format!("{}_{}", def.name, node_id.replace(':', "_"))
            } else {
                def.name.to_string()
            };
            params.insert(key, param);
        }
    }

    params
}
