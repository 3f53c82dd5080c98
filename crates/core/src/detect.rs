//! Heuristic prompt / image input node detection.
//!
//! Workflows imported from ComfyUI carry no marker for "this is the
//! prompt the user should edit", so we rank candidate nodes by an
//! additive score over their title metadata plus a small bonus for
//! lower numeric node IDs (nodes created earlier). The weights are
//! deliberately kept behind this module so they can be retuned without
//! touching any graph-mutation code.

use crate::graph::WorkflowGraph;

/// CLIP text encode node class type.
const CLIP_TEXT_ENCODE_CLASS: &str = "CLIPTextEncode";

/// Load image node class type.
const LOAD_IMAGE_CLASS: &str = "LoadImage";

/// Detect prompt input nodes, most likely first.
///
/// Candidates are `CLIPTextEncode` nodes whose `text` input is a
/// literal scalar (a connected `text` input is driven by another node
/// and cannot be overridden). Returns an empty list when the workflow
/// has no candidates; the caller decides how to fall back.
///
/// The sort is stable: candidates with equal scores keep their
/// encounter order within the graph.
pub fn detect_prompt_nodes(graph: &WorkflowGraph) -> Vec<String> {
    let mut candidates: Vec<(f64, String)> = Vec::new();

    for node_id in graph.node_ids() {
        if graph.class_type(node_id) != Some(CLIP_TEXT_ENCODE_CLASS) {
            continue;
        }
        if graph.scalar_input(node_id, "text").is_none() {
            continue;
        }
        let score = prompt_priority(node_id, graph.title(node_id));
        candidates.push((score, node_id.to_string()));
    }

    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
    candidates.into_iter().map(|(_, id)| id).collect()
}

/// Detect image input nodes, most likely first.
///
/// Candidates are `LoadImage` nodes whose `image` input is a literal
/// scalar. Same stable ordering contract as [`detect_prompt_nodes`].
pub fn detect_image_nodes(graph: &WorkflowGraph) -> Vec<String> {
    let mut candidates: Vec<(f64, String)> = Vec::new();

    for node_id in graph.node_ids() {
        if graph.class_type(node_id) != Some(LOAD_IMAGE_CLASS) {
            continue;
        }
        if graph.scalar_input(node_id, "image").is_none() {
            continue;
        }
        let score = image_priority(node_id, graph.title(node_id));
        candidates.push((score, node_id.to_string()));
    }

    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
    candidates.into_iter().map(|(_, id)| id).collect()
}

/// Priority score for a prompt candidate. Higher = more likely to be
/// the main (positive) prompt.
fn prompt_priority(node_id: &str, title: Option<&str>) -> f64 {
    let mut score = 0.0;

    if let Some(title) = title {
        let title = title.to_lowercase();

        if title.contains("prompt") {
            score += 10.0;
        }
        if title.contains("positive") {
            score += 8.0;
        }
        if title.contains("text") && title.contains("encode") {
            score += 5.0;
        }
        // Chinese: main / positive
        if title.contains('主') || title.contains("正面") {
            score += 8.0;
        }

        if title.contains("negative") {
            score -= 10.0;
        }
        // Chinese: negative
        if title.contains("负面") {
            score -= 10.0;
        }
        if title.contains("condition") && title.contains("zero") {
            score -= 5.0;
        }
    }

    score + node_id_bonus(node_id)
}

/// Priority score for an image input candidate. Higher = more likely
/// to be the main input image (as opposed to controlnet/reference
/// inputs).
fn image_priority(node_id: &str, title: Option<&str>) -> f64 {
    let mut score = 0.0;

    if let Some(title) = title {
        let title = title.to_lowercase();

        if title.contains("input") {
            score += 10.0;
        }
        if title.contains("load") && title.contains("image") {
            score += 8.0;
        }
        if title.contains("main") || title.contains("primary") {
            score += 8.0;
        }
        // Chinese: input / load
        if title.contains("输入") || title.contains("加载") {
            score += 8.0;
        }

        if title.contains("control") || title.contains("reference") {
            score -= 5.0;
        }
        // Chinese: reference / control
        if title.contains("参考") || title.contains("控制") {
            score -= 5.0;
        }
    }

    // Namespaced IDs like "70:44" score on the trailing segment.
    let numeric_part = node_id.rsplit(':').next().unwrap_or(node_id);
    score + node_id_bonus(numeric_part)
}

/// Small monotonically-decreasing bonus for lower numeric node IDs.
/// Nodes created earlier are usually the main prompt/input. Non-numeric
/// IDs get no bonus.
fn node_id_bonus(node_id: &str) -> f64 {
    match node_id.parse::<i64>() {
        Ok(n) => (5.0 - n as f64 * 0.1).max(0.0),
        Err(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(value: serde_json::Value) -> WorkflowGraph {
        WorkflowGraph::parse(&value).unwrap()
    }

    #[test]
    fn detects_positive_over_negative_prompt() {
        let g = graph(json!({
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "a cat" },
                "_meta": { "title": "Positive Prompt" }
            },
            "7": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "blurry" },
                "_meta": { "title": "Negative Prompt" }
            }
        }));
        let nodes = detect_prompt_nodes(&g);
        assert_eq!(nodes, vec!["6", "7"]);
    }

    #[test]
    fn skips_connected_text_inputs() {
        let g = graph(json!({
            "2": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": ["9", 0] }
            },
            "3": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "hello" }
            }
        }));
        assert_eq!(detect_prompt_nodes(&g), vec!["3"]);
    }

    #[test]
    fn skips_non_prompt_node_types() {
        let g = graph(json!({
            "1": { "class_type": "KSampler", "inputs": { "seed": 1 } }
        }));
        assert!(detect_prompt_nodes(&g).is_empty());
    }

    #[test]
    fn lower_node_id_wins_without_titles() {
        let g = graph(json!({
            "12": { "class_type": "CLIPTextEncode", "inputs": { "text": "b" } },
            "4": { "class_type": "CLIPTextEncode", "inputs": { "text": "a" } }
        }));
        assert_eq!(detect_prompt_nodes(&g), vec!["4", "12"]);
    }

    #[test]
    fn equal_scores_keep_encounter_order() {
        // Non-numeric IDs get no ID bonus, so both score 0.0. The
        // stable sort must keep the encounter order.
        let g = graph(json!({
            "a": { "class_type": "CLIPTextEncode", "inputs": { "text": "x" } },
            "b": { "class_type": "CLIPTextEncode", "inputs": { "text": "y" } }
        }));
        let first: Vec<&str> = g.node_ids().collect();
        let detected = detect_prompt_nodes(&g);
        assert_eq!(detected, first);
    }

    #[test]
    fn chinese_titles_score_as_positive() {
        let g = graph(json!({
            "50": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "x" },
                "_meta": { "title": "正面提示" }
            },
            "51": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "y" },
                "_meta": { "title": "负面提示" }
            }
        }));
        assert_eq!(detect_prompt_nodes(&g), vec!["50", "51"]);
    }

    #[test]
    fn detects_main_image_over_controlnet() {
        let g = graph(json!({
            "10": {
                "class_type": "LoadImage",
                "inputs": { "image": "in.png" },
                "_meta": { "title": "Input Image" }
            },
            "11": {
                "class_type": "LoadImage",
                "inputs": { "image": "pose.png" },
                "_meta": { "title": "ControlNet Reference" }
            }
        }));
        assert_eq!(detect_image_nodes(&g), vec!["10", "11"]);
    }

    #[test]
    fn namespaced_image_node_id_uses_trailing_segment() {
        // "70:3" scores on 3, beating plain node 40.
        let g = graph(json!({
            "40": { "class_type": "LoadImage", "inputs": { "image": "a.png" } },
            "70:3": { "class_type": "LoadImage", "inputs": { "image": "b.png" } }
        }));
        assert_eq!(detect_image_nodes(&g), vec!["70:3", "40"]);
    }

    #[test]
    fn no_image_candidates_returns_empty() {
        let g = graph(json!({
            "1": { "class_type": "CLIPTextEncode", "inputs": { "text": "x" } }
        }));
        assert!(detect_image_nodes(&g).is_empty());
    }
}
