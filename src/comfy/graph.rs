//! Workflow graph templates and parameter injection
//!
//! The three job graphs are opaque JSON blobs edited by non-developers.
//! Injection never addresses nodes by id: it walks the graph by
//! `class_type` label and writes known input fields on matching nodes. A
//! class that is absent from a template simply means no injection is
//! needed, which keeps the core compatible with upstream template edits.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Shorter-edge ceiling applied before digital-human rendering; larger
/// frames risk GPU memory exhaustion on the render backend.
pub const MIN_EDGE_CAP: u32 = 480;

/// Strongest color-match mode supported by the render backend
const COLORMATCH_STRONGEST: &str = "hm-mkl-hm";

/// One node of a job graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub class_type: String,
    #[serde(default)]
    pub inputs: serde_json::Map<String, Value>,
    /// Fields the core does not understand (e.g. `_meta`) pass through
    /// untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A job graph keyed by node id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    nodes: BTreeMap<String, GraphNode>,
}

impl WorkflowGraph {
    /// Load a template from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let graph: Self = serde_json::from_str(&raw)?;
        debug!(
            "loaded workflow {} ({} nodes)",
            path.display(),
            graph.nodes.len()
        );
        Ok(graph)
    }

    /// Borrow the node map for submission.
    #[must_use]
    pub fn nodes(&self) -> &BTreeMap<String, GraphNode> {
        &self.nodes
    }

    /// Set `field` on every node whose class matches, returning how many
    /// nodes were touched.
    fn set_on_class(
        &mut self,
        class_matches: impl Fn(&str) -> bool,
        field: &str,
        value: Value,
    ) -> usize {
        let mut touched = 0;
        for (id, node) in &mut self.nodes {
            if class_matches(&node.class_type) {
                node.inputs.insert(field.to_string(), value.clone());
                debug!("set {field} on node {id} ({})", node.class_type);
                touched += 1;
            }
        }
        touched
    }

    /// Like [`set_on_class`], but only writes when the field already exists
    /// in the template. Used for tuning fields the template may not expose.
    fn update_on_class(
        &mut self,
        class_matches: impl Fn(&str) -> bool,
        field: &str,
        value: Value,
    ) -> usize {
        let mut touched = 0;
        for (id, node) in &mut self.nodes {
            if class_matches(&node.class_type) && node.inputs.contains_key(field) {
                node.inputs.insert(field.to_string(), value.clone());
                debug!("updated {field} on node {id} ({})", node.class_type);
                touched += 1;
            }
        }
        touched
    }

    /// Point every `LoadImage` node at an uploaded image.
    pub fn inject_image(&mut self, uploaded_name: &str) {
        self.set_on_class(|c| c == "LoadImage", "image", Value::from(uploaded_name));
    }

    /// Point every `LoadAudio` node at an uploaded audio file.
    pub fn inject_audio(&mut self, uploaded_name: &str) {
        self.set_on_class(|c| c == "LoadAudio", "audio", Value::from(uploaded_name));
    }

    /// Write the positive/negative prompt pair onto `TextEncode*` nodes.
    ///
    /// Templates mark the pair by their current content: the node whose
    /// prompt is non-empty is the positive one, the empty one is negative.
    pub fn inject_prompts(&mut self, positive: &str, negative: &str) {
        for (id, node) in &mut self.nodes {
            if !node.class_type.starts_with("TextEncode") {
                continue;
            }
            let current = node
                .inputs
                .get("prompt")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let is_empty = current.is_empty();
            let replacement = if is_empty { negative } else { positive };
            node.inputs
                .insert("prompt".to_string(), Value::from(replacement));
            debug!(
                "set {} prompt on node {id}",
                if is_empty { "negative" } else { "positive" }
            );
        }
    }

    /// Write the utterance text onto `MultiLinePrompt*` nodes.
    pub fn inject_text(&mut self, text: &str) {
        self.set_on_class(
            |c| c.starts_with("MultiLinePrompt"),
            "multi_line_prompt",
            Value::from(text),
        );
    }

    /// Digital-human tuning: fps on the wav2vec embed node and frame rate
    /// on the video combiner (only where the template exposes the field).
    pub fn inject_fps(&mut self, fps: u32) {
        self.update_on_class(
            |c| c == "MultiTalkWav2VecEmbeds",
            "fps",
            Value::from(fps),
        );
        self.update_on_class(
            |c| c == "VHS_VideoCombine",
            "frame_rate",
            Value::from(fps),
        );
    }

    /// Scale target for the aspect-ratio scaler, already min-edge capped.
    pub fn inject_scale_length(&mut self, length: u32) {
        self.set_on_class(
            |c| c.starts_with("LayerUtility") && c.contains("ImageScaleByAspectRatio"),
            "scale_to_length",
            Value::from(length),
        );
    }

    /// Force the strongest color match and minmax normalization on the
    /// render/decode nodes.
    pub fn inject_render_tuning(&mut self) {
        self.update_on_class(
            |c| c == "WanVideoImageToVideoMultiTalk",
            "colormatch",
            Value::from(COLORMATCH_STRONGEST),
        );
        self.update_on_class(
            |c| c == "WanVideoDecode",
            "normalization",
            Value::from("minmax"),
        );
    }
}

/// Length forwarded to the scaler node for a target resolution.
///
/// If the shorter edge exceeds [`MIN_EDGE_CAP`], both edges are scaled by
/// `cap / min_edge` and the longer scaled edge is returned; otherwise the
/// longer original edge passes through unchanged.
#[must_use]
pub fn capped_scale_length(width: u32, height: u32) -> u32 {
    let min_edge = width.min(height);
    if min_edge > MIN_EDGE_CAP {
        let scale = f64::from(MIN_EDGE_CAP) / f64::from(min_edge);
        let scaled_w = (f64::from(width) * scale).round() as u32;
        let scaled_h = (f64::from(height) * scale).round() as u32;
        scaled_w.max(scaled_h)
    } else {
        width.max(height)
    }
}
