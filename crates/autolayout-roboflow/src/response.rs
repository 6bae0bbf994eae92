//! Workflow response parsing.
//!
//! A workflow run answers with `{"outputs": [{ "<block>": {"predictions": [...]}}]}`.
//! The segmentation block is normally called `sam_1`; if it is not,
//! the first block carrying `predictions` is used.

use autolayout_pipeline::{Dimensions, Point, PolygonMask, RawMask, SegmentedMask};
use serde::Deserialize;
use serde_json::Value;

use crate::RoboflowError;

/// Block name used by the default SAM workflow.
pub const DEFAULT_BLOCK: &str = "sam_1";

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    points: Vec<WirePoint>,
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct WirePoint {
    x: f64,
    y: f64,
}

/// Split a comma-separated prompt into trimmed, non-empty parts.
#[must_use]
pub fn split_prompts(prompt: &str) -> Vec<String> {
    prompt
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Turn a workflow response into polygon masks framed at `frame`.
///
/// Masks keep the service's prediction order, so mask `i` is prediction
/// `i`. A prediction without points, or with confidence below
/// `min_confidence`, stays in place as an outline with no points: it
/// rasterizes to nothing and never becomes a region.
///
/// # Errors
///
/// Returns [`RoboflowError::Workflow`] if the body carries an `error`,
/// [`RoboflowError::MissingOutputs`] if `outputs[0]` is absent, and
/// [`RoboflowError::Json`] if predictions are not shaped as expected.
pub fn parse_masks(
    body: &Value,
    frame: Dimensions,
    min_confidence: f32,
) -> Result<Vec<SegmentedMask>, RoboflowError> {
    if let Some(error) = body.get("error").filter(|e| is_set(e)) {
        return Err(RoboflowError::Workflow(error.to_string()));
    }

    let output = body
        .get("outputs")
        .and_then(|o| o.get(0))
        .filter(|o| is_set(o))
        .ok_or(RoboflowError::MissingOutputs)?;

    let Some(predictions) = find_predictions(output) else {
        tracing::debug!("no predictions block in workflow output");
        return Ok(Vec::new());
    };
    let predictions: Vec<Prediction> = serde_json::from_value(predictions.clone())?;
    let total = predictions.len();

    let mut skipped = 0;
    let masks: Vec<SegmentedMask> = predictions
        .into_iter()
        .map(|p| {
            let usable = !p.points.is_empty() && p.confidence.is_none_or(|c| c >= min_confidence);
            let points = if usable {
                p.points.iter().map(|w| Point::new(w.x, w.y)).collect()
            } else {
                skipped += 1;
                Vec::new()
            };
            SegmentedMask {
                mask: RawMask::Polygon(PolygonMask { points, frame }),
                label: p.class,
                confidence: p.confidence,
            }
        })
        .collect();

    if skipped > 0 {
        tracing::debug!(skipped, total, "blanked empty or low-confidence predictions");
    }
    Ok(masks)
}

fn find_predictions(output: &Value) -> Option<&Value> {
    let preferred = output
        .get(DEFAULT_BLOCK)
        .and_then(|b| b.get("predictions"))
        .filter(|p| is_set(p));
    preferred.or_else(|| {
        output
            .as_object()?
            .values()
            .find_map(|block| block.get("predictions").filter(|p| is_set(p)))
    })
}

/// Truthiness as the service means it: present, not null, not `false`,
/// not an empty string.
fn is_set(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false)) && v.as_str() != Some("")
}
