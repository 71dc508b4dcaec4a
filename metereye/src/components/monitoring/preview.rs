use crate::config::model::{IndicatorConfig, MeterConfig, PerspectiveConfig};
use crate::registry::Registry;
use crate::utils::image::{decode_rgb, encode_gray_png, encode_png};
use crate::vision::geometry::normalize_quad;
use crate::vision::{indicator, sevenseg};
use serde::Serialize;
use thiserror::Error;

/// Why a preview could not run. Unlike registry lookups these are
/// expected conditions and map onto 4xx answers in the REST layer.
#[derive(Error, Debug)]
pub enum PreviewError {
    /// The camera has not processed any frame yet.
    #[error("no frame yet for camera {0}")]
    NoFrameYet(String),
    /// The stored snapshot could not be decoded or re-encoded.
    #[error("failed to process stored frame: {0}")]
    Frame(String),
}

/// The ad-hoc configuration under test. Points may arrive in any
/// order straight from the editor, normalisation happens here.
pub enum PreviewTarget {
    /// Try a meter configuration.
    Meter(MeterConfig),
    /// Try an indicator configuration.
    Indicator(IndicatorConfig),
}

/// The recognition outcome, shaped for the preview JSON answer.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PreviewResult {
    /// Outcome of a meter preview.
    Meter {
        /// Decoded value, absent on failure.
        value: Option<f64>,
        /// Decoded characters.
        raw_text: String,
        /// Mean segment clarity.
        confidence: f64,
    },
    /// Outcome of an indicator preview.
    Indicator {
        /// On/off decision.
        state: bool,
        /// Brightness or ratio score.
        score: f64,
    },
}

/// A preview answer: the recognition outcome plus the intermediate
/// images, PNG encoded so the editor can show exactly what the
/// classifier saw.
pub struct PreviewOutcome {
    /// Recognition or detection outcome.
    pub result: PreviewResult,
    /// The perspective corrected region.
    pub warped_png: Vec<u8>,
    /// The binarised image or color mask.
    pub thresholded_png: Vec<u8>,
}

/// Run an ad-hoc configuration against the latest raw frame of a
/// camera. Synchronous and side effect free: the only shared state
/// touched is the latest-frame read.
pub fn preview(
    registry: &Registry,
    camera_id: &str,
    target: PreviewTarget,
) -> Result<PreviewOutcome, PreviewError> {
    let record = registry
        .latest_frame(camera_id)
        .ok_or_else(|| PreviewError::NoFrameYet(camera_id.to_string()))?;
    let frame =
        decode_rgb(&record.raw_jpeg).map_err(|e| PreviewError::Frame(e.to_string()))?;

    match target {
        PreviewTarget::Meter(mut meter) => {
            normalize_points(&mut meter.perspective);
            let recognition = sevenseg::recognize(&frame, &meter);
            Ok(PreviewOutcome {
                result: PreviewResult::Meter {
                    value: recognition.value,
                    raw_text: recognition.raw_text,
                    confidence: recognition.confidence,
                },
                warped_png: encode_png(&recognition.debug.warped)
                    .map_err(|e| PreviewError::Frame(e.to_string()))?,
                thresholded_png: encode_gray_png(&recognition.debug.thresholded)
                    .map_err(|e| PreviewError::Frame(e.to_string()))?,
            })
        }
        PreviewTarget::Indicator(mut config) => {
            normalize_points(&mut config.perspective);
            let detection = indicator::detect(&frame, &config);
            Ok(PreviewOutcome {
                result: PreviewResult::Indicator {
                    state: detection.state,
                    score: detection.score,
                },
                warped_png: encode_png(&detection.debug.warped)
                    .map_err(|e| PreviewError::Frame(e.to_string()))?,
                thresholded_png: encode_gray_png(&detection.debug.thresholded)
                    .map_err(|e| PreviewError::Frame(e.to_string()))?,
            })
        }
    }
}

fn normalize_points(perspective: &mut PerspectiveConfig) {
    if perspective.points.len() == 4 {
        let quad = [
            perspective.points[0],
            perspective.points[1],
            perspective.points[2],
            perspective.points[3],
        ];
        perspective.points = normalize_quad(quad).to_vec();
    }
}
