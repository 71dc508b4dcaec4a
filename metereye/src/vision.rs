//! Pure image analysis for the monitoring pipeline. Nothing in here
//! touches shared state or blocks; given identical input bytes and
//! configuration the output is identical bit for bit, which is what
//! makes the preview endpoint and the worker agree with each other.

use image::{GrayImage, RgbImage};
use strum_macros::Display;

/// Perspective correction, channel extraction and thresholding.
pub mod geometry;
/// Seven segment digit segmentation and classification.
pub mod sevenseg;
/// On/off indicator lamp detection.
pub mod indicator;
/// Synthetic seven segment frames for the test suite, so the vision
/// and worker tests run without any camera hardware.
#[cfg(test)]
pub mod synth;

/// Intermediate images returned for the preview endpoint, so an
/// operator aligning a perspective can see exactly what the
/// classifier saw.
#[derive(Debug, Clone)]
pub struct DebugArtifacts {
    /// The perspective corrected region.
    pub warped: RgbImage,
    /// The binarised image the classifier ran on. For color mode
    /// indicators this is the matching pixel mask.
    pub thresholded: GrayImage,
}

impl DebugArtifacts {
    /// Blank artifacts of the configured output size, used when the
    /// warp itself failed.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            warped: RgbImage::new(width, height),
            thresholded: GrayImage::new(width, height),
        }
    }
}

/// Why a recognition or detection produced no usable value. Carried as
/// data rather than unwound as an error so a single bad meter can
/// never take down the frame loop, and so the worker can rate limit
/// its logging per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum VisionFailure {
    /// The four points do not describe a usable quadrilateral.
    DegenerateQuad,
    /// No component survived the digit filters.
    NoDigits,
    /// The digit count did not match `expected_digits`.
    DigitCountMismatch,
    /// A segment pattern matched no known digit.
    UnknownPattern,
    /// More than one decimal point was found.
    MultipleDecimalPoints,
    /// The assembled text did not parse as a number.
    Unparseable,
}
