use crate::config::model::{ColorChannel, DetectionMode, DisplayMode, IndicatorConfig};
use crate::vision::geometry::{binarize, extract_channel, mean_gray, pick_threshold, warp_quad};
use crate::vision::{DebugArtifacts, VisionFailure};
use image::{GrayImage, Luma, Rgb, RgbImage};

/// Hue window around the canonical lamp color, degrees either side.
const HUE_WINDOW_DEGREES: f64 = 15.0;
/// Minimum saturation for a pixel to count as colored at all.
const MIN_SATURATION: f64 = 0.4;
/// Minimum value so a near black pixel never counts.
const MIN_VALUE: f64 = 0.3;

/// Result of one detection attempt. Like recognition, always a value;
/// the only possible failure is a degenerate perspective.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Whether the lamp is considered on.
    pub state: bool,
    /// Mean gray (brightness mode, 0..255) or matching pixel ratio
    /// (color mode, 0..1).
    pub score: f64,
    /// Why the detection is unusable, when it is.
    pub failure: Option<VisionFailure>,
    /// Intermediate images for the preview endpoint.
    pub debug: DebugArtifacts,
}

/// Decide on/off for one indicator region of a raw frame. No
/// debouncing happens here; callers wanting flicker suppression apply
/// their own policy on the reading stream.
pub fn detect(frame: &RgbImage, indicator: &IndicatorConfig) -> Detection {
    let (width, height) = (
        indicator.perspective.width(),
        indicator.perspective.height(),
    );
    let Some(warped) = warp_quad(frame, &indicator.perspective) else {
        return Detection {
            state: false,
            score: 0.0,
            failure: Some(VisionFailure::DegenerateQuad),
            debug: DebugArtifacts::blank(width, height),
        };
    };
    match indicator.detection.mode {
        DetectionMode::Brightness => detect_brightness(warped, indicator),
        DetectionMode::Color => detect_color(warped, indicator),
    }
}

fn detect_brightness(warped: RgbImage, indicator: &IndicatorConfig) -> Detection {
    let gray = extract_channel(&warped, ColorChannel::Gray);
    let threshold = pick_threshold(&gray, indicator.detection.threshold);
    let mean = mean_gray(&gray);
    let thresholded = binarize(&gray, DisplayMode::LightOnDark, threshold);
    Detection {
        state: mean >= threshold as f64,
        score: mean,
        failure: None,
        debug: DebugArtifacts { warped, thresholded },
    }
}

fn detect_color(warped: RgbImage, indicator: &IndicatorConfig) -> Detection {
    let target_hue = indicator.detection.on_color.hue_degrees();
    let mut mask = GrayImage::new(warped.width(), warped.height());
    let mut matching = 0u64;
    for (x, y, pixel) in warped.enumerate_pixels() {
        let (hue, saturation, value) = rgb_to_hsv(*pixel);
        let matches = hue_distance(hue, target_hue) <= HUE_WINDOW_DEGREES
            && saturation >= MIN_SATURATION
            && value >= MIN_VALUE;
        if matches {
            matching += 1;
            mask.put_pixel(x, y, Luma([255]));
        }
    }
    let total = (warped.width() * warped.height()) as u64;
    let ratio = if total == 0 {
        0.0
    } else {
        matching as f64 / total as f64
    };
    Detection {
        state: ratio >= indicator.detection.ratio_threshold,
        score: ratio,
        failure: None,
        debug: DebugArtifacts {
            warped,
            thresholded: mask,
        },
    }
}

/// Standard RGB to HSV: hue in degrees [0, 360), saturation and value
/// in [0, 1].
fn rgb_to_hsv(pixel: Rgb<u8>) -> (f64, f64, f64) {
    let r = pixel[0] as f64 / 255.0;
    let g = pixel[1] as f64 / 255.0;
    let b = pixel[2] as f64 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    (hue, saturation, max)
}

/// Angular distance between two hues, wrapping at 360.
fn hue_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % 360.0;
    d.min(360.0 - d)
}
