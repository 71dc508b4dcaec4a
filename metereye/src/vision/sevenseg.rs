use crate::config::model::MeterConfig;
use crate::vision::geometry::{binarize, extract_channel, pick_threshold, warp_quad};
use crate::vision::{DebugArtifacts, VisionFailure};
use image::{GrayImage, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::HashMap;

/// Result of one recognition attempt. Always a value, never an error:
/// a failed attempt carries its failure kind, an empty value and zero
/// confidence, and is emitted like any other reading.
#[derive(Debug, Clone)]
pub struct Recognition {
    /// Decoded numeric value, absent on failure.
    pub value: Option<f64>,
    /// Decoded characters before decimal normalisation, possibly
    /// partial on failure. Unknown segment patterns appear as `?`.
    pub raw_text: String,
    /// Mean segment clarity over the decoded digits, zero on failure.
    pub confidence: f64,
    /// Why the value is absent, when it is.
    pub failure: Option<VisionFailure>,
    /// Intermediate images for the preview endpoint.
    pub debug: DebugArtifacts,
}

/// The seven segments in classification order: top, top-left,
/// top-right, middle, bottom-left, bottom-right, bottom. Each region
/// is a fixed fraction `(x0, x1, y0, y1)` of the digit bounding box; a
/// segment is on when more than half of its region is lit.
const SEGMENT_REGIONS: [(f64, f64, f64, f64); 7] = [
    (0.30, 0.70, 0.00, 0.12), // top
    (0.00, 0.15, 0.15, 0.42), // top-left
    (0.85, 1.00, 0.15, 0.42), // top-right
    (0.30, 0.70, 0.44, 0.56), // middle
    (0.00, 0.15, 0.58, 0.85), // bottom-left
    (0.85, 1.00, 0.58, 0.85), // bottom-right
    (0.30, 0.70, 0.88, 1.00), // bottom
];

/// Segment bitmasks for the ten digits, bit i set when segment i of
/// `SEGMENT_REGIONS` is lit.
const DIGIT_PATTERNS: [(u8, char); 10] = [
    (0b111_0111, '0'),
    (0b010_0100, '1'),
    (0b101_1101, '2'),
    (0b110_1101, '3'),
    (0b010_1110, '4'),
    (0b110_1011, '5'),
    (0b111_1011, '6'),
    (0b010_0101, '7'),
    (0b111_1111, '8'),
    (0b110_1111, '9'),
];

/// Components narrower than this fraction of their height carry too
/// little width for the segment grid and can only be a bare `1`.
const SLIM_DIGIT_ASPECT: f64 = 0.35;

/// Minimum component height as a fraction of the warped height for a
/// digit candidate.
const MIN_DIGIT_HEIGHT: f64 = 0.4;

/// Minimum component area as a fraction of the warped area for a
/// digit candidate.
const MIN_DIGIT_AREA: f64 = 0.02;

/// Maximum component height as a fraction of the warped height for a
/// decimal point candidate.
const MAX_DOT_HEIGHT: f64 = 0.3;

/// One connected component of lit pixels.
#[derive(Debug, Clone, Copy)]
struct Component {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    area: u64,
    sum_x: u64,
}

impl Component {
    fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    fn centroid_x(&self) -> f64 {
        self.sum_x as f64 / self.area as f64
    }
}

/// Decode one meter region of a raw frame. Deterministic: identical
/// frame bytes and configuration produce identical output.
pub fn recognize(frame: &RgbImage, meter: &MeterConfig) -> Recognition {
    let (width, height) = (meter.perspective.width(), meter.perspective.height());
    let Some(warped) = warp_quad(frame, &meter.perspective) else {
        return failed(
            String::new(),
            VisionFailure::DegenerateQuad,
            DebugArtifacts::blank(width, height),
        );
    };
    let channel = extract_channel(&warped, meter.recognition.color_channel);
    let threshold = pick_threshold(&channel, meter.recognition.threshold);
    let binary = binarize(&channel, meter.recognition.display_mode, threshold);
    let debug = DebugArtifacts {
        warped,
        thresholded: binary.clone(),
    };

    let components = lit_components(&binary);
    let mut digits: Vec<&Component> = components
        .iter()
        .filter(|c| {
            c.height() as f64 >= MIN_DIGIT_HEIGHT * height as f64
                && c.area as f64 >= MIN_DIGIT_AREA * (width as f64 * height as f64)
        })
        .collect();
    digits.sort_by(|a, b| a.centroid_x().total_cmp(&b.centroid_x()));

    if digits.is_empty() {
        return failed(String::new(), VisionFailure::NoDigits, debug);
    }

    // Decimal point candidates: small isolated components to the
    // right of at least one digit. Anything between the dot and digit
    // height bands is treated as noise.
    let leftmost_digit_x = digits[0].centroid_x();
    let dots: Vec<&Component> = components
        .iter()
        .filter(|c| {
            (c.height() as f64) < MAX_DOT_HEIGHT * height as f64
                && c.centroid_x() > leftmost_digit_x
        })
        .collect();

    // Classify every digit so the partial text is available even when
    // the count check below fails.
    let mut glyphs: Vec<(f64, char, f64)> = Vec::new();
    let mut unknown = false;
    for digit in &digits {
        match classify(&binary, digit) {
            Some((ch, clarity)) => glyphs.push((digit.centroid_x(), ch, clarity)),
            None => {
                unknown = true;
                glyphs.push((digit.centroid_x(), '?', 0.0));
            }
        }
    }
    for dot in &dots {
        glyphs.push((dot.centroid_x(), '.', 1.0));
    }
    glyphs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let raw_text: String = glyphs.iter().map(|g| g.1).collect();

    if meter.expected_digits > 0 && digits.len() as u32 != meter.expected_digits {
        return failed(raw_text, VisionFailure::DigitCountMismatch, debug);
    }
    if unknown {
        return failed(raw_text, VisionFailure::UnknownPattern, debug);
    }
    if raw_text.matches('.').count() > 1 {
        return failed(raw_text, VisionFailure::MultipleDecimalPoints, debug);
    }

    let normalised = apply_decimal_places(&raw_text, meter.decimal_places);
    let Ok(value) = normalised.parse::<f64>() else {
        return failed(raw_text, VisionFailure::Unparseable, debug);
    };

    let clarity_sum: f64 = glyphs.iter().filter(|g| g.1 != '.').map(|g| g.2).sum();
    let confidence = clarity_sum / digits.len() as f64;

    Recognition {
        value: Some(value),
        raw_text,
        confidence,
        failure: None,
        debug,
    }
}

/// Insert the implied decimal point: `"123"` with two decimal places
/// becomes `"1.23"`, text shorter than the place count is zero padded
/// (`"3"` becomes `"0.03"`). Text that already carries a decimal point
/// is left alone.
fn apply_decimal_places(text: &str, decimal_places: u32) -> String {
    let places = decimal_places as usize;
    if places == 0 || text.contains('.') {
        return text.to_string();
    }
    if text.len() > places {
        let split = text.len() - places;
        format!("{}.{}", &text[..split], &text[split..])
    } else {
        format!("0.{:0>width$}", text, width = places)
    }
}

fn failed(raw_text: String, failure: VisionFailure, debug: DebugArtifacts) -> Recognition {
    Recognition {
        value: None,
        raw_text,
        confidence: 0.0,
        failure: Some(failure),
        debug,
    }
}

/// Gather the connected components of lit pixels, 4-connectivity.
fn lit_components(binary: &GrayImage) -> Vec<Component> {
    let labels = connected_components(binary, Connectivity::Four, image::Luma([0u8]));
    let mut by_label: HashMap<u32, Component> = HashMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        if label[0] == 0 {
            continue;
        }
        let entry = by_label.entry(label[0]).or_insert(Component {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            area: 0,
            sum_x: 0,
        });
        entry.min_x = entry.min_x.min(x);
        entry.min_y = entry.min_y.min(y);
        entry.max_x = entry.max_x.max(x);
        entry.max_y = entry.max_y.max(y);
        entry.area += 1;
        entry.sum_x += x as u64;
    }
    let mut components: Vec<Component> = by_label.into_values().collect();
    // Deterministic order regardless of hash iteration.
    components.sort_by(|a, b| (a.min_x, a.min_y).cmp(&(b.min_x, b.min_y)));
    components
}

/// Classify one digit bounding box. Returns the digit and its clarity,
/// or `None` when the segment pattern matches no digit.
fn classify(binary: &GrayImage, component: &Component) -> Option<(char, f64)> {
    let width = component.width() as f64;
    let height = component.height() as f64;

    let ratios = segment_ratios(binary, component);

    if width < SLIM_DIGIT_ASPECT * height {
        // Too narrow for the full segment grid; only the two right
        // hand segments can light a box like this, which reads as 1.
        // Clarity keeps the usual formula, restricted to those two
        // segments.
        let right = [ratios[2], ratios[5]];
        let ambiguity: f64 =
            right.iter().map(|r| 2.0 * r.min(1.0 - *r)).sum::<f64>() / right.len() as f64;
        return Some(('1', 1.0 - ambiguity));
    }

    let mut mask = 0u8;
    for (index, ratio) in ratios.iter().enumerate() {
        if *ratio > 0.5 {
            mask |= 1 << index;
        }
    }
    let digit = DIGIT_PATTERNS
        .iter()
        .find(|(pattern, _)| *pattern == mask)
        .map(|(_, ch)| *ch)?;
    let ambiguity: f64 =
        ratios.iter().map(|r| 2.0 * r.min(1.0 - *r)).sum::<f64>() / ratios.len() as f64;
    Some((digit, 1.0 - ambiguity))
}

/// Lit pixel fraction of each of the seven segment regions.
fn segment_ratios(binary: &GrayImage, component: &Component) -> [f64; 7] {
    let mut ratios = [0.0; 7];
    let width = component.width() as f64;
    let height = component.height() as f64;
    for (index, (x0, x1, y0, y1)) in SEGMENT_REGIONS.iter().enumerate() {
        let px0 = component.min_x + (x0 * width).floor() as u32;
        let px1 = component.min_x + ((x1 * width).ceil() as u32).min(component.width());
        let py0 = component.min_y + (y0 * height).floor() as u32;
        let py1 = component.min_y + ((y1 * height).ceil() as u32).min(component.height());
        let mut lit = 0u64;
        let mut total = 0u64;
        for y in py0..py1 {
            for x in px0..px1 {
                total += 1;
                if binary.get_pixel(x, y)[0] != 0 {
                    lit += 1;
                }
            }
        }
        ratios[index] = if total == 0 { 0.0 } else { lit as f64 / total as f64 };
    }
    ratios
}
