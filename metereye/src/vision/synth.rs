use crate::config::model::PerspectiveConfig;
use image::{Rgb, RgbImage};

/// Bright segment color for light on dark renders.
pub const LIGHT: Rgb<u8> = Rgb([235, 235, 235]);
/// Dark segment color, also the light on dark background.
pub const DARK: Rgb<u8> = Rgb([12, 12, 12]);

/// Segment layout used by the renderer, deliberately written out
/// independently of the classifier table so the two sides cannot
/// share an encoding mistake. Order: top, top-left, top-right,
/// middle, bottom-left, bottom-right, bottom.
fn segments_for(digit: char) -> [bool; 7] {
    match digit {
        '0' => [true, true, true, false, true, true, true],
        '1' => [false, false, true, false, false, true, false],
        '2' => [true, false, true, true, true, false, true],
        '3' => [true, false, true, true, false, true, true],
        '4' => [false, true, true, true, false, true, false],
        '5' => [true, true, false, true, false, true, true],
        '6' => [true, true, false, true, true, true, true],
        '7' => [true, false, true, false, false, true, false],
        '8' => [true, true, true, true, true, true, true],
        '9' => [true, true, true, true, false, true, true],
        other => panic!("no segment layout for {other:?}"),
    }
}

/// A perspective that selects the whole frame one to one, so the
/// rendered display and the warped image coincide.
pub fn full_frame_perspective(width: u32, height: u32) -> PerspectiveConfig {
    PerspectiveConfig {
        points: vec![
            [0, 0],
            [(width - 1) as i64, 0],
            [(width - 1) as i64, (height - 1) as i64],
            [0, (height - 1) as i64],
        ],
        output_size: [width, height],
    }
}

/// Render a seven segment readout (digits and decimal points) into a
/// fresh frame. Digits are spaced so each one is its own connected
/// component; decimal points are small squares near the baseline.
pub fn render_display(
    text: &str,
    width: u32,
    height: u32,
    foreground: Rgb<u8>,
    background: Rgb<u8>,
) -> RgbImage {
    let mut frame = RgbImage::from_pixel(width, height, background);
    let margin = 4.0;
    let inner_w = width as f64 - 2.0 * margin;
    let inner_h = height as f64 - 2.0 * margin;

    let digit_count = text.chars().filter(|c| *c != '.').count() as f64;
    let dot_count = text.chars().filter(|c| *c == '.').count() as f64;
    if digit_count == 0.0 {
        return frame;
    }
    let slot = inner_w / (digit_count + dot_count / 3.0);

    let mut x = margin;
    for ch in text.chars() {
        if ch == '.' {
            let side = (0.15 * inner_h).max(3.0);
            fill_rect(
                &mut frame,
                x + 2.0,
                margin + inner_h - side,
                x + 2.0 + side,
                margin + inner_h,
                foreground,
            );
            x += slot / 3.0;
        } else {
            draw_digit(&mut frame, ch, x, margin, slot * 0.72, inner_h, foreground);
            x += slot;
        }
    }
    frame
}

/// Draw one digit cell. Horizontal bars span the full cell width,
/// vertical bars the relevant half of the cell height; adjoining bars
/// overlap by construction so each digit is a single component.
fn draw_digit(
    frame: &mut RgbImage,
    digit: char,
    x: f64,
    y: f64,
    cell_w: f64,
    cell_h: f64,
    color: Rgb<u8>,
) {
    let on = segments_for(digit);
    let bar_h = 0.14 * cell_h;
    let bar_w = 0.18 * cell_w;
    // top, middle, bottom
    if on[0] {
        fill_rect(frame, x, y, x + cell_w, y + bar_h, color);
    }
    if on[3] {
        fill_rect(frame, x, y + 0.43 * cell_h, x + cell_w, y + 0.57 * cell_h, color);
    }
    if on[6] {
        fill_rect(frame, x, y + cell_h - bar_h, x + cell_w, y + cell_h, color);
    }
    // top-left, top-right
    if on[1] {
        fill_rect(frame, x, y, x + bar_w, y + 0.5 * cell_h, color);
    }
    if on[2] {
        fill_rect(frame, x + cell_w - bar_w, y, x + cell_w, y + 0.5 * cell_h, color);
    }
    // bottom-left, bottom-right
    if on[4] {
        fill_rect(frame, x, y + 0.5 * cell_h, x + bar_w, y + cell_h, color);
    }
    if on[5] {
        fill_rect(
            frame,
            x + cell_w - bar_w,
            y + 0.5 * cell_h,
            x + cell_w,
            y + cell_h,
            color,
        );
    }
}

/// Fill an axis aligned rectangle, clamped to the frame.
pub fn fill_rect(frame: &mut RgbImage, x0: f64, y0: f64, x1: f64, y1: f64, color: Rgb<u8>) {
    let x0 = x0.max(0.0) as u32;
    let y0 = y0.max(0.0) as u32;
    let x1 = (x1.min(frame.width() as f64)) as u32;
    let y1 = (y1.min(frame.height() as f64)) as u32;
    for y in y0..y1 {
        for x in x0..x1 {
            frame.put_pixel(x, y, color);
        }
    }
}

/// A uniformly colored frame, handy for indicator tests.
pub fn solid_frame(width: u32, height: u32, color: Rgb<u8>) -> RgbImage {
    RgbImage::from_pixel(width, height, color)
}
