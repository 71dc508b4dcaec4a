use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, GrayImage, ImageEncoder, ImageError, Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

/// JPEG quality used for the snapshot and MJPEG frames.
pub const SNAPSHOT_QUALITY: u8 = 80;

/// Outline color for meter regions on the annotated frame.
pub const METER_OUTLINE: Rgb<u8> = Rgb([0, 220, 60]);
/// Outline color for indicator regions on the annotated frame.
pub const INDICATOR_OUTLINE: Rgb<u8> = Rgb([240, 180, 0]);

/// Encode a frame as JPEG at the given quality.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    encoder.encode(frame.as_raw(), frame.width(), frame.height(), ColorType::Rgb8)?;
    Ok(bytes)
}

/// Encode a color image as PNG, used for preview debug artifacts.
pub fn encode_png(frame: &RgbImage) -> Result<Vec<u8>, ImageError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        ColorType::Rgb8,
    )?;
    Ok(bytes)
}

/// Encode a gray image as PNG.
pub fn encode_gray_png(frame: &GrayImage) -> Result<Vec<u8>, ImageError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        ColorType::L8,
    )?;
    Ok(bytes)
}

/// Decode stored JPEG bytes back into an RGB frame, used by the
/// preview service.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Draw the outline of a perspective quadrilateral onto a frame.
/// Points are expected in TL, TR, BR, BL order, as stored after
/// loader normalisation.
pub fn draw_quad_outline(frame: &mut RgbImage, points: &[[i64; 2]], color: Rgb<u8>) {
    if points.len() != 4 {
        return;
    }
    for index in 0..4 {
        let from = points[index];
        let to = points[(index + 1) % 4];
        draw_line_segment_mut(
            frame,
            (from[0] as f32, from[1] as f32),
            (to[0] as f32, to[1] as f32),
            color,
        );
    }
}
