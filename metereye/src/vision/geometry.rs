use crate::config::model::{ColorChannel, DisplayMode, PerspectiveConfig};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contrast::otsu_level;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

/// Reorder four points into top-left, top-right, bottom-right,
/// bottom-left. The rule is a plain sort by y then x: the two
/// uppermost points form the top edge ordered by x, the remaining two
/// the bottom edge. Operators click corners in any order; everything
/// downstream assumes this one.
pub fn normalize_quad(mut points: [[i64; 2]; 4]) -> [[i64; 2]; 4] {
    points.sort_by_key(|p| (p[1], p[0]));
    let (top, bottom) = (&points[..2], &points[2..]);
    let (tl, tr) = if top[0][0] <= top[1][0] {
        (top[0], top[1])
    } else {
        (top[1], top[0])
    };
    let (bl, br) = if bottom[0][0] <= bottom[1][0] {
        (bottom[0], bottom[1])
    } else {
        (bottom[1], bottom[0])
    };
    [tl, tr, br, bl]
}

/// Warp the configured quadrilateral of `frame` onto an axis aligned
/// rectangle of the configured output size. Returns `None` when the
/// four points are collinear or otherwise do not pin down a
/// homography.
pub fn warp_quad(frame: &RgbImage, perspective: &PerspectiveConfig) -> Option<RgbImage> {
    let (width, height) = (perspective.width(), perspective.height());
    let src: Vec<(f32, f32)> = perspective
        .points
        .iter()
        .map(|p| (p[0] as f32, p[1] as f32))
        .collect();
    if src.len() != 4 {
        return None;
    }
    let dst = [
        (0.0, 0.0),
        ((width - 1) as f32, 0.0),
        ((width - 1) as f32, (height - 1) as f32),
        (0.0, (height - 1) as f32),
    ];
    let projection =
        Projection::from_control_points([src[0], src[1], src[2], src[3]], dst)?;
    let mut out = RgbImage::new(width, height);
    warp_into(
        frame,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut out,
    );
    Some(out)
}

/// Extract the configured channel of a warped region. `Gray` uses the
/// 0.299/0.587/0.114 luminance weights.
pub fn extract_channel(warped: &RgbImage, channel: ColorChannel) -> GrayImage {
    let mut out = GrayImage::new(warped.width(), warped.height());
    for (x, y, pixel) in warped.enumerate_pixels() {
        let Rgb([r, g, b]) = *pixel;
        let value = match channel {
            ColorChannel::Red => r,
            ColorChannel::Green => g,
            ColorChannel::Blue => b,
            ColorChannel::Gray => luminance(r, g, b),
        };
        out.put_pixel(x, y, Luma([value]));
    }
    out
}

/// Rec.601 luminance of one pixel.
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64).round() as u8
}

/// Pick the binarisation threshold: the configured value, or Otsu's
/// automatic threshold over the channel image when configured as 0.
pub fn pick_threshold(channel: &GrayImage, configured: u8) -> u8 {
    if configured == 0 {
        otsu_level(channel)
    } else {
        configured
    }
}

/// Binarise a channel image. A pixel is lit (255) when its value is at
/// least the threshold in `LightOnDark` mode, and when it is below the
/// threshold in `DarkOnLight` mode.
pub fn binarize(channel: &GrayImage, mode: DisplayMode, threshold: u8) -> GrayImage {
    let mut out = GrayImage::new(channel.width(), channel.height());
    for (x, y, pixel) in channel.enumerate_pixels() {
        let lit = match mode {
            DisplayMode::LightOnDark => pixel[0] >= threshold,
            DisplayMode::DarkOnLight => pixel[0] < threshold,
        };
        out.put_pixel(x, y, Luma([if lit { 255 } else { 0 }]));
    }
    out
}

/// Mean gray level of an image, 0 for an empty image.
pub fn mean_gray(gray: &GrayImage) -> f64 {
    let total: u64 = gray.pixels().map(|p| p[0] as u64).sum();
    let count = (gray.width() * gray.height()) as u64;
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use rstest::rstest;

    #[rstest]
    // Already normalised.
    #[case([[0, 0], [10, 0], [10, 10], [0, 10]])]
    // Clockwise from bottom-left.
    #[case([[0, 10], [0, 0], [10, 0], [10, 10]])]
    // Arbitrary shuffle.
    #[case([[10, 10], [0, 0], [0, 10], [10, 0]])]
    fn test_normalize_quad_orders_corners(#[case] points: [[i64; 2]; 4]) {
        assert_eq!(
            normalize_quad(points),
            [[0, 0], [10, 0], [10, 10], [0, 10]],
            "corners must come back as TL, TR, BR, BL"
        );
    }

    #[test]
    fn test_normalize_quad_tilted() {
        // A slightly rotated rectangle: distinct y values everywhere.
        let quad = [[130, 160], [120, 80], [10, 170], [20, 90]];
        assert_eq!(
            normalize_quad(quad),
            [[20, 90], [120, 80], [130, 160], [10, 170]]
        );
    }

    #[test]
    /// Warping an axis aligned rectangle is a crop: every interior
    /// pixel must come back exactly.
    fn test_warp_axis_aligned_is_crop() {
        let mut frame = RgbImage::new(64, 64);
        for (x, y, pixel) in frame.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 4) as u8, (y * 4) as u8, 7]);
        }
        let perspective = PerspectiveConfig {
            points: vec![[8, 8], [39, 8], [39, 39], [8, 39]],
            output_size: [32, 32],
        };
        let warped = warp_quad(&frame, &perspective).expect("Failed to warp");
        assert_eq!(warped.dimensions(), (32, 32));
        assert_eq!(warped.get_pixel(0, 0), frame.get_pixel(8, 8));
        assert_eq!(warped.get_pixel(31, 31), frame.get_pixel(39, 39));
        assert_eq!(warped.get_pixel(16, 16), frame.get_pixel(24, 24));
    }

    #[test]
    fn test_warp_degenerate_quad_is_none() {
        let frame = RgbImage::new(64, 64);
        let perspective = PerspectiveConfig {
            // All four points on one line.
            points: vec![[0, 0], [10, 0], [20, 0], [30, 0]],
            output_size: [32, 32],
        };
        assert!(warp_quad(&frame, &perspective).is_none());
    }

    #[rstest]
    #[case(ColorChannel::Red, 200)]
    #[case(ColorChannel::Green, 120)]
    #[case(ColorChannel::Blue, 40)]
    fn test_extract_single_channel(#[case] channel: ColorChannel, #[case] expected: u8) {
        let mut image = RgbImage::new(4, 4);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([200, 120, 40]);
        }
        let gray = extract_channel(&image, channel);
        assert!(gray.pixels().all(|p| p[0] == expected));
    }

    #[test]
    fn test_luminance_weights() {
        assert_eq!(luminance(255, 255, 255), 255);
        assert_eq!(luminance(0, 0, 0), 0);
        // 0.299 * 255 rounds to 76.
        assert_eq!(luminance(255, 0, 0), 76);
        assert_eq!(luminance(0, 255, 0), 150);
        assert_eq!(luminance(0, 0, 255), 29);
    }

    #[test]
    fn test_binarize_polarity() {
        let mut gray = GrayImage::new(2, 1);
        gray.put_pixel(0, 0, Luma([10]));
        gray.put_pixel(1, 0, Luma([200]));

        let lit = binarize(&gray, DisplayMode::LightOnDark, 128);
        assert_eq!(lit.get_pixel(0, 0)[0], 0);
        assert_eq!(lit.get_pixel(1, 0)[0], 255);

        let dark = binarize(&gray, DisplayMode::DarkOnLight, 128);
        assert_eq!(dark.get_pixel(0, 0)[0], 255);
        assert_eq!(dark.get_pixel(1, 0)[0], 0);
    }

    #[test]
    /// Otsu on a clean bimodal image must separate the two levels.
    fn test_pick_threshold_otsu_bimodal() {
        let mut gray = GrayImage::new(10, 10);
        for (x, _, pixel) in gray.enumerate_pixels_mut() {
            *pixel = Luma([if x < 5 { 20 } else { 220 }]);
        }
        let threshold = pick_threshold(&gray, 0);
        assert!(
            threshold > 20 && threshold <= 220,
            "otsu threshold {threshold} must fall between the modes"
        );
        // A configured threshold is passed through untouched.
        assert_eq!(pick_threshold(&gray, 97), 97);
    }

    #[test]
    fn test_mean_gray() {
        let mut gray = GrayImage::new(2, 1);
        gray.put_pixel(0, 0, Luma([100]));
        gray.put_pixel(1, 0, Luma([200]));
        assert_eq!(mean_gray(&gray), 150.0);
    }
}
