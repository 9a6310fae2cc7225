use std::io::Cursor;
use std::panic::{catch_unwind, AssertUnwindSafe};

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::geometry::min_area_rect;
use imageproc::point::Point;
use imageproc::region_labelling::{connected_components, Connectivity};

/// Skew below this magnitude (degrees) is treated as zero. Rotating
/// near-aligned images only adds interpolation noise.
const MIN_SKEW_DEGREES: f32 = 1.0;

/// Gaussian sigma applied before binarization.
const BLUR_SIGMA: f32 = 1.4;

/// Half-extent of the wide/short kernel that merges glyphs into line blobs.
const MERGE_HALF_WIDTH: u32 = 10;
const MERGE_HALF_HEIGHT: u32 = 1;

/// Filter strength for the patchwise denoiser. Fixed, not per-call.
const DENOISE_STRENGTH: f32 = 10.0;
const DENOISE_PATCH_RADIUS: i32 = 1;
const DENOISE_SEARCH_RADIUS: i32 = 3;

/// Tile-local contrast equalization parameters.
const CLAHE_CLIP_LIMIT: f32 = 2.0;
const CLAHE_GRID: u32 = 8;

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Larger image dimension is capped to this many pixels. Never upscales.
    pub max_dimension: u32,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self { max_dimension: 1800 }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("failed to encode normalized image: {0}")]
    Encode(image::ImageError),
}

/// Full normalization pipeline: bounded resize, deskew, denoise, local
/// contrast enhancement. Returns PNG bytes of the grayscale result.
///
/// The pixel stages are advisory: each is wrapped in `catch_unwind` and a
/// failing stage falls back to the previous intermediate, because extraction
/// can still succeed on a partially processed image. Only a decode failure
/// is reported to the caller, and the orchestrator treats even that as
/// non-fatal (it keeps the original bytes).
pub fn normalize_image(bytes: &[u8], options: &NormalizeOptions) -> Result<Vec<u8>, NormalizeError> {
    let decoded = image::load_from_memory(bytes)?;
    let resized = bounded_resize(decoded, options.max_dimension);
    let gray = resized.to_luma8();

    let gray = try_stage("deskew", gray, |g| deskew(g).0);
    let gray = try_stage("denoise", gray, denoise);
    let gray = try_stage("contrast", gray, |g| clahe(g, CLAHE_CLIP_LIMIT, CLAHE_GRID));

    encode_png(&gray)
}

/// Run one pixel stage, keeping the previous image if the stage panics.
fn try_stage(
    stage: &'static str,
    current: GrayImage,
    f: impl FnOnce(&GrayImage) -> GrayImage,
) -> GrayImage {
    match catch_unwind(AssertUnwindSafe(|| f(&current))) {
        Ok(next) => next,
        Err(_) => {
            tracing::warn!(stage, "normalization stage failed, keeping previous image");
            current
        }
    }
}

/// Downscale isotropically so the larger dimension equals `max_dimension`.
/// Images already within the bound are returned untouched.
pub fn bounded_resize(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (w, h) = (image.width(), image.height());
    let largest = w.max(h);
    if largest <= max_dimension {
        return image;
    }
    let scale = max_dimension as f32 / largest as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);
    // Catmull-Rom avoids the ringing Lanczos introduces around glyph edges.
    image.resize_exact(new_w, new_h, FilterType::CatmullRom)
}

/// Estimate and correct document skew. Returns the corrected image and the
/// angle that was applied, or the unmodified image and `None` when skew is
/// below [`MIN_SKEW_DEGREES`] or no foreground was found.
pub fn deskew(gray: &GrayImage) -> (GrayImage, Option<f32>) {
    match estimate_skew(gray) {
        Some(angle) => {
            tracing::debug!(angle, "correcting document skew");
            (correct_skew(gray, angle), Some(angle))
        }
        None => (gray.clone(), None),
    }
}

/// Estimate the rotational misalignment of text within the frame.
///
/// Blur, binarize with an inverted Otsu threshold (text as foreground),
/// dilate with a wide/short kernel so characters merge into line-like blobs,
/// then take the minimum-area rectangle of the largest connected region.
/// The rectangle's long-edge angle, folded into (-45, 45], is the skew.
pub fn estimate_skew(gray: &GrayImage) -> Option<f32> {
    let blurred = gaussian_blur_f32(gray, BLUR_SIGMA);
    let level = otsu_level(&blurred);
    let binary = threshold(&blurred, level, ThresholdType::BinaryInverted);
    let merged = dilate_rect(&binary, MERGE_HALF_WIDTH, MERGE_HALF_HEIGHT);

    let points = largest_component_points(&merged)?;
    let corners = min_area_rect(&points);
    let angle = rect_angle(&corners);

    if angle.abs() < MIN_SKEW_DEGREES {
        None
    } else {
        Some(angle)
    }
}

/// Rotate the image about its center by the negative of the estimated angle,
/// preserving canvas dimensions. Bicubic interpolation; the fill value is
/// the mean margin intensity, which stands in for edge replication on card
/// photos with a uniform background.
pub fn correct_skew(gray: &GrayImage, angle_degrees: f32) -> GrayImage {
    let fill = Luma([margin_mean(gray)]);
    rotate_about_center(
        gray,
        (-angle_degrees).to_radians(),
        Interpolation::Bicubic,
        fill,
    )
}

/// Separable binary dilation with a rectangular kernel.
fn dilate_rect(binary: &GrayImage, half_width: u32, half_height: u32) -> GrayImage {
    let (w, h) = binary.dimensions();
    let mut horizontal = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let x0 = x.saturating_sub(half_width);
            let x1 = (x + half_width).min(w.saturating_sub(1));
            let mut v = 0u8;
            for xx in x0..=x1 {
                if binary.get_pixel(xx, y)[0] > 0 {
                    v = 255;
                    break;
                }
            }
            horizontal.put_pixel(x, y, Luma([v]));
        }
    }
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let y0 = y.saturating_sub(half_height);
        let y1 = (y + half_height).min(h.saturating_sub(1));
        for x in 0..w {
            let mut v = 0u8;
            for yy in y0..=y1 {
                if horizontal.get_pixel(x, yy)[0] > 0 {
                    v = 255;
                    break;
                }
            }
            out.put_pixel(x, y, Luma([v]));
        }
    }
    out
}

/// Pixel coordinates of the largest foreground component, or `None` if the
/// binary image has no foreground at all.
fn largest_component_points(binary: &GrayImage) -> Option<Vec<Point<i32>>> {
    let labels = connected_components(binary, Connectivity::Eight, Luma([0u8]));
    let max_label = labels.pixels().map(|p| p[0]).max()?;
    if max_label == 0 {
        return None;
    }

    let mut counts = vec![0u32; (max_label + 1) as usize];
    for p in labels.pixels() {
        counts[p[0] as usize] += 1;
    }
    counts[0] = 0;
    let best = counts
        .iter()
        .enumerate()
        .max_by_key(|(_, c)| **c)
        .map(|(label, _)| label as u32)?;
    if counts[best as usize] == 0 {
        return None;
    }

    let mut points = Vec::with_capacity(counts[best as usize] as usize);
    for (x, y, p) in labels.enumerate_pixels() {
        if p[0] == best {
            points.push(Point::new(x as i32, y as i32));
        }
    }
    Some(points)
}

/// Angle of the rectangle's longest edge, folded into (-45, 45] degrees.
fn rect_angle(corners: &[Point<i32>; 4]) -> f32 {
    let mut best_dx = 0.0f32;
    let mut best_dy = 0.0f32;
    let mut best_len = -1.0f32;
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        let dx = (b.x - a.x) as f32;
        let dy = (b.y - a.y) as f32;
        let len = dx * dx + dy * dy;
        if len > best_len {
            best_len = len;
            best_dx = dx;
            best_dy = dy;
        }
    }
    if best_len <= 0.0 {
        return 0.0;
    }
    let mut angle = best_dy.atan2(best_dx).to_degrees();
    while angle <= -45.0 {
        angle += 90.0;
    }
    while angle > 45.0 {
        angle -= 90.0;
    }
    angle
}

/// Mean intensity of the one-pixel image border.
fn margin_mean(gray: &GrayImage) -> u8 {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return 255;
    }
    let mut sum = 0u64;
    let mut count = 0u64;
    for x in 0..w {
        sum += gray.get_pixel(x, 0)[0] as u64;
        sum += gray.get_pixel(x, h - 1)[0] as u64;
        count += 2;
    }
    for y in 0..h {
        sum += gray.get_pixel(0, y)[0] as u64;
        sum += gray.get_pixel(w - 1, y)[0] as u64;
        count += 2;
    }
    (sum / count) as u8
}

/// Patchwise non-local-means-style denoising with fixed strength.
///
/// For each pixel, candidates inside the search window are weighted by the
/// similarity of their surrounding patches, so uniform regions are smoothed
/// while glyph edges (dissimilar patches) are left sharp.
pub fn denoise(gray: &GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    let (wi, hi) = (w as i32, h as i32);
    if wi == 0 || hi == 0 {
        return gray.clone();
    }
    let mut out = GrayImage::new(w, h);
    let h2 = DENOISE_STRENGTH * DENOISE_STRENGTH;
    let patch_area = {
        let side = 2 * DENOISE_PATCH_RADIUS + 1;
        (side * side) as f32
    };

    let get = |x: i32, y: i32| -> f32 {
        let x = x.clamp(0, wi - 1);
        let y = y.clamp(0, hi - 1);
        gray.get_pixel(x as u32, y as u32)[0] as f32
    };

    for y in 0..hi {
        for x in 0..wi {
            let mut weight_sum = 0.0f32;
            let mut value_sum = 0.0f32;
            for sy in -DENOISE_SEARCH_RADIUS..=DENOISE_SEARCH_RADIUS {
                for sx in -DENOISE_SEARCH_RADIUS..=DENOISE_SEARCH_RADIUS {
                    let mut dist = 0.0f32;
                    for py in -DENOISE_PATCH_RADIUS..=DENOISE_PATCH_RADIUS {
                        for px in -DENOISE_PATCH_RADIUS..=DENOISE_PATCH_RADIUS {
                            let d = get(x + px, y + py) - get(x + sx + px, y + sy + py);
                            dist += d * d;
                        }
                    }
                    let weight = (-(dist / patch_area) / h2).exp();
                    weight_sum += weight;
                    value_sum += weight * get(x + sx, y + sy);
                }
            }
            let value = (value_sum / weight_sum).round().clamp(0.0, 255.0) as u8;
            out.put_pixel(x as u32, y as u32, Luma([value]));
        }
    }
    out
}

/// Tile-based adaptive histogram equalization with clipping.
///
/// Per-tile histograms are clipped at `clip_limit` times the uniform bin
/// height, the excess redistributed, and the resulting per-tile lookup
/// tables blended bilinearly so tile seams do not show.
pub fn clahe(gray: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }
    let tiles_x = grid.clamp(1, w);
    let tiles_y = grid.clamp(1, h);
    let tile_w = w.div_ceil(tiles_x);
    let tile_h = h.div_ceil(tiles_y);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let x1 = ((tx + 1) * tile_w).min(w);
            let y0 = ty * tile_h;
            let y1 = ((ty + 1) * tile_h).min(h);

            let mut hist = [0u32; 256];
            let mut count = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                    count += 1;
                }
            }
            if count == 0 {
                continue;
            }

            let limit = ((clip_limit * count as f32 / 256.0).ceil() as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let bonus = excess / 256;
            let remainder = excess % 256;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += bonus + u32::from((i as u32) < remainder);
            }

            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut cdf = 0u32;
            for (i, bin) in hist.iter().enumerate() {
                cdf += *bin;
                lut[i] = ((cdf as f32 * 255.0 / count as f32).round()).clamp(0.0, 255.0) as u8;
            }
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let (ty0, ty1, ay) = blend_coords(fy, tiles_y);
        for x in 0..w {
            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let (tx0, tx1, ax) = blend_coords(fx, tiles_x);
            let v = gray.get_pixel(x, y)[0] as usize;

            let p00 = luts[ty0 * tiles_x as usize + tx0][v] as f32;
            let p10 = luts[ty0 * tiles_x as usize + tx1][v] as f32;
            let p01 = luts[ty1 * tiles_x as usize + tx0][v] as f32;
            let p11 = luts[ty1 * tiles_x as usize + tx1][v] as f32;

            let top = p00 + (p10 - p00) * ax;
            let bottom = p01 + (p11 - p01) * ax;
            let value = (top + (bottom - top) * ay).round().clamp(0.0, 255.0) as u8;
            out.put_pixel(x, y, Luma([value]));
        }
    }
    out
}

/// Neighbor tile indices and blend fraction for one axis, clamping at the
/// image edges where only a single tile is available.
fn blend_coords(f: f32, tiles: u32) -> (usize, usize, f32) {
    if f <= 0.0 || tiles == 1 {
        return (0, 0, 0.0);
    }
    let max = (tiles - 1) as f32;
    if f >= max {
        let last = (tiles - 1) as usize;
        return (last, last, 0.0);
    }
    let base = f.floor();
    (base as usize, base as usize + 1, f - base)
}

fn encode_png(gray: &GrayImage) -> Result<Vec<u8>, NormalizeError> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(gray.clone())
        .write_to(&mut cursor, image::ImageFormat::Png)
        .map_err(NormalizeError::Encode)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    /// White canvas with one dark text-line-like bar rotated by `angle`
    /// degrees (positive = sloping down to the right in raster coords).
    fn bar_image(angle_degrees: f32) -> GrayImage {
        let (w, h) = (400u32, 300u32);
        let mut img = GrayImage::from_pixel(w, h, Luma([255]));
        let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
        let rad = angle_degrees.to_radians();
        let (cos, sin) = (rad.cos(), rad.sin());
        for t in -150..150 {
            for s in -6..6 {
                let x = cx + t as f32 * cos - s as f32 * sin;
                let y = cy + t as f32 * sin + s as f32 * cos;
                if x >= 0.0 && y >= 0.0 && (x as u32) < w && (y as u32) < h {
                    img.put_pixel(x as u32, y as u32, Luma([0]));
                }
            }
        }
        img
    }

    #[test]
    fn resize_is_noop_within_bound() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(800, 600, image::Rgb([120, 90, 30])));
        let out = bounded_resize(img, 1800);
        assert_eq!((out.width(), out.height()), (800, 600));
        assert_eq!(out.to_rgb8().get_pixel(0, 0).0, [120, 90, 30]);
    }

    #[test]
    fn resize_caps_larger_dimension_exactly() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(3600, 2400));
        let out = bounded_resize(img, 1800);
        assert_eq!((out.width(), out.height()), (1800, 1200));
    }

    #[test]
    fn resize_preserves_aspect_ratio_within_rounding() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(2000, 1333));
        let out = bounded_resize(img, 1800);
        assert_eq!(out.width(), 1800);
        let expected = 1333.0 * 1800.0 / 2000.0;
        assert!((out.height() as f32 - expected).abs() <= 1.0);
    }

    #[test]
    fn resize_never_upscales() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(200, 100));
        let out = bounded_resize(img, 1800);
        assert_eq!((out.width(), out.height()), (200, 100));
    }

    #[test]
    fn skew_estimated_for_rotated_bar() {
        let img = bar_image(5.0);
        let angle = estimate_skew(&img).expect("skew should be detected");
        assert!((angle - 5.0).abs() <= 1.5, "estimated {angle}, expected ~5.0");
    }

    #[test]
    fn negative_skew_estimated() {
        let img = bar_image(-7.0);
        let angle = estimate_skew(&img).expect("skew should be detected");
        assert!((angle + 7.0).abs() <= 1.5, "estimated {angle}, expected ~-7.0");
    }

    #[test]
    fn sub_degree_skew_treated_as_zero() {
        let img = bar_image(0.5);
        assert_eq!(estimate_skew(&img), None);
    }

    #[test]
    fn deskew_without_skew_is_identity() {
        let img = bar_image(0.5);
        let (out, applied) = deskew(&img);
        assert!(applied.is_none());
        assert_eq!(out.as_raw(), img.as_raw());
    }

    #[test]
    fn blank_image_has_no_estimate() {
        let img = GrayImage::from_pixel(200, 200, Luma([255]));
        assert_eq!(estimate_skew(&img), None);
    }

    #[test]
    fn deskew_reduces_residual_skew() {
        let img = bar_image(8.0);
        let (corrected, applied) = deskew(&img);
        let applied = applied.expect("skew should be detected");
        assert!((applied - 8.0).abs() <= 1.5);
        // After correction the residual must be negligible or far smaller.
        match estimate_skew(&corrected) {
            None => {}
            Some(residual) => {
                assert!(residual.abs() <= 3.0, "residual {residual} too large");
                assert!(residual.abs() < applied.abs());
            }
        }
    }

    #[test]
    fn denoise_preserves_uniform_image() {
        let img = GrayImage::from_pixel(32, 32, Luma([128]));
        let out = denoise(&img);
        assert_eq!((out.width(), out.height()), (32, 32));
        assert!(out.pixels().all(|p| p[0] == 128));
    }

    /// Vertical gradient confined to [100, 140).
    fn low_contrast_gradient() -> GrayImage {
        let mut img = GrayImage::new(64, 64);
        for y in 0..64 {
            for x in 0..64 {
                img.put_pixel(x, y, Luma([100 + (y * 40 / 64) as u8]));
            }
        }
        img
    }

    #[test]
    fn equalization_widens_low_contrast_range() {
        let img = low_contrast_gradient();
        // Clip limit large enough that no bin is clipped: pure per-tile
        // equalization, which must stretch the narrow input range.
        let out = clahe(&img, 64.0, 4);
        assert_eq!((out.width(), out.height()), (64, 64));
        let (in_min, in_max) = min_max(&img);
        let (out_min, out_max) = min_max(&out);
        assert!(
            out_max - out_min > in_max - in_min,
            "contrast not widened: in [{in_min},{in_max}] out [{out_min},{out_max}]"
        );
    }

    #[test]
    fn clipping_tempers_amplification() {
        let img = low_contrast_gradient();
        let clipped = clahe(&img, CLAHE_CLIP_LIMIT, CLAHE_GRID);
        let unclipped = clahe(&img, 64.0, CLAHE_GRID);
        let (c_min, c_max) = min_max(&clipped);
        let (u_min, u_max) = min_max(&unclipped);
        assert!(c_max - c_min < u_max - u_min);
    }

    #[test]
    fn normalize_end_to_end_produces_png() {
        let img = bar_image(4.0);
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut cursor, image::ImageFormat::Png)
            .unwrap();
        let out = normalize_image(&cursor.into_inner(), &NormalizeOptions::default()).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (400, 300));
    }

    #[test]
    fn normalize_rejects_garbage_bytes() {
        let err = normalize_image(b"definitely not an image", &NormalizeOptions::default());
        assert!(matches!(err, Err(NormalizeError::Decode(_))));
    }

    fn min_max(img: &GrayImage) -> (u8, u8) {
        let mut lo = 255u8;
        let mut hi = 0u8;
        for p in img.pixels() {
            lo = lo.min(p[0]);
            hi = hi.max(p[0]);
        }
        (lo, hi)
    }
}
