use std::cmp::Ordering;

use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};
use imageproc::filter::gaussian_blur_f32;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::OrbParams;
use crate::error::{AlignError, ImageRole, Result};

/// 256-bit binary descriptor
pub type Descriptor = [u8; 32];

const DESCRIPTOR_BITS: usize = 256;
const PATTERN_SEED: u64 = 0x0b5e_55ed;
const HARRIS_BLOCK: i32 = 7;
const HARRIS_K: f32 = 0.04;
const DESCRIPTOR_BLUR_SIGMA: f32 = 2.0;

/// Oriented keypoint in full-resolution image coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Diameter of the described patch, in full-resolution pixels
    pub size: f32,
    /// Orientation in radians
    pub angle: f32,
    pub response: f32,
    /// Pyramid level the keypoint was found on
    pub octave: u8,
}

/// One pyramid level with its scale relative to the full-resolution image
struct Level {
    image: GrayImage,
    mask: Option<GrayImage>,
    scale: f32,
}

/// ORB: FAST corners ranked by Harris response, intensity-centroid
/// orientation and rotated BRIEF descriptors over an image pyramid.
pub struct OrbDetector {
    params: OrbParams,
    /// Point pairs (x1, y1, x2, y2) relative to the keypoint
    pattern: Vec<(i32, i32, i32, i32)>,
    /// Half-width of the circular orientation patch for each row offset
    umax: Vec<i32>,
}

impl OrbDetector {
    pub fn new(params: OrbParams) -> Result<Self> {
        params.validate()?;
        let half = (params.patch_size / 2) as i32;
        let pattern = sampling_pattern(half - 1, PATTERN_SEED);
        let umax = circle_extents(half);
        Ok(Self {
            params,
            pattern,
            umax,
        })
    }

    /// Detect keypoints and compute their descriptors.
    ///
    /// `mask` restricts the search on the image being aligned and must have
    /// the same dimensions as `image`; zero pixels exclude their location.
    /// The two returned vectors always have the same length and share indices.
    pub fn detect_and_compute(
        &self,
        image: &GrayImage,
        mask: Option<&GrayImage>,
    ) -> Result<(Vec<Keypoint>, Vec<Descriptor>)> {
        if let Some(mask) = mask {
            if mask.dimensions() != image.dimensions() {
                return Err(AlignError::MaskSizeMismatch {
                    role: ImageRole::Input,
                    mask_width: mask.width(),
                    mask_height: mask.height(),
                    image_width: image.width(),
                    image_height: image.height(),
                });
            }
        }

        let levels = self.build_pyramid(image, mask);
        let budgets = level_budgets(
            self.params.n_features,
            self.params.scale_factor,
            levels.len(),
        );

        let mut keypoints = Vec::new();
        let mut descriptors = Vec::new();

        for (octave, (level, budget)) in levels.iter().zip(budgets).enumerate() {
            let level_kps = self.detect_on_level(level, budget);
            if level_kps.is_empty() {
                continue;
            }

            let blurred = gaussian_blur_f32(&level.image, DESCRIPTOR_BLUR_SIGMA);
            let level_desc: Vec<Descriptor> = level_kps
                .par_iter()
                .map(|kp| self.describe(&blurred, kp))
                .collect();

            debug!(
                "ORB level {} ({}x{}, scale {:.3}): {} keypoints",
                octave,
                level.image.width(),
                level.image.height(),
                level.scale,
                level_kps.len()
            );

            // Level coordinates back to full resolution
            keypoints.extend(level_kps.into_iter().map(|kp| Keypoint {
                x: kp.x * level.scale,
                y: kp.y * level.scale,
                size: self.params.patch_size as f32 * level.scale,
                octave: octave as u8,
                ..kp
            }));
            descriptors.extend(level_desc);
        }

        Ok((keypoints, descriptors))
    }

    /// Build the image pyramid, stopping once a level is too small to host
    /// any keypoint away from the border
    fn build_pyramid(&self, image: &GrayImage, mask: Option<&GrayImage>) -> Vec<Level> {
        let (width, height) = image.dimensions();
        let min_side = 2 * self.params.edge_threshold + 1;
        let mut levels = Vec::with_capacity(self.params.n_levels);

        for level in 0..self.params.n_levels {
            let scale = self.params.scale_factor.powi(level as i32);
            let lw = (width as f32 / scale).round() as u32;
            let lh = (height as f32 / scale).round() as u32;
            if lw < min_side || lh < min_side {
                break;
            }

            let (level_img, level_mask) = if level == 0 {
                (image.clone(), mask.cloned())
            } else {
                (
                    imageops::resize(image, lw, lh, FilterType::Triangle),
                    mask.map(|m| imageops::resize(m, lw, lh, FilterType::Nearest)),
                )
            };

            levels.push(Level {
                image: level_img,
                mask: level_mask,
                scale,
            });
        }

        levels
    }

    /// FAST-9 corners inside the border and mask, non-max suppressed,
    /// best `budget` by Harris response, with orientation
    fn detect_on_level(&self, level: &Level, budget: usize) -> Vec<Keypoint> {
        if budget == 0 {
            return Vec::new();
        }

        let img = &level.image;
        let (w, h) = img.dimensions();
        let edge = self.params.edge_threshold;

        let corners: Vec<Corner> = corners_fast9(img, self.params.fast_threshold)
            .into_iter()
            .filter(|c| c.x >= edge && c.y >= edge && c.x < w - edge && c.y < h - edge)
            .filter(|c| match &level.mask {
                Some(mask) => mask.get_pixel(c.x, c.y)[0] != 0,
                None => true,
            })
            .collect();

        let mut scored: Vec<Keypoint> = suppress_non_maxima(&corners, w, h)
            .into_iter()
            .map(|c| Keypoint {
                x: c.x as f32,
                y: c.y as f32,
                size: self.params.patch_size as f32,
                angle: 0.0,
                response: harris_response(img, c.x as i32, c.y as i32),
                octave: 0,
            })
            .collect();

        scored.sort_by(|a, b| b.response.partial_cmp(&a.response).unwrap_or(Ordering::Equal));
        scored.truncate(budget);

        for kp in scored.iter_mut() {
            kp.angle = self.orientation(img, kp.x as i32, kp.y as i32);
        }

        scored
    }

    /// Intensity centroid angle over the circular patch
    fn orientation(&self, img: &GrayImage, cx: i32, cy: i32) -> f32 {
        let half = (self.params.patch_size / 2) as i32;
        let mut m01 = 0i64;
        let mut m10 = 0i64;

        for dy in -half..=half {
            let span = self.umax[dy.unsigned_abs() as usize];
            for dx in -span..=span {
                let val = img.get_pixel((cx + dx) as u32, (cy + dy) as u32)[0] as i64;
                m10 += dx as i64 * val;
                m01 += dy as i64 * val;
            }
        }

        if m10 == 0 && m01 == 0 {
            0.0
        } else {
            (m01 as f32).atan2(m10 as f32)
        }
    }

    /// Rotated BRIEF on the smoothed level image
    fn describe(&self, blurred: &GrayImage, kp: &Keypoint) -> Descriptor {
        let (s, c) = kp.angle.sin_cos();
        let (cx, cy) = (kp.x, kp.y);
        let max_x = (blurred.width() - 1) as f32;
        let max_y = (blurred.height() - 1) as f32;

        let sample = |dx: i32, dy: i32| -> u8 {
            let (dx, dy) = (dx as f32, dy as f32);
            let x = (cx + c * dx - s * dy).round().clamp(0.0, max_x) as u32;
            let y = (cy + s * dx + c * dy).round().clamp(0.0, max_y) as u32;
            blurred.get_pixel(x, y)[0]
        };

        let mut d = [0u8; 32];
        for (i, &(x1, y1, x2, y2)) in self.pattern.iter().enumerate() {
            let bit = (sample(x1, y1) < sample(x2, y2)) as u8;
            d[i / 8] |= bit << (i % 8);
        }
        d
    }
}

/// Split the feature budget over levels geometrically, finer levels first
fn level_budgets(n_features: usize, scale_factor: f32, n_levels: usize) -> Vec<usize> {
    if n_levels == 0 {
        return Vec::new();
    }

    let factor = 1.0 / scale_factor as f64;
    let first = n_features as f64 * (1.0 - factor) / (1.0 - factor.powi(n_levels as i32));

    let mut budgets = Vec::with_capacity(n_levels);
    let mut assigned = 0usize;
    let mut desired = first;
    for _ in 0..n_levels - 1 {
        let n = (desired.round() as usize).min(n_features - assigned);
        budgets.push(n);
        assigned += n;
        desired *= factor;
    }
    budgets.push(n_features - assigned);
    budgets
}

/// Keep corners whose FAST score is not beaten by any 8-neighbour
fn suppress_non_maxima(corners: &[Corner], width: u32, height: u32) -> Vec<Corner> {
    let mut scores = vec![0f32; (width * height) as usize];
    for c in corners {
        scores[(c.y * width + c.x) as usize] = c.score;
    }

    corners
        .iter()
        .filter(|c| {
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = c.x as i32 + dx;
                    let ny = c.y as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                        continue;
                    }
                    if scores[(ny as u32 * width + nx as u32) as usize] > c.score {
                        return false;
                    }
                }
            }
            true
        })
        .copied()
        .collect()
}

/// Harris corner measure over a 7x7 block of Sobel gradients.
/// Caller guarantees a border of at least 4 pixels.
fn harris_response(img: &GrayImage, cx: i32, cy: i32) -> f32 {
    let px = |x: i32, y: i32| img.get_pixel(x as u32, y as u32)[0] as f32;
    let r = HARRIS_BLOCK / 2;
    let (mut a, mut b, mut c) = (0f32, 0f32, 0f32);

    for y in cy - r..=cy + r {
        for x in cx - r..=cx + r {
            let ix = (px(x + 1, y - 1) + 2.0 * px(x + 1, y) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x - 1, y) + px(x - 1, y + 1));
            let iy = (px(x - 1, y + 1) + 2.0 * px(x, y + 1) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x, y - 1) + px(x + 1, y - 1));
            a += ix * ix;
            b += iy * iy;
            c += ix * iy;
        }
    }

    a * b - c * c - HARRIS_K * (a + b) * (a + b)
}

/// For each row offset 0..=radius, the largest column offset inside the circle
fn circle_extents(radius: i32) -> Vec<i32> {
    (0..=radius)
        .map(|dy| {
            let r2 = radius * radius;
            let mut span = 0;
            while (span + 1) * (span + 1) + dy * dy <= r2 {
                span += 1;
            }
            span
        })
        .collect()
}

/// Deterministic test pairs drawn uniformly from a disc of the given radius
fn sampling_pattern(radius: i32, seed: u64) -> Vec<(i32, i32, i32, i32)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let r2 = radius * radius;
    let point = |rng: &mut StdRng| loop {
        let x = rng.gen_range(-radius..=radius);
        let y = rng.gen_range(-radius..=radius);
        if x * x + y * y <= r2 {
            return (x, y);
        }
    };

    let mut pairs = Vec::with_capacity(DESCRIPTOR_BITS);
    while pairs.len() < DESCRIPTOR_BITS {
        let (x1, y1) = point(&mut rng);
        let (x2, y2) = point(&mut rng);
        if (x1, y1) != (x2, y2) {
            pairs.push((x1, y1, x2, y2));
        }
    }
    pairs
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    /// Blocks of varying intensity scattered on a mid-gray canvas
    pub(crate) fn blocks_image(width: u32, height: u32, seed: u64) -> GrayImage {
        let mut img = GrayImage::from_pixel(width, height, Luma([110]));
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..(width * height / 400) {
            let x = rng.gen_range(0..width as i32);
            let y = rng.gen_range(0..height as i32);
            let w = rng.gen_range(6..30u32);
            let h = rng.gen_range(6..30u32);
            let v = rng.gen_range(0..=255u8);
            draw_filled_rect_mut(&mut img, Rect::at(x, y).of_size(w, h), Luma([v]));
        }
        img
    }

    fn detector() -> OrbDetector {
        OrbDetector::new(OrbParams::default()).unwrap()
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = OrbParams {
            patch_size: 8,
            ..OrbParams::default()
        };
        assert!(OrbDetector::new(params).is_err());
    }

    #[test]
    fn test_blank_image_has_no_keypoints() {
        let img = GrayImage::from_pixel(200, 200, Luma([128]));
        let (kps, desc) = detector().detect_and_compute(&img, None).unwrap();
        assert!(kps.is_empty());
        assert!(desc.is_empty());
    }

    #[test]
    fn test_tiny_image_has_no_keypoints() {
        let img = blocks_image(40, 40, 1);
        let (kps, desc) = detector().detect_and_compute(&img, None).unwrap();
        assert!(kps.is_empty());
        assert!(desc.is_empty());
    }

    #[test]
    fn test_textured_image_has_keypoints() {
        let img = blocks_image(256, 256, 7);
        let (kps, desc) = detector().detect_and_compute(&img, None).unwrap();

        assert!(kps.len() > 50, "only {} keypoints", kps.len());
        assert!(kps.len() <= 500);
        assert_eq!(kps.len(), desc.len());

        for kp in &kps {
            assert!(kp.x >= 0.0 && kp.x < 256.0);
            assert!(kp.y >= 0.0 && kp.y < 256.0);
            assert!(kp.angle.is_finite());
        }
    }

    #[test]
    fn test_detection_is_deterministic() {
        let img = blocks_image(200, 180, 3);
        let d = detector();
        let (kps_a, desc_a) = d.detect_and_compute(&img, None).unwrap();
        let (kps_b, desc_b) = d.detect_and_compute(&img, None).unwrap();
        assert_eq!(kps_a, kps_b);
        assert_eq!(desc_a, desc_b);
    }

    #[test]
    fn test_mask_restricts_search_region() {
        let img = blocks_image(256, 256, 11);
        let mut mask = GrayImage::new(256, 256);
        for y in 0..256 {
            for x in 0..128 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }

        let (kps, _) = detector().detect_and_compute(&img, Some(&mask)).unwrap();
        assert!(!kps.is_empty());
        // Nearest-neighbour mask resizing can shift the boundary by a few pixels
        for kp in &kps {
            assert!(kp.x < 136.0, "keypoint outside mask at x={}", kp.x);
        }

        let empty_mask = GrayImage::new(256, 256);
        let (kps, desc) = detector().detect_and_compute(&img, Some(&empty_mask)).unwrap();
        assert!(kps.is_empty());
        assert!(desc.is_empty());
    }

    #[test]
    fn test_undersized_mask_is_rejected() {
        let img = blocks_image(128, 96, 5);
        let mask = GrayImage::from_pixel(64, 64, Luma([255]));
        let err = detector().detect_and_compute(&img, Some(&mask)).unwrap_err();
        assert!(matches!(
            err,
            AlignError::MaskSizeMismatch {
                mask_width: 64,
                mask_height: 64,
                image_width: 128,
                image_height: 96,
                ..
            }
        ));
    }

    #[test]
    fn test_level_budgets_sum_to_total() {
        let budgets = level_budgets(500, 1.2, 8);
        assert_eq!(budgets.len(), 8);
        assert_eq!(budgets.iter().sum::<usize>(), 500);
        assert!(budgets[0] > budgets[7]);

        assert_eq!(level_budgets(500, 1.2, 1), vec![500]);
        assert!(level_budgets(500, 1.2, 0).is_empty());
    }

    #[test]
    fn test_sampling_pattern_stays_in_disc() {
        let pattern = sampling_pattern(14, PATTERN_SEED);
        assert_eq!(pattern.len(), DESCRIPTOR_BITS);
        for &(x1, y1, x2, y2) in &pattern {
            assert!(x1 * x1 + y1 * y1 <= 196);
            assert!(x2 * x2 + y2 * y2 <= 196);
            assert!((x1, y1) != (x2, y2));
        }
        assert_eq!(pattern, sampling_pattern(14, PATTERN_SEED));
    }

    #[test]
    fn test_circle_extents() {
        let umax = circle_extents(15);
        assert_eq!(umax.len(), 16);
        assert_eq!(umax[0], 15);
        assert_eq!(umax[15], 0);
        assert!(umax.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_orientation_points_towards_bright_side() {
        let mut img = GrayImage::from_pixel(64, 64, Luma([0]));
        for y in 0..64 {
            for x in 32..64 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        let angle = detector().orientation(&img, 32, 32);
        assert!(angle.abs() < 0.1, "angle {}", angle);
    }

    #[test]
    fn test_harris_prefers_corners_over_edges() {
        let mut img = GrayImage::from_pixel(40, 40, Luma([0]));
        for y in 20..40 {
            for x in 20..40 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        let corner = harris_response(&img, 20, 20);
        let edge = harris_response(&img, 30, 20);
        let flat = harris_response(&img, 8, 8);
        assert!(corner > edge);
        assert!(corner > flat);
    }
}
