use image::{DynamicImage, GrayImage};
use log::{debug, info, warn};
use nalgebra::{Matrix3, Point2};

use crate::config::{good_match_count, AlignConfig, MIN_HOMOGRAPHY_POINTS};
use crate::error::{AlignError, ImageRole, Result};
use crate::features::OrbDetector;
use crate::geometry::find_homography;
use crate::matching::{sort_by_distance, BruteForceMatcher};
use crate::transform::{coverage, warp_perspective};

/// Inlier ratio under which the fit is reported as suspicious
const LOW_INLIER_RATIO: f64 = 0.25;

/// What one alignment run found
#[derive(Debug, Clone)]
pub struct Alignment {
    /// Maps input coordinates onto reference coordinates
    pub homography: Matrix3<f64>,
    /// One flag per good match, true when RANSAC kept it
    pub inliers: Vec<bool>,
    pub reference_keypoints: usize,
    pub input_keypoints: usize,
    pub total_matches: usize,
    pub good_matches: usize,
}

impl Alignment {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&m| m).count()
    }
}

/// Align `input` onto `reference`, replacing `input` with the warped result.
///
/// `input_mask` restricts where features are searched for on the input
/// image. On error `input` is left untouched.
pub fn align(
    reference: &DynamicImage,
    input: &mut DynamicImage,
    input_mask: Option<&GrayImage>,
    config: &AlignConfig,
) -> Result<Alignment> {
    config.validate()?;

    if let Some(mask) = input_mask {
        if mask.dimensions() != (input.width(), input.height()) {
            return Err(AlignError::MaskSizeMismatch {
                role: ImageRole::Input,
                mask_width: mask.width(),
                mask_height: mask.height(),
                image_width: input.width(),
                image_height: input.height(),
            });
        }
    }

    let orb = OrbDetector::new(config.orb.clone())?;
    let (kps_ref, desc_ref) = orb.detect_and_compute(&reference.to_luma8(), None)?;
    let (kps_input, desc_input) = orb.detect_and_compute(&input.to_luma8(), input_mask)?;
    debug!(
        "Keypoints: reference={}, input={}",
        kps_ref.len(),
        kps_input.len()
    );

    if kps_ref.is_empty() {
        return Err(AlignError::NoKeypoints(ImageRole::Reference));
    }
    if kps_input.is_empty() {
        return Err(AlignError::NoKeypoints(ImageRole::Input));
    }

    // Best matches first
    let mut matches = BruteForceMatcher::new(true).match_descriptors(&desc_ref, &desc_input);
    sort_by_distance(&mut matches);

    let total_matches = matches.len();
    let keep = good_match_count(total_matches, config.match_fraction);
    let good = &matches[..keep];
    debug!(
        "Matches: {} cross-checked, keeping best {} (fraction {})",
        total_matches, keep, config.match_fraction
    );

    if good.len() < MIN_HOMOGRAPHY_POINTS {
        return Err(AlignError::InsufficientMatches {
            found: good.len(),
            required: MIN_HOMOGRAPHY_POINTS,
        });
    }

    let src_pts: Vec<Point2<f64>> = good
        .iter()
        .map(|m| {
            let kp = &kps_ref[m.query_idx];
            Point2::new(kp.x as f64, kp.y as f64)
        })
        .collect();
    let dst_pts: Vec<Point2<f64>> = good
        .iter()
        .map(|m| {
            let kp = &kps_input[m.train_idx];
            Point2::new(kp.x as f64, kp.y as f64)
        })
        .collect();

    // Input points onto reference points
    let (homography, inliers) = find_homography(&dst_pts, &src_pts, &config.ransac)?;

    let (ref_w, ref_h) = (reference.width(), reference.height());
    let aligned = warp_perspective(input, &homography, ref_w, ref_h)?;

    let alignment = Alignment {
        homography,
        inliers,
        reference_keypoints: kps_ref.len(),
        input_keypoints: kps_input.len(),
        total_matches,
        good_matches: keep,
    };

    let inlier_ratio = alignment.inlier_count() as f64 / keep as f64;
    if inlier_ratio < LOW_INLIER_RATIO {
        warn!(
            "Only {} of {} matches agree with the homography; the result may be wrong",
            alignment.inlier_count(),
            keep
        );
    }
    let covered = coverage(&homography, input.width(), input.height(), ref_w, ref_h);
    if covered < 0.5 {
        warn!(
            "Aligned input covers only {:.0}% of the reference frame",
            covered * 100.0
        );
    }

    info!(
        "Aligned {}x{} input onto {}x{} reference: {} / {} inliers",
        input.width(),
        input.height(),
        ref_w,
        ref_h,
        alignment.inlier_count(),
        keep
    );

    *input = aligned;
    Ok(alignment)
}
