use log::debug;
use nalgebra::{Matrix3, Point2, SMatrix, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{RansacParams, MIN_HOMOGRAPHY_POINTS};
use crate::error::{AlignError, Result};

const EPS: f64 = 1e-9;

/// Apply a projective transform to a point
pub fn transform_point(matrix: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let p = matrix * Vector3::new(x, y, 1.0);
    (p.x / p.z, p.y / p.z)
}

/// Squared distance between `H * src` and `dst`; infinite when `src` maps to infinity
fn reprojection_error_sq(h: &Matrix3<f64>, src: &Point2<f64>, dst: &Point2<f64>) -> f64 {
    let p = h * Vector3::new(src.x, src.y, 1.0);
    if p.z.abs() < EPS {
        return f64::INFINITY;
    }
    let dx = p.x / p.z - dst.x;
    let dy = p.y / p.z - dst.y;
    dx * dx + dy * dy
}

/// Estimate the homography mapping `src` onto `dst` with RANSAC.
///
/// Returns the 3x3 matrix normalized so `h[(2, 2)] == 1` together with an
/// inlier flag per correspondence.
pub fn find_homography(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    params: &RansacParams,
) -> Result<(Matrix3<f64>, Vec<bool>)> {
    params.validate()?;
    if src.len() != dst.len() {
        return Err(AlignError::DegenerateHomography(format!(
            "point sets differ in length ({} vs {})",
            src.len(),
            dst.len()
        )));
    }
    if src.len() < MIN_HOMOGRAPHY_POINTS {
        return Err(AlignError::InsufficientMatches {
            found: src.len(),
            required: MIN_HOMOGRAPHY_POINTS,
        });
    }

    let n = src.len();
    let thresh2 = params.reproj_threshold * params.reproj_threshold;
    let mut rng = StdRng::seed_from_u64(params.seed);

    let mut best_h = None;
    let mut best_count = 0usize;
    let mut iters = params.max_iters;
    let mut i = 0;

    while i < iters {
        i += 1;
        let idx = sample_four(&mut rng, n);
        let s: Vec<Point2<f64>> = idx.iter().map(|&j| src[j]).collect();
        let d: Vec<Point2<f64>> = idx.iter().map(|&j| dst[j]).collect();
        if has_collinear_triple(&s) || has_collinear_triple(&d) {
            continue;
        }

        let h = match estimate_dlt(&s, &d) {
            Ok(h) => h,
            Err(_) => continue,
        };

        let count = (0..n)
            .filter(|&j| reprojection_error_sq(&h, &src[j], &dst[j]) <= thresh2)
            .count();

        if count > best_count {
            best_count = count;
            best_h = Some(h);
            let w = count as f64 / n as f64;
            iters = adaptive_iterations(w, params.confidence, MIN_HOMOGRAPHY_POINTS)
                .min(params.max_iters);
        }
    }

    let best_h = best_h.ok_or_else(|| {
        AlignError::DegenerateHomography("RANSAC found no non-degenerate sample".to_string())
    })?;

    let mask = inlier_mask(&best_h, src, dst, thresh2);
    let in_src: Vec<Point2<f64>> = select(src, &mask);
    let in_dst: Vec<Point2<f64>> = select(dst, &mask);

    // Least-squares refit over the consensus set, kept only if it does not lose inliers
    let refined = if in_src.len() > MIN_HOMOGRAPHY_POINTS {
        estimate_dlt(&in_src, &in_dst)
            .ok()
            .filter(|h| inlier_mask(h, src, dst, thresh2).iter().filter(|&&m| m).count() >= best_count)
            .unwrap_or(best_h)
    } else {
        best_h
    };

    if refined.try_inverse().is_none() || refined.iter().any(|v| !v.is_finite()) {
        return Err(AlignError::DegenerateHomography(
            "estimated transform is singular".to_string(),
        ));
    }

    let mask = inlier_mask(&refined, src, dst, thresh2);
    debug!(
        "RANSAC: {} / {} inliers after {} iterations",
        mask.iter().filter(|&&m| m).count(),
        n,
        i
    );

    Ok((refined, mask))
}

fn inlier_mask(h: &Matrix3<f64>, src: &[Point2<f64>], dst: &[Point2<f64>], thresh2: f64) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(s, d)| reprojection_error_sq(h, s, d) <= thresh2)
        .collect()
}

fn select(pts: &[Point2<f64>], mask: &[bool]) -> Vec<Point2<f64>> {
    pts.iter()
        .zip(mask)
        .filter_map(|(p, &m)| if m { Some(*p) } else { None })
        .collect()
}

/// Four distinct indices in 0..n
fn sample_four(rng: &mut impl Rng, n: usize) -> [usize; 4] {
    let mut idx = [0usize; 4];
    let mut filled = 0;
    while filled < 4 {
        let candidate = rng.gen_range(0..n);
        if !idx[..filled].contains(&candidate) {
            idx[filled] = candidate;
            filled += 1;
        }
    }
    idx
}

/// True if any three of the points are (nearly) on one line
fn has_collinear_triple(pts: &[Point2<f64>]) -> bool {
    for i in 0..pts.len() {
        for j in i + 1..pts.len() {
            for k in j + 1..pts.len() {
                let a = pts[j] - pts[i];
                let b = pts[k] - pts[i];
                let cross = a.x * b.y - a.y * b.x;
                let scale = a.norm() * b.norm();
                if cross.abs() <= 1e-6 * scale.max(1.0) {
                    return true;
                }
            }
        }
    }
    false
}

/// k = log(1 - p) / log(1 - w^n)
fn adaptive_iterations(inlier_ratio: f64, confidence: f64, sample_size: usize) -> usize {
    if inlier_ratio <= 0.0 {
        return usize::MAX;
    }
    if inlier_ratio >= 1.0 {
        return 1;
    }

    let w_n = inlier_ratio.powi(sample_size as i32);
    let log_denom = (1.0 - w_n).ln();
    if log_denom.abs() < 1e-12 {
        return usize::MAX;
    }

    let k = (1.0 - confidence).ln() / log_denom;
    (k.ceil() as usize).max(1)
}

/// Similarity transform moving the centroid to the origin with mean distance sqrt(2)
fn normalize_points(pts: &[Point2<f64>]) -> Result<(Vec<Point2<f64>>, Matrix3<f64>)> {
    let n = pts.len() as f64;
    let mx = pts.iter().map(|p| p.x).sum::<f64>() / n;
    let my = pts.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - mx).powi(2) + (p.y - my).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist <= 1e-12 {
        return Err(AlignError::DegenerateHomography(
            "all points coincide".to_string(),
        ));
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * mx, 0.0, s, -s * my, 0.0, 0.0, 1.0);
    let out = pts
        .iter()
        .map(|p| Point2::new(s * (p.x - mx), s * (p.y - my)))
        .collect();
    Ok((out, t))
}

/// Normalized direct linear transform over all given correspondences (n >= 4)
fn estimate_dlt(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Result<Matrix3<f64>> {
    let (ns, ts) = normalize_points(src)?;
    let (nd, td) = normalize_points(dst)?;

    // Accumulate A^T A so the null vector is available for any n >= 4
    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (s, d) in ns.iter().zip(&nd) {
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);
        let rows = [
            [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u],
            [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v],
        ];
        for row in &rows {
            for r in 0..9 {
                for c in 0..9 {
                    ata[(r, c)] += row[r] * row[c];
                }
            }
        }
    }

    let svd = ata.svd(false, true);
    let v_t = svd.v_t.ok_or_else(|| {
        AlignError::DegenerateHomography("SVD did not converge".to_string())
    })?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |acc, (i, &s)| if s < acc.1 { (i, s) } else { acc });

    let h = v_t.row(min_idx);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let td_inv = td.try_inverse().ok_or_else(|| {
        AlignError::DegenerateHomography("normalization is singular".to_string())
    })?;
    let full = td_inv * hn * ts;

    let scale = full[(2, 2)];
    if scale.abs() < EPS || !scale.is_finite() {
        return Err(AlignError::DegenerateHomography(
            "transform maps the origin to infinity".to_string(),
        ));
    }
    Ok(full / scale)
}
