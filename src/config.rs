use crate::error::{AlignError, Result};

/// Minimum number of point correspondences a homography can be fitted from
pub const MIN_HOMOGRAPHY_POINTS: usize = 4;

/// ORB feature extraction parameters
#[derive(Debug, Clone)]
pub struct OrbParams {
    /// Maximum number of features kept over all pyramid levels
    pub n_features: usize,
    /// Downscale ratio between consecutive pyramid levels
    pub scale_factor: f32,
    pub n_levels: usize,
    /// Border (in level pixels) where no keypoint is detected
    pub edge_threshold: u32,
    /// Side of the square patch used for orientation and the descriptor
    pub patch_size: u32,
    pub fast_threshold: u8,
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            n_features: 500,
            scale_factor: 1.2,
            n_levels: 8,
            edge_threshold: 31,
            patch_size: 31,
            fast_threshold: 20,
        }
    }
}

impl OrbParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_features == 0 {
            return Err(AlignError::InvalidConfig(
                "n_features must be at least 1".to_string(),
            ));
        }
        if !(self.scale_factor > 1.0) {
            return Err(AlignError::InvalidConfig(format!(
                "scale_factor must be > 1, got {}",
                self.scale_factor
            )));
        }
        if self.n_levels == 0 {
            return Err(AlignError::InvalidConfig(
                "n_levels must be at least 1".to_string(),
            ));
        }
        if self.patch_size < 7 || self.patch_size % 2 == 0 {
            return Err(AlignError::InvalidConfig(format!(
                "patch_size must be odd and >= 7, got {}",
                self.patch_size
            )));
        }
        if self.edge_threshold < self.patch_size / 2 + 1 {
            return Err(AlignError::InvalidConfig(format!(
                "edge_threshold {} is smaller than half the patch size {}",
                self.edge_threshold, self.patch_size
            )));
        }
        if self.fast_threshold == 0 {
            return Err(AlignError::InvalidConfig(
                "fast_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Robust homography fitting parameters
#[derive(Debug, Clone)]
pub struct RansacParams {
    /// Maximum reprojection error (pixels) for a correspondence to count as inlier
    pub reproj_threshold: f64,
    pub max_iters: usize,
    /// Probability that at least one drawn sample is outlier-free
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            reproj_threshold: 3.0,
            max_iters: 2000,
            confidence: 0.955,
            seed: 0x5eed,
        }
    }
}

impl RansacParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.reproj_threshold > 0.0) || !self.reproj_threshold.is_finite() {
            return Err(AlignError::InvalidConfig(format!(
                "reprojection threshold must be > 0, got {}",
                self.reproj_threshold
            )));
        }
        if self.max_iters == 0 {
            return Err(AlignError::InvalidConfig(
                "max_iters must be at least 1".to_string(),
            ));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(AlignError::InvalidConfig(format!(
                "confidence must be in (0, 1), got {}",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// Everything one alignment run needs besides the images
#[derive(Debug, Clone)]
pub struct AlignConfig {
    /// Fraction of the best matches handed to the homography fit, in (0, 1]
    pub match_fraction: f64,
    pub orb: OrbParams,
    pub ransac: RansacParams,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            match_fraction: 0.7,
            orb: OrbParams::default(),
            ransac: RansacParams::default(),
        }
    }
}

impl AlignConfig {
    pub fn with_match_fraction(mut self, match_fraction: f64) -> Self {
        self.match_fraction = match_fraction;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_match_fraction(self.match_fraction)?;
        self.orb.validate()?;
        self.ransac.validate()
    }
}

/// Checks 0 < fraction <= 1
pub fn validate_match_fraction(fraction: f64) -> Result<()> {
    if fraction > 0.0 && fraction <= 1.0 {
        Ok(())
    } else {
        Err(AlignError::InvalidConfig(format!(
            "match fraction must be > 0 and <= 1, got {}",
            fraction
        )))
    }
}

/// Number of matches kept for a given total: floor(fraction * total)
pub fn good_match_count(total: usize, fraction: f64) -> usize {
    ((total as f64 * fraction).floor() as usize).min(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AlignConfig::default().validate().is_ok());
        assert_eq!(AlignConfig::default().match_fraction, 0.7);
        assert_eq!(RansacParams::default().max_iters, 2000);
    }

    #[test]
    fn test_match_fraction_bounds() {
        assert!(validate_match_fraction(1.0).is_ok());
        assert!(validate_match_fraction(0.01).is_ok());
        assert!(validate_match_fraction(0.0).is_err());
        assert!(validate_match_fraction(-0.5).is_err());
        assert!(validate_match_fraction(1.0001).is_err());
        assert!(validate_match_fraction(f64::NAN).is_err());
    }

    #[test]
    fn test_good_match_count_floors() {
        assert_eq!(good_match_count(10, 0.7), 7);
        assert_eq!(good_match_count(9, 0.7), 6);
        assert_eq!(good_match_count(3, 0.2), 0);
        assert_eq!(good_match_count(42, 1.0), 42);
        assert_eq!(good_match_count(0, 0.5), 0);
    }

    #[test]
    fn test_invalid_orb_params() {
        let mut orb = OrbParams::default();
        orb.patch_size = 30;
        assert!(matches!(orb.validate(), Err(AlignError::InvalidConfig(_))));

        let mut orb = OrbParams::default();
        orb.scale_factor = 1.0;
        assert!(orb.validate().is_err());

        let mut orb = OrbParams::default();
        orb.edge_threshold = 5;
        assert!(orb.validate().is_err());
    }

    #[test]
    fn test_invalid_ransac_params() {
        let mut ransac = RansacParams::default();
        ransac.confidence = 1.0;
        assert!(ransac.validate().is_err());

        let mut ransac = RansacParams::default();
        ransac.reproj_threshold = 0.0;
        assert!(ransac.validate().is_err());
    }
}
