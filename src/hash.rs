use image::imageops::{self, FilterType};
use image::DynamicImage;

const HASH_SIDE: u32 = 8;

/// 64-bit average hash: the image shrunk to 8x8 gray, one bit per pixel
/// brighter than the mean
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AverageHash(pub u64);

impl AverageHash {
    pub fn compute(img: &DynamicImage) -> Self {
        let gray = img.to_luma8();
        let small = imageops::resize(&gray, HASH_SIDE, HASH_SIDE, FilterType::Triangle);

        let sum: u32 = small.pixels().map(|p| p[0] as u32).sum();
        let mean = sum as f32 / (HASH_SIDE * HASH_SIDE) as f32;

        let bits = small
            .pixels()
            .enumerate()
            .filter(|(_, p)| p[0] as f32 > mean)
            .fold(0u64, |acc, (i, _)| acc | (1 << i));
        AverageHash(bits)
    }

    /// Number of differing bits, 0..=64
    pub fn distance(&self, other: &AverageHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// Average-hash distance between two images
pub fn hash_distance(a: &DynamicImage, b: &DynamicImage) -> u32 {
    AverageHash::compute(a).distance(&AverageHash::compute(b))
}
