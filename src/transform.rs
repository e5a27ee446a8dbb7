use image::{DynamicImage, ImageBuffer, Luma, LumaA, Rgb, Rgba};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use log::debug;
use nalgebra::Matrix3;

use crate::error::{AlignError, Result};

/// Convert a homography into imageproc's row-major single-precision form
fn to_projection(h: &Matrix3<f64>) -> Result<Projection> {
    let mut m = [0f32; 9];
    for r in 0..3 {
        for c in 0..3 {
            m[r * 3 + c] = h[(r, c)] as f32;
        }
    }
    Projection::from_matrix(m).ok_or_else(|| {
        AlignError::DegenerateHomography("homography is not invertible".to_string())
    })
}

/// Warp `img` through `h` (source -> destination coordinates) into a
/// `width` x `height` canvas. Pixels with no source are zero.
///
/// 8- and 16-bit gray/RGB images keep their colour type; anything else is
/// warped as RGBA8.
pub fn warp_perspective(
    img: &DynamicImage,
    h: &Matrix3<f64>,
    width: u32,
    height: u32,
) -> Result<DynamicImage> {
    let projection = to_projection(h)?;
    debug!(
        "Warping {}x{} {:?} into {}x{}",
        img.width(),
        img.height(),
        img.color(),
        width,
        height
    );

    let interp = Interpolation::Bilinear;
    let warped = match img {
        DynamicImage::ImageLuma8(buf) => {
            let mut out = ImageBuffer::from_pixel(width, height, Luma([0u8]));
            warp_into(buf, &projection, interp, Luma([0u8]), &mut out);
            DynamicImage::ImageLuma8(out)
        }
        DynamicImage::ImageLumaA8(buf) => {
            let mut out = ImageBuffer::from_pixel(width, height, LumaA([0u8, 0]));
            warp_into(buf, &projection, interp, LumaA([0u8, 0]), &mut out);
            DynamicImage::ImageLumaA8(out)
        }
        DynamicImage::ImageRgb8(buf) => {
            let mut out = ImageBuffer::from_pixel(width, height, Rgb([0u8; 3]));
            warp_into(buf, &projection, interp, Rgb([0u8; 3]), &mut out);
            DynamicImage::ImageRgb8(out)
        }
        DynamicImage::ImageRgba8(buf) => {
            let mut out = ImageBuffer::from_pixel(width, height, Rgba([0u8; 4]));
            warp_into(buf, &projection, interp, Rgba([0u8; 4]), &mut out);
            DynamicImage::ImageRgba8(out)
        }
        DynamicImage::ImageLuma16(buf) => {
            let mut out = ImageBuffer::from_pixel(width, height, Luma([0u16]));
            warp_into(buf, &projection, interp, Luma([0u16]), &mut out);
            DynamicImage::ImageLuma16(out)
        }
        DynamicImage::ImageLumaA16(buf) => {
            let mut out = ImageBuffer::from_pixel(width, height, LumaA([0u16, 0]));
            warp_into(buf, &projection, interp, LumaA([0u16, 0]), &mut out);
            DynamicImage::ImageLumaA16(out)
        }
        DynamicImage::ImageRgb16(buf) => {
            let mut out = ImageBuffer::from_pixel(width, height, Rgb([0u16; 3]));
            warp_into(buf, &projection, interp, Rgb([0u16; 3]), &mut out);
            DynamicImage::ImageRgb16(out)
        }
        DynamicImage::ImageRgba16(buf) => {
            let mut out = ImageBuffer::from_pixel(width, height, Rgba([0u16; 4]));
            warp_into(buf, &projection, interp, Rgba([0u16; 4]), &mut out);
            DynamicImage::ImageRgba16(out)
        }
        other => {
            let rgba = other.to_rgba8();
            let mut out = ImageBuffer::from_pixel(width, height, Rgba([0u8; 4]));
            warp_into(&rgba, &projection, interp, Rgba([0u8; 4]), &mut out);
            DynamicImage::ImageRgba8(out)
        }
    };

    Ok(warped)
}

/// Fraction of the output canvas covered by the warped source image
pub fn coverage(h: &Matrix3<f64>, src_width: u32, src_height: u32, width: u32, height: u32) -> f64 {
    let inv = match h.try_inverse() {
        Some(inv) => inv,
        None => return 0.0,
    };

    // Sample on a coarse grid; exact coverage is not needed
    let step = 4u32;
    let (mut inside, mut total) = (0u64, 0u64);
    for y in (0..height).step_by(step as usize) {
        for x in (0..width).step_by(step as usize) {
            let (sx, sy) = crate::geometry::transform_point(&inv, x as f64, y as f64);
            total += 1;
            if sx >= 0.0 && sy >= 0.0 && sx < src_width as f64 && sy < src_height as f64 {
                inside += 1;
            }
        }
    }

    if total == 0 {
        0.0
    } else {
        inside as f64 / total as f64
    }
}
