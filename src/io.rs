use std::path::Path;

use image::{DynamicImage, GrayImage, ImageError, ImageFormat, ImageReader};
use log::debug;

use crate::error::{AlignError, Result};

/// Load an image keeping its colour type
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    let img = decode(path)?;
    debug!(
        "Loaded {:?}: {}x{} {:?}",
        path,
        img.width(),
        img.height(),
        img.color()
    );
    Ok(img)
}

/// Load a feature-search mask as a single 8-bit channel (0 = excluded)
pub fn load_mask(path: &Path) -> Result<GrayImage> {
    let mask = decode(path)?.to_luma8();
    debug!("Loaded mask {:?}: {}x{}", path, mask.width(), mask.height());
    Ok(mask)
}

fn decode(path: &Path) -> Result<DynamicImage> {
    let read_err = |source: ImageError| AlignError::ImageRead {
        path: path.to_path_buf(),
        source,
    };

    ImageReader::open(path)
        .map_err(|e| read_err(ImageError::IoError(e)))?
        .with_guessed_format()
        .map_err(|e| read_err(ImageError::IoError(e)))?
        .decode()
        .map_err(read_err)
}

/// Write an image, format chosen from the file extension
pub fn save_image(img: &DynamicImage, path: &Path) -> Result<()> {
    let result = match ImageFormat::from_path(path) {
        // The JPEG encoder only takes 8-bit gray or RGB
        Ok(ImageFormat::Jpeg) => match img {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => img.save(path),
            DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_) => DynamicImage::ImageLuma8(img.to_luma8()).save(path),
            _ => DynamicImage::ImageRgb8(img.to_rgb8()).save(path),
        },
        _ => img.save(path),
    };

    result.map_err(|source| AlignError::ImageWrite {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Wrote {:?}: {}x{}", path, img.width(), img.height());
    Ok(())
}
