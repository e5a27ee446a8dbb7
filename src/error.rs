use std::path::PathBuf;

use thiserror::Error;

/// Which side of the alignment an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Reference,
    Input,
}

impl std::fmt::Display for ImageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageRole::Reference => write!(f, "reference"),
            ImageRole::Input => write!(f, "input"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("Failed to read image from path '{}'", path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to write output image to '{}'", path.display())]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Mask is {mask_width}x{mask_height} but the {role} image is {image_width}x{image_height}")]
    MaskSizeMismatch {
        role: ImageRole,
        mask_width: u32,
        mask_height: u32,
        image_width: u32,
        image_height: u32,
    },

    #[error("No keypoints detected in the {0} image")]
    NoKeypoints(ImageRole),

    #[error("Not enough matches to estimate a homography: found {found}, need at least {required}")]
    InsufficientMatches { found: usize, required: usize },

    #[error("Homography estimation failed: {0}")]
    DegenerateHomography(String),
}

pub type Result<T> = std::result::Result<T, AlignError>;
