pub mod align;
pub mod cli;
pub mod config;
pub mod error;
pub mod features;
pub mod geometry;
pub mod hash;
pub mod io;
pub mod logging;
pub mod matching;
pub mod transform;

pub use align::{align, Alignment};
pub use cli::Cli;
pub use config::{AlignConfig, OrbParams, RansacParams};
pub use error::{AlignError, ImageRole, Result};
pub use features::{Descriptor, Keypoint, OrbDetector};
pub use geometry::find_homography;
pub use hash::{hash_distance, AverageHash};
pub use io::{load_image, load_mask, save_image};
pub use logging::init_logger;
pub use matching::{BruteForceMatcher, Match};
pub use transform::warp_perspective;
