use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;

use crate::config::{validate_match_fraction, AlignConfig, OrbParams, RansacParams};

#[derive(Parser, Debug)]
#[command(name = "image-align")]
#[command(version, about = "Align an image onto a reference image with ORB features and a RANSAC homography")]
pub struct Cli {
    /// Image to align
    #[arg(short, long)]
    pub input: PathBuf,

    /// Reference image the input is aligned onto
    #[arg(short, long)]
    pub reference: PathBuf,

    /// Where to write the aligned image
    #[arg(short, long)]
    pub output: PathBuf,

    /// Mask restricting feature search on the input (nonzero = searched)
    #[arg(short, long)]
    pub mask: Option<PathBuf>,

    /// Fraction of the best matches kept for the homography fit, in (0, 1]
    #[arg(short, long, default_value = "0.7", value_parser = parse_fraction, allow_negative_numbers = true)]
    pub percent: f64,

    /// ORB feature budget per image
    #[arg(long, default_value = "500")]
    pub max_features: usize,

    /// RANSAC reprojection threshold in pixels
    #[arg(long, default_value = "3.0")]
    pub ransac_threshold: f64,

    /// RANSAC iteration cap
    #[arg(long, default_value = "2000")]
    pub max_iters: usize,

    /// RANSAC confidence, in (0, 1)
    #[arg(long, default_value = "0.955")]
    pub confidence: f64,

    /// Log the average-hash distance between the output and the reference
    #[arg(long)]
    pub report_similarity: bool,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn align_config(&self) -> AlignConfig {
        AlignConfig {
            match_fraction: self.percent,
            orb: OrbParams {
                n_features: self.max_features,
                ..OrbParams::default()
            },
            ransac: RansacParams {
                reproj_threshold: self.ransac_threshold,
                max_iters: self.max_iters,
                confidence: self.confidence,
                ..RansacParams::default()
            },
        }
    }
}

/// Process exit code for a failed parse: help and version are successes,
/// every other argument error is 1
pub fn exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

fn parse_fraction(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid fraction '{}', expected a number in (0, 1]", s))?;
    validate_match_fraction(value).map_err(|e| e.to_string())?;
    Ok(value)
}
