use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use image_align::cli::exit_code;
use image_align::{align, hash_distance, init_logger, load_image, load_mask, save_image, Cli};

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout, errors to stderr
            let _ = e.print();
            std::process::exit(exit_code(&e));
        }
    };

    init_logger(cli.verbose);
    run(&cli)
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.align_config();
    debug!("Configuration: {:?}", config);

    let reference = load_image(&cli.reference)?;
    let mut input = load_image(&cli.input)?;
    let mask = match &cli.mask {
        Some(path) => Some(load_mask(path)?),
        None => None,
    };

    let alignment = align(&reference, &mut input, mask.as_ref(), &config)
        .with_context(|| format!("Failed to align {:?} onto {:?}", cli.input, cli.reference))?;

    let h = alignment.homography;
    for row in 0..3 {
        debug!(
            "  [{:10.5}, {:10.5}, {:10.5}]",
            h[(row, 0)],
            h[(row, 1)],
            h[(row, 2)]
        );
    }

    save_image(&input, &cli.output)?;
    info!("Saved aligned image: {:?}", cli.output);

    if cli.report_similarity {
        info!(
            "Average-hash distance to reference: {} / 64",
            hash_distance(&input, &reference)
        );
    }

    Ok(())
}
