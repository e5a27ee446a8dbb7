use log::LevelFilter;

/// Install the stderr logger: `info` by default, `debug` when verbose.
/// `RUST_LOG` directives take precedence over both.
pub fn init_logger(verbose: bool) {
    let mut builder = env_logger::Builder::new();
    builder.target(env_logger::Target::Stderr);
    builder.filter_level(default_level(verbose));
    builder.format_timestamp(None);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    // A second init (tests, embedding) keeps the first logger
    let _ = builder.try_init();
}

fn default_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}
