use std::path::PathBuf;
use std::time::Instant;
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use rayon::prelude::*;

use px2xy_lib::calibration::FlipMode;
use px2xy_lib::config::Config;
use px2xy_lib::image_io::{get_image_files_in_dir, load_image};
use px2xy_lib::pipeline::process_image;

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "Px2XY - particle centroids and pixel-to-stage calibration")]
struct Args {
    /// Path to input file or directory
    #[clap(short, long)]
    input: Option<String>,

    /// Path to output directory
    #[clap(short, long)]
    output: Option<String>,

    /// Path to session file; built-in defaults are used when it does not exist
    #[clap(short, long, default_value = "px2xy.toml")]
    config: String,

    /// Number of posterization colours (overrides config)
    #[clap(short, long)]
    levels: Option<u32>,

    /// Minimum region area in processing pixels (overrides config)
    #[clap(short, long)]
    min_area: Option<u32>,

    /// Horizontal flip handling for calibration (overrides config)
    #[clap(short, long)]
    flip_mode: Option<FlipModeArg>,

    /// Enable debug mode (save intermediate images and log more detail)
    #[clap(short, long)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FlipModeArg {
    Auto,
    Normal,
    Flip,
}

impl From<FlipModeArg> for FlipMode {
    fn from(arg: FlipModeArg) -> Self {
        match arg {
            FlipModeArg::Auto => FlipMode::Auto,
            FlipModeArg::Normal => FlipMode::Normal,
            FlipModeArg::Flip => FlipMode::Flip,
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let path = PathBuf::from(&args.config);
    let mut config = if path.exists() {
        Config::from_file(&path).with_context(|| format!("loading {}", path.display()))?
    } else {
        log::warn!("{} not found, using default configuration", path.display());
        Config::default()
    };

    // Override config with command-line arguments
    if let Some(input) = &args.input {
        config.input_path = input.clone();
    }
    if let Some(output) = &args.output {
        config.output_base_dir = output.clone();
    }
    if let Some(levels) = args.levels {
        config.segmentation.levels = levels;
    }
    if let Some(min_area) = args.min_area {
        config.segmentation.min_area = min_area;
    }
    if let Some(flip_mode) = args.flip_mode {
        config.calibration.flip_mode = flip_mode.into();
    }

    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let config = load_config(&args)?;
    config.validate().context("invalid configuration")?;
    if log::log_enabled!(log::Level::Debug) {
        log::debug!("effective configuration:\n{}", toml::to_string_pretty(&config)?);
    }

    let start_time = Instant::now();
    let input_path = PathBuf::from(&config.input_path);

    if input_path.is_file() {
        log::info!("Processing single file: {}", input_path.display());
        let input_image = load_image(&input_path)?;
        let report = process_image(input_image, &config, args.debug)?;
        log::info!("Wrote {}", report.files.export.display());
    } else if input_path.is_dir() {
        log::info!("Processing directory: {}", input_path.display());
        let image_files = get_image_files_in_dir(&input_path)?;
        log::info!("Found {} image files", image_files.len());

        let process = |path: &PathBuf| {
            log::info!("Processing: {}", path.display());
            load_image(path)
                .and_then(|input_image| process_image(input_image, &config, args.debug))
                .map_err(|e| {
                    log::error!("Error processing {}: {}", path.display(), e);
                    e
                })
        };

        let failures = if config.use_parallel {
            image_files
                .par_iter()
                .map(process)
                .filter(|r| r.is_err())
                .count()
        } else {
            image_files.iter().map(process).filter(|r| r.is_err()).count()
        };

        if failures > 0 {
            log::warn!("{} of {} images failed", failures, image_files.len());
        }
    } else {
        bail!("input path {} is neither a file nor a directory", input_path.display());
    }

    log::info!("Processing completed in {:.2} seconds", start_time.elapsed().as_secs_f64());

    Ok(())
}
