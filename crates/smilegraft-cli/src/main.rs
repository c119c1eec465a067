//! smilegraft: transplant the mouth of a smiling photo onto a neutral one.
//!
//! Landmarks come from JSON files written by an external face landmark
//! model, one file per image:
//!
//! ```text
//! {"faces": [[{"x": 312.0, "y": 441.5}, ...], ...]}
//! ```
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin smilegraft -- \
//!     neutral.jpg smiling.jpg \
//!     --neutral-landmarks neutral.json --smiling-landmarks smiling.json \
//!     -o out.png
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use smilegraft::diagnostics::{Clock, GraftDiagnostics, graft_staged_with_diagnostics};
use smilegraft::{FaceSelection, GraftConfig, PrecomputedLandmarks, RgbImage, StagedGraft};
use tracing_subscriber::EnvFilter;

/// Transplant the mouth region of a smiling face onto a neutral face.
///
/// Aligns the two mouths with a similarity transform, warps the smiling
/// image into the neutral one and blends it in through a feathered mask.
#[derive(Parser)]
#[command(name = "smilegraft", version)]
struct Cli {
    /// Neutral (target) face image. The output has its dimensions.
    neutral: PathBuf,

    /// Smiling (source) face image.
    smiling: PathBuf,

    /// Landmark JSON for the neutral image.
    #[arg(long, value_name = "JSON")]
    neutral_landmarks: PathBuf,

    /// Landmark JSON for the smiling image.
    #[arg(long, value_name = "JSON")]
    smiling_landmarks: PathBuf,

    /// Output image path (format from extension).
    #[arg(short, long)]
    output: PathBuf,

    /// Mouth landmark indices as "START..END" (end exclusive).
    #[arg(long, value_name = "START..END", default_value = "48..68")]
    mouth_range: String,

    /// Face to use when a landmark file lists several.
    #[arg(long, value_enum, default_value_t = Face::First)]
    face: Face,

    /// Feather band width as a fraction of the face scale.
    #[arg(long, default_value_t = GraftConfig::DEFAULT_FEATHER_FRACTION)]
    feather_fraction: f64,

    /// Match the warped mouth's local color to the neutral face.
    #[arg(long)]
    color_correct: bool,

    /// Color-correction blur as a multiple of the face scale.
    #[arg(long, default_value_t = GraftConfig::DEFAULT_COLOR_BLUR_FRACTION)]
    color_blur_fraction: f64,

    /// Full config as a JSON string.
    ///
    /// When provided, all other config flags are ignored. The JSON must
    /// be a valid `GraftConfig` serialization; missing fields take their
    /// defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Also write the blend mask as a grayscale image.
    #[arg(long, value_name = "PATH")]
    mask_out: Option<PathBuf>,

    /// Also write the warped smiling image.
    #[arg(long, value_name = "PATH")]
    warped_out: Option<PathBuf>,

    /// Print the per-stage diagnostics report.
    #[arg(long)]
    report: bool,

    /// Print diagnostics as JSON instead of the human-readable report.
    #[arg(long)]
    json: bool,
}

/// Face selection.
#[derive(Clone, Copy, ValueEnum)]
enum Face {
    /// First face in the landmark file.
    First,
    /// Face with the widest landmark spread.
    Largest,
}

impl From<Face> for FaceSelection {
    fn from(face: Face) -> Self {
        match face {
            Face::First => Self::First,
            Face::Largest => Self::Largest,
        }
    }
}

/// Parse `"START..END"` into a range.
fn parse_range(s: &str) -> Result<Range<usize>, String> {
    let (start, end) = s
        .split_once("..")
        .ok_or_else(|| format!("mouth range must be 'START..END', got: '{s}'"))?;
    let start: usize = start
        .trim()
        .parse()
        .map_err(|e| format!("invalid mouth range start '{start}': {e}"))?;
    let end: usize = end
        .trim()
        .parse()
        .map_err(|e| format!("invalid mouth range end '{end}': {e}"))?;
    Ok(start..end)
}

/// Build a [`GraftConfig`] from CLI arguments.
///
/// `--config-json` wins over the individual flags.
fn config_from_cli(cli: &Cli) -> Result<GraftConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        GraftConfig {
            mouth_landmarks: parse_range(&cli.mouth_range)?,
            face_selection: cli.face.into(),
            feather_fraction: cli.feather_fraction,
            color_correction: cli.color_correct,
            color_blur_fraction: cli.color_blur_fraction,
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn load_image(path: &Path) -> Result<RgbImage, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    eprintln!("Image: {} ({} bytes)", path.display(), bytes.len());
    smilegraft::decode_rgb(&bytes).map_err(|e| format!("Error decoding {}: {e}", path.display()))
}

fn load_landmarks(path: &Path) -> Result<PrecomputedLandmarks, String> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    let landmarks: PrecomputedLandmarks = serde_json::from_str(&json)
        .map_err(|e| format!("Error parsing landmarks {}: {e}", path.display()))?;
    tracing::debug!(path = %path.display(), faces = landmarks.faces.len(), "loaded landmarks");
    Ok(landmarks)
}

/// Write the output and any requested intermediates.
fn save_outputs(cli: &Cli, staged: &StagedGraft) -> Result<(), String> {
    staged
        .output
        .save(&cli.output)
        .map_err(|e| format!("Error writing {}: {e}", cli.output.display()))?;
    eprintln!("Output written to {}", cli.output.display());

    if let Some(ref path) = cli.mask_out {
        staged
            .mask
            .to_gray_image()
            .save(path)
            .map_err(|e| format!("Error writing mask to {}: {e}", path.display()))?;
        eprintln!("Mask written to {}", path.display());
    }
    if let Some(ref path) = cli.warped_out {
        staged
            .warped
            .save(path)
            .map_err(|e| format!("Error writing warped image to {}: {e}", path.display()))?;
        eprintln!("Warped image written to {}", path.display());
    }
    Ok(())
}

fn print_diagnostics(cli: &Cli, diagnostics: &GraftDiagnostics) -> Result<(), String> {
    if cli.json {
        let json = serde_json::to_string_pretty(diagnostics)
            .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
        println!("{json}");
    } else if cli.report {
        println!("{}", diagnostics.report());
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = config_from_cli(cli)?;
    eprintln!("Config: {config:#?}");

    // Refuse an unknown output extension before doing any work.
    image::ImageFormat::from_path(&cli.output)
        .map_err(|e| format!("Unsupported output path {}: {e}", cli.output.display()))?;

    let neutral = load_image(&cli.neutral)?;
    let smiling = load_image(&cli.smiling)?;
    let neutral_landmarks = load_landmarks(&cli.neutral_landmarks)?;
    let smiling_landmarks = load_landmarks(&cli.smiling_landmarks)?;

    let (staged, diagnostics) = graft_staged_with_diagnostics(
        &neutral,
        &neutral_landmarks,
        &smiling,
        &smiling_landmarks,
        &config,
        &StdClock,
    )
    .map_err(|e| format!("Graft error: {e}"))?;

    tracing::info!(
        scale = staged.transform.scale(),
        rotation_deg = staged.transform.rotation().to_degrees(),
        face_scale = staged.face_scale.value(),
        "graft complete in {:.3}ms",
        diagnostics.total_duration.as_secs_f64() * 1000.0,
    );

    save_outputs(cli, &staged)?;
    print_diagnostics(cli, &diagnostics)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Fails only if a subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}
