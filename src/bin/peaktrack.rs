use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use nalgebra::DMatrix;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use peaktrack::{ByFrameSolver, CancellationToken, Config, Frame, LogProgress, Metadata, PeakTable, StackDetector};

#[derive(Parser)]
#[command(name = "peaktrack", about = "Detect Gaussian peaks in image stacks and link them into tracks", version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect peaks on every frame of a stack
    Detect {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Link a peak table into trajectories
    Track {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Detect then track
    Run {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Also write the untracked peak table here
        #[arg(long)]
        peaks: Option<PathBuf>,
    },
}

/// Stack file: metadata plus frames as nested rows, ordered `t * SizeZ + z`.
#[derive(Deserialize)]
struct StackFile {
    metadata: Metadata,
    frames: Vec<Vec<Vec<f64>>>,
    #[serde(default)]
    masks: Option<Vec<Vec<Vec<bool>>>>,
}

fn load_stack(path: &Path) -> anyhow::Result<(Metadata, Vec<Frame>)> {
    let data = fs::read_to_string(path).with_context(|| format!("reading stack {}", path.display()))?;
    let stack: StackFile = serde_json::from_str(&data)?;

    let mut frames = stack
        .frames
        .iter()
        .map(|rows| Frame::from_rows(rows))
        .collect::<peaktrack::Result<Vec<_>>>()?;

    if let Some(masks) = stack.masks {
        if masks.len() != frames.len() {
            bail!("{} masks given for {} frames", masks.len(), frames.len());
        }
        frames = frames
            .into_iter()
            .zip(masks)
            .map(|(frame, mask)| {
                let n_rows = mask.len();
                let n_cols = mask.first().map_or(0, Vec::len);
                let flat: Vec<bool> = mask.into_iter().flatten().collect();
                if flat.len() != n_rows * n_cols {
                    return Err(peaktrack::TrackingError::InvalidInput("ragged mask rows".to_string()));
                }
                frame.with_mask(DMatrix::from_row_slice(n_rows, n_cols, &flat))
            })
            .collect::<peaktrack::Result<Vec<_>>>()?;
    }
    Ok((stack.metadata, frames))
}

fn detect(config: &Config, input: &Path) -> anyhow::Result<PeakTable> {
    let (metadata, frames) = load_stack(input)?;
    let sink = LogProgress;
    let detector = StackDetector::new(&config.detection, &metadata)?.with_progress(&sink);
    Ok(detector.run(&frames)?)
}

fn track(config: &Config, peaks: PeakTable) -> anyhow::Result<PeakTable> {
    let mut solver = ByFrameSolver::from_parameters(peaks, &config.tracking)?;
    Ok(solver.track_with(Some(&LogProgress), &CancellationToken::new())?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(&path.to_string_lossy())?,
        None => Config::default(),
    };

    match args.command {
        Command::Detect { input, output } => {
            let peaks = detect(&config, &input)?;
            peaks.to_json_file(&output)?;
            info!("{} peaks written to {}", peaks.len(), output.display());
        }
        Command::Track { input, output } => {
            let peaks = PeakTable::from_json_file(&input)?;
            let tracks = track(&config, peaks)?;
            tracks.to_json_file(&output)?;
            info!("{} segments written to {}", tracks.n_labels(), output.display());
        }
        Command::Run { input, output, peaks } => {
            let detected = detect(&config, &input)?;
            if let Some(path) = peaks {
                detected.to_json_file(&path)?;
            }
            let tracks = track(&config, detected)?;
            tracks.to_json_file(&output)?;
            info!("{} segments written to {}", tracks.n_labels(), output.display());
        }
    }
    Ok(())
}
