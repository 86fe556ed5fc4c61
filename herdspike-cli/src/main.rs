//! herdspike CLI.
//!
//! Detects spikes in raw recordings, sorts detected events and inspects
//! probe configurations.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Args, Parser, Subcommand};
use herdspike_io::{
    write_layout_svg, ChunkConfig, Clustering, CombinedClusteringConfig, Detection,
    DetectionConfig, DEFAULT_BASELINE_FRAMES,
};
use herdspike_probe::{Probe, ProbeConfig};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("Probe error: {0}")]
    Probe(#[from] herdspike_probe::Error),

    #[error("I/O error: {0}")]
    HerdspikeIo(#[from] herdspike_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] herdspike_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

/// Spike detection and sorting for multi-electrode recordings.
#[derive(Parser)]
#[command(name = "herdspike")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DetectArgs {
    /// Probe configuration (JSON)
    #[arg(short, long)]
    probe: PathBuf,

    /// Raw recording file(s)
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// Output directory for the event stores
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Detection threshold
    #[arg(long, default_value = "20")]
    threshold: i32,

    /// Samples kept before the peak
    #[arg(long, default_value = "10")]
    cutout_start: usize,

    /// Samples kept after the peak
    #[arg(long, default_value = "30")]
    cutout_end: usize,

    /// Minimum mean amplitude
    #[arg(long, default_value = "0")]
    maa: i32,

    /// Dead time in frames
    #[arg(long, default_value = "12")]
    maxsl: usize,

    /// Minimum supra-threshold run in frames
    #[arg(long, default_value = "3")]
    minsl: usize,

    /// After-hyperpolarisation threshold (0 disables)
    #[arg(long, default_value = "0")]
    ahpthr: i32,

    /// Skip spike localisation
    #[arg(long)]
    no_localize: bool,

    /// Also write pre-merge candidates as CSV
    #[arg(long)]
    save_all: bool,

    /// Frames per baseline span
    #[arg(long, default_value_t = DEFAULT_BASELINE_FRAMES)]
    baseline_frames: usize,

    /// Fixed window length in frames (default: sized from free memory)
    #[arg(long)]
    chunk_frames: Option<usize>,

    /// Fraction of available memory used to size windows
    #[arg(long, default_value = "0.25")]
    memory_fraction: f64,
}

#[derive(Args)]
struct SortArgs {
    /// Event stores (.bin) to cluster together
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// Output file; `.csv` writes CSV, anything else HDF5
    #[arg(short, long)]
    output: PathBuf,

    /// Cutout length of the stores
    #[arg(long)]
    cutout_length: usize,

    /// Number of principal components
    #[arg(long, default_value = "2")]
    pca_components: usize,

    /// Do not whiten the principal components
    #[arg(long)]
    no_whiten: bool,

    /// Shape feature weight
    #[arg(long, default_value = "4.0")]
    alpha: f64,

    /// Mean-shift bandwidth
    #[arg(long, default_value = "5.0")]
    bandwidth: f64,

    /// Seed from bins holding at least this many events
    #[arg(long)]
    bin_seeding: Option<usize>,

    /// Worker threads (default: all cores)
    #[arg(long)]
    n_jobs: Option<usize>,

    /// Fit on about this many events, then label all
    #[arg(long)]
    cluster_subset: Option<usize>,

    /// Label events far from every centre as noise
    #[arg(long)]
    orphans_as_noise: bool,

    /// Write one HDF5 file per input next to it (`<stem>_clustered.hdf5`)
    #[arg(long)]
    per_source: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect spikes and write one event store per recording
    Detect(DetectArgs),

    /// Cluster detected events
    Sort(SortArgs),

    /// Show probe and recording information
    Info {
        /// Probe configuration (JSON)
        #[arg(short, long)]
        probe: PathBuf,

        /// Raw recording file
        input: Option<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Render the probe layout as SVG
    Layout {
        /// Probe configuration (JSON)
        #[arg(short, long)]
        probe: PathBuf,

        /// Output SVG file
        #[arg(short, long)]
        output: PathBuf,

        /// Channels whose neighbours are drawn
        #[arg(short, long, value_delimiter = ',')]
        channels: Vec<usize>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(err) = run(cli.command) {
        log::error!("{err}");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Detect(args) => detect(&args),
        Commands::Sort(args) => sort(&args),
        Commands::Info { probe, input, json } => info(&probe, input.as_deref(), json),
        Commands::Layout {
            probe,
            output,
            channels,
        } => {
            let config = ProbeConfig::from_file(&probe)?;
            let probe = Probe::open(&config, None)?;
            write_layout_svg(&output, probe.layout(), &channels)?;
            println!("Wrote {}", output.display());
            Ok(())
        }
    }
}

fn detect(args: &DetectArgs) -> Result<()> {
    let probe_config = ProbeConfig::from_file(&args.probe)?;
    let mut chunk = ChunkConfig::default().with_memory_fraction(args.memory_fraction);
    if let Some(frames) = args.chunk_frames {
        chunk = chunk.with_chunk_frames(frames);
    }

    let start = Instant::now();
    let mut total_events = 0usize;
    for path in &args.input {
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| CliError::Usage(format!("cannot derive a name from {}", path.display())))?;
        let config = DetectionConfig::default()
            .with_localize(!args.no_localize)
            .with_cutout(args.cutout_start, args.cutout_end)
            .with_threshold(args.threshold)
            .with_shape_criteria(args.maa, args.maxsl, args.minsl, args.ahpthr)
            .with_output(&args.output_dir, name)
            .with_save_all(args.save_all)
            .with_baseline_frames(args.baseline_frames)
            .with_chunk(chunk.clone());

        // One recording open at a time; the raw handle is released at the end
        // of each iteration.
        let recording = Probe::open(&probe_config, Some(path.as_path()))?.into_recording()?;
        let mut detection = Detection::new(&recording, config)?;
        let summary = detection.detect_from_raw(false)?;
        println!(
            "{}: {} events -> {}",
            path.display(),
            summary.events,
            summary.output.display()
        );
        total_events = total_events.saturating_add(summary.events);
    }

    println!(
        "Processed {} files in {:.2}s",
        args.input.len(),
        start.elapsed().as_secs_f64()
    );
    println!("Total events: {}", total_events);
    Ok(())
}

fn sort(args: &SortArgs) -> Result<()> {
    let start = Instant::now();
    let mut clustering = Clustering::from_files(&args.input, args.cutout_length)?;
    clustering.shape_pca(args.pca_components, !args.no_whiten)?;

    let mut config = CombinedClusteringConfig::default()
        .with_alpha(args.alpha)
        .with_bandwidth(args.bandwidth)
        .with_n_jobs(args.n_jobs)
        .with_cluster_all(!args.orphans_as_noise);
    if let Some(min_bin_freq) = args.bin_seeding {
        config = config.with_bin_seeding(min_bin_freq);
    }
    if let Some(subset) = args.cluster_subset {
        config = config.with_cluster_subset(subset);
    }
    let n_clusters = clustering.combined_clustering(&config)?;

    let is_csv = args
        .output
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        clustering.save_csv(&args.output)?;
    } else {
        save_hdf5(&clustering, args)?;
    }

    println!(
        "Sorted {} events into {} clusters in {:.2}s",
        clustering.len(),
        n_clusters,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

#[cfg(feature = "hdf5")]
fn save_hdf5(clustering: &Clustering, args: &SortArgs) -> Result<()> {
    if args.per_source {
        let outputs: Vec<PathBuf> = args
            .input
            .iter()
            .map(|path| {
                let stem = path.file_stem().map_or_else(
                    || "sorted".to_string(),
                    |stem| stem.to_string_lossy().into_owned(),
                );
                path.with_file_name(format!("{stem}_clustered.hdf5"))
            })
            .collect();
        clustering.save_hdf5_per_source(&outputs)?;
    }
    clustering.save_hdf5(&args.output)?;
    Ok(())
}

#[cfg(not(feature = "hdf5"))]
fn save_hdf5(_clustering: &Clustering, args: &SortArgs) -> Result<()> {
    Err(CliError::Usage(format!(
        "{}: HDF5 output requires the `hdf5` feature; use a .csv output",
        args.output.display()
    )))
}

fn info(probe: &Path, input: Option<&Path>, json: bool) -> Result<()> {
    let config = ProbeConfig::from_file(probe)?;
    let probe = Probe::open(&config, input)?;
    let topology = probe.topology();
    let format = probe.recording().map(|recording| recording.format());

    if json {
        let value = serde_json::json!({
            "kind": probe.kind().name(),
            "channels": probe.channel_count(),
            "frames": probe.frame_count(),
            "fps": probe.fps(),
            "format": format,
            "max_neighbors": topology.max_neighbors(),
            "masked_channels": probe.params().masked_channels,
            "inner_radius": probe.params().inner_radius,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Probe: {}", probe.kind().name());
    println!("Channels: {}", probe.channel_count());
    println!("Max neighbours: {}", topology.max_neighbors());
    println!("Masked channels: {:?}", probe.params().masked_channels);
    println!("Sampling rate: {} Hz", probe.fps());
    match format {
        Some(format) => {
            let frames = probe.frame_count();
            println!("Format: {}", format);
            println!("Frames: {}", frames);
            println!("Duration: {:.2} s", frames as f64 / probe.fps());
        }
        None => println!("No data file (metadata only)"),
    }
    Ok(())
}
