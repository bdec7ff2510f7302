//! EMG Trigger Agent CLI
//!
//! Reads an EMG sensor, confirms muscle-activation triggers and logs the
//! raw stream.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use emg_trigger_agent::{
    collector::{
        open_device, Acquisition, AcquisitionConfig, ReplaySource, SampleField, SampleSource,
    },
    config::Config,
    core::{BandDetector, ClassifierDetector, Coordinator, Detector, DenseNetwork, TriggerEvent},
    stats::create_shared_stats_with_persistence,
    storage::{self, LiveStream, SessionInfo, StreamLogger},
    VERSION,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "emg-trigger")]
#[command(version = VERSION)]
#[command(about = "Debounced EMG trigger detection with stream logging", long_about = None)]
struct Cli {
    /// Config file (defaults to the per-user config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Classify feature windows with the trained model
    Classifier,
    /// Check the window mode against a threshold band
    Band,
}

#[derive(Subcommand)]
enum Commands {
    /// Read samples and detect triggers
    Run {
        /// Device to read (overrides config)
        #[arg(long, conflicts_with = "replay")]
        device: Option<PathBuf>,

        /// Replay recorded device lines instead of reading a device
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Delay between replayed lines in milliseconds
        #[arg(long, default_value = "0")]
        pace_ms: u64,

        /// Detection mode
        #[arg(long, value_enum, default_value = "classifier")]
        mode: Mode,

        /// Classifier weights (overrides config)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Session identifier for the stream log
        #[arg(long)]
        session_id: Option<String>,

        /// Level number for the stream log
        #[arg(long, default_value = "1")]
        level: u32,

        /// Feed the detector from the write-through live stream instead of
        /// the sample channel
        #[arg(long)]
        live: bool,

        /// Disable stream logging
        #[arg(long)]
        no_log: bool,
    },

    /// Extract labelled features from a recorded stream file
    Features {
        /// Stream file (defaults to the one in the data directory)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output file (defaults to emg_features.csv in the data directory)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Values per segment
        #[arg(long, default_value = "50")]
        segment: usize,

        /// Component to use when values are (filtered, envelope) pairs
        #[arg(long, default_value = "filtered")]
        field: String,

        /// Average each level's recording over this many equal parts first,
        /// saving the result to emg_streamed_cleaned.csv
        #[arg(long)]
        average: Option<usize>,

        /// Per-session part count as SESSION=N (repeatable)
        #[arg(long, value_parser = parse_session_segments, requires = "average")]
        average_session: Vec<(String, usize)>,
    },

    /// Record the result of a completed level
    Session {
        #[arg(long)]
        session_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        age: u32,
        #[arg(long, default_value = "")]
        medical_history: String,
        #[arg(long)]
        level: u32,
        /// Level duration in seconds
        #[arg(long)]
        duration: f64,
        /// Ease rating from 1 to 5
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        rating: u8,
    },

    /// Show configuration and cumulative statistics
    Status,

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(ref path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("loading configuration")?;

    match cli.command {
        Commands::Run {
            device,
            replay,
            pace_ms,
            mode,
            model,
            session_id,
            level,
            live,
            no_log,
        } => {
            let source: Box<dyn SampleSource> = match replay {
                Some(path) => {
                    let replay = ReplaySource::from_path(&path)?;
                    Box::new(replay.with_pacing(Duration::from_millis(pace_ms)))
                }
                None => Box::new(open_device(device.as_ref().unwrap_or(&config.device_path))?),
            };
            let session_id =
                session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()[..8].to_string());
            let options = RunOptions {
                mode,
                model: model.unwrap_or_else(|| config.model_path.clone()),
                session_id,
                level,
                live,
                log: !no_log,
            };
            cmd_run(&config, source, options)
        }
        Commands::Features {
            input,
            output,
            segment,
            field,
            average,
            average_session,
        } => {
            let averaging = average.map(|segments| {
                average_session
                    .into_iter()
                    .fold(storage::SegmentAveraging::new(segments), |a, (id, n)| {
                        a.with_session(id, n)
                    })
            });
            let options = FeatureOptions {
                input,
                output,
                segment,
                field,
                averaging,
            };
            cmd_features(&config, options)
        }
        Commands::Session {
            session_id,
            name,
            age,
            medical_history,
            level,
            duration,
            rating,
        } => {
            let info = SessionInfo {
                session_id,
                name,
                age,
                medical_history,
                level_number: level,
                duration_seconds: duration,
                ease_rating: rating,
            };
            cmd_session(&config, &info)
        }
        Commands::Status => cmd_status(&config),
        Commands::Config => cmd_config(&config),
    }
}

struct RunOptions {
    mode: Mode,
    model: PathBuf,
    session_id: String,
    level: u32,
    live: bool,
    log: bool,
}

fn cmd_run(config: &Config, source: Box<dyn SampleSource>, options: RunOptions) -> Result<()> {
    println!("EMG Trigger Agent v{VERSION}");
    println!();

    config.validate()?;
    if let Err(e) = config.ensure_directories() {
        warn!("Could not create data directory: {e}");
    }

    let stats = create_shared_stats_with_persistence(config.data_path.join("stats.json"));

    // Classifier availability is checked before any thread starts
    let (detector, field): (Box<dyn Detector>, SampleField) = match options.mode {
        Mode::Classifier => {
            let network = DenseNetwork::load(&options.model)?;
            let detector = ClassifierDetector::new(
                Box::new(network),
                config.classifier_window,
                config.ar_order,
                config.classifier_policy(),
            )?;
            (Box::new(detector), config.input_field)
        }
        Mode::Band => (
            Box::new(BandDetector::new(
                config.band_window,
                config.band_threshold,
                config.band_pct,
                config.band_policy(),
            )),
            SampleField::Signal,
        ),
    };

    println!("Source: {}", source.describe());
    println!("Session: {} (level {})", options.session_id, options.level);
    println!("Data directory: {}", config.data_path.display());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")?;

    // In live mode the detector reads the latest-sample slot, not the channel
    let acquisition_config = AcquisitionConfig {
        forward_samples: !options.live,
        stop_timeout: config.stop_timeout,
        ..AcquisitionConfig::default()
    };
    let mut acquisition = Acquisition::with_config(source, stats.clone(), acquisition_config);
    acquisition.start()?;
    let latest = acquisition.latest();

    let (event_tx, event_rx) = crossbeam_channel::unbounded::<TriggerEvent>();
    let printer = thread::spawn(move || {
        for event in event_rx {
            println!(
                "[{:.3}] Trigger: {} ({:?}, {} windows)",
                event.timestamp,
                if event.label { 1 } else { 0 },
                event.mode,
                event.decisions
            );
        }
    });

    let mut coordinator = Coordinator::new(detector, field, stats.clone()).with_events(event_tx);
    let mut logger = StreamLogger::new(&config.data_path)
        .with_interval(config.logging_interval)
        .with_stats(stats.clone());

    let result = if options.live {
        // Write-through logging drives the detector; only one writer per file
        let sampled = latest.clone();
        let get_value = move || sampled.load().and_then(|s| s.field(field));
        let values = if options.log {
            logger.live_stream(
                &options.session_id,
                options.level,
                get_value,
                config.logging_interval,
            )
        } else {
            LiveStream::unlogged(get_value, config.logging_interval)
        };
        let values = values.take_while(|_| acquisition.is_running());
        coordinator.run_values(values, &running)
    } else {
        if options.log {
            let sampled = latest.clone();
            logger.start_stream(&options.session_id, options.level, move || {
                sampled.load().map(|s| s.reading())
            })?;
        }
        coordinator.run(acquisition.receiver(), &running)
    };

    // Shutdown order: device, then logger flush, then the coordinator outputs
    println!();
    println!("Stopping...");
    acquisition.stop();
    logger.stop_stream(config.stop_timeout);
    drop(coordinator);
    let _ = printer.join();

    if let Some(error) = logger.error() {
        warn!("Stream logging degraded: {error}");
    }
    if let Err(e) = stats.save() {
        warn!("Could not save statistics: {e}");
    }

    let emitted = result?;
    info!(emitted, "Run finished");
    println!();
    println!("{}", stats.summary());
    Ok(())
}

fn parse_session_segments(arg: &str) -> Result<(String, usize), String> {
    let (id, n) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected SESSION=N, got {arg:?}"))?;
    let n = n
        .trim()
        .parse()
        .map_err(|e| format!("invalid part count {n:?}: {e}"))?;
    Ok((id.trim().to_string(), n))
}

struct FeatureOptions {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    segment: usize,
    field: String,
    averaging: Option<storage::SegmentAveraging>,
}

fn cmd_features(config: &Config, options: FeatureOptions) -> Result<()> {
    let Some(field) = SampleField::from_name(&options.field) else {
        bail!(
            "unknown field {:?}; expected filtered or envelope",
            options.field
        );
    };
    let input = options
        .input
        .unwrap_or_else(|| config.data_path.join(storage::STREAM_FILE));
    let output = options
        .output
        .unwrap_or_else(|| config.data_path.join("emg_features.csv"));

    let groups = match options.averaging {
        Some(ref averaging) => {
            if averaging.segments == 0 || averaging.per_session.values().any(|&n| n == 0) {
                bail!("part counts must be at least 1");
            }
            let cleaned: Vec<_> = storage::read_reading_groups(&input)?
                .iter()
                .map(|g| g.averaged(averaging))
                .collect();
            let cleaned_path = config.data_path.join(storage::CLEANED_FILE);
            storage::append_cleaned(&cleaned_path, &cleaned)?;
            println!("Averaged recordings saved to {}", cleaned_path.display());
            cleaned.iter().map(|g| g.to_stream_group(field)).collect()
        }
        None => storage::read_stream_groups(&input, field)?,
    };
    println!(
        "Read {} session/level groups from {}",
        groups.len(),
        input.display()
    );

    let rows = storage::segment_features(&groups, options.segment, config.ar_order)?;
    storage::write_features(&output, &rows)?;
    println!("Features saved to {}", output.display());
    Ok(())
}

fn cmd_session(config: &Config, info: &SessionInfo) -> Result<()> {
    config.ensure_directories()?;
    let logger = StreamLogger::new(&config.data_path);
    logger.ensure_log_header()?;
    logger.log_level_result(info)?;
    println!(
        "Recorded level {} of session {} in {}",
        info.level_number,
        info.session_id,
        logger.info_path().display()
    );
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("EMG Trigger Agent Status");
    println!("========================");
    println!();
    println!("Configuration:");
    println!("  Device: {}", config.device_path.display());
    println!("  Model: {}", config.model_path.display());
    println!("  Logging interval: {:?}", config.logging_interval);
    println!(
        "  Windows: classifier {}, band {}",
        config.classifier_window, config.band_window
    );
    println!();

    let stats_path = config.data_path.join("stats.json");
    if stats_path.exists() {
        let content = std::fs::read_to_string(&stats_path)?;
        let stats: serde_json::Value = serde_json::from_str(&content)?;
        println!("Cumulative Statistics:");
        for key in [
            "samples_read",
            "parse_errors",
            "samples_dropped",
            "windows_classified",
            "confirmations",
            "rows_logged",
        ] {
            if let Some(value) = stats.get(key) {
                println!("  {key}: {value}");
            }
        }
    } else {
        println!("No previous run data found.");
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
