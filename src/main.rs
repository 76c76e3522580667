use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};

use stride_tracker_rs::calibration::{CalibrationEstimator, CalibrationResult, IntervalMeasurement};
use stride_tracker_rs::config::TrackerConfig;
use stride_tracker_rs::presentation::{LogSink, PresentationSink, StatusSnapshot};
use stride_tracker_rs::runner::{run_calibration, run_mode, scaled_period, CalibrationRun, RunEnd};
use stride_tracker_rs::sensors::{Motion, ReplaySource, SensorSource, SyntheticWalkSource};
use stride_tracker_rs::session::{Orchestrator, SessionMode};

#[derive(Parser, Debug)]
#[command(name = "stride_tracker")]
#[command(about = "Accelerometer dead-reckoning pedometer", long_about = None)]
struct Cli {
    /// JSON tracker configuration (defaults apply to missing fields)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run the tick timer this many times faster than real time
    #[arg(long, global = true, default_value = "1.0")]
    speedup: f64,

    /// Directory for the final status snapshot
    #[arg(long, global = true, default_value = "stride_tracker_sessions")]
    output_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Calibrate on synthetic walks, then track a scripted walk
    Simulate(SimulateArgs),
    /// Track a recorded sensor log
    Replay(ReplayArgs),
    /// Compute a calibration from measured walk times and save it
    Calibrate(CalibrateArgs),
}

#[derive(ClapArgs, Debug)]
struct CalibrationWalks {
    /// Seconds taken for each calibration walk
    #[arg(long, value_delimiter = ',', default_value = "3.2,3.5,3.8")]
    walk_secs: Vec<f64>,
}

#[derive(ClapArgs, Debug)]
struct SimulateArgs {
    #[command(flatten)]
    walks: CalibrationWalks,

    /// Use a saved calibration instead of synthetic walks
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Standing time before and after the walk (seconds)
    #[arg(long, default_value = "2.0")]
    idle_secs: f64,

    /// Walking time (seconds)
    #[arg(long, default_value = "10.0")]
    walk_time: f64,

    /// Drop every n-th sample
    #[arg(long)]
    dropout_every: Option<u64>,
}

#[derive(ClapArgs, Debug)]
struct ReplayArgs {
    /// Path to a {"readings": [...]} log, optionally .gz
    #[arg(long)]
    log: PathBuf,

    /// Saved calibration
    #[arg(long, conflicts_with = "velocity")]
    calibration: Option<PathBuf>,

    /// Walking velocity (m/s) to use without a calibration
    #[arg(long)]
    velocity: Option<f64>,
}

#[derive(ClapArgs, Debug)]
struct CalibrateArgs {
    /// Measured seconds for each walk over the reference distance
    #[arg(long, value_delimiter = ',', required = true)]
    times: Vec<f64>,

    /// Where to write the calibration JSON
    #[arg(long, default_value = "calibration.json")]
    out: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if !(cli.speedup > 0.0 && cli.speedup.is_finite()) {
        bail!("--speedup must be a positive finite factor, got {}", cli.speedup);
    }

    let config = match cli.config.as_ref() {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    config.validate()?;

    println!("[{}] Stride Tracker Starting", ts_now());
    println!("  Detector: {:?}", config.detector);
    println!("  Displacement: {:?}", config.displacement_policy);
    println!("  Speedup: {}x", cli.speedup);

    let status = match &cli.command {
        Command::Simulate(args) => simulate(&cli, config, args).await?,
        Command::Replay(args) => replay(&cli, config, args).await?,
        Command::Calibrate(args) => {
            let result = calibrate_from_times(&config, &args.times)?;
            result.save(&args.out)?;
            println!("[{}] Calibration saved to {}", ts_now(), args.out.display());
            return Ok(());
        }
    };

    std::fs::create_dir_all(&cli.output_dir)?;
    let path = format!("{}/status_{}.json", cli.output_dir, ts_now_clean());
    status.save(&path)?;
    println!("[{}] Status written to {}", ts_now(), path);
    Ok(())
}

fn calibrate_from_times(config: &TrackerConfig, times: &[f64]) -> Result<CalibrationResult> {
    let mut estimator = CalibrationEstimator::from_config(config);
    for &elapsed_secs in times.iter().take(estimator.interval_count()) {
        let velocity = estimator.record_interval(IntervalMeasurement {
            elapsed_secs,
            ..IntervalMeasurement::default()
        })?;
        println!("[{}] Walk {:.2}s -> {:.3} m/s", ts_now(), elapsed_secs, velocity);
    }
    estimator.result().with_context(|| {
        format!(
            "{} walk times given, {} needed",
            times.len(),
            estimator.interval_count()
        )
    })
}

/// Drive one calibration walk per entry in `walk_secs`
async fn calibrate<S: SensorSource, P: PresentationSink>(
    orch: &mut Orchestrator<S, P>,
    walk_secs: &[f64],
    speedup: f64,
) -> Result<CalibrationResult> {
    match run_calibration(orch, walk_secs, speedup, shutdown_signal()).await? {
        CalibrationRun::Complete(result) => {
            println!(
                "[{}] Calibrated {:.3} m/s over {} walks",
                ts_now(),
                result.average_velocity,
                result.sample_count
            );
            Ok(result)
        }
        CalibrationRun::Interrupted { completed_walks } => {
            bail!("calibration interrupted after {} walks", completed_walks)
        }
    }
}

async fn simulate(
    cli: &Cli,
    config: TrackerConfig,
    args: &SimulateArgs,
) -> Result<StatusSnapshot> {
    let dt = config.sample_interval_secs;
    let mut source = SyntheticWalkSource::new(vec![(Motion::Walking, u64::MAX)], dt);
    if let Some(every) = args.dropout_every {
        source = source.with_dropouts(every);
    }
    let mut orch = Orchestrator::new(config, source, LogSink::default())?;

    match args.calibration.as_ref() {
        Some(path) => orch = orch.with_calibration(load_calibration(path)?),
        None => {
            calibrate(&mut orch, &args.walks.walk_secs, cli.speedup).await?;
        }
    }

    let segments = [
        (Motion::Stationary, args.idle_secs),
        (Motion::Walking, args.walk_time),
        (Motion::Stationary, args.idle_secs),
    ];
    let script = segments
        .iter()
        .map(|(motion, secs)| (*motion, (secs / dt).round() as u64))
        .collect();
    orch.source_mut().queue(script);

    track(cli, &mut orch).await
}

async fn replay(
    cli: &Cli,
    config: TrackerConfig,
    args: &ReplayArgs,
) -> Result<StatusSnapshot> {
    let source = ReplaySource::load(&args.log)
        .with_context(|| format!("loading log {}", args.log.display()))?;
    let config = TrackerConfig {
        fallback_velocity: args.velocity.or(config.fallback_velocity),
        ..config
    };
    let mut orch = Orchestrator::new(config, source, LogSink::default())?;
    if let Some(path) = args.calibration.as_ref() {
        orch = orch.with_calibration(load_calibration(path)?);
    }

    track(cli, &mut orch).await
}

async fn track<S: SensorSource, P: PresentationSink>(
    cli: &Cli,
    orch: &mut Orchestrator<S, P>,
) -> Result<StatusSnapshot> {
    let token = orch.start_walk()?;
    let period = scaled_period(orch.tick_period(SessionMode::WalkTracking), cli.speedup);
    println!("[{}] Tracking walk...", ts_now());

    let summary = run_mode(orch, token, period, None, shutdown_signal()).await;
    let status = orch.status();
    let walking_transitions = status.walking_transitions;
    let total = orch.stop_walk()?;

    println!("\n=== Final Stats ===");
    println!("Ticks: {}", summary.ticks);
    println!("Walks detected: {}", walking_transitions);
    println!("Displacement: {:.2} m", total);
    if summary.end == RunEnd::Shutdown {
        println!("(interrupted)");
    }
    Ok(status)
}

fn load_calibration(path: &Path) -> Result<CalibrationResult> {
    let result = CalibrationResult::load(path)
        .with_context(|| format!("loading calibration {}", path.display()))?;
    println!(
        "[{}] Loaded calibration: {:.3} m/s over {} walks",
        ts_now(),
        result.average_velocity,
        result.sample_count
    );
    Ok(result)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
