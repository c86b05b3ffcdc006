//! MSF - planar robot multi-sensor fusion estimator

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use msf_core::quat_simp::wrap_angle;
use msf_core::{
    ChannelPublisher, Clock, CycleDriver, EstimatorConfig, LogPublisher, MonotonicClock,
    MsfStateEstimator,
};
use msf_sim::{generate_sensor_data, simulate_planar, RobotParams, SensorConfig, SensorSample};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Time origin of the live clock. Keeps every stamp clear of the sentinel.
const ORIGIN_US: u64 = 1_000_000;

#[derive(Parser)]
#[command(name = "msf")]
#[command(about = "Planar robot multi-sensor fusion estimator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CLI batch/single simulation mode
    Cli {
        /// Pass remaining arguments to msf-cli
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run the estimator live against simulated sensor threads
    Run {
        /// Wall-clock seconds to run
        #[arg(short, long, default_value_t = 10.0)]
        duration: f64,

        /// Estimator configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Cli { args }) => {
            // Pass through to msf-cli
            let cli_args: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
            run_cli(&cli_args)
        }
        Some(Commands::Run {
            duration,
            config,
            seed,
        }) => run_live(duration, config, seed),
        None => run_live(10.0, None, 42),
    }
}

fn run_cli(args: &[&str]) -> anyhow::Result<()> {
    let mut full_args = vec!["msf-cli"];
    full_args.extend(args);

    match msf_cli::run_cli_main(&full_args) {
        Ok(_) => Ok(()),
        Err(e) => {
            eprintln!("CLI error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Replay one sensor stream in real time, staging each sample when the
/// clock reaches it.
fn spawn_producer<T, F>(
    name: &str,
    samples: Vec<SensorSample<T>>,
    clock: Arc<MonotonicClock>,
    running: Arc<AtomicBool>,
    stage: F,
) -> std::io::Result<thread::JoinHandle<usize>>
where
    T: Copy + Send + 'static,
    F: Fn(u64, T) + Send + 'static,
{
    thread::Builder::new()
        .name(format!("sensor-{name}"))
        .spawn(move || {
            let mut staged = 0;
            for s in samples {
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let due = ORIGIN_US + (s.time * 1e6).round() as u64;
                let now = clock.now_us();
                if due > now {
                    thread::sleep(Duration::from_micros(due - now));
                }
                stage(clock.now_us(), s.value);
                staged += 1;
            }
            staged
        })
}

fn run_live(duration: f64, config: Option<PathBuf>, seed: u64) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => EstimatorConfig::load(&path)
            .with_context(|| format!("loading estimator config {}", path.display()))?,
        None => EstimatorConfig::default(),
    };

    // Ground truth and the sensor streams it produces.
    let sim = Arc::new(simulate_planar(&RobotParams {
        duration,
        ..Default::default()
    }));
    let data = generate_sensor_data(
        &sim,
        &SensorConfig {
            seed,
            ..Default::default()
        },
    )?;

    let estimator = Arc::new(MsfStateEstimator::from_config(&config)?);
    let clock = Arc::new(MonotonicClock::with_origin(ORIGIN_US));
    let running = Arc::new(AtomicBool::new(true));

    tracing::info!(
        duration,
        rate_hz = config.state_estim_loop_freq,
        world = %config.world_frame,
        robot = %config.robot_frame,
        "starting live estimator"
    );

    // Channel feeds the scorer; the log shows one estimate per second.
    let (channel, rx) = ChannelPublisher::unbounded();
    let log = LogPublisher::new(config.state_estim_loop_freq.round().max(1.0) as u64);
    let driver = CycleDriver::spawn(
        estimator.clone(),
        config.period(),
        clock.clone(),
        (channel, log),
        running.clone(),
    )?;

    let producers = {
        let (e1, e2, e3) = (estimator.clone(), estimator.clone(), estimator.clone());
        [
            spawn_producer("position", data.position, clock.clone(), running.clone(), move |t, p| {
                e1.stage_position(t, p)
            })?,
            spawn_producer("attitude", data.attitude, clock.clone(), running.clone(), move |t, q| {
                e2.stage_attitude_quat(t, q)
            })?,
            spawn_producer("velocity", data.velocity, clock.clone(), running.clone(), move |t, v| {
                e3.stage_velocity(t, v)
            })?,
        ]
    };

    // Score every published estimate against the truth at its timestamp.
    let consumer = {
        let sim = sim.clone();
        thread::Builder::new()
            .name("msf-consumer".into())
            .spawn(move || {
                let (mut n, mut pos_sq, mut yaw_sq) = (0usize, 0.0, 0.0);
                let mut last = None;
                for out in rx {
                    let t = out.timestamp_us.saturating_sub(ORIGIN_US) as f64 * 1e-6;
                    let i = sim.index_at(t);
                    pos_sq += (out.position - sim.pos[i]).norm_squared();
                    yaw_sq += wrap_angle(out.yaw - sim.yaw[i]).powi(2);
                    n += 1;
                    last = Some(out);
                }
                (n, pos_sq, yaw_sq, last)
            })?
    };

    let mut staged = 0;
    for p in producers {
        staged += p.join().map_err(|_| anyhow!("sensor thread panicked"))?;
    }
    // Let the last samples reach an update.
    thread::sleep(config.period() * 2);
    running.store(false, Ordering::Relaxed);

    let stats = driver
        .join()
        .map_err(|_| anyhow!("cycle driver panicked"))?;
    let (n, pos_sq, yaw_sq, last) = consumer
        .join()
        .map_err(|_| anyhow!("consumer thread panicked"))?;

    println!("\nLive run:");
    println!("  Samples staged:  {}", staged);
    println!("  Cycles:          {}", stats.cycles);
    println!("  Corrections:     {}", stats.corrections);
    println!(
        "  Failures:        {} predict, {} update",
        stats.predict_failures, stats.update_failures
    );
    println!("  Missed ticks:    {}", stats.missed_deadlines);
    if n > 0 {
        println!("  Pos RMSE:        {:.4} m", (pos_sq / n as f64).sqrt());
        println!("  Yaw RMSE:        {:.4} rad", (yaw_sq / n as f64).sqrt());
    }
    if let Some(out) = last {
        let cov = out.pose_covariance();
        println!(
            "  Final pose:      ({:.3}, {:.3}, {:.3}) yaw {:.3} rad, σ_xy {:.3} m",
            out.position.x,
            out.position.y,
            out.position.z,
            out.yaw,
            (cov[(0, 0)] + cov[(1, 1)]).max(0.0).sqrt()
        );
    }

    Ok(())
}
