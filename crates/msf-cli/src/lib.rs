//! MSF CLI - batch simulation and tuning sweeps for the estimator.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use msf_core::EstimatorConfig;
use msf_sim::{
    compute_metrics, ekf_tuning_default, ekf_tuning_spec, generate_sensor_data, robot,
    run_filter, sensor_rates, simulate_planar, FilterConfig, FilterMetrics, FilterResult,
    ParamSpec, RobotParams, SensorConfig, SimResult,
};
use nalgebra::Vector3;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Public function that can be called from the main binary
pub fn run_cli_main(args: &[&str]) -> Result<()> {
    let args = Args::parse_from(args);
    main_inner(args)
}

#[derive(Parser, Debug)]
#[command(name = "msf-cli")]
#[command(about = "Planar robot multi-sensor fusion simulator")]
#[command(version)]
pub struct Args {
    /// Output directory
    #[arg(short, long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Output file format
    #[arg(short, long, value_enum, default_value = "csv")]
    pub format: OutputFormat,

    /// Run a single simulation
    #[arg(long)]
    pub single: bool,

    /// Estimator configuration (JSON). Defaults to the reference tuning.
    #[arg(long)]
    pub config: Option<PathBuf>,

    // ── Simulation parameters ─────────────────────────────────
    #[arg(long, default_value_t = 60.0)]
    pub duration: f64,

    #[arg(long, default_value_t = 1.0)]
    pub forward_speed: f64,

    #[arg(long, default_value_t = 0.2)]
    pub speed_amplitude: f64,

    #[arg(long, default_value_t = 0.3)]
    pub yaw_rate_amp: f64,

    #[arg(long, default_value_t = 20.0)]
    pub yaw_rate_period: f64,

    #[arg(long, default_value_t = 0.0)]
    pub climb_rate: f64,

    #[arg(long, default_value_t = 0.0)]
    pub initial_yaw: f64,

    // ── Sensor options ────────────────────────────────────────
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value_t = 1.0)]
    pub noise_scale: f64,

    #[arg(long, default_value_t = 10.0)]
    pub position_hz: f64,

    #[arg(long, default_value_t = 50.0)]
    pub attitude_hz: f64,

    #[arg(long, default_value_t = 100.0)]
    pub velocity_hz: f64,

    // ── Filter options ────────────────────────────────────────
    #[arg(long)]
    pub no_filter: bool,

    /// Seconds excluded from the error metrics while the filter converges
    #[arg(long, default_value_t = 5.0)]
    pub settle_time: f64,

    // ── Sweep options ──────────────────────────────────────────
    /// Tuning parameter to sweep (q_vel_lin_xy, q_vel_lin_z, q_vel_ang,
    /// r_posi, r_atti, r_velo_lin, r_velo_ang)
    #[arg(long, default_value = "r_posi")]
    pub sweep_param: String,

    #[arg(long, default_value_t = 5)]
    pub sweep_steps: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
}

pub fn main_inner(args: Args) -> Result<()> {
    println!("MSF Planar Robot Estimator");
    println!("==========================\n");

    if args.single {
        run_single(&args)?;
    } else {
        run_sweep(&args)?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Single Run
// ---------------------------------------------------------------------------
fn run_single(args: &Args) -> Result<()> {
    println!("Running single simulation...");

    // 1. Setup & Simulate
    let sim = simulate_planar(&build_robot_params(args));
    print_sim_stats(&sim);

    // 2. Sensors + Filter
    let filter = if args.no_filter {
        None
    } else {
        let sensor_data = generate_sensor_data(&sim, &build_sensor_config(args))
            .context("sensor noise configuration")?;
        let config = load_filter_config(args)?;
        println!("Running estimator replay...");
        let res = run_filter(&sim, &sensor_data, &config)?;
        let metrics = compute_metrics(&sim, &res, args.settle_time);
        print_metrics(&res, &metrics);
        Some((res, metrics))
    };

    // 3. Export
    std::fs::create_dir_all(&args.output_dir)?;
    match args.format {
        OutputFormat::Csv => write_csv(&args.output_dir, &sim, filter.as_ref().map(|f| &f.0))?,
        OutputFormat::Json => write_json(&args.output_dir, &sim, filter.as_ref())?,
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Sweep Run
// ---------------------------------------------------------------------------
fn run_sweep(args: &Args) -> Result<()> {
    let name = args.sweep_param.as_str();
    let Some(spec) = ekf_tuning_spec(name) else {
        bail!("unknown sweep parameter: {name}");
    };
    if args.sweep_steps < 2 {
        bail!("--sweep-steps must be at least 2");
    }

    println!("Sweeping {} ({}) over [{:e}, {:e}]", name, spec.label, spec.min, spec.max);

    let sim = simulate_planar(&build_robot_params(args));
    let sensor_data = generate_sensor_data(&sim, &build_sensor_config(args))
        .context("sensor noise configuration")?;
    let base = load_filter_config(args)?;

    // Reference run at the default tuning, for comparison.
    let baseline = ekf_tuning_default(name).unwrap_or(spec.min);
    let mut reference_cfg = base.clone();
    reference_cfg.set_param(name, baseline);
    let reference = compute_metrics(
        &sim,
        &run_filter(&sim, &sensor_data, &reference_cfg)?,
        args.settle_time,
    );
    println!(
        "Baseline {} = {:.3e} -> pos {:.4} m, yaw {:.4} rad",
        name, baseline, reference.pos_rmse, reference.yaw_rmse
    );

    let mut rows = Vec::with_capacity(args.sweep_steps);
    for (i, val) in log_space(spec.min, spec.max, args.sweep_steps)
        .into_iter()
        .enumerate()
    {
        let mut cfg = base.clone();
        cfg.set_param(name, val);

        let res = run_filter(&sim, &sensor_data, &cfg)
            .with_context(|| format!("{name} = {val:e}"))?;
        let m = compute_metrics(&sim, &res, args.settle_time);
        tracing::debug!(param = name, value = val, counters = ?res.counters, "sweep run finished");

        println!(
            "Run {}/{} | {} = {:.3e} -> pos {:.4} m, yaw {:.4} rad, vel {:.4} m/s",
            i + 1,
            args.sweep_steps,
            name,
            val,
            m.pos_rmse,
            m.yaw_rmse,
            m.vel_rmse
        );
        rows.push((val, m, res.counters.update_failures));
    }

    std::fs::create_dir_all(&args.output_dir)?;
    let path = args.output_dir.join("sweep_summary.csv");
    let mut wtr = csv::Writer::from_path(&path)
        .with_context(|| format!("creating {}", path.display()))?;
    wtr.write_record([
        name,
        "pos_rmse",
        "yaw_rmse",
        "vel_rmse",
        "final_pos_error",
        "update_failures",
    ])?;
    for (val, m, failures) in &rows {
        wtr.write_record(&[
            format!("{:.6e}", val),
            format!("{:.6}", m.pos_rmse),
            format!("{:.6}", m.yaw_rmse),
            format!("{:.6}", m.vel_rmse),
            format!("{:.6}", m.final_pos_error),
            failures.to_string(),
        ])?;
    }
    wtr.flush()?;

    if let Some((best, m, _)) = rows
        .iter()
        .min_by(|a, b| a.1.pos_rmse.total_cmp(&b.1.pos_rmse))
    {
        println!(
            "\nBest {} = {:.3e} (pos rmse {:.4} m, {:+.1} % vs baseline)",
            name,
            best,
            m.pos_rmse,
            relative_change(reference.pos_rmse, m.pos_rmse) * 100.0
        );
    }
    println!("Sweep complete. Summary at {:?}", path);
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `steps` log-spaced values from `min` to `max` inclusive.
pub fn log_space(min: f64, max: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![min],
        _ => {
            let (lo, hi) = (min.ln(), max.ln());
            (0..steps)
                .map(|i| (lo + (hi - lo) * i as f64 / (steps - 1) as f64).exp())
                .collect()
        }
    }
}

fn relative_change(reference: f64, value: f64) -> f64 {
    if reference > 0.0 {
        value / reference - 1.0
    } else {
        0.0
    }
}

/// Clamp a command-line value into its bounds, warning when it moves.
fn bounded(spec: &ParamSpec, value: f64) -> f64 {
    let v = spec.clamp(value);
    if v != value {
        tracing::warn!(value, clamped = v, "{} out of range", spec.label);
    }
    v
}

/// Like [`bounded`], but a rate of zero or below switches the sensor off.
fn bounded_rate(spec: &ParamSpec, hz: f64) -> f64 {
    if hz <= 0.0 {
        0.0
    } else {
        bounded(spec, hz)
    }
}

fn build_robot_params(args: &Args) -> RobotParams {
    RobotParams {
        duration: bounded(&robot::DURATION, args.duration),
        forward_speed: bounded(&robot::FORWARD_SPEED, args.forward_speed),
        speed_amplitude: bounded(&robot::SPEED_AMPLITUDE, args.speed_amplitude),
        yaw_rate_amp: bounded(&robot::YAW_RATE_AMP, args.yaw_rate_amp),
        yaw_rate_period: bounded(&robot::YAW_RATE_PERIOD, args.yaw_rate_period),
        climb_rate: bounded(&robot::CLIMB_RATE, args.climb_rate),
        initial_position: Vector3::zeros(),
        initial_yaw: bounded(&robot::INITIAL_YAW, args.initial_yaw),
    }
}

fn build_sensor_config(args: &Args) -> SensorConfig {
    SensorConfig {
        noise_scale: args.noise_scale.max(0.0),
        position_hz: bounded_rate(&sensor_rates::POSITION_HZ, args.position_hz),
        attitude_hz: bounded_rate(&sensor_rates::ATTITUDE_HZ, args.attitude_hz),
        velocity_hz: bounded_rate(&sensor_rates::VELOCITY_HZ, args.velocity_hz),
        seed: args.seed,
        ..Default::default()
    }
}

fn load_filter_config(args: &Args) -> Result<FilterConfig> {
    let estimator = match &args.config {
        Some(path) => EstimatorConfig::load(path)
            .with_context(|| format!("loading estimator config {}", path.display()))?,
        None => EstimatorConfig::default(),
    };
    Ok(FilterConfig::new(estimator))
}

fn print_sim_stats(sim: &SimResult) {
    let distance: f64 = sim
        .pos
        .windows(2)
        .map(|w| (w[1] - w[0]).norm())
        .sum();

    println!("\nSimulation Stats:");
    println!("  Steps:     {}", sim.len());
    println!("  Duration:  {:.2} s", sim.duration());
    println!("  Distance:  {:.2} m", distance);
    println!("-----------------------------");
}

fn print_metrics(res: &FilterResult, m: &FilterMetrics) {
    println!("\nEstimator:");
    println!("  Cycles:       {}", res.counters.cycles);
    println!("  Corrections:  {}", res.counters.corrections);
    println!(
        "  Failures:     {} predict, {} update",
        res.counters.predict_failures, res.counters.update_failures
    );
    println!("  Pos RMSE:     {:.4} m", m.pos_rmse);
    println!("  Yaw RMSE:     {:.4} rad", m.yaw_rmse);
    println!("  Vel RMSE:     {:.4} m/s", m.vel_rmse);
    println!("  Within 3σ:    {:.1} %", m.pos_within_3sigma * 100.0);
    println!("-----------------------------");
}

/// One row per estimator cycle, truth sampled at the same instant.
#[derive(Debug, Serialize)]
struct SampleRow {
    time: f64,
    true_x: f64,
    true_y: f64,
    true_z: f64,
    true_yaw: f64,
    true_vx: f64,
    true_vy: f64,
    true_vz: f64,
    true_wz: f64,
    est_x: Option<f64>,
    est_y: Option<f64>,
    est_z: Option<f64>,
    est_yaw: Option<f64>,
    est_vx: Option<f64>,
    est_vy: Option<f64>,
    est_vz: Option<f64>,
    est_wz: Option<f64>,
    sigma_x: Option<f64>,
    sigma_y: Option<f64>,
    sigma_yaw: Option<f64>,
}

fn sample_rows(sim: &SimResult, filter: Option<&FilterResult>) -> Vec<SampleRow> {
    let truth_row = |time: f64| {
        let i = sim.index_at(time);
        let (p, v) = (sim.pos[i], sim.vel_world[i]);
        SampleRow {
            time,
            true_x: p.x,
            true_y: p.y,
            true_z: p.z,
            true_yaw: sim.yaw[i],
            true_vx: v.x,
            true_vy: v.y,
            true_vz: v.z,
            true_wz: sim.yaw_rate[i],
            est_x: None,
            est_y: None,
            est_z: None,
            est_yaw: None,
            est_vx: None,
            est_vy: None,
            est_vz: None,
            est_wz: None,
            sigma_x: None,
            sigma_y: None,
            sigma_yaw: None,
        }
    };

    match filter {
        // Truth only: decimate to 100 Hz.
        None => (0..sim.len())
            .step_by(10)
            .map(|i| truth_row(sim.time[i]))
            .collect(),
        Some(f) => f
            .time
            .iter()
            .enumerate()
            .map(|(k, &t)| {
                let (p, v) = (f.position[k], f.vel_lin_world[k]);
                SampleRow {
                    est_x: Some(p.x),
                    est_y: Some(p.y),
                    est_z: Some(p.z),
                    est_yaw: Some(f.yaw[k]),
                    est_vx: Some(v.x),
                    est_vy: Some(v.y),
                    est_vz: Some(v.z),
                    est_wz: Some(f.vel_ang_world[k]),
                    sigma_x: Some(f.pos_sigma[k].x),
                    sigma_y: Some(f.pos_sigma[k].y),
                    sigma_yaw: Some(f.yaw_sigma[k]),
                    ..truth_row(t)
                }
            })
            .collect(),
    }
}

fn write_csv(dir: &Path, sim: &SimResult, filter: Option<&FilterResult>) -> Result<()> {
    let path = dir.join("simulation.csv");
    let mut wtr = csv::Writer::from_path(&path)
        .with_context(|| format!("creating {}", path.display()))?;
    for row in sample_rows(sim, filter) {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    println!("Data written to {:?}", path);
    Ok(())
}

fn write_json(
    dir: &Path,
    sim: &SimResult,
    filter: Option<&(FilterResult, FilterMetrics)>,
) -> Result<()> {
    let path = dir.join("simulation.json");
    let doc = serde_json::json!({
        "metrics": filter.map(|f| f.1),
        "counters": filter.map(|f| f.0.counters),
        "samples": sample_rows(sim, filter.map(|f| &f.0)),
    });
    std::fs::write(&path, serde_json::to_string_pretty(&doc)?)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Data written to {:?}", path);
    Ok(())
}
