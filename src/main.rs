mod case;
mod config;
mod design;
mod ego;
mod handoff;
mod io;
mod objective;
mod runner;

#[cfg(test)]
mod testing;
#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};
use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::design::{DesignVector, N_DESIGN};
use crate::handoff::AeroCoefficients;
use crate::objective::PenalizedObjective;
use crate::runner::ScriptRunner;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SCHEMA_VERSION: &str = "1.0.0";
const PROGRAM_ID: &str = "foilopt";
const LOG_ENV: &str = "FOILOPT_LOG";

#[derive(Parser, Debug)]
#[command(name = "foilopt")]
#[command(version)]
#[command(about = "Surrogate-based airfoil optimization around an external CFD case")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Path to TOML configuration file (workflow defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Output path (file or directory)
    #[arg(short, long, global = true)]
    out: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the EGO loop, then re-solve the optimum
    Optimize {
        /// Override the number of infill iterations
        #[arg(long)]
        n_iter: Option<usize>,
        /// Override the random seed
        #[arg(long)]
        seed: Option<u64>,
        /// Generate JSON result bundle
        #[arg(long)]
        json: bool,
    },
    /// Evaluate the penalized objective for one design
    Evaluate {
        /// Nine comma-separated values: eight shape offsets, then the angle of attack
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        x: Option<Vec<f64>>,
        /// Generate JSON result bundle
        #[arg(long)]
        json: bool,
    },
    /// Write the solver setup documents consumed by the run script
    Case,
    /// Show the design and result currently on disk in the case
    Status,
    /// Validate a configuration file
    Validate,
    /// Print version information
    Version,
}

// ============================================================================
// JSON Output Structures
// ============================================================================

#[derive(Serialize)]
struct Manifest {
    schema_version: String,
    program_version: String,
    program_id: String,
    timestamp_utc: String,
    platform: String,
    config_hash: String,
    config_snapshot: config::Root,
}

#[derive(Serialize)]
struct AeroSummary {
    cd: f64,
    cl: f64,
    objective: f64,
}

#[derive(Serialize)]
struct EvaluationOutput {
    manifest: Manifest,
    design: Vec<f64>,
    patch_velocity: [f64; 2],
    result: AeroSummary,
    wall_time_ms: f64,
}

#[derive(Serialize)]
struct OptimizationOutput {
    manifest: Manifest,
    settings: ego::EgoSettings,
    bounds: Vec<(f64, f64)>,
    x_opt: Vec<f64>,
    y_opt: f64,
    confirmed: Option<AeroSummary>,
    n_evaluations: usize,
    n_failed: usize,
    wall_time_ms: f64,
}

// ============================================================================
// Helper Functions
// ============================================================================

fn compute_hash(data: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Proleptic Gregorian (year, month, day) for a day count since 1970-01-01
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    // shift the epoch to 0000-03-01 so leap days close each 400-year era
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

fn get_timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let (year, month, day) = civil_from_days(secs.div_euclid(86_400));
    let tod = secs.rem_euclid(86_400);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        day,
        tod / 3600,
        tod % 3600 / 60,
        tod % 60
    )
}

fn create_manifest(cfg: &config::Root, cfg_text: &str) -> Manifest {
    Manifest {
        schema_version: SCHEMA_VERSION.to_string(),
        program_version: VERSION.to_string(),
        program_id: PROGRAM_ID.to_string(),
        timestamp_utc: get_timestamp(),
        platform: std::env::consts::OS.to_string(),
        config_hash: compute_hash(cfg_text),
        config_snapshot: cfg.clone(),
    }
}

fn load_config(path: Option<&str>) -> Result<(config::Root, String)> {
    let (cfg, cfg_text) = match path {
        Some(p) => {
            let text = fs::read_to_string(p)
                .with_context(|| format!("failed to read config: {}", p))?;
            let cfg: config::Root = toml::from_str(&text)
                .with_context(|| format!("failed to parse config: {}", p))?;
            (cfg, text)
        }
        None => {
            let cfg = config::Root::default();
            let text = toml::to_string(&cfg)?;
            (cfg, text)
        }
    };
    cfg.validate()?;
    info!("project {} (config {})", cfg.project.name, path.unwrap_or("<defaults>"));
    Ok((cfg, cfg_text))
}

fn build_objective(cfg: &config::Root) -> PenalizedObjective<ScriptRunner> {
    let runner = ScriptRunner::new(&cfg.case.dir)
        .scripts(&cfg.case.run_script, &cfg.case.clean_script)
        .dummy_arg(&cfg.case.dummy_arg)
        .check_exit_status(cfg.case.check_exit_status);
    PenalizedObjective::new(runner, cfg.case.channels())
        .u0(cfg.flow.u0)
        .penalty(cfg.penalty)
        .bounds(cfg.bounds())
        .failure_value(cfg.case.failure_value)
}

fn aero_summary(coeffs: &AeroCoefficients, objective: f64) -> AeroSummary {
    AeroSummary {
        cd: coeffs.cd,
        cl: coeffs.cl,
        objective,
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    info!("JSON bundle: {}", path.display());
    Ok(())
}

// ============================================================================
// Run Modes
// ============================================================================

fn run_optimize(cfg: &config::Root, cfg_text: &str, out_path: &Path, json_output: bool) -> Result<()> {
    let recorder = io::history_writer(out_path)?;
    info!("evaluation history: {}", out_path.display());
    let objective = Arc::new(build_objective(cfg).record_to(recorder));
    let bounds = cfg.bounds();

    let start = Instant::now();
    let report = ego::optimize(&objective, &bounds, &cfg.ego).with_context(|| {
        format!(
            "{} evaluations kept in {}",
            objective.history().len(),
            out_path.display()
        )
    })?;

    let confirmed = match objective.confirm(&report.x_opt) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!("confirmation run failed: {:#}", e);
            None
        }
    };
    let wall_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    let x = &report.x_opt;
    info!("optimum after {} evaluations ({:.1} s)", report.n_evaluations, wall_time_ms / 1000.0);
    info!("  shape = {:?}", x.shape);
    info!("  aoa   = {:.6}", x.aoa);
    info!("  f     = {:.6}", report.y_opt);
    if let Some(c) = &confirmed {
        info!("  CD = {:.6}  CL = {:.6}", c.cd, c.cl);
    }

    if json_output {
        let n_failed = objective.history().iter().filter(|e| e.error.is_some()).count();
        let output = OptimizationOutput {
            manifest: create_manifest(cfg, cfg_text),
            settings: cfg.ego,
            bounds: bounds.limits.clone(),
            x_opt: x.to_row(),
            y_opt: report.y_opt,
            confirmed: confirmed.map(|c| aero_summary(&c, objective.penalty_of(&c))),
            n_evaluations: report.n_evaluations,
            n_failed,
            wall_time_ms,
        };
        write_json(&out_path.with_extension("json"), &output)?;
    }

    Ok(())
}

fn run_evaluate(
    cfg: &config::Root,
    cfg_text: &str,
    out_path: &Path,
    x: Option<Vec<f64>>,
    json_output: bool,
) -> Result<()> {
    let design = match x {
        Some(row) => DesignVector::from_row(&row)
            .with_context(|| format!("--x needs {} values", N_DESIGN))?,
        None => cfg.baseline()?,
    };

    let objective = build_objective(cfg).record_to(io::history_writer(out_path)?);
    let start = Instant::now();
    let value = objective.evaluate(&design)?;
    let wall_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    let coeffs = objective
        .history()
        .last()
        .and_then(|e| e.coeffs)
        .context("evaluation left no coefficients")?;
    info!("CD={:.6} CL={:.6} f={:.6}", coeffs.cd, coeffs.cl, value);

    if json_output {
        let output = EvaluationOutput {
            manifest: create_manifest(cfg, cfg_text),
            design: design.to_row(),
            patch_velocity: design.patch_velocity(cfg.flow.u0),
            result: aero_summary(&coeffs, value),
            wall_time_ms,
        };
        write_json(&out_path.with_extension("json"), &output)?;
    }

    Ok(())
}

fn run_case(cfg: &config::Root, out_dir: &Path) -> Result<()> {
    let setup = case::CaseSetup::build(&cfg.flow, &cfg.ffd, &cfg.case.dir, cfg.case.span)?;
    let written = setup.write(out_dir)?;
    info!(
        "case setup: {} documents, {} shape functions, force scale {:.6}",
        written.len(),
        setup.shapes.len(),
        cfg.flow.force_scale()
    );
    Ok(())
}

fn show_status(cfg: &config::Root) -> Result<()> {
    let channels = cfg.case.channels();

    match handoff::read_design(&channels.design_file) {
        Ok((x, u0)) => {
            eprintln!("design  {}", channels.design_file.display());
            eprintln!("  shape  = {:?}", x.shape);
            eprintln!("  patchV = [{}, {}]", u0, x.aoa);
            let violations = cfg.bounds().violations(&x);
            if !violations.is_empty() {
                eprintln!("  {} component(s) outside bounds", violations.len());
            }
        }
        Err(e) => eprintln!("design  unavailable: {}", e),
    }

    match handoff::read_aero(&channels.aero_file) {
        Ok(c) => {
            let f = objective::penalized_drag(c.cd, c.cl, cfg.penalty.target_cl, cfg.penalty.weight);
            eprintln!("result  {}", channels.aero_file.display());
            eprintln!("  CD = {:.6}  CL = {:.6}  f = {:.6}", c.cd, c.cl, f);
        }
        Err(e) => eprintln!("result  unavailable: {}", e),
    }

    Ok(())
}

fn validate_config(cfg_path: &str) -> Result<()> {
    let (cfg, _) = load_config(Some(cfg_path))?;

    eprintln!("[foilopt] config valid: {}", cfg_path);
    eprintln!("  project: {}", cfg.project.name);
    eprintln!(
        "  ego: criterion={}, n_doe={}, n_iter={}, seed={}",
        cfg.ego.criterion.name(),
        cfg.ego.n_doe,
        cfg.ego.n_iter,
        cfg.ego.seed
    );
    eprintln!(
        "  penalty: f = CD + {} * (CL - {})^2",
        cfg.penalty.weight, cfg.penalty.target_cl
    );
    eprintln!("  bounds:");
    for (i, (lo, hi)) in cfg.design.bounds.iter().enumerate() {
        let name = if i + 1 == N_DESIGN { "aoa".to_string() } else { format!("shape[{}]", i) };
        eprintln!("    {:<9} [{}, {}]", name, lo, hi);
    }
    eprintln!(
        "  case: dir={}, run={}, clean={}, check_exit_status={}",
        cfg.case.dir.display(),
        cfg.case.run_script,
        cfg.case.clean_script,
        cfg.case.check_exit_status
    );
    eprintln!(
        "  flow: U0={}, A0={}, rho0={}, aoa0={}",
        cfg.flow.u0, cfg.flow.a0, cfg.flow.rho0, cfg.flow.aoa0
    );
    eprintln!("  ffd: {}x{}x{}", cfg.ffd.ni, cfg.ffd.nj, cfg.ffd.nk);

    Ok(())
}

fn print_version() {
    eprintln!("foilopt - surrogate-based airfoil optimization driver");
    eprintln!();
    eprintln!("  Program Version:   {}", VERSION);
    eprintln!("  Schema Version:    {}", SCHEMA_VERSION);
    eprintln!("  Platform:          {}", std::env::consts::OS);
    eprintln!("  Architecture:      {}", std::env::consts::ARCH);
    eprintln!();
    eprintln!("Optimizer:");
    eprintln!("  - Kriging surrogate with EI / WB2 / WB2S infill (egobox)");
    eprintln!("  - Objective: CD + w * (CL - CL_target)^2");
    eprintln!();
    eprintln!("Logging: set {} (e.g. debug, info, warn)", LOG_ENV);
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    let env = Env::new().filter_or(LOG_ENV, "info");
    Builder::from_env(env).try_init().ok();

    let args = Args::parse();

    match args.command {
        Commands::Version => {
            print_version();
            Ok(())
        }
        Commands::Validate => {
            let cfg_path = args.config.context("--config required for validate")?;
            validate_config(&cfg_path)
        }
        Commands::Optimize { n_iter, seed, json } => {
            let (mut cfg, cfg_text) = load_config(args.config.as_deref())?;
            if let Some(n) = n_iter {
                cfg.ego.n_iter = n;
            }
            if let Some(s) = seed {
                cfg.ego.seed = s;
            }
            cfg.validate()?;
            let out_path = PathBuf::from(args.out.unwrap_or_else(|| "results/history.csv".to_string()));
            run_optimize(&cfg, &cfg_text, &out_path, json)
        }
        Commands::Evaluate { x, json } => {
            let (cfg, cfg_text) = load_config(args.config.as_deref())?;
            let out_path = PathBuf::from(args.out.unwrap_or_else(|| "results/evaluation.csv".to_string()));
            run_evaluate(&cfg, &cfg_text, &out_path, x, json)
        }
        Commands::Case => {
            let (cfg, _) = load_config(args.config.as_deref())?;
            let out_dir = args
                .out
                .map(PathBuf::from)
                .unwrap_or_else(|| cfg.case.dir.join("setup"));
            run_case(&cfg, &out_dir)
        }
        Commands::Status => {
            let (cfg, _) = load_config(args.config.as_deref())?;
            show_status(&cfg)
        }
    }
}
