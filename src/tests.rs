//! Cross-module tests: hand-off round trips, the penalty arithmetic on values
//! coming back through the result channel, and a full evaluation against
//! shell-script stand-ins for the CFD case.

use crate::config;
use crate::design::{Bounds, DesignVector};
use crate::handoff::{self, AeroCoefficients};
use crate::objective::penalized_drag;
use crate::testing::scratch_dir;
use approx::assert_relative_eq;
use std::fs;

// =============================================================================
// Hand-off Contract
// =============================================================================

#[test]
fn test_design_roundtrip_is_bit_identical() {
    let dir = scratch_dir("roundtrip");
    let path = dir.join("optAirfoil/designVars.py");

    let x = DesignVector::new(
        [
            0.1 + 0.2,
            -0.049999999999999996,
            1e-300,
            -0.0,
            5e-324,
            0.012345678901234567,
            -0.009876543210987654,
            1.0 / 3.0,
        ],
        std::f64::consts::PI,
    );
    handoff::write_design(&path, &x, 10.0).unwrap();
    let (back, u0) = handoff::read_design(&path).unwrap();

    for (a, b) in x.shape.iter().zip(back.shape.iter()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
    assert_eq!(back.aoa.to_bits(), x.aoa.to_bits());
    assert_eq!(u0, 10.0);
}

#[test]
fn test_design_file_layout() {
    let dir = scratch_dir("layout");
    let path = dir.join("designVars.py");
    handoff::write_design(&path, &DesignVector::new([0.0; 8], 2.5), 10.0).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(
        text,
        "shape = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]\npatchV = [10.0, 2.5]\n"
    );
}

#[test]
fn test_design_file_is_overwritten() {
    let dir = scratch_dir("overwrite");
    let path = dir.join("designVars.py");
    handoff::write_design(&path, &DesignVector::new([0.05; 8], 5.0), 10.0).unwrap();
    handoff::write_design(&path, &DesignVector::new([0.0; 8], 1.0), 10.0).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 2);
    let (x, _) = handoff::read_design(&path).unwrap();
    assert_eq!(x.aoa, 1.0);
}

#[test]
fn test_aero_roundtrip_and_numpy_output() {
    let dir = scratch_dir("aero");
    let path = dir.join("aeroData.py");

    let c = AeroCoefficients { cd: 0.0213, cl: 0.4987 };
    handoff::write_aero(&path, &c).unwrap();
    assert_eq!(handoff::read_aero(&path).unwrap(), c);

    // as printed by the run script from numpy arrays
    fs::write(&path, "CD = [0.02]\nCL = [0.6]\n").unwrap();
    let c = handoff::read_aero(&path).unwrap();
    assert_relative_eq!(
        penalized_drag(c.cd, c.cl, 0.5, 10.0),
        0.12,
        epsilon = 1e-12
    );
}

#[test]
fn test_discard_stale() {
    let dir = scratch_dir("stale");
    let path = dir.join("aeroData.py");
    assert!(!handoff::discard_stale(&path).unwrap());
    fs::write(&path, "CD = [0.02]\nCL = [0.5]\n").unwrap();
    assert!(handoff::discard_stale(&path).unwrap());
    assert!(handoff::read_aero(&path).is_err());
}

// =============================================================================
// Penalty Properties
// =============================================================================

#[test]
fn test_penalty_reference_values() {
    assert_eq!(penalized_drag(0.02, 0.5, 0.5, 10.0), 0.02);
    assert_relative_eq!(penalized_drag(0.02, 0.6, 0.5, 10.0), 0.12, epsilon = 1e-12);
}

#[test]
fn test_penalty_formula_sweep() {
    for i in 0..=40 {
        let cl = -0.5 + 0.05 * i as f64;
        let cd = 0.015 + 0.001 * i as f64;
        let expected = cd + 10.0 * (cl - 0.5) * (cl - 0.5);
        assert_relative_eq!(penalized_drag(cd, cl, 0.5, 10.0), expected, epsilon = 1e-12);
        assert!(penalized_drag(cd, cl, 0.5, 10.0) >= cd);
    }
}

// =============================================================================
// Evaluation Against Script Stand-ins
// =============================================================================

#[cfg(unix)]
mod scripted {
    use super::*;
    use crate::testing::script;

    fn case_config(name: &str, run_body: &str) -> config::Root {
        let dir = scratch_dir(name);
        script(&dir, "run", run_body);
        script(&dir, "clean", "rm -f solved.txt");

        let mut cfg = config::Root::default();
        cfg.case.dir = dir;
        cfg
    }

    #[test]
    fn test_evaluate_through_scripts() {
        let cfg = case_config(
            "scripted_ok",
            "mkdir -p optAirfoil\n\
             touch solved.txt\n\
             printf 'CD = [0.02]\\nCL = [0.6]\\n' > optAirfoil/aeroData.py",
        );
        let objective = crate::build_objective(&cfg);
        let x = DesignVector::new([0.01; 8], 3.0);

        let f = objective.evaluate(&x).unwrap();
        assert_relative_eq!(f, 0.12, epsilon = 1e-12);

        // the design the script saw is the design that was evaluated
        let (seen, u0) = handoff::read_design(&cfg.case.channels().design_file).unwrap();
        assert_eq!(seen, x);
        assert_eq!(u0, cfg.flow.u0);

        // clean ran after the solve
        assert!(!cfg.case.dir.join("solved.txt").exists());
    }

    #[test]
    fn test_failed_solve_reports_failure_value() {
        let cfg = case_config("scripted_fail", "exit 1");
        fs::create_dir_all(cfg.case.dir.join("optAirfoil")).unwrap();
        fs::write(
            cfg.case.channels().aero_file,
            "CD = [0.01]\nCL = [0.5]\n",
        )
        .unwrap();

        let objective = crate::build_objective(&cfg);
        let y = objective.evaluate_rows(
            &ndarray::array![[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0]].view(),
        );
        assert_eq!(y[[0, 0]], cfg.case.failure_value);
        assert_eq!(objective.history()[0].status(), "failed");
    }

    #[test]
    fn test_case_and_status_commands() {
        let cfg = case_config("scripted_case", "exit 0");
        let out = cfg.case.dir.join("setup");
        crate::run_case(&cfg, &out).unwrap();
        assert!(out.join(crate::case::SHAPE_FUNCTIONS_FILE).exists());

        let shapes: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(out.join(crate::case::SHAPE_FUNCTIONS_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(shapes.as_array().unwrap().len(), 8);

        // status tolerates missing channels
        assert!(crate::show_status(&cfg).is_ok());
    }

    // cd = 0.01 + sum(shape^2), cl = 0.1 * aoa, computed from the design file
    const ANALYTIC_RUN: &str = r#"echo "run $(grep patchV optAirfoil/designVars.py)" >> log.txt
sed 's/[][,]/ /g' optAirfoil/designVars.py | awk '
$1 == "shape" { for (i = 3; i <= NF; i++) s += $i * $i }
$1 == "patchV" { aoa = $4 }
END { printf "CD = [%.17g]\nCL = [%.17g]\n", 0.01 + s, 0.1 * aoa }' > optAirfoil/aeroData.py"#;

    #[test]
    fn test_optimize_command_end_to_end() {
        let mut cfg = case_config("scripted_optimize", ANALYTIC_RUN);
        script(
            &cfg.case.dir,
            "clean",
            r#"echo "clean $(grep patchV optAirfoil/designVars.py)" >> log.txt"#,
        );
        cfg.ego.n_doe = 10;
        cfg.ego.n_iter = 3;
        let n_evals = cfg.ego.n_doe + cfg.ego.n_iter;

        let out = cfg.case.dir.join("results/history.csv");
        let text = toml::to_string(&cfg).unwrap();
        crate::run_optimize(&cfg, &text, &out, true).unwrap();

        // every optimizer sample plus the confirmation
        let csv = fs::read_to_string(&out).unwrap();
        let rows: Vec<&str> = csv.lines().skip(1).collect();
        assert_eq!(rows.len(), n_evals + 1);
        assert!(rows[..n_evals].iter().all(|r| r.contains(",ok,")));
        assert!(rows[n_evals].contains(",confirmed,"));

        // each sample runs then cleans; the confirmation cleans then runs
        let log = fs::read_to_string(cfg.case.dir.join("log.txt")).unwrap();
        let steps: Vec<&str> = log.lines().collect();
        assert_eq!(steps.len(), 2 * n_evals + 2);
        for pair in steps[..2 * n_evals].chunks(2) {
            assert!(pair[0].starts_with("run "));
            assert!(pair[1].starts_with("clean "));
            assert_eq!(&pair[0]["run ".len()..], &pair[1]["clean ".len()..]);
        }
        let clean = steps[2 * n_evals];
        let run = steps[2 * n_evals + 1];
        assert!(clean.starts_with("clean "));
        assert!(run.starts_with("run "));

        // the optimum was written before the clean and is what stays on disk
        let design_text = fs::read_to_string(cfg.case.channels().design_file).unwrap();
        let patch_line = design_text.lines().nth(1).unwrap();
        assert_eq!(&clean["clean ".len()..], patch_line);
        assert_eq!(&run["run ".len()..], patch_line);

        let bundle: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.with_extension("json")).unwrap()).unwrap();
        let (x_on_disk, _) = handoff::read_design(&cfg.case.channels().design_file).unwrap();
        let x_opt = bundle["x_opt"].as_array().unwrap();
        assert_eq!(x_opt.len(), 9);
        assert_relative_eq!(x_opt[8].as_f64().unwrap(), x_on_disk.aoa, epsilon = 1e-12);
        assert_eq!(bundle["n_evaluations"].as_u64().unwrap() as usize, n_evals);
        assert_relative_eq!(
            bundle["confirmed"]["cl"].as_f64().unwrap(),
            0.1 * x_on_disk.aoa,
            epsilon = 1e-9
        );
        assert!(cfg.case.channels().aero_file.exists());
    }

    #[test]
    fn test_evaluate_command_writes_history() {
        let cfg = case_config("scripted_evaluate", ANALYTIC_RUN);
        let out = cfg.case.dir.join("results/evaluation.csv");
        let text = toml::to_string(&cfg).unwrap();
        crate::run_evaluate(&cfg, &text, &out, Some(vec![0.0; 9]), false).unwrap();

        let csv = fs::read_to_string(&out).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.lines().nth(1).unwrap().contains(",ok,"));
    }
}

// =============================================================================
// Manifest Helpers
// =============================================================================

#[test]
fn test_civil_from_days() {
    assert_eq!(crate::civil_from_days(0), (1970, 1, 1));
    assert_eq!(crate::civil_from_days(-1), (1969, 12, 31));
    assert_eq!(crate::civil_from_days(11016), (2000, 2, 29));
    assert_eq!(crate::civil_from_days(20744), (2026, 10, 18));
    assert_eq!(crate::civil_from_days(47541), (2100, 3, 1));
}

#[test]
fn test_timestamp_format() {
    let ts = crate::get_timestamp();
    assert_eq!(ts.len(), 20);
    assert!(ts.ends_with('Z'));
    assert_eq!(&ts[10..11], "T");
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_default_config_matches_workflow() {
    let cfg = config::Root::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.bounds(), Bounds::naca0012());
    assert_eq!(cfg.ego.n_iter, 20);
    assert_eq!(cfg.ego.seed, 45);
    assert_eq!(cfg.penalty.target_cl, 0.5);
}

#[test]
fn test_default_config_survives_toml_roundtrip() {
    let cfg = config::Root::default();
    let text = toml::to_string(&cfg).unwrap();
    let back: config::Root = toml::from_str(&text).unwrap();
    assert_eq!(back.bounds(), cfg.bounds());
    assert_eq!(back.ego, cfg.ego);
    assert_eq!(back.case.aero_file, cfg.case.aero_file);
}

#[test]
fn test_shipped_config_matches_defaults() {
    let cfg: config::Root = toml::from_str(include_str!("../naca0012.toml")).unwrap();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.bounds(), Bounds::naca0012());
    assert_eq!(cfg.ego, config::Root::default().ego);
    assert_eq!(cfg.flow, config::Root::default().flow);
    assert_eq!(cfg.ffd, config::Root::default().ffd);
}
