//! Helpers shared by the test modules: scratch directories, throwaway case
//! scripts and an in-process stand-in for the CFD case.

#![allow(dead_code)]

use crate::handoff::{self, AeroCoefficients};
use crate::runner::{CaseRunner, RunOutcome};
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fresh, empty directory unique to this test process
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("foilopt_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Write an executable `sh` script into `dir`
#[cfg(unix)]
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Analytic stand-in for the CFD case.
///
/// Reads the design channel like the run script does and writes
/// `cd = 0.01 + sum(shape^2)`, `cl = 0.1 * aoa` to the result channel.
pub struct AnalyticCase {
    pub design_file: PathBuf,
    pub aero_file: PathBuf,
    pub runs: usize,
    pub cleans: usize,
    /// Fail (write nothing) on these run indices
    pub fail_on: Vec<usize>,
}

impl AnalyticCase {
    pub fn new(dir: &Path) -> Self {
        Self {
            design_file: dir.join("optAirfoil/designVars.py"),
            aero_file: dir.join("optAirfoil/aeroData.py"),
            runs: 0,
            cleans: 0,
            fail_on: Vec::new(),
        }
    }

    pub fn coefficients(shape: &[f64], aoa: f64) -> AeroCoefficients {
        AeroCoefficients {
            cd: 0.01 + shape.iter().map(|s| s * s).sum::<f64>(),
            cl: 0.1 * aoa,
        }
    }
}

impl CaseRunner for AnalyticCase {
    fn run(&mut self) -> Result<RunOutcome> {
        let idx = self.runs;
        self.runs += 1;
        if !self.fail_on.contains(&idx) {
            let (x, _u0) = handoff::read_design(&self.design_file)?;
            let coeffs = Self::coefficients(&x.shape, x.aoa);
            handoff::write_aero(&self.aero_file, &coeffs)?;
        }
        Ok(RunOutcome {
            success: true,
            code: Some(0),
            elapsed: Duration::ZERO,
        })
    }

    fn clean(&mut self) -> Result<RunOutcome> {
        self.cleans += 1;
        Ok(RunOutcome {
            success: true,
            code: Some(0),
            elapsed: Duration::ZERO,
        })
    }
}
