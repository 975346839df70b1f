//! Blocking invocation of the external `run` and `clean` scripts.

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

/// Exit information of one external step
#[derive(Clone, Copy, Debug)]
pub struct RunOutcome {
    pub success: bool,
    pub code: Option<i32>,
    pub elapsed: Duration,
}

/// Something that can solve the current case and reset it afterwards
pub trait CaseRunner {
    /// Solve the case described by the design channel on disk
    fn run(&mut self) -> Result<RunOutcome>;
    /// Remove solver artifacts so the next run starts from the baseline mesh
    fn clean(&mut self) -> Result<RunOutcome>;
}

/// Runs the case scripts found in the case directory
#[derive(Clone, Debug)]
pub struct ScriptRunner {
    case_dir: PathBuf,
    run_script: String,
    clean_script: String,
    dummy_arg: String,
    check_exit_status: bool,
}

impl ScriptRunner {
    pub fn new(case_dir: impl Into<PathBuf>) -> Self {
        Self {
            case_dir: case_dir.into(),
            run_script: "run".to_string(),
            clean_script: "clean".to_string(),
            dummy_arg: "arguments".to_string(),
            check_exit_status: false,
        }
    }

    pub fn scripts(mut self, run: &str, clean: &str) -> Self {
        self.run_script = run.to_string();
        self.clean_script = clean.to_string();
        self
    }

    pub fn dummy_arg(mut self, arg: &str) -> Self {
        self.dummy_arg = arg.to_string();
        self
    }

    pub fn check_exit_status(mut self, check: bool) -> Self {
        self.check_exit_status = check;
        self
    }

    fn invoke(&self, script: &str, strict: bool) -> Result<RunOutcome> {
        let case_dir = self
            .case_dir
            .canonicalize()
            .with_context(|| format!("case directory {} not found", self.case_dir.display()))?;
        let program = case_dir.join(script);
        debug!("spawning {} {}", program.display(), self.dummy_arg);

        let start = Instant::now();
        let status = Command::new(&program)
            .arg(&self.dummy_arg)
            .current_dir(&case_dir)
            .status()
            .with_context(|| format!("failed to spawn {}", program.display()))?;
        let outcome = RunOutcome {
            success: status.success(),
            code: status.code(),
            elapsed: start.elapsed(),
        };
        debug!(
            "{} finished in {:.1}s (code {:?})",
            script,
            outcome.elapsed.as_secs_f64(),
            outcome.code
        );

        if !outcome.success {
            if strict {
                bail!("{} exited with {}", program.display(), status);
            }
            warn!("{} exited with {}", program.display(), status);
        }
        Ok(outcome)
    }
}

impl CaseRunner for ScriptRunner {
    fn run(&mut self) -> Result<RunOutcome> {
        self.invoke(&self.run_script, self.check_exit_status)
    }

    fn clean(&mut self) -> Result<RunOutcome> {
        self.invoke(&self.clean_script, false)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::{script, scratch_dir};

    #[test]
    fn test_run_and_clean() {
        let dir = scratch_dir("runner_ok");
        script(&dir, "run", "echo \"$1\" > ran.txt");
        script(&dir, "clean", "rm -f ran.txt");

        let mut runner = ScriptRunner::new(&dir);
        let out = runner.run().unwrap();
        assert!(out.success);
        assert_eq!(out.code, Some(0));
        let marker = std::fs::read_to_string(dir.join("ran.txt")).unwrap();
        assert_eq!(marker.trim(), "arguments");

        runner.clean().unwrap();
        assert!(!dir.join("ran.txt").exists());
    }

    #[test]
    fn test_exit_status_policy() {
        let dir = scratch_dir("runner_fail");
        script(&dir, "run", "exit 3");
        script(&dir, "clean", "exit 0");

        let mut lenient = ScriptRunner::new(&dir);
        let out = lenient.run().unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(3));

        let mut strict = ScriptRunner::new(&dir).check_exit_status(true);
        assert!(strict.run().is_err());
    }

    #[test]
    fn test_missing_script() {
        let dir = scratch_dir("runner_missing");
        let mut runner = ScriptRunner::new(&dir).scripts("nope", "nope");
        assert!(runner.run().is_err());
    }
}
