//! Penalized drag objective wrapping one CFD evaluation per design row.
//!
//! The lift constraint is folded into the objective with a quadratic penalty:
//! `f = CD + weight * (CL - target_cl)^2`. Evaluations are strictly sequential;
//! the hand-off files are shared state and there is exactly one of each, so
//! the runner and the history sit behind mutexes and only one evaluation holds
//! the runner at a time.

use crate::design::{Bounds, DesignVector};
use crate::handoff::{self, AeroCoefficients};
use crate::io::CsvWriter;
use crate::runner::CaseRunner;
use anyhow::{Context, Result};
use log::{info, warn};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Quadratic penalty `cd + weight * (cl - target_cl)^2`
pub fn penalized_drag(cd: f64, cl: f64, target_cl: f64, weight: f64) -> f64 {
    let violation = cl - target_cl;
    cd + weight * violation * violation
}

/// Lift constraint folded into the drag objective
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Penalty {
    #[serde(default = "default_target_cl")]
    pub target_cl: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_target_cl() -> f64 { 0.5 }
fn default_weight() -> f64 { 10.0 }

impl Default for Penalty {
    fn default() -> Self {
        Self {
            target_cl: 0.5,
            weight: 10.0,
        }
    }
}

impl Penalty {
    pub fn apply(&self, coeffs: &AeroCoefficients) -> f64 {
        penalized_drag(coeffs.cd, coeffs.cl, self.target_cl, self.weight)
    }
}

/// Locations of the two hand-off files
#[derive(Clone, Debug)]
pub struct Channels {
    pub design_file: PathBuf,
    pub aero_file: PathBuf,
}

/// Record of one objective evaluation
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub index: usize,
    pub design: DesignVector,
    pub coeffs: Option<AeroCoefficients>,
    pub value: f64,
    pub elapsed: Duration,
    pub error: Option<String>,
    /// Final re-solve of the optimum rather than an optimizer sample
    pub confirmation: bool,
}

impl Evaluation {
    pub fn status(&self) -> &'static str {
        match (&self.error, self.confirmation) {
            (Some(_), _) => "failed",
            (None, true) => "confirmed",
            (None, false) => "ok",
        }
    }
}

/// Lock that keeps working after a panicking holder
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct PenalizedObjective<R: CaseRunner> {
    runner: Mutex<R>,
    channels: Channels,
    u0: f64,
    penalty: Penalty,
    bounds: Bounds,
    failure_value: f64,
    history: Mutex<Vec<Evaluation>>,
    recorder: Mutex<Option<CsvWriter>>,
}

impl<R: CaseRunner> PenalizedObjective<R> {
    pub fn new(runner: R, channels: Channels) -> Self {
        Self {
            runner: Mutex::new(runner),
            channels,
            u0: 10.0,
            penalty: Penalty::default(),
            bounds: Bounds::naca0012(),
            failure_value: 1.0e6,
            history: Mutex::new(Vec::new()),
            recorder: Mutex::new(None),
        }
    }

    /// Far-field speed written as the first patch velocity component
    pub fn u0(mut self, u0: f64) -> Self {
        self.u0 = u0;
        self
    }

    pub fn penalty(mut self, penalty: Penalty) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Objective value reported to the optimizer when an evaluation fails
    pub fn failure_value(mut self, value: f64) -> Self {
        self.failure_value = value;
        self
    }

    /// Append every evaluation to `writer` as soon as it completes
    pub fn record_to(self, writer: CsvWriter) -> Self {
        *lock(&self.recorder) = Some(writer);
        self
    }

    pub fn history(&self) -> MutexGuard<'_, Vec<Evaluation>> {
        lock(&self.history)
    }

    #[cfg(test)]
    pub fn into_parts(self) -> (R, Vec<Evaluation>) {
        (
            self.runner.into_inner().unwrap(),
            self.history.into_inner().unwrap(),
        )
    }

    fn record(&self, evaluation: Evaluation) {
        if let Some(w) = lock(&self.recorder).as_mut() {
            if let Err(e) = w.write_row(&evaluation).and_then(|_| w.flush()) {
                warn!("history row {} not written: {:#}", evaluation.index, e);
            }
        }
        lock(&self.history).push(evaluation);
    }

    /// Hand `x` to the case, solve it and read the coefficients back
    pub fn solve(&self, x: &DesignVector) -> Result<AeroCoefficients> {
        handoff::write_design(&self.channels.design_file, x, self.u0)?;
        handoff::discard_stale(&self.channels.aero_file)?;

        lock(&self.runner).run().context("CFD run failed")?;

        let coeffs = handoff::read_aero(&self.channels.aero_file)
            .context("no usable result after CFD run")?;
        Ok(coeffs)
    }

    /// Penalized drag of one design, cleaning the case afterwards
    pub fn evaluate(&self, x: &DesignVector) -> Result<f64> {
        for (i, v, (lo, hi)) in self.bounds.violations(x) {
            warn!("design component {} = {} outside [{}, {}]", i, v, lo, hi);
        }

        let start = Instant::now();
        let solved = self.solve(x);
        if let Err(e) = lock(&self.runner).clean() {
            warn!("case clean failed: {:#}", e);
        }
        let elapsed = start.elapsed();

        let index = self.history().len();
        let (coeffs, value, error) = match &solved {
            Ok(c) => (Some(*c), self.penalty.apply(c), None),
            Err(e) => (None, self.failure_value, Some(format!("{:#}", e))),
        };

        match &coeffs {
            Some(c) => info!(
                "eval {:>3}: CD={:.6} CL={:.6} f={:.6} aoa={:.4} ({:.1}s)",
                index,
                c.cd,
                c.cl,
                value,
                x.aoa,
                elapsed.as_secs_f64()
            ),
            None => warn!("eval {:>3}: failed, f={:e}", index, value),
        }

        self.record(Evaluation {
            index,
            design: *x,
            coeffs,
            value,
            elapsed,
            error,
            confirmation: false,
        });

        solved.map(|_| value)
    }

    /// Batch form used by the surrogate optimizer: one output row per input row.
    ///
    /// Failed rows get the configured failure value instead of aborting the loop.
    pub fn evaluate_rows(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        let mut y = Array2::zeros((x.nrows(), 1));
        for (i, row) in x.rows().into_iter().enumerate() {
            y[[i, 0]] = match DesignVector::from_row(&row.to_vec()) {
                Ok(design) => self.evaluate(&design).unwrap_or(self.failure_value),
                Err(e) => {
                    warn!("rejected design row {}: {:#}", i, e);
                    self.failure_value
                }
            };
        }
        y
    }

    /// Final confirmatory solve of `x`: clean first, then run, no clean after
    /// so the solution stays on disk for post-processing. Recorded in the
    /// history like any other evaluation.
    pub fn confirm(&self, x: &DesignVector) -> Result<AeroCoefficients> {
        let start = Instant::now();
        let solved = self.resolve(x);
        let elapsed = start.elapsed();

        let (coeffs, value, error) = match &solved {
            Ok(c) => {
                let f = self.penalty.apply(c);
                info!("confirmed: CD={:.6} CL={:.6} f={:.6}", c.cd, c.cl, f);
                (Some(*c), f, None)
            }
            Err(e) => (None, self.failure_value, Some(format!("{:#}", e))),
        };
        let index = self.history().len();
        self.record(Evaluation {
            index,
            design: *x,
            coeffs,
            value,
            elapsed,
            error,
            confirmation: true,
        });
        solved
    }

    fn resolve(&self, x: &DesignVector) -> Result<AeroCoefficients> {
        handoff::write_design(&self.channels.design_file, x, self.u0)?;
        lock(&self.runner).clean().context("case clean failed")?;
        handoff::discard_stale(&self.channels.aero_file)?;
        lock(&self.runner).run().context("CFD run failed")?;
        let coeffs = handoff::read_aero(&self.channels.aero_file)
            .context("no usable result after confirmation run")?;
        Ok(coeffs)
    }

    pub fn penalty_of(&self, coeffs: &AeroCoefficients) -> f64 {
        self.penalty.apply(coeffs)
    }
}
