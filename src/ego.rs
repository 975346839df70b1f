//! Efficient Global Optimization of the penalized drag.
//!
//! Surrogate modeling and infill optimization are delegated to `egobox-ego`;
//! this module only configures it and maps its rows to design vectors.

use crate::design::{Bounds, DesignVector};
use crate::objective::PenalizedObjective;
use crate::runner::CaseRunner;
use anyhow::{Context, Result};
use egobox_ego::{EgorBuilder, InfillStrategy};
use log::info;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Infill criterion used to pick the next sample
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    /// Expected Improvement
    Ei,
    /// Watson-Barnes 2
    Wb2,
    /// Scaled Watson-Barnes 2
    Wb2s,
}

impl Criterion {
    pub fn name(&self) -> &'static str {
        match self {
            Criterion::Ei => "EI",
            Criterion::Wb2 => "WB2",
            Criterion::Wb2s => "WB2S",
        }
    }
}

impl From<Criterion> for InfillStrategy {
    fn from(c: Criterion) -> Self {
        match c {
            Criterion::Ei => InfillStrategy::EI,
            Criterion::Wb2 => InfillStrategy::WB2,
            Criterion::Wb2s => InfillStrategy::WB2S,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EgoSettings {
    /// Infill iterations after the initial design of experiments
    #[serde(default = "default_n_iter")]
    pub n_iter: usize,
    /// Size of the initial design of experiments
    #[serde(default = "default_n_doe")]
    pub n_doe: usize,
    #[serde(default = "default_criterion")]
    pub criterion: Criterion,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_n_iter() -> usize { 20 }
fn default_n_doe() -> usize { 19 }
fn default_criterion() -> Criterion { Criterion::Ei }
fn default_seed() -> u64 { 45 }

impl Default for EgoSettings {
    fn default() -> Self {
        Self {
            n_iter: 20,
            n_doe: 19,
            criterion: Criterion::Ei,
            seed: 45,
        }
    }
}

/// Best design found by the optimizer
#[derive(Clone, Debug)]
pub struct OptimumReport {
    pub x_opt: DesignVector,
    pub y_opt: f64,
    pub n_evaluations: usize,
}

/// Minimize the penalized drag within `bounds` with a Kriging-based EGO loop.
///
/// The engine wants an owned, shareable objective function, so the closure
/// holds its own handle on `objective`.
pub fn optimize<R: CaseRunner + Send + 'static>(
    objective: &Arc<PenalizedObjective<R>>,
    bounds: &Bounds,
    settings: &EgoSettings,
) -> Result<OptimumReport> {
    let xlimits = bounds.to_array();
    info!(
        "EGO: criterion={} n_doe={} n_iter={} seed={}",
        settings.criterion.name(),
        settings.n_doe,
        settings.n_iter,
        settings.seed
    );

    let shared = Arc::clone(objective);
    let res = EgorBuilder::optimize(move |x: &ArrayView2<f64>| shared.evaluate_rows(x))
        .configure(|config| {
            config
                .n_doe(settings.n_doe)
                .max_iters(settings.n_iter)
                .infill_strategy(settings.criterion.into())
                .seed(settings.seed)
        })
        .min_within(&xlimits)
        .run()
        .context("EGO optimization failed")?;

    let x_opt = DesignVector::from_row(&res.x_opt.to_vec())?;
    let report = OptimumReport {
        x_opt,
        y_opt: res.y_opt[0],
        n_evaluations: objective.history().len(),
    };
    info!(
        "EGO: best f={:.6} after {} evaluations",
        report.y_opt, report.n_evaluations
    );
    Ok(report)
}
