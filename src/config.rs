use crate::case::{FfdGrid, FlowConditions};
use crate::design::{Bounds, DesignVector, N_DESIGN, N_SHAPE};
use crate::ego::EgoSettings;
use crate::objective::{Channels, Penalty};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Root {
    #[serde(default)]
    pub project: Project,
    #[serde(default)]
    pub design: Design,
    #[serde(default)]
    pub ego: EgoSettings,
    #[serde(default)]
    pub penalty: Penalty,
    #[serde(default)]
    pub case: Case,
    #[serde(default)]
    pub flow: FlowConditions,
    #[serde(default)]
    pub ffd: FfdGrid,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Project {
    #[serde(default = "default_project_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

fn default_project_name() -> String {
    "naca0012".to_string()
}

impl Default for Project {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Design {
    /// `[lo, hi]` per design variable; eight shape offsets then the angle of attack
    #[serde(default = "default_bounds")]
    pub bounds: Vec<(f64, f64)>,
    /// Design evaluated by `evaluate` when no `--x` is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<Vec<f64>>,
}

fn default_bounds() -> Vec<(f64, f64)> {
    Bounds::naca0012().limits
}

impl Default for Design {
    fn default() -> Self {
        Self {
            bounds: default_bounds(),
            baseline: None,
        }
    }
}

/// Where the CFD case lives and how it is driven
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Case {
    #[serde(default = "default_case_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_run_script")]
    pub run_script: String,
    #[serde(default = "default_clean_script")]
    pub clean_script: String,
    /// Positional argument handed to both scripts
    #[serde(default = "default_dummy_arg")]
    pub dummy_arg: String,
    /// Design channel, relative to `dir`
    #[serde(default = "default_design_file")]
    pub design_file: PathBuf,
    /// Result channel, relative to `dir`
    #[serde(default = "default_aero_file")]
    pub aero_file: PathBuf,
    /// Treat a non-zero exit of the run script as a failed evaluation
    #[serde(default)]
    pub check_exit_status: bool,
    /// Objective value reported for failed evaluations
    #[serde(default = "default_failure_value")]
    pub failure_value: f64,
    /// Mesh thickness in z between the two symmetry planes
    #[serde(default = "default_span")]
    pub span: f64,
}

fn default_case_dir() -> PathBuf { PathBuf::from(".") }
fn default_run_script() -> String { "run".to_string() }
fn default_clean_script() -> String { "clean".to_string() }
fn default_dummy_arg() -> String { "arguments".to_string() }
fn default_design_file() -> PathBuf { PathBuf::from("optAirfoil/designVars.py") }
fn default_aero_file() -> PathBuf { PathBuf::from("optAirfoil/aeroData.py") }
fn default_failure_value() -> f64 { 1.0e6 }
fn default_span() -> f64 { 0.1 }

impl Default for Case {
    fn default() -> Self {
        Self {
            dir: default_case_dir(),
            run_script: default_run_script(),
            clean_script: default_clean_script(),
            dummy_arg: default_dummy_arg(),
            design_file: default_design_file(),
            aero_file: default_aero_file(),
            check_exit_status: false,
            failure_value: default_failure_value(),
            span: default_span(),
        }
    }
}

impl Case {
    pub fn channels(&self) -> Channels {
        Channels {
            design_file: self.dir.join(&self.design_file),
            aero_file: self.dir.join(&self.aero_file),
        }
    }
}

impl Root {
    pub fn bounds(&self) -> Bounds {
        Bounds {
            limits: self.design.bounds.clone(),
        }
    }

    /// Configured baseline, or the unperturbed airfoil at the baseline angle
    pub fn baseline(&self) -> Result<DesignVector> {
        match &self.design.baseline {
            Some(row) => DesignVector::from_row(row),
            None => Ok(DesignVector::new([0.0; N_SHAPE], self.flow.aoa0)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.project.name.trim().is_empty() {
            bail!("project.name must not be empty");
        }

        self.bounds().validate()?;
        if let Some(ref baseline) = self.design.baseline {
            if baseline.len() != N_DESIGN {
                bail!("design.baseline must have {} components", N_DESIGN);
            }
        }

        if self.ego.n_iter == 0 || self.ego.n_iter > 10_000 {
            bail!("ego.n_iter must be in [1, 10000]");
        }
        if self.ego.n_doe < 2 {
            bail!("ego.n_doe must be >= 2");
        }

        if !(0.0..=10.0).contains(&self.penalty.target_cl) {
            bail!("penalty.target_cl must be in [0, 10]");
        }
        if !(self.penalty.weight.is_finite() && self.penalty.weight >= 0.0) {
            bail!("penalty.weight must be non-negative and finite");
        }

        if self.case.run_script.is_empty() || self.case.clean_script.is_empty() {
            bail!("case.run_script and case.clean_script must be set");
        }
        if self.case.design_file == self.case.aero_file {
            bail!("case.design_file and case.aero_file must differ");
        }
        if !self.case.failure_value.is_finite() {
            bail!("case.failure_value must be finite");
        }
        if !(self.case.span.is_finite() && self.case.span > 0.0) {
            bail!("case.span must be positive and finite");
        }

        self.flow.validate()?;
        self.ffd.validate()?;
        if self.ffd.n_shapes() != N_SHAPE {
            bail!(
                "ffd grid {}x{}x{} gives {} shape variables, expected {}",
                self.ffd.ni,
                self.ffd.nj,
                self.ffd.nk,
                self.ffd.n_shapes(),
                N_SHAPE
            );
        }

        Ok(())
    }
}
