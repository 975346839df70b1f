//! CFD case setup consumed by the external run script.
//!
//! The run script builds its solver from four JSON documents written here:
//! solver options, mesh deformation options, the FFD shape-function table and
//! the connection graph between the mesh, geometry, design-variable and
//! scenario subsystems.

use crate::design::N_SHAPE;
use anyhow::{bail, Context, Result};
use log::info;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const SOLVER_OPTIONS_FILE: &str = "solver_options.json";
pub const MESH_OPTIONS_FILE: &str = "mesh_options.json";
pub const SHAPE_FUNCTIONS_FILE: &str = "shape_functions.json";
pub const CONNECTIONS_FILE: &str = "connections.json";

// ============================================================================
// Flow conditions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct FlowConditions {
    /// Far-field velocity
    #[serde(default = "default_u0")]
    pub u0: f64,
    /// Far-field pressure
    #[serde(default)]
    pub p0: f64,
    /// Far-field Spalart-Allmaras working variable
    #[serde(default = "default_nu_tilda0")]
    pub nu_tilda0: f64,
    /// Angle of attack of the baseline case
    #[serde(default = "default_aoa0")]
    pub aoa0: f64,
    /// Reference area
    #[serde(default = "default_a0")]
    pub a0: f64,
    #[serde(default = "default_rho0")]
    pub rho0: f64,
}

fn default_u0() -> f64 { 10.0 }
fn default_nu_tilda0() -> f64 { 4.5e-5 }
fn default_aoa0() -> f64 { 5.13918623195176 }
fn default_a0() -> f64 { 0.1 }
fn default_rho0() -> f64 { 1.0 }

impl Default for FlowConditions {
    fn default() -> Self {
        Self {
            u0: default_u0(),
            p0: 0.0,
            nu_tilda0: default_nu_tilda0(),
            aoa0: default_aoa0(),
            a0: default_a0(),
            rho0: default_rho0(),
        }
    }
}

impl FlowConditions {
    /// Force-to-coefficient scale `1 / (q * A)`
    pub fn force_scale(&self) -> f64 {
        1.0 / (0.5 * self.u0 * self.u0 * self.a0 * self.rho0)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, v) in [("u0", self.u0), ("a0", self.a0), ("rho0", self.rho0)] {
            if !(v.is_finite() && v > 0.0) {
                bail!("flow.{} must be positive and finite, got {}", name, v);
            }
        }
        if !(self.nu_tilda0.is_finite() && self.nu_tilda0 >= 0.0) {
            bail!("flow.nu_tilda0 must be non-negative and finite");
        }
        if !(self.p0.is_finite() && self.aoa0.is_finite()) {
            bail!("flow.p0 and flow.aoa0 must be finite");
        }
        Ok(())
    }
}

// ============================================================================
// Solver options
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundaryCondition {
    pub variable: String,
    pub patches: Vec<String>,
    pub value: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimalBc {
    #[serde(flatten)]
    pub conditions: BTreeMap<String, BoundaryCondition>,
    #[serde(rename = "useWallFunction")]
    pub use_wall_function: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceFunction {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub patches: Vec<String>,
    pub direction_mode: String,
    pub patch_velocity_input_name: String,
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputInfo {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patches: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_axis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normal_axis: Option<String>,
    pub components: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverOptions {
    pub design_surfaces: Vec<String>,
    pub solver_name: String,
    pub primal_min_res_tol: f64,
    pub primal_min_res_tol_diff: f64,
    #[serde(rename = "primalBC")]
    pub primal_bc: PrimalBc,
    pub function: BTreeMap<String, ForceFunction>,
    pub normalize_states: BTreeMap<String, f64>,
    pub input_info: BTreeMap<String, InputInfo>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl SolverOptions {
    /// Steady incompressible solve of the airfoil with CD and CL outputs
    pub fn airfoil(flow: &FlowConditions) -> Self {
        let farfield = strings(&["inout"]);

        let mut conditions = BTreeMap::new();
        conditions.insert(
            "U0".to_string(),
            BoundaryCondition {
                variable: "U".to_string(),
                patches: farfield.clone(),
                value: vec![flow.u0, 0.0, 0.0],
            },
        );
        conditions.insert(
            "p0".to_string(),
            BoundaryCondition {
                variable: "p".to_string(),
                patches: farfield.clone(),
                value: vec![flow.p0],
            },
        );
        conditions.insert(
            "nuTilda0".to_string(),
            BoundaryCondition {
                variable: "nuTilda".to_string(),
                patches: farfield.clone(),
                value: vec![flow.nu_tilda0],
            },
        );

        let force = |direction_mode: &str| ForceFunction {
            kind: "force".to_string(),
            source: "patchToFace".to_string(),
            patches: strings(&["wing"]),
            direction_mode: direction_mode.to_string(),
            patch_velocity_input_name: "patchV".to_string(),
            scale: flow.force_scale(),
        };
        let mut function = BTreeMap::new();
        function.insert("CD".to_string(), force("parallelToFlow"));
        function.insert("CL".to_string(), force("normalToFlow"));

        let mut normalize_states = BTreeMap::new();
        normalize_states.insert("U".to_string(), flow.u0);
        normalize_states.insert("p".to_string(), flow.u0 * flow.u0 / 2.0);
        normalize_states.insert("nuTilda".to_string(), flow.nu_tilda0 * 10.0);
        normalize_states.insert("phi".to_string(), 1.0);

        let components = strings(&["solver", "function"]);
        let mut input_info = BTreeMap::new();
        input_info.insert(
            "aero_vol_coords".to_string(),
            InputInfo {
                kind: "volCoord".to_string(),
                patches: None,
                flow_axis: None,
                normal_axis: None,
                components: components.clone(),
            },
        );
        input_info.insert(
            "patchV".to_string(),
            InputInfo {
                kind: "patchVelocity".to_string(),
                patches: Some(farfield),
                flow_axis: Some("x".to_string()),
                normal_axis: Some("y".to_string()),
                components,
            },
        );

        Self {
            design_surfaces: strings(&["wing"]),
            solver_name: "DASimpleFoam".to_string(),
            primal_min_res_tol: 1.0e-12,
            primal_min_res_tol_diff: 1.0e12,
            primal_bc: PrimalBc {
                conditions,
                use_wall_function: true,
            },
            function,
            normalize_states,
            input_info,
        }
    }
}

// ============================================================================
// Mesh deformation options
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshOptions {
    pub grid_file: PathBuf,
    pub file_type: String,
    /// Each plane as (point, normal)
    pub symmetry_planes: Vec<[[f64; 3]; 2]>,
}

impl MeshOptions {
    /// OpenFOAM mesh one cell thick in z, bounded by two symmetry planes
    pub fn openfoam_2d(case_dir: &Path, span: f64) -> Self {
        Self {
            grid_file: case_dir.to_path_buf(),
            file_type: "OpenFOAM".to_string(),
            symmetry_planes: vec![
                [[0.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
                [[0.0, 0.0, span], [0.0, 0.0, 1.0]],
            ],
        }
    }
}

// ============================================================================
// FFD shape functions
// ============================================================================

/// FFD control-point lattice dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct FfdGrid {
    #[serde(default = "default_ni")]
    pub ni: usize,
    #[serde(default = "default_nj")]
    pub nj: usize,
    #[serde(default = "default_nk")]
    pub nk: usize,
}

fn default_ni() -> usize { 5 }
fn default_nj() -> usize { 2 }
fn default_nk() -> usize { 2 }

impl Default for FfdGrid {
    fn default() -> Self {
        Self { ni: 5, nj: 2, nk: 2 }
    }
}

impl FfdGrid {
    pub fn validate(&self) -> Result<()> {
        if self.ni < 2 || self.nj < 2 {
            bail!("ffd grid needs ni >= 2 and nj >= 2, got {}x{}", self.ni, self.nj);
        }
        if self.nk != 2 {
            bail!("ffd grid must be two points deep in k for a 2D case, got {}", self.nk);
        }
        Ok(())
    }

    /// Local control-point indices in plot3d order (i fastest)
    pub fn local_index(&self) -> Array3<usize> {
        let (ni, nj) = (self.ni, self.nj);
        Array3::from_shape_fn((self.ni, self.nj, self.nk), |(i, j, k)| i + ni * (j + nj * k))
    }

    /// Number of shape functions `shape_functions` will produce
    pub fn n_shapes(&self) -> usize {
        (self.ni - 2) * self.nj + 2
    }
}

/// One control point displaced by a shape function
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointMove {
    pub point: usize,
    pub direction: [f64; 3],
}

/// A deformation mode driven by one shape design variable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeFunction {
    pub moves: Vec<PointMove>,
}

/// Build the symmetry-constrained shape-function table.
///
/// Interior slices move each (i, j) column in +y with both k layers together,
/// which keeps the section planar. The leading- and trailing-edge slices move
/// j=0 up and j=1 down, so the edge point itself stays fixed.
pub fn shape_functions(pts: &Array3<usize>) -> Result<Vec<ShapeFunction>> {
    let (ni, nj, nk) = pts.dim();
    if ni < 2 || nj < 2 || nk != 2 {
        bail!("unsupported FFD local index shape {}x{}x{}", ni, nj, nk);
    }

    let up = [0.0, 1.0, 0.0];
    let down = [0.0, -1.0, 0.0];
    let mv = |point: usize, direction: [f64; 3]| PointMove { point, direction };

    let mut shapes = Vec::with_capacity((ni - 2) * nj + 2);
    for i in 1..ni - 1 {
        for j in 0..nj {
            shapes.push(ShapeFunction {
                moves: vec![mv(pts[[i, j, 0]], up), mv(pts[[i, j, 1]], up)],
            });
        }
    }
    for i in [0, ni - 1] {
        shapes.push(ShapeFunction {
            moves: vec![
                mv(pts[[i, 0, 0]], up),
                mv(pts[[i, 0, 1]], up),
                mv(pts[[i, 1, 0]], down),
                mv(pts[[i, 1, 1]], down),
            ],
        });
    }
    Ok(shapes)
}

// ============================================================================
// Connection graph
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subsystem {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    pub src: String,
    pub tgt: String,
}

/// Static wiring between the solver subsystems
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionGraph {
    pub subsystems: Vec<Subsystem>,
    /// Outputs of the design-variable component, promoted to the top level
    pub design_variables: Vec<String>,
    pub connections: Vec<Connection>,
    pub outputs: Vec<String>,
}

impl ConnectionGraph {
    /// Mesh → FFD geometry → aerodynamic scenario, driven by `shape` and `patchV`
    pub fn airfoil() -> Self {
        let sub = |name: &str, kind: &str| Subsystem {
            name: name.to_string(),
            kind: kind.to_string(),
        };
        let conn = |src: &str, tgt: &str| Connection {
            src: src.to_string(),
            tgt: tgt.to_string(),
        };
        Self {
            subsystems: vec![
                sub("dvs", "independent_variables"),
                sub("mesh", "mesh_coordinates"),
                sub("geometry", "ffd"),
                sub("scenario1", "aerodynamic_scenario"),
            ],
            design_variables: strings(&["shape", "patchV"]),
            connections: vec![
                conn("mesh.x_aero0", "geometry.x_aero_in"),
                conn("geometry.x_aero0", "scenario1.x_aero"),
                conn("patchV", "scenario1.patchV"),
                conn("shape", "geometry.shape"),
            ],
            outputs: strings(&["scenario1.aero_post.CD", "scenario1.aero_post.CL"]),
        }
    }

    fn check_endpoint(&self, names: &BTreeSet<&str>, endpoint: &str) -> Result<()> {
        match endpoint.split_once('.') {
            Some((owner, var)) if !var.is_empty() => {
                if !names.contains(owner) {
                    bail!("`{}` refers to unknown subsystem `{}`", endpoint, owner);
                }
            }
            Some(_) => bail!("`{}` has an empty variable name", endpoint),
            None => {
                if !self.design_variables.iter().any(|d| d == endpoint) {
                    bail!("`{}` is not a promoted design variable", endpoint);
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for s in &self.subsystems {
            if !names.insert(s.name.as_str()) {
                bail!("duplicate subsystem `{}`", s.name);
            }
        }

        let mut targets = BTreeSet::new();
        for c in &self.connections {
            self.check_endpoint(&names, &c.src)?;
            self.check_endpoint(&names, &c.tgt)?;
            if !targets.insert(c.tgt.as_str()) {
                bail!("input `{}` is connected more than once", c.tgt);
            }
        }
        for out in &self.outputs {
            self.check_endpoint(&names, out)?;
        }
        Ok(())
    }
}

// ============================================================================
// Case setup bundle
// ============================================================================

#[derive(Debug, Clone)]
pub struct CaseSetup {
    pub solver: SolverOptions,
    pub mesh: MeshOptions,
    pub shapes: Vec<ShapeFunction>,
    pub graph: ConnectionGraph,
}

impl CaseSetup {
    pub fn build(flow: &FlowConditions, grid: &FfdGrid, case_dir: &Path, span: f64) -> Result<Self> {
        flow.validate()?;
        grid.validate()?;

        let shapes = shape_functions(&grid.local_index())?;
        if shapes.len() != N_SHAPE {
            bail!(
                "FFD grid {}x{}x{} yields {} shape functions, the design vector has {}",
                grid.ni,
                grid.nj,
                grid.nk,
                shapes.len(),
                N_SHAPE
            );
        }

        let graph = ConnectionGraph::airfoil();
        graph.validate()?;

        Ok(Self {
            solver: SolverOptions::airfoil(flow),
            mesh: MeshOptions::openfoam_2d(case_dir, span),
            shapes,
            graph,
        })
    }

    /// Write the four JSON documents into `dir`; returns the written paths
    pub fn write(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let docs = [
            (SOLVER_OPTIONS_FILE, serde_json::to_string_pretty(&self.solver)?),
            (MESH_OPTIONS_FILE, serde_json::to_string_pretty(&self.mesh)?),
            (SHAPE_FUNCTIONS_FILE, serde_json::to_string_pretty(&self.shapes)?),
            (CONNECTIONS_FILE, serde_json::to_string_pretty(&self.graph)?),
        ];

        let mut written = Vec::with_capacity(docs.len());
        for (name, json) in docs {
            let path = dir.join(name);
            fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
            info!("case setup: {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}
