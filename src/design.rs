//! Design vector and design-space bounds for the NACA0012 problem.
//!
//! The design vector has nine components: eight FFD shape offsets followed by
//! the angle of attack. The bounds table is fixed once at startup.

use anyhow::{bail, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Number of FFD shape offsets
pub const N_SHAPE: usize = 8;
/// Total number of design variables (shape + angle of attack)
pub const N_DESIGN: usize = N_SHAPE + 1;

/// One candidate design: FFD shape offsets plus angle of attack (degrees)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DesignVector {
    pub shape: [f64; N_SHAPE],
    pub aoa: f64,
}

impl Default for DesignVector {
    fn default() -> Self {
        Self {
            shape: [0.0; N_SHAPE],
            aoa: 0.0,
        }
    }
}

impl DesignVector {
    pub fn new(shape: [f64; N_SHAPE], aoa: f64) -> Self {
        Self { shape, aoa }
    }

    /// Split a row of nine values into shape offsets and the trailing angle
    pub fn from_row(row: &[f64]) -> Result<Self> {
        if row.len() != N_DESIGN {
            bail!(
                "design row must have {} components, got {}",
                N_DESIGN,
                row.len()
            );
        }
        let mut shape = [0.0; N_SHAPE];
        shape.copy_from_slice(&row[..N_SHAPE]);
        Ok(Self {
            shape,
            aoa: row[N_SHAPE],
        })
    }

    pub fn to_row(&self) -> Vec<f64> {
        let mut row = self.shape.to_vec();
        row.push(self.aoa);
        row
    }

    /// Patch velocity pair handed to the solver: far-field speed, then angle
    pub fn patch_velocity(&self, u0: f64) -> [f64; 2] {
        [u0, self.aoa]
    }
}

/// Box constraints on the nine design variables
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub limits: Vec<(f64, f64)>,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::naca0012()
    }
}

impl Bounds {
    /// Bounds used for the NACA0012 low-speed case
    pub fn naca0012() -> Self {
        let mut limits = vec![(-0.05, 0.05); N_DESIGN];
        limits[N_DESIGN - 3] = (-0.01, 0.01);
        limits[N_DESIGN - 2] = (-0.01, 0.01);
        limits[N_DESIGN - 1] = (0.0, 5.0);
        Self { limits }
    }

    pub fn validate(&self) -> Result<()> {
        if self.limits.len() != N_DESIGN {
            bail!(
                "design.bounds must have {} entries, got {}",
                N_DESIGN,
                self.limits.len()
            );
        }
        for (i, &(lo, hi)) in self.limits.iter().enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                bail!("design.bounds[{}] must be finite", i);
            }
            if lo > hi {
                bail!("design.bounds[{}]: lower bound {} exceeds upper bound {}", i, lo, hi);
            }
        }
        Ok(())
    }

    /// Components of `x` outside their interval as (index, value, (lo, hi))
    pub fn violations(&self, x: &DesignVector) -> Vec<(usize, f64, (f64, f64))> {
        x.to_row()
            .into_iter()
            .zip(self.limits.iter())
            .enumerate()
            .filter(|(_, (v, &(lo, hi)))| *v < lo || *v > hi)
            .map(|(i, (v, &lim))| (i, v, lim))
            .collect()
    }

    /// `(n, 2)` array of `[lo, hi]` rows, the layout the EGO engine expects
    pub fn to_array(&self) -> Array2<f64> {
        let mut xlimits = Array2::zeros((self.limits.len(), 2));
        for (i, &(lo, hi)) in self.limits.iter().enumerate() {
            xlimits[[i, 0]] = lo;
            xlimits[[i, 1]] = hi;
        }
        xlimits
    }
}
