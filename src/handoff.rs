//! File hand-off between the driver and the CFD run script.
//!
//! Both channels are small text modules made of `name = value` assignment
//! lines. The design channel is written here and imported by the run script;
//! the result channel is written by the run script and read back here. Each
//! file is overwritten in full on every evaluation.

use crate::design::{DesignVector, N_SHAPE};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}:{line}: expected `name = value`, got `{text}`")]
    Syntax {
        path: PathBuf,
        line: usize,
        text: String,
    },
    #[error("{path}: `{name}` is not assigned")]
    Missing { path: PathBuf, name: String },
    #[error("{path}: `{name}` is assigned more than once")]
    Duplicate { path: PathBuf, name: String },
    #[error("{path}: `{name}` has malformed number `{token}`")]
    BadNumber {
        path: PathBuf,
        name: String,
        token: String,
    },
    #[error("{path}: `{name}` must hold {expected} value(s), found {found}")]
    Length {
        path: PathBuf,
        name: String,
        expected: usize,
        found: usize,
    },
}

pub type Result<T> = std::result::Result<T, HandoffError>;

/// Lift and drag coefficients reported by one solve
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AeroCoefficients {
    pub cd: f64,
    pub cl: f64,
}

/// Python list literal with round-trip float formatting
fn format_list(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| format!("{:?}", v)).collect();
    format!("[{}]", items.join(", "))
}

fn write_module(path: &Path, body: &str) -> Result<()> {
    let io_err = |source| HandoffError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    fs::write(path, body).map_err(io_err)
}

/// Write the design channel: `shape = [...]` and `patchV = [u0, aoa]`
pub fn write_design(path: &Path, x: &DesignVector, u0: f64) -> Result<()> {
    let body = format!(
        "shape = {}\npatchV = {}\n",
        format_list(&x.shape),
        format_list(&x.patch_velocity(u0))
    );
    write_module(path, &body)
}

/// Read the design channel back; returns the design and the far-field speed
pub fn read_design(path: &Path) -> Result<(DesignVector, f64)> {
    let vars = read_module(path)?;
    let shape = take(&vars, path, "shape", Some(N_SHAPE))?;
    let patch_v = take(&vars, path, "patchV", Some(2))?;

    let mut x = DesignVector::default();
    x.shape.copy_from_slice(&shape);
    x.aoa = patch_v[1];
    Ok((x, patch_v[0]))
}

/// Write the result channel in the same layout the run script uses
#[cfg(test)]
pub fn write_aero(path: &Path, coeffs: &AeroCoefficients) -> Result<()> {
    let body = format!(
        "CD = {}\nCL = {}\n",
        format_list(&[coeffs.cd]),
        format_list(&[coeffs.cl])
    );
    write_module(path, &body)
}

/// Read CD and CL; array values contribute their first element
pub fn read_aero(path: &Path) -> Result<AeroCoefficients> {
    let vars = read_module(path)?;
    let cd = take(&vars, path, "CD", None)?;
    let cl = take(&vars, path, "CL", None)?;
    Ok(AeroCoefficients {
        cd: cd[0],
        cl: cl[0],
    })
}

/// Remove a result file left over from a previous evaluation
pub fn discard_stale(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(HandoffError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn take(
    vars: &HashMap<String, Vec<String>>,
    path: &Path,
    name: &str,
    expected: Option<usize>,
) -> Result<Vec<f64>> {
    let tokens = vars.get(name).ok_or_else(|| HandoffError::Missing {
        path: path.to_path_buf(),
        name: name.to_string(),
    })?;

    let values = tokens
        .iter()
        .map(|t| {
            t.parse::<f64>().map_err(|_| HandoffError::BadNumber {
                path: path.to_path_buf(),
                name: name.to_string(),
                token: t.clone(),
            })
        })
        .collect::<Result<Vec<f64>>>()?;

    let ok = match expected {
        Some(n) => values.len() == n,
        None => !values.is_empty(),
    };
    if !ok {
        return Err(HandoffError::Length {
            path: path.to_path_buf(),
            name: name.to_string(),
            expected: expected.unwrap_or(1),
            found: values.len(),
        });
    }
    Ok(values)
}

fn read_module(path: &Path) -> Result<HashMap<String, Vec<String>>> {
    let text = fs::read_to_string(path).map_err(|source| HandoffError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_assignments(&text, path)
}

/// Parse `name = value` lines into raw numeric tokens.
///
/// A value is a scalar or a bracketed list whose elements are separated by
/// commas or whitespace. A list may continue over several lines until its
/// closing bracket, as numpy prints long arrays.
fn parse_assignments(text: &str, path: &Path) -> Result<HashMap<String, Vec<String>>> {
    let mut vars: HashMap<String, Vec<String>> = HashMap::new();
    let mut lines = text.lines().enumerate();

    while let Some((idx, raw)) = lines.next() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let syntax = || HandoffError::Syntax {
            path: path.to_path_buf(),
            line: idx + 1,
            text: raw.to_string(),
        };

        let (name, value) = line.split_once('=').ok_or_else(syntax)?;
        let name = name.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(syntax());
        }

        let mut value = value.trim().to_string();
        if value.starts_with('[') {
            while !value.contains(']') {
                match lines.next() {
                    Some((_, cont)) => {
                        value.push(' ');
                        value.push_str(cont.trim());
                    }
                    None => return Err(syntax()),
                }
            }
        }

        let tokens: Vec<String> = value
            .trim_matches(|c| c == '[' || c == ']')
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        if vars.insert(name.to_string(), tokens).is_some() {
            return Err(HandoffError::Duplicate {
                path: path.to_path_buf(),
                name: name.to_string(),
            });
        }
    }

    Ok(vars)
}
