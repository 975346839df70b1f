use crate::design::N_SHAPE;
use crate::objective::Evaluation;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct CsvWriter {
    w: BufWriter<File>,
}

impl CsvWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let f = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self { w: BufWriter::new(f) })
    }

    pub fn write_header(&mut self) -> Result<()> {
        let shape_cols: Vec<String> = (0..N_SHAPE).map(|i| format!("shape_{}", i)).collect();
        writeln!(
            self.w,
            "eval,{},aoa,status,cd,cl,objective,wall_time_s",
            shape_cols.join(",")
        )?;
        Ok(())
    }

    pub fn write_row(&mut self, e: &Evaluation) -> Result<()> {
        let shape: Vec<String> = e.design.shape.iter().map(|v| format!("{:.8e}", v)).collect();
        let (cd, cl) = match &e.coeffs {
            Some(c) => (format!("{:.8e}", c.cd), format!("{:.8e}", c.cl)),
            None => (String::new(), String::new()),
        };
        writeln!(
            self.w,
            "{},{},{:.8e},{},{},{},{:.8e},{:.3}",
            e.index,
            shape.join(","),
            e.design.aoa,
            e.status(),
            cd,
            cl,
            e.value,
            e.elapsed.as_secs_f64()
        )?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.w.flush()?;
        Ok(())
    }
}

/// History file with its header written, ready for streamed rows
pub fn history_writer(path: &Path) -> Result<CsvWriter> {
    let mut w = CsvWriter::create(path)?;
    w.write_header()?;
    w.flush()?;
    Ok(w)
}
