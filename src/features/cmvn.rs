//! Global mean/variance normalization statistics.
//!
//! Statistics come from a Kaldi-style text file with an `<AddShift>` section
//! (negated means) and a `<Rescale>` section (inverse standard deviations),
//! each followed by a bracketed vector on the next line. The file is parsed
//! once at startup and applied per dimension to every feature frame.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parsed normalization statistics.
#[derive(Debug, Clone)]
pub struct Cmvn {
    mean: Vec<f32>,
    inv_std: Vec<f32>,
}

impl Cmvn {
    /// Build statistics from explicit vectors (used by tests and tools).
    pub fn new(mean: Vec<f32>, inv_std: Vec<f32>) -> Result<Self> {
        if mean.len() != inv_std.len() {
            anyhow::bail!(
                "mean/inv_std dimension mismatch: {} vs {}",
                mean.len(),
                inv_std.len()
            );
        }
        if mean.is_empty() {
            anyhow::bail!("normalization statistics are empty");
        }
        Ok(Self { mean, inv_std })
    }

    /// Load statistics from a Kaldi-style text file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read cmvn statistics {}", path.display()))?;
        let (shift, rescale) = parse_sections(&text)
            .with_context(|| format!("malformed cmvn statistics {}", path.display()))?;
        // The shift section stores negated means.
        let mean = shift.into_iter().map(|v| -v).collect();
        Self::new(mean, rescale)
    }

    /// Statistics dimensionality.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Normalize frames in place: `(raw - mean) * inv_std` per dimension.
    ///
    /// # Errors
    ///
    /// Fails when a frame's dimension does not match the statistics.
    pub fn apply(&self, frames: &mut [Vec<f32>]) -> Result<()> {
        for frame in frames.iter_mut() {
            if frame.len() != self.dim() {
                anyhow::bail!(
                    "feature dimension {} does not match cmvn dimension {}",
                    frame.len(),
                    self.dim()
                );
            }
            for ((value, mean), inv_std) in frame.iter_mut().zip(&self.mean).zip(&self.inv_std) {
                *value = (*value - mean) * inv_std;
            }
        }
        Ok(())
    }
}

/// Extract the `<AddShift>` and `<Rescale>` vectors from the statistics text.
fn parse_sections(text: &str) -> Result<(Vec<f32>, Vec<f32>)> {
    let lines: Vec<&str> = text.lines().collect();
    let shift = read_vector_after(&lines, "<AddShift>").context("missing <AddShift> vector")?;
    let rescale = read_vector_after(&lines, "<Rescale>").context("missing <Rescale> vector")?;
    if shift.len() != rescale.len() {
        anyhow::bail!(
            "shift/rescale dimension mismatch: {} vs {}",
            shift.len(),
            rescale.len()
        );
    }
    Ok((shift, rescale))
}

/// Find `marker`, then parse the bracketed vector on the following lines.
fn read_vector_after(lines: &[&str], marker: &str) -> Result<Vec<f32>> {
    let start = lines
        .iter()
        .position(|line| line.trim_start().starts_with(marker))
        .with_context(|| format!("marker {marker} not found"))?;

    for line in &lines[start..] {
        let Some(open) = line.find('[') else { continue };
        let close = line.rfind(']').unwrap_or(line.len());
        let values: Result<Vec<f32>> = line[open + 1..close]
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f32>()
                    .with_context(|| format!("invalid statistic value {token:?}"))
            })
            .collect();
        let values = values?;
        if values.is_empty() {
            anyhow::bail!("empty vector after {marker}");
        }
        return Ok(values);
    }
    anyhow::bail!("no bracketed vector after {marker}")
}
