//! Well log dataset model.
//!
//! The dataset is produced by an external ingestion layer (LAS parsing and
//! curve alias mapping live outside this crate) and consumed here as an
//! opaque map of named curves. Missing samples are `None`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A parsed well log interval: named curves plus free-form metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WellDataset {
    /// Curve name → ordered sample values. `None` marks a missing sample.
    #[serde(default)]
    pub curves: HashMap<String, Vec<Option<f64>>>,
    /// Metadata from the ingestion layer (well name, units, depth step...).
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl WellDataset {
    /// Create an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a curve, replacing any existing curve with the same name.
    pub fn insert_curve(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) {
        self.curves.insert(name.into(), values);
    }

    /// Look up a curve by exact name.
    pub fn curve(&self, name: &str) -> Option<&[Option<f64>]> {
        self.curves.get(name).map(|v| v.as_slice())
    }

    /// Non-missing values of a curve, in order.
    pub fn curve_values(&self, name: &str) -> Vec<f64> {
        self.curves
            .get(name)
            .map(|v| v.iter().copied().flatten().collect())
            .unwrap_or_default()
    }

    /// The depth curve, located case-insensitively.
    pub fn depth_curve(&self) -> Option<&[Option<f64>]> {
        self.curves
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("depth"))
            .map(|(_, v)| v.as_slice())
    }

    /// Human-readable summary used in specialist prompts: depth range plus
    /// per-curve mean statistics.
    pub fn summary(&self) -> String {
        let depth_line = match self.depth_curve() {
            Some(depth) => {
                let vals: Vec<f64> = depth.iter().copied().flatten().collect();
                match (
                    vals.iter().copied().reduce(f64::min),
                    vals.iter().copied().reduce(f64::max),
                ) {
                    (Some(lo), Some(hi)) => format!("Depth Range: {lo:.2}m - {hi:.2}m"),
                    _ => "Depth Range: Unknown".to_string(),
                }
            }
            None => "Depth Range: Unknown".to_string(),
        };

        let mut names: Vec<&String> = self.curves.keys().collect();
        names.sort();
        let mut stats = Vec::new();
        for name in names {
            let vals = self.curve_values(name);
            if !vals.is_empty() {
                let avg = vals.iter().sum::<f64>() / vals.len() as f64;
                stats.push(format!("{name}: avg={avg:.2} (n={})", vals.len()));
            }
        }

        format!("{depth_line}\nAvailable Curves: [{}]", stats.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_values_skips_missing() {
        let mut ds = WellDataset::new();
        ds.insert_curve("GR", vec![Some(40.0), None, Some(80.0)]);
        assert_eq!(ds.curve_values("GR"), vec![40.0, 80.0]);
        assert!(ds.curve_values("RHOB").is_empty());
    }

    #[test]
    fn test_summary_includes_depth_range_and_stats() {
        let mut ds = WellDataset::new();
        ds.insert_curve("DEPTH", vec![Some(1500.0), Some(1500.5), Some(1501.0)]);
        ds.insert_curve("GR", vec![Some(40.0), Some(60.0), None]);
        let summary = ds.summary();
        assert!(summary.contains("Depth Range: 1500.00m - 1501.00m"));
        assert!(summary.contains("GR: avg=50.00 (n=2)"));
    }

    #[test]
    fn test_summary_without_depth() {
        let ds = WellDataset::new();
        assert!(ds.summary().contains("Depth Range: Unknown"));
    }
}
