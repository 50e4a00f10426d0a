//! Built-in tool implementations shipped with the crate.
//!
//! These back the skill packs under `skills/`: linear gamma-ray shale
//! volume, density porosity, and curve extreme detection. Each function is
//! a plain [`ToolFn`] body; the domain formulas are deliberately simple and
//! the registry treats them as opaque callables.

use anyhow::{anyhow, bail, Context};
use serde_json::{json, Value};

use super::executor::{ExecutorTable, ToolContext};
use crate::dataset::WellDataset;

/// Register every built-in tool function into `table`.
pub fn register_builtins(table: &ExecutorTable) {
    table.register(
        "lithology-classification/scripts/quantitative:calculate_vsh",
        calculate_vsh,
    );
    table.register(
        "reservoir-properties/scripts/porosity:from_density",
        density_porosity,
    );
    table.register("statistics/scripts/find_extremes:execute", find_extremes);
}

fn dataset<'a>(ctx: &'a ToolContext) -> anyhow::Result<&'a WellDataset> {
    ctx.dataset
        .as_deref()
        .ok_or_else(|| anyhow!("no dataset in scope"))
}

fn curve_values(ctx: &ToolContext, param: &str, fallback: &str) -> anyhow::Result<(String, Vec<f64>)> {
    let name = ctx.param_str(param).unwrap_or(fallback).to_string();
    let values = dataset(ctx)?.curve_values(&name);
    if values.is_empty() {
        bail!("curve '{name}' has no samples");
    }
    Ok((name, values))
}

/// Linear gamma-ray index shale volume: `(GR - GRmin) / (GRmax - GRmin)`,
/// clamped to [0, 1].
fn calculate_vsh(ctx: &ToolContext) -> anyhow::Result<Value> {
    let (curve, gr) = curve_values(ctx, "gr_curve", "GR")?;
    let gr_min = ctx
        .param_f64("gr_min")
        .unwrap_or_else(|| gr.iter().copied().fold(f64::INFINITY, f64::min));
    let gr_max = ctx
        .param_f64("gr_max")
        .unwrap_or_else(|| gr.iter().copied().fold(f64::NEG_INFINITY, f64::max));
    if (gr_max - gr_min).abs() < f64::EPSILON {
        bail!("degenerate gamma ray range: gr_min == gr_max == {gr_min}");
    }

    let vsh: Vec<f64> = gr
        .iter()
        .map(|g| ((g - gr_min) / (gr_max - gr_min)).clamp(0.0, 1.0))
        .collect();
    let mean = vsh.iter().sum::<f64>() / vsh.len() as f64;

    Ok(json!({
        "tool": "calculate_vsh",
        "curve": curve,
        "gr_min": gr_min,
        "gr_max": gr_max,
        "samples": vsh.len(),
        "mean_vsh": mean,
        "max_vsh": vsh.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        "min_vsh": vsh.iter().copied().fold(f64::INFINITY, f64::min),
    }))
}

/// Density porosity: `(ρma - ρb) / (ρma - ρf)` with sandstone matrix and
/// fresh-water fluid defaults.
fn density_porosity(ctx: &ToolContext) -> anyhow::Result<Value> {
    let (curve, rhob) = curve_values(ctx, "rhob_curve", "RHOB")?;
    let rho_matrix = ctx.param_f64("rho_matrix").unwrap_or(2.65);
    let rho_fluid = ctx.param_f64("rho_fluid").unwrap_or(1.0);
    if (rho_matrix - rho_fluid).abs() < f64::EPSILON {
        bail!("matrix and fluid density are equal: {rho_matrix}");
    }

    let phi: Vec<f64> = rhob
        .iter()
        .map(|rb| ((rho_matrix - rb) / (rho_matrix - rho_fluid)).clamp(0.0, 1.0))
        .collect();
    let mean = phi.iter().sum::<f64>() / phi.len() as f64;

    Ok(json!({
        "tool": "density_porosity",
        "curve": curve,
        "rho_matrix": rho_matrix,
        "rho_fluid": rho_fluid,
        "samples": phi.len(),
        "mean_porosity": mean,
        "max_porosity": phi.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }))
}

/// Minimum and maximum of a named curve, with sample indices.
fn find_extremes(ctx: &ToolContext) -> anyhow::Result<Value> {
    let name = ctx
        .param_str("curve")
        .context("parameter 'curve' is required")?
        .to_string();
    let samples = dataset(ctx)?
        .curve(&name)
        .ok_or_else(|| anyhow!("curve '{name}' not found"))?;

    let mut min: Option<(usize, f64)> = None;
    let mut max: Option<(usize, f64)> = None;
    for (i, v) in samples.iter().enumerate() {
        if let Some(v) = v {
            if min.map_or(true, |(_, m)| *v < m) {
                min = Some((i, *v));
            }
            if max.map_or(true, |(_, m)| *v > m) {
                max = Some((i, *v));
            }
        }
    }
    let (min, max) = min.zip(max).ok_or_else(|| anyhow!("curve '{name}' has no samples"))?;

    Ok(json!({
        "tool": "find_extremes",
        "curve": name,
        "min": {"index": min.0, "value": min.1},
        "max": {"index": max.0, "value": max.1},
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ctx_with_gr() -> ToolContext {
        let mut ds = WellDataset::new();
        ds.insert_curve("GR", vec![Some(20.0), Some(80.0), None, Some(140.0)]);
        ToolContext {
            params: serde_json::Map::new(),
            dataset: Some(Arc::new(ds)),
        }
    }

    #[test]
    fn test_calculate_vsh_linear_index() {
        let out = calculate_vsh(&ctx_with_gr()).unwrap();
        assert_eq!(out["gr_min"], 20.0);
        assert_eq!(out["gr_max"], 140.0);
        assert_eq!(out["samples"], 3);
        assert_eq!(out["mean_vsh"], 0.5);
    }

    #[test]
    fn test_calculate_vsh_degenerate_range_fails() {
        let mut ds = WellDataset::new();
        ds.insert_curve("GR", vec![Some(50.0), Some(50.0)]);
        let ctx = ToolContext {
            params: serde_json::Map::new(),
            dataset: Some(Arc::new(ds)),
        };
        assert!(calculate_vsh(&ctx).is_err());
    }

    #[test]
    fn test_find_extremes_reports_indices() {
        let mut ctx = ctx_with_gr();
        ctx.params.insert("curve".into(), json!("GR"));
        let out = find_extremes(&ctx).unwrap();
        assert_eq!(out["min"]["index"], 0);
        assert_eq!(out["max"]["index"], 3);
        assert_eq!(out["max"]["value"], 140.0);
    }

    #[test]
    fn test_missing_dataset_is_error_not_panic() {
        let ctx = ToolContext::default();
        assert!(calculate_vsh(&ctx).is_err());
        assert!(density_porosity(&ctx).is_err());
    }
}
