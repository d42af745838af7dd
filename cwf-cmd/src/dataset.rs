//! Labels, the combined table, the fold split and prediction scoring.

use anyhow::Context;
use cwf_core::perimeter::{load_perimeters, PerimeterFilter};
use cwf_data::combine::{combine_dataset, CombineOptions};
use cwf_data::evaluate::evaluate_predictions;
use cwf_data::labels::rasterize_labels;
use cwf_data::split::split_dataset;
use log::info;
use std::path::Path;

use crate::config::PipelineConfig;

/// Rasterizes the qualifying MTBS perimeters into monthly labels.
pub fn run_labels(config: &PipelineConfig) -> anyhow::Result<()> {
    let layout = config.layout();
    let boundary = config.boundary()?;
    let filter = PerimeterFilter {
        incident_types: &config.incident_types,
        period: config.period(),
        region: &boundary.geometry,
    };
    let shp = layout.raw_mtbs();
    let (perimeters, stats) = load_perimeters(&shp, &filter)
        .with_context(|| format!("reading {} (run `fetch mtbs` first)", shp.display()))?;
    info!(
        "MTBS: {} perimeters read, {} kept, {} without a date, {} outside type/period/region",
        stats.read, stats.kept, stats.no_date, stats.rejected
    );
    rasterize_labels(&layout, &perimeters, config.period(), config.label_policy)?;
    Ok(())
}

pub fn run_combine(config: &PipelineConfig, keep_nodata: bool) -> anyhow::Result<()> {
    let options = CombineOptions {
        period: config.period(),
        keep_nodata,
    };
    combine_dataset(&config.layout(), &options)?;
    Ok(())
}

pub fn run_split(config: &PipelineConfig) -> anyhow::Result<()> {
    split_dataset(&config.layout(), &config.split())?;
    Ok(())
}

pub fn run_evaluate(
    config: &PipelineConfig,
    predictions: &Path,
    threshold: f64,
    map: bool,
) -> anyhow::Result<()> {
    let report = evaluate_predictions(&config.layout(), predictions, threshold, map)?;
    if let Some(auc) = report.validation.as_ref().and_then(|v| v.auc) {
        info!("Validation AUC {:.4}", auc);
    }
    Ok(())
}
