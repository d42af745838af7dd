//! PRISM monthly climate grids.
//!
//! PRISM already sits on the 30″ grid the pipeline uses, so normalizing
//! is a clip to the target window plus the region mask. The first raw
//! grid found also defines the target grid.

use anyhow::Context;
use cwf_core::ascii_grid;
use cwf_core::boundary::Boundary;
use cwf_core::layout::{ClimateVariable, DataLayout};
use cwf_core::month::{MonthRange, YearMonth};
use log::{info, warn};

use crate::target::Target;

#[derive(Debug, Default)]
pub struct ClimateSummary {
    pub written: usize,
    pub missing: Vec<(ClimateVariable, YearMonth)>,
}

/// Defines the target grid from the raw PRISM files and writes one
/// clipped, masked grid per variable and month of `period`.
pub fn normalize_climate(
    layout: &DataLayout,
    boundary: &Boundary,
    period: MonthRange,
) -> anyhow::Result<ClimateSummary> {
    let first = ClimateVariable::ALL
        .iter()
        .flat_map(|v| period.map(move |m| layout.raw_prism(*v, m)))
        .find(|path| path.exists())
        .with_context(|| {
            format!(
                "no raw PRISM grids under {} (run `fetch prism` first)",
                layout.raw_dir("prism").display()
            )
        })?;
    let header = ascii_grid::read_header(&first)?;
    let target = Target::build(&header.spec, boundary)?;
    target.save(layout)?;

    let mut summary = ClimateSummary::default();
    for variable in ClimateVariable::ALL {
        for month in period {
            let raw = layout.raw_prism(variable, month);
            if !raw.exists() {
                summary.missing.push((variable, month));
                continue;
            }
            let mut raster = ascii_grid::read_window(&raw, &target.grid)
                .with_context(|| format!("clipping {}", raw.display()))?;
            raster.apply_mask(&target.mask);
            ascii_grid::write(&layout.prism(variable, month), &raster)?;
            summary.written += 1;
        }
        info!("Normalized PRISM {}", variable);
    }
    if !summary.missing.is_empty() {
        warn!(
            "{} PRISM variable-months have no raw grid, e.g. {} {}",
            summary.missing.len(),
            summary.missing[0].0,
            summary.missing[0].1
        );
    }
    info!("Wrote {} PRISM grids", summary.written);
    Ok(summary)
}
