//! Regrids raw sources onto the target grid.

use clap::ValueEnum;
use cwf_data::climate::normalize_climate;
use cwf_data::landcover::normalize_landcover;
use cwf_data::severity::normalize_severity;
use cwf_data::terrain::normalize_terrain;
use cwf_data::vegetation::normalize_vegetation;
use log::info;

use crate::config::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NormalizeSource {
    /// Clip PRISM grids to the region; defines the target grid
    Prism,
    /// Elevation, slope and aspect from the DEM tiles
    Dem,
    /// Nearest-neighbour NDVI per month
    Ndvi,
    /// Dominant NLCD class per cell and year
    Nlcd,
    /// Dominant MTBS burn-severity class per cell and year
    Severity,
}

pub fn run_normalize(config: &PipelineConfig, source: NormalizeSource) -> anyhow::Result<()> {
    let layout = config.layout();
    match source {
        NormalizeSource::Prism => {
            let boundary = config.boundary()?;
            normalize_climate(&layout, &boundary, config.period())?;
        }
        NormalizeSource::Dem => {
            let tiles = normalize_terrain(&layout)?;
            info!("DEM: {} tiles aggregated", tiles);
        }
        NormalizeSource::Ndvi => {
            let months = normalize_vegetation(&layout, config.period())?;
            if let (Some(first), Some(last)) = (months.first(), months.last()) {
                info!("NDVI: {} months from {} to {}", months.len(), first, last);
            }
        }
        NormalizeSource::Nlcd => {
            let years = normalize_landcover(&layout, config.years(), config.landcover_supersample)?;
            info!("NLCD: years {:?}", years);
        }
        NormalizeSource::Severity => {
            let summary =
                normalize_severity(&layout, config.years(), config.landcover_supersample)?;
            info!("Burn severity: years {:?}", summary.written);
        }
    }
    Ok(())
}
