//! The target grid every normalizer writes onto.

use anyhow::Context;
use cwf_core::ascii_grid;
use cwf_core::boundary::Boundary;
use cwf_core::grid::{GridSpec, RegionMask};
use cwf_core::layout::DataLayout;
use log::info;

/// The analysis grid and which of its cells belong to the region.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub grid: GridSpec,
    pub mask: RegionMask,
}

impl Target {
    /// The window of `source` (the climate grid) covering the region,
    /// with the region rasterized by cell centre.
    pub fn build(source: &GridSpec, boundary: &Boundary) -> anyhow::Result<Target> {
        let bbox = boundary.bbox()?;
        let grid = source
            .window_covering(&bbox)
            .with_context(|| format!("region {} is not covered by the climate grid", boundary.name))?;
        let mask = RegionMask::from_geometry(grid, &boundary.geometry);
        if mask.count() == 0 {
            anyhow::bail!("region {} contains no grid cell centres", boundary.name);
        }
        info!(
            "Target grid {} x {} at {:.6} deg, {} cells inside {}",
            grid.ncols,
            grid.nrows,
            grid.cellsize,
            mask.count(),
            boundary.name
        );
        Ok(Target { grid, mask })
    }

    pub fn save(&self, layout: &DataLayout) -> anyhow::Result<()> {
        self.grid.save(&layout.grid())?;
        ascii_grid::write(&layout.mask(), &self.mask.to_raster())?;
        Ok(())
    }

    pub fn load(layout: &DataLayout) -> anyhow::Result<Target> {
        let grid = GridSpec::load(&layout.grid())?;
        let raster = ascii_grid::read_window(&layout.mask(), &grid)
            .with_context(|| format!("reading {}", layout.mask().display()))?;
        Ok(Target {
            grid,
            mask: RegionMask::from_raster(&raster),
        })
    }
}
