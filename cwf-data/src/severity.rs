//! Yearly MTBS burn-severity mosaics, dominant class per target cell.
//!
//! The mosaics are thematic 30 m Albers rasters like NLCD, so they go
//! through the same lattice aggregation. They are written next to the
//! other normalized layers and are not joined into the combined table.

use anyhow::Context;
use cwf_core::ascii_grid;
use cwf_core::geotiff::GeoTiff;
use cwf_core::grid::Raster;
use cwf_core::layout::DataLayout;
use cwf_core::projection::Reprojection;
use log::{info, warn};

use crate::landcover::{aggregate_classes, check_conus_albers};
use crate::target::Target;

/// Thematic classes of the mosaics.
pub const UNBURNED_TO_LOW: u8 = 1;
pub const LOW: u8 = 2;
pub const MODERATE: u8 = 3;
pub const HIGH: u8 = 4;
pub const INCREASED_GREENNESS: u8 = 5;

/// Background and the non-mapping mask never win.
pub const EXCLUDED_SEVERITY: [u8; 2] = [0, 6];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeveritySummary {
    pub written: Vec<i32>,
    /// Years with no raw mosaic on disk.
    pub missing: Vec<i32>,
}

/// Dominant severity class of every region cell; cells no fire reached
/// are no-data.
pub fn aggregate_severity(
    tif: &GeoTiff,
    target: &Target,
    projection: &Reprojection,
    supersample: usize,
) -> anyhow::Result<Raster> {
    aggregate_classes(tif, target, projection, supersample, &EXCLUDED_SEVERITY)
}

/// Writes one severity raster per year that has a raw mosaic.
pub fn normalize_severity(
    layout: &DataLayout,
    years: impl IntoIterator<Item = i32>,
    supersample: usize,
) -> anyhow::Result<SeveritySummary> {
    let target = Target::load(layout)?;
    let projection = Reprojection::to_conus_albers()?;
    let mut summary = SeveritySummary::default();
    for year in years {
        let raw = layout.raw_severity(year);
        if !raw.exists() {
            summary.missing.push(year);
            continue;
        }
        let tif = GeoTiff::open(&raw)?;
        check_conus_albers(&tif, &raw)?;
        let raster = aggregate_severity(&tif, &target, &projection, supersample)
            .with_context(|| format!("aggregating {}", raw.display()))?;
        ascii_grid::write(&layout.severity(year), &raster)?;
        info!("Burn severity {}: {} burned cells", year, raster.valid_count());
        summary.written.push(year);
    }
    if !summary.missing.is_empty() {
        warn!(
            "{} year(s) have no severity mosaic under {}: {:?}",
            summary.missing.len(),
            layout.raw_dir("severity").display(),
            summary.missing
        );
    }
    if summary.written.is_empty() {
        anyhow::bail!("no severity mosaics found (run `fetch severity` first)");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwf_core::geotiff::{write, Georeference, ModelType};
    use cwf_core::grid::{GridSpec, RegionMask};
    use std::fs;
    use tempfile::tempdir;

    fn target() -> Target {
        let grid = GridSpec {
            ncols: 2,
            nrows: 1,
            west: -117.0,
            south: 32.99,
            cellsize: 0.01,
        };
        Target {
            grid,
            mask: RegionMask::all(grid),
        }
    }

    /// Mosaic over both cells: mostly high severity in the western part of
    /// the first cell, background everywhere else. Meridians lean in
    /// Albers, so the burn stops well short of the cell boundary.
    fn write_mosaic(path: &std::path::Path, albers: &Reprojection) {
        let forward = |lon: f64, lat: f64| albers.forward(lon, lat).unwrap();
        let corners = [
            forward(-117.0, 32.99),
            forward(-117.0, 33.0),
            forward(-116.98, 32.99),
            forward(-116.98, 33.0),
        ];
        let x_west = corners.iter().map(|c| c.0).fold(f64::MAX, f64::min) - 100.0;
        let x_east = corners.iter().map(|c| c.0).fold(f64::MIN, f64::max) + 100.0;
        let y_north = corners.iter().map(|c| c.1).fold(f64::MIN, f64::max) + 100.0;
        let y_south = corners.iter().map(|c| c.1).fold(f64::MAX, f64::min) - 100.0;
        let x_burn = forward(-116.99, 32.995).0 - 300.0;

        let pixel = 30.0;
        let width = ((x_east - x_west) / pixel).ceil() as usize;
        let height = ((y_north - y_south) / pixel).ceil() as usize;
        let mut data: Vec<u8> = Vec::with_capacity(width * height);
        for row in 0..height {
            for col in 0..width {
                let x = x_west + (col as f64 + 0.5) * pixel;
                let class = if x >= x_burn {
                    0
                } else if row % 10 == 0 && col % 10 == 0 {
                    MODERATE
                } else {
                    HIGH
                };
                data.push(class);
            }
        }
        let georef = Georeference {
            origin_x: x_west,
            origin_y: y_north,
            pixel_width: pixel,
            pixel_height: pixel,
            model: ModelType::Projected,
        };
        write(path, &georef, width, height, &data, None).unwrap();
    }

    #[test]
    fn test_burned_cells_take_dominant_class() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mtbs_CA_2007.tif");
        let albers = Reprojection::to_conus_albers().unwrap();
        write_mosaic(&path, &albers);

        let tif = GeoTiff::open(&path).unwrap();
        let out = aggregate_severity(&tif, &target(), &albers, 8).unwrap();
        assert_eq!(out.value(0, 0), Some(HIGH as f32));
        // only background
        assert_eq!(out.value(0, 1), None);
    }

    #[test]
    fn test_normalize_skips_missing_years() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        target().save(&layout).unwrap();
        fs::create_dir_all(layout.raw_dir("severity")).unwrap();
        let albers = Reprojection::to_conus_albers().unwrap();
        write_mosaic(&layout.raw_severity(2007), &albers);

        let summary = normalize_severity(&layout, 2006..=2008, 4).unwrap();
        assert_eq!(summary.written, vec![2007]);
        assert_eq!(summary.missing, vec![2006, 2008]);
        let raster = ascii_grid::read(&layout.severity(2007)).unwrap();
        assert_eq!(raster.value(0, 0), Some(HIGH as f32));
        assert!(!layout.severity(2006).exists());
    }

    #[test]
    fn test_no_mosaics_is_an_error() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        target().save(&layout).unwrap();
        assert!(normalize_severity(&layout, 2006..=2008, 4).is_err());
    }
}
