//! Annual NLCD landcover, dominant class per target cell.
//!
//! NLCD is a 30 m Albers raster; the target grid is geographic. Each
//! target cell is sampled on an n x n lattice, the lattice points are
//! projected into Albers and looked up in the class raster, and the most
//! frequent class wins. The class raster is read one band of target rows
//! at a time. The MTBS severity mosaics share the same aggregation.

use anyhow::Context;
use cwf_core::ascii_grid;
use cwf_core::geotiff::{GeoTiff, ModelType};
use cwf_core::grid::{BoundingBox, Raster};
use cwf_core::layout::DataLayout;
use cwf_core::projection::{Reprojection, CONUS_ALBERS_CODES};
use log::{info, warn};
use std::path::Path;

use crate::target::Target;

/// Open water, perennial ice/snow and the NLCD fill value never win.
pub const EXCLUDED_CLASSES: [u8; 3] = [11, 12, 250];

/// Target rows processed per read of the class raster.
const BAND_ROWS: usize = 8;

/// Most frequent class in `counts`, skipping `excluded`; ties go to the
/// smaller class code.
pub fn dominant_class(counts: &[u32; 256], excluded: &[u8]) -> Option<u8> {
    let mut best: Option<(u8, u32)> = None;
    for (code, &count) in counts.iter().enumerate() {
        let code = code as u8;
        if count == 0 || excluded.contains(&code) {
            continue;
        }
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((code, count));
        }
    }
    best.map(|(code, _)| code)
}

/// Dominant NLCD class of every region cell of `target`.
pub fn aggregate_landcover(
    tif: &GeoTiff,
    target: &Target,
    projection: &Reprojection,
    supersample: usize,
) -> anyhow::Result<Raster> {
    aggregate_classes(tif, target, projection, supersample, &EXCLUDED_CLASSES)
}

/// Fails unless `tif` is in CONUS Albers, or has no CRS at all.
pub fn check_conus_albers(tif: &GeoTiff, path: &Path) -> anyhow::Result<()> {
    match tif.georef.model {
        ModelType::Geographic => {
            anyhow::bail!("{} is geographic; expected Albers metres", path.display())
        }
        ModelType::Unknown => warn!("{} has no CRS; assuming CONUS Albers", path.display()),
        ModelType::Projected => {}
    }
    if let Some(epsg) = tif.projected_cs {
        if !CONUS_ALBERS_CODES.contains(&epsg) {
            anyhow::bail!("{} is in EPSG:{}; expected CONUS Albers", path.display(), epsg);
        }
    }
    Ok(())
}

/// Dominant class of every region cell of a projected class raster,
/// no-data where no sample hits a class outside `excluded`.
pub fn aggregate_classes(
    tif: &GeoTiff,
    target: &Target,
    projection: &Reprojection,
    supersample: usize,
    excluded: &[u8],
) -> anyhow::Result<Raster> {
    if tif.georef.model == ModelType::Geographic {
        anyhow::bail!("class raster is geographic; expected Albers metres");
    }
    let n = supersample.max(1);
    let grid = &target.grid;
    let mut out = Raster::nodata(*grid);
    let mut points: Vec<(usize, f64, f64)> = Vec::new();

    for band_start in (0..grid.nrows).step_by(BAND_ROWS) {
        let band_end = (band_start + BAND_ROWS).min(grid.nrows);

        points.clear();
        let mut bbox: Option<BoundingBox> = None;
        for row in band_start..band_end {
            for col in 0..grid.ncols {
                if !target.mask.contains(row, col) {
                    continue;
                }
                let cell = grid.cell_bounds(row, col);
                let index = row * grid.ncols + col;
                for i in 0..n {
                    let lat = cell.max_y - (i as f64 + 0.5) / n as f64 * grid.cellsize;
                    for j in 0..n {
                        let lon = cell.min_x + (j as f64 + 0.5) / n as f64 * grid.cellsize;
                        let (x, y) = projection.forward(lon, lat)?;
                        points.push((index, x, y));
                        bbox = Some(match bbox {
                            None => BoundingBox {
                                min_x: x,
                                min_y: y,
                                max_x: x,
                                max_y: y,
                            },
                            Some(b) => BoundingBox {
                                min_x: b.min_x.min(x),
                                min_y: b.min_y.min(y),
                                max_x: b.max_x.max(x),
                                max_y: b.max_y.max(y),
                            },
                        });
                    }
                }
            }
        }
        let Some(bbox) = bbox else {
            continue;
        };
        let Some(window) = tif.window_for(&bbox, 1) else {
            continue;
        };
        let block = tif.read_window(window)?;

        // points are grouped by cell, n * n at a time
        for cell_points in points.chunks(n * n) {
            let index = cell_points[0].0;
            let mut counts = [0u32; 256];
            for &(_, x, y) in cell_points {
                let class = tif
                    .pixel_at(x, y)
                    .and_then(|(r, c)| block.get(r, c))
                    .filter(|v| *v >= 0.0 && *v <= 255.0);
                if let Some(class) = class {
                    counts[class as usize] += 1;
                }
            }
            if let Some(class) = dominant_class(&counts, excluded) {
                out.values[index] = class as f32;
            }
        }
    }
    Ok(out)
}

/// Writes one dominant-class raster per year that has a raw NLCD file.
/// Returns the years written.
pub fn normalize_landcover(
    layout: &DataLayout,
    years: impl IntoIterator<Item = i32>,
    supersample: usize,
) -> anyhow::Result<Vec<i32>> {
    let target = Target::load(layout)?;
    let projection = Reprojection::to_conus_albers()?;
    let mut written = Vec::new();
    for year in years {
        let raw = layout.raw_nlcd(year);
        if !raw.exists() {
            warn!("No NLCD raster for {} at {}", year, raw.display());
            continue;
        }
        let tif = GeoTiff::open(&raw)?;
        check_conus_albers(&tif, &raw)?;
        let raster = aggregate_landcover(&tif, &target, &projection, supersample)
            .with_context(|| format!("aggregating {}", raw.display()))?;
        ascii_grid::write(&layout.nlcd(year), &raster)?;
        info!(
            "NLCD {}: {} of {} region cells classified",
            year,
            raster.valid_count(),
            target.mask.count()
        );
        written.push(year);
    }
    if written.is_empty() {
        anyhow::bail!(
            "no NLCD rasters under {} (run `fetch nlcd` first)",
            layout.raw_dir("nlcd").display()
        );
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwf_core::geotiff::{write, Georeference};
    use cwf_core::grid::{GridSpec, RegionMask};
    use tempfile::tempdir;

    #[test]
    fn test_dominant_class_rules() {
        let mut counts = [0u32; 256];
        assert_eq!(dominant_class(&counts, &EXCLUDED_CLASSES), None);

        counts[11] = 100;
        counts[250] = 80;
        assert_eq!(dominant_class(&counts, &EXCLUDED_CLASSES), None);

        counts[52] = 5;
        counts[42] = 5;
        counts[71] = 3;
        // tie between 42 and 52 goes to the smaller code; water is ignored
        assert_eq!(dominant_class(&counts, &EXCLUDED_CLASSES), Some(42));

        counts[71] = 6;
        assert_eq!(dominant_class(&counts, &EXCLUDED_CLASSES), Some(71));
        assert_eq!(dominant_class(&counts, &[]), Some(11));
    }

    #[test]
    fn test_aggregate_split_raster() {
        let albers = Reprojection::to_conus_albers().unwrap();
        let forward = |lon: f64, lat: f64| albers.forward(lon, lat).unwrap();
        let grid = GridSpec {
            ncols: 3,
            nrows: 2,
            west: -117.0,
            south: 32.98,
            cellsize: 0.01,
        };
        let target = Target {
            grid,
            mask: RegionMask::all(grid),
        };

        let corners = [
            forward(-117.0, 32.98),
            forward(-117.0, 33.0),
            forward(-116.98, 32.98),
            forward(-116.98, 33.0),
        ];
        let x_west = corners[0].0.min(corners[1].0) - 200.0;
        // stop short of the third column everywhere
        let x_east = corners[2].0.min(corners[3].0) - 100.0;
        let y_north = corners.iter().map(|c| c.1).fold(f64::MIN, f64::max) + 200.0;
        let y_south = corners.iter().map(|c| c.1).fold(f64::MAX, f64::min) - 200.0;
        let x_mid = forward(-116.99, 32.99).0;

        let pixel = 30.0;
        let width = ((x_east - x_west) / pixel).floor() as usize;
        let height = ((y_north - y_south) / pixel).ceil() as usize;
        let mut data: Vec<u8> = Vec::with_capacity(width * height);
        for row in 0..height {
            for col in 0..width {
                let x = x_west + (col as f64 + 0.5) * pixel;
                let class = if x >= x_mid {
                    52
                } else if (row + col) % 3 == 0 {
                    11
                } else {
                    42
                };
                data.push(class);
            }
        }

        let dir = tempdir().unwrap();
        let path = dir.path().join("nlcd.tif");
        let georef = Georeference {
            origin_x: x_west,
            origin_y: y_north,
            pixel_width: pixel,
            pixel_height: pixel,
            model: ModelType::Projected,
        };
        write(&path, &georef, width, height, &data, Some(250.0)).unwrap();

        let tif = GeoTiff::open(&path).unwrap();
        check_conus_albers(&tif, &path).unwrap();
        let out = aggregate_landcover(&tif, &target, &albers, 16).unwrap();
        assert_eq!(out.value(0, 0), Some(42.0));
        assert_eq!(out.value(1, 0), Some(42.0));
        assert_eq!(out.value(0, 1), Some(52.0));
        assert_eq!(out.value(1, 1), Some(52.0));
        assert_eq!(out.value(0, 2), None);
        assert_eq!(out.value(1, 2), None);
    }

    #[test]
    fn test_geographic_raster_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nlcd.tif");
        let georef = Georeference {
            origin_x: -117.0,
            origin_y: 33.0,
            pixel_width: 0.01,
            pixel_height: 0.01,
            model: ModelType::Geographic,
        };
        write(&path, &georef, 2, 2, &[42u8; 4], None).unwrap();
        let grid = GridSpec {
            ncols: 1,
            nrows: 1,
            west: -117.0,
            south: 32.99,
            cellsize: 0.01,
        };
        let target = Target {
            grid,
            mask: RegionMask::all(grid),
        };
        let tif = GeoTiff::open(&path).unwrap();
        assert!(check_conus_albers(&tif, &path).is_err());
        let albers = Reprojection::to_conus_albers().unwrap();
        assert!(aggregate_landcover(&tif, &target, &albers, 4).is_err());
    }
}
