//! MOD13A3 monthly NDVI, nearest-neighbour onto the target grid.

use anyhow::Context;
use cwf_core::ascii_grid;
use cwf_core::geotiff::{GeoTiff, ModelType};
use cwf_core::grid::Raster;
use cwf_core::layout::DataLayout;
use cwf_core::month::{MonthRange, YearMonth};
use cwf_utils::dates::parse_modis_doy;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::target::Target;

/// Raw MOD13A3 values are NDVI x 10000.
pub const NDVI_SCALE_FACTOR: f32 = 10000.0;
pub const NDVI_VALID_MIN: f32 = -2000.0;
pub const NDVI_VALID_MAX: f32 = 10000.0;

/// Scaled NDVI of a raw MOD13A3 value, `None` outside the valid range.
pub fn scale_ndvi(raw: f32) -> Option<f32> {
    if (NDVI_VALID_MIN..=NDVI_VALID_MAX).contains(&raw) {
        Some(raw / NDVI_SCALE_FACTOR)
    } else {
        None
    }
}

/// Takes, for every region cell, the source pixel containing its centre.
pub fn sample_ndvi(tif: &GeoTiff, target: &Target) -> anyhow::Result<Raster> {
    if tif.georef.model == ModelType::Projected {
        anyhow::bail!("NDVI raster is projected; request geographic output from AppEEARS");
    }
    let grid = &target.grid;
    let mut out = Raster::nodata(*grid);
    let Some(window) = tif.window_for(&grid.bounds(), 1) else {
        return Ok(out);
    };
    let block = tif.read_window(window)?;
    for (row, col) in target.mask.cells() {
        let (x, y) = grid.centre(row, col);
        let value = tif
            .pixel_at(x, y)
            .and_then(|(r, c)| block.get(r, c))
            .and_then(scale_ndvi);
        if let Some(value) = value {
            out.set(row, col, value);
        }
    }
    Ok(out)
}

/// NDVI GeoTIFFs of an AppEEARS bundle keyed by the month they cover.
fn ndvi_files(dir: &Path) -> anyhow::Result<BTreeMap<YearMonth, PathBuf>> {
    let mut files = BTreeMap::new();
    if !dir.exists() {
        return Ok(files);
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    paths.sort();
    for path in paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.contains("NDVI") || !name.ends_with(".tif") {
            continue;
        }
        let date = match parse_modis_doy(name) {
            Ok(date) => date,
            Err(e) => {
                warn!("Skipping {}: {}", name, e);
                continue;
            }
        };
        let month = YearMonth::from_date(&date);
        if let Some(previous) = files.insert(month, path.clone()) {
            warn!(
                "{} and {} both cover {}; using the latter",
                previous.display(),
                path.display(),
                month
            );
        }
    }
    Ok(files)
}

/// Writes one NDVI raster per month of `period` found in the raw bundle.
pub fn normalize_vegetation(layout: &DataLayout, period: MonthRange) -> anyhow::Result<Vec<YearMonth>> {
    let target = Target::load(layout)?;
    let files = ndvi_files(&layout.raw_dir("ndvi"))?;
    if files.is_empty() {
        anyhow::bail!(
            "no NDVI GeoTIFFs under {} (run `fetch ndvi` first)",
            layout.raw_dir("ndvi").display()
        );
    }
    let mut written = Vec::new();
    for (month, path) in files {
        if !period.contains(month) {
            debug!("{} is outside the study period", path.display());
            continue;
        }
        let tif = GeoTiff::open(&path)?;
        let raster =
            sample_ndvi(&tif, &target).with_context(|| format!("sampling {}", path.display()))?;
        ascii_grid::write(&layout.ndvi(month), &raster)?;
        written.push(month);
    }
    let expected = period.count();
    if written.len() < expected {
        warn!("NDVI covers {} of {} study months", written.len(), expected);
    }
    info!("Wrote {} NDVI rasters", written.len());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwf_core::geotiff::{write, Georeference};
    use cwf_core::grid::{GridSpec, RegionMask};
    use tempfile::tempdir;

    fn target() -> Target {
        let grid = GridSpec {
            ncols: 4,
            nrows: 2,
            west: -117.0,
            south: 32.0,
            cellsize: 0.5,
        };
        let mut mask = RegionMask::all(grid);
        mask.inside[7] = false;
        Target { grid, mask }
    }

    fn write_ndvi(path: &Path) {
        // 1 deg pixels: two columns, one row over the whole grid
        let georef = Georeference {
            origin_x: -117.0,
            origin_y: 33.0,
            pixel_width: 1.0,
            pixel_height: 1.0,
            model: ModelType::Geographic,
        };
        write(path, &georef, 2, 1, &[5000i16, -3000], Some(-3000.0)).unwrap();
    }

    #[test]
    fn test_scale_and_valid_range() {
        assert_eq!(scale_ndvi(5000.0), Some(0.5));
        assert_eq!(scale_ndvi(-2000.0), Some(-0.2));
        assert_eq!(scale_ndvi(-3000.0), None);
        assert_eq!(scale_ndvi(10001.0), None);
    }

    #[test]
    fn test_nearest_neighbour_sampling() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ndvi.tif");
        write_ndvi(&path);
        let tif = GeoTiff::open(&path).unwrap();
        let out = sample_ndvi(&tif, &target()).unwrap();
        assert_eq!(out.value(0, 0), Some(0.5));
        assert_eq!(out.value(1, 1), Some(0.5));
        // eastern pixel holds the fill value
        assert_eq!(out.value(0, 2), None);
        // masked cell
        assert_eq!(out.value(1, 3), None);
    }

    #[test]
    fn test_normalize_uses_doy_month() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        target().save(&layout).unwrap();
        let raw = layout.raw_dir("ndvi");
        fs::create_dir_all(&raw).unwrap();
        // day 60 of 2003 is March 1st
        write_ndvi(&raw.join("MOD13A3.061__1_km_monthly_NDVI_doy2003060000000_aid0001.tif"));
        write_ndvi(&raw.join("MOD13A3.061__1_km_monthly_NDVI_doy1999060000000_aid0001.tif"));
        write_ndvi(&raw.join("MOD13A3.061__1_km_monthly_EVI_doy2003060000000_aid0001.tif"));

        let written = normalize_vegetation(&layout, MonthRange::years(2003, 2003)).unwrap();
        let march = YearMonth::new(2003, 3).unwrap();
        assert_eq!(written, vec![march]);
        let raster = ascii_grid::read(&layout.ndvi(march)).unwrap();
        assert_eq!(raster.value(0, 0), Some(0.5));
    }
}
