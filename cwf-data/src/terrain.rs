//! Elevation, slope and aspect from 3DEP 1″ tiles.
//!
//! Each tile is read on its own. Gradients are taken at source
//! resolution and then averaged into target cells, so slope reflects
//! the fine terrain rather than a smoothed 800 m surface.
//!
//! Slope is the mean gradient magnitude in metres per metre. Aspect is
//! `atan2(mean dz/drow, mean dz/dcol)` in radians, both gradients in
//! metres per metre with rows running south and columns east; a mean
//! east gradient of zero is replaced by [`FLAT_EAST_GRADIENT`].

use anyhow::Context;
use cwf_core::ascii_grid;
use cwf_core::geotiff::{GeoTiff, ModelType};
use cwf_core::grid::{BoundingBox, GridSpec, Raster, RegionMask};
use cwf_core::layout::{DataLayout, TerrainLayer};
use cwf_utils::names::parse_dem_tile_name;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::target::Target;

/// Length of one degree of latitude, and of longitude at the equator.
pub const METRES_PER_DEGREE: f64 = 111_132.0;

/// Mean east gradients this close to zero count as zero.
const ZERO_GRADIENT: f64 = 1e-12;

/// Stand-in for a zero mean east gradient, so flat and due north/south
/// cells get a defined aspect.
pub const FLAT_EAST_GRADIENT: f64 = 1e-3;

/// Running sums per target cell.
pub struct TerrainAccumulator {
    spec: GridSpec,
    count: Vec<u32>,
    elevation: Vec<f64>,
    gradient: Vec<f64>,
    dz_dx: Vec<f64>,
    /// Along rows, so positive when the ground rises to the south.
    dz_dy: Vec<f64>,
}

pub struct TerrainRasters {
    pub elevation: Raster,
    pub slope: Raster,
    pub aspect: Raster,
}

/// Nominal 1°x1° extent of a tile from its file name, e.g.
/// `USGS_1_n33w117.tif` covers 32..33 N, 117..116 W. Tiles overlap
/// their neighbours by a few pixels; only pixels inside this core count.
pub fn tile_core(path: &Path) -> Option<BoundingBox> {
    let stem = path.file_stem()?.to_str()?;
    let token = stem.rsplit('_').next()?;
    let (north, west) = parse_dem_tile_name(token)?;
    Some(BoundingBox {
        min_x: west as f64,
        min_y: (north - 1) as f64,
        max_x: (west + 1) as f64,
        max_y: north as f64,
    })
}

fn intersection(a: &BoundingBox, b: &BoundingBox) -> Option<BoundingBox> {
    let out = BoundingBox {
        min_x: a.min_x.max(b.min_x),
        min_y: a.min_y.max(b.min_y),
        max_x: a.max_x.min(b.max_x),
        max_y: a.max_y.min(b.max_y),
    };
    if out.min_x < out.max_x && out.min_y < out.max_y {
        Some(out)
    } else {
        None
    }
}

/// Central difference along one axis, one-sided where a neighbour is
/// missing. `None` when both neighbours are missing.
fn difference(before: Option<f32>, here: f32, after: Option<f32>) -> Option<f64> {
    match (before, after) {
        (Some(b), Some(a)) => Some((a as f64 - b as f64) / 2.0),
        (None, Some(a)) => Some(a as f64 - here as f64),
        (Some(b), None) => Some(here as f64 - b as f64),
        (None, None) => None,
    }
}

impl TerrainAccumulator {
    pub fn new(spec: GridSpec) -> Self {
        let n = spec.len();
        TerrainAccumulator {
            spec,
            count: vec![0; n],
            elevation: vec![0.0; n],
            gradient: vec![0.0; n],
            dz_dx: vec![0.0; n],
            dz_dy: vec![0.0; n],
        }
    }

    /// Bins the pixels of one tile whose centres fall inside `core` (or
    /// the whole tile when `None`). Returns the number of pixels used.
    pub fn add_tile(
        &mut self,
        tif: &GeoTiff,
        core: Option<BoundingBox>,
    ) -> anyhow::Result<usize> {
        if tif.georef.model == ModelType::Projected {
            anyhow::bail!("DEM tile is projected; expected geographic coordinates");
        }
        let core = core.unwrap_or_else(|| tif.bounds());
        let Some(area) = intersection(&core, &self.spec.bounds()) else {
            return Ok(0);
        };
        let Some(window) = tif.window_for(&area, 1) else {
            return Ok(0);
        };
        let block = tif.read_window(window)?;
        let georef = tif.georef;

        let mut used = 0;
        for row in window.row..window.row + window.rows {
            for col in window.col..window.col + window.cols {
                let (x, y) = georef.pixel_centre(row, col);
                if !(x >= core.min_x && x < core.max_x && y > core.min_y && y <= core.max_y) {
                    continue;
                }
                let Some((cell_row, cell_col)) = self.spec.cell_at(x, y) else {
                    continue;
                };
                let Some(z) = block.get(row, col) else {
                    continue;
                };

                let west = col.checked_sub(1).and_then(|c| block.get(row, c));
                let east = block.get(row, col + 1);
                let north = row.checked_sub(1).and_then(|r| block.get(r, col));
                let south = block.get(row + 1, col);
                let dx_metres = georef.pixel_width * METRES_PER_DEGREE * y.to_radians().cos();
                let dy_metres = georef.pixel_height * METRES_PER_DEGREE;
                let dz_dx = difference(west, z, east).map_or(0.0, |d| d / dx_metres);
                let dz_dy = difference(north, z, south).map_or(0.0, |d| d / dy_metres);

                let index = cell_row * self.spec.ncols + cell_col;
                self.count[index] += 1;
                self.elevation[index] += z as f64;
                self.gradient[index] += dz_dx.hypot(dz_dy);
                self.dz_dx[index] += dz_dx;
                self.dz_dy[index] += dz_dy;
                used += 1;
            }
        }
        Ok(used)
    }

    /// Mean elevation, mean slope (m/m) and the aspect of the mean
    /// gradient vector in radians. Cells without pixels or outside `mask`
    /// are no-data.
    pub fn finish(self, mask: &RegionMask) -> TerrainRasters {
        let mut elevation = Raster::nodata(self.spec);
        let mut slope = Raster::nodata(self.spec);
        let mut aspect = Raster::nodata(self.spec);
        for index in 0..self.spec.len() {
            let n = self.count[index];
            if n == 0 {
                continue;
            }
            let n = n as f64;
            let mut mean_x = self.dz_dx[index] / n;
            let mean_y = self.dz_dy[index] / n;
            if mean_x.abs() <= ZERO_GRADIENT {
                mean_x = FLAT_EAST_GRADIENT;
            }
            elevation.values[index] = (self.elevation[index] / n) as f32;
            slope.values[index] = (self.gradient[index] / n) as f32;
            aspect.values[index] = mean_y.atan2(mean_x) as f32;
        }
        elevation.apply_mask(mask);
        slope.apply_mask(mask);
        aspect.apply_mask(mask);
        TerrainRasters {
            elevation,
            slope,
            aspect,
        }
    }
}

fn list_tiles(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut tiles = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_tif = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
            .unwrap_or(false);
        if is_tif {
            tiles.push(path);
        }
    }
    tiles.sort();
    Ok(tiles)
}

/// Aggregates every raw DEM tile onto the target grid and writes the
/// three terrain layers. Returns the number of tiles used.
pub fn normalize_terrain(layout: &DataLayout) -> anyhow::Result<usize> {
    let target = Target::load(layout)?;
    let tiles = list_tiles(&layout.raw_dir("dem"))?;
    if tiles.is_empty() {
        anyhow::bail!(
            "no DEM tiles under {} (run `fetch dem` first)",
            layout.raw_dir("dem").display()
        );
    }

    let mut accumulator = TerrainAccumulator::new(target.grid);
    let mut used_tiles = 0;
    for path in &tiles {
        let core = tile_core(path);
        if core.is_none() {
            warn!("{} has no tile name; using its full extent", path.display());
        }
        let tif = GeoTiff::open(path)?;
        let pixels = accumulator
            .add_tile(&tif, core)
            .with_context(|| format!("aggregating {}", path.display()))?;
        info!("{}: {} pixels inside the target grid", path.display(), pixels);
        if pixels > 0 {
            used_tiles += 1;
        }
    }

    let rasters = accumulator.finish(&target.mask);
    let covered = rasters.elevation.valid_count();
    if covered < target.mask.count() {
        warn!(
            "DEM covers {} of {} region cells; the rest are no-data",
            covered,
            target.mask.count()
        );
    }
    for (layer, raster) in [
        (TerrainLayer::Elevation, &rasters.elevation),
        (TerrainLayer::Slope, &rasters.slope),
        (TerrainLayer::Aspect, &rasters.aspect),
    ] {
        ascii_grid::write(&layout.terrain(layer), raster)?;
    }
    info!("Wrote terrain layers from {} tile(s)", used_tiles);
    Ok(used_tiles)
}
