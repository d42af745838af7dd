//! The common analysis grid and the rasters aligned to it.
//!
//! Coordinates are geographic (NAD83 degrees, x = longitude, y = latitude).
//! Row 0 is the northernmost row, matching how ESRI ASCII grids and
//! GeoTIFFs are stored.

use geo::{Coord, MultiPolygon};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{CwfError, Result};

/// No-data sentinel shared by every raster in the pipeline.
pub const NODATA: f32 = -9999.0;

/// Tolerance, as a fraction of a cell, for deciding two grids line up.
const ALIGN_TOLERANCE: f64 = 1e-3;

pub fn is_nodata(value: f32) -> bool {
    value == NODATA || value.is_nan()
}

/// Axis-aligned extent in grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.max_x < other.min_x
            || self.min_x > other.max_x
            || self.max_y < other.min_y
            || self.min_y > other.max_y)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.min_x <= x && x <= self.max_x && self.min_y <= y && y <= self.max_y
    }

    pub fn from_geometry(geometry: &MultiPolygon<f64>) -> Option<BoundingBox> {
        use geo::BoundingRect;
        geometry.bounding_rect().map(|rect| BoundingBox {
            min_x: rect.min().x,
            min_y: rect.min().y,
            max_x: rect.max().x,
            max_y: rect.max().y,
        })
    }
}

/// A regular lat/lon grid: `ncols` x `nrows` square cells of `cellsize`
/// degrees whose lower-left corner is (`west`, `south`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub ncols: usize,
    pub nrows: usize,
    pub west: f64,
    pub south: f64,
    pub cellsize: f64,
}

impl GridSpec {
    /// Reads a grid definition written by [`GridSpec::save`].
    pub fn load(path: &Path) -> Result<GridSpec> {
        if !path.exists() {
            return Err(CwfError::MissingInput(format!(
                "{} (run `normalize prism` first)",
                path.display()
            )));
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ncols * self.nrows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn north(&self) -> f64 {
        self.south + self.nrows as f64 * self.cellsize
    }

    pub fn east(&self) -> f64 {
        self.west + self.ncols as f64 * self.cellsize
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox {
            min_x: self.west,
            min_y: self.south,
            max_x: self.east(),
            max_y: self.north(),
        }
    }

    /// Stable identity of a cell.
    pub fn cell_id(&self, row: usize, col: usize) -> u32 {
        (row * self.ncols + col) as u32
    }

    pub fn row_col(&self, cell_id: u32) -> (usize, usize) {
        let index = cell_id as usize;
        (index / self.ncols, index % self.ncols)
    }

    pub fn centre_x(&self, col: usize) -> f64 {
        self.west + (col as f64 + 0.5) * self.cellsize
    }

    pub fn centre_y(&self, row: usize) -> f64 {
        self.north() - (row as f64 + 0.5) * self.cellsize
    }

    /// (lon, lat) of the centre of a cell.
    pub fn centre(&self, row: usize, col: usize) -> (f64, f64) {
        (self.centre_x(col), self.centre_y(row))
    }

    /// Footprint of a cell.
    pub fn cell_bounds(&self, row: usize, col: usize) -> BoundingBox {
        let min_x = self.west + col as f64 * self.cellsize;
        let max_y = self.north() - row as f64 * self.cellsize;
        BoundingBox {
            min_x,
            min_y: max_y - self.cellsize,
            max_x: min_x + self.cellsize,
            max_y,
        }
    }

    /// Cell containing a point; west and north edges belong to the cell.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let col = ((x - self.west) / self.cellsize).floor();
        let row = ((self.north() - y) / self.cellsize).floor();
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        if row < self.nrows && col < self.ncols {
            Some((row, col))
        } else {
            None
        }
    }

    /// The smallest window of this grid, snapped to its cell edges,
    /// that covers `bbox`.
    pub fn window_covering(&self, bbox: &BoundingBox) -> Result<GridSpec> {
        let floor = |v: f64| (v + ALIGN_TOLERANCE).floor().max(0.0) as usize;
        let ceil = |v: f64| (v - ALIGN_TOLERANCE).ceil().max(0.0) as usize;
        let col0 = floor((bbox.min_x - self.west) / self.cellsize);
        let col1 = ceil((bbox.max_x - self.west) / self.cellsize);
        let row0 = floor((self.north() - bbox.max_y) / self.cellsize);
        let row1 = ceil((self.north() - bbox.min_y) / self.cellsize);
        let col1 = col1.min(self.ncols);
        let row1 = row1.min(self.nrows);
        if col0 >= col1 || row0 >= row1 {
            return Err(CwfError::GridMismatch(format!(
                "region {:?} lies outside the source grid {:?}",
                bbox,
                self.bounds()
            )));
        }
        let nrows = row1 - row0;
        Ok(GridSpec {
            ncols: col1 - col0,
            nrows,
            west: self.west + col0 as f64 * self.cellsize,
            south: self.north() - (row0 + nrows) as f64 * self.cellsize,
            cellsize: self.cellsize,
        })
    }

    /// Whether `other` shares this grid's cell size and cell edges.
    pub fn is_aligned_with(&self, other: &GridSpec) -> bool {
        let same_size = (self.cellsize - other.cellsize).abs() < self.cellsize * 1e-6;
        let dx = (other.west - self.west) / self.cellsize;
        let dy = (other.south - self.south) / self.cellsize;
        same_size
            && (dx - dx.round()).abs() < ALIGN_TOLERANCE
            && (dy - dy.round()).abs() < ALIGN_TOLERANCE
    }

    /// Offset, in whole (rows, cols), of `inner`'s north-west corner
    /// relative to this grid's. Fails unless the grids are aligned.
    pub fn offset_of(&self, inner: &GridSpec) -> Result<(i64, i64)> {
        if !self.is_aligned_with(inner) {
            return Err(CwfError::GridMismatch(format!(
                "grid {:?} is not aligned with {:?}",
                inner, self
            )));
        }
        let rows = ((self.north() - inner.north()) / self.cellsize).round() as i64;
        let cols = ((inner.west - self.west) / self.cellsize).round() as i64;
        Ok((rows, cols))
    }

    /// Calls `visit(row, col)` for every cell whose centre falls inside
    /// `geometry` (even-odd rule over all rings, so holes are honoured).
    pub fn for_each_centre_inside<F>(&self, geometry: &MultiPolygon<f64>, mut visit: F)
    where
        F: FnMut(usize, usize),
    {
        let Some(bbox) = BoundingBox::from_geometry(geometry) else {
            return;
        };
        let edges: Vec<(Coord<f64>, Coord<f64>)> = geometry
            .iter()
            .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
            .flat_map(|ring| ring.lines().map(|line| (line.start, line.end)))
            .collect();

        let row_start = ((self.north() - bbox.max_y) / self.cellsize - 0.5).ceil().max(0.0) as usize;
        let row_end = (((self.north() - bbox.min_y) / self.cellsize - 0.5).floor() + 1.0)
            .clamp(0.0, self.nrows as f64) as usize;

        let mut crossings: Vec<f64> = Vec::new();
        for row in row_start..row_end {
            let y = self.centre_y(row);
            crossings.clear();
            for (a, b) in &edges {
                if (a.y > y) != (b.y > y) {
                    crossings.push(a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y));
                }
            }
            crossings.sort_by(|p, q| p.total_cmp(q));
            for pair in crossings.chunks_exact(2) {
                let first = ((pair[0] - self.west) / self.cellsize - 0.5).ceil();
                let last = ((pair[1] - self.west) / self.cellsize - 0.5).ceil();
                let first = first.clamp(0.0, self.ncols as f64) as usize;
                let last = last.clamp(0.0, self.ncols as f64) as usize;
                for col in first..last {
                    visit(row, col);
                }
            }
        }
    }
}

/// Row-major float values over a [`GridSpec`]; [`NODATA`] marks gaps.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub spec: GridSpec,
    pub values: Vec<f32>,
}

impl Raster {
    pub fn filled(spec: GridSpec, value: f32) -> Raster {
        Raster {
            spec,
            values: vec![value; spec.len()],
        }
    }

    pub fn nodata(spec: GridSpec) -> Raster {
        Raster::filled(spec, NODATA)
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.spec.ncols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.values[row * self.spec.ncols + col] = value;
    }

    /// The value at a cell, or `None` when it is no-data.
    pub fn value(&self, row: usize, col: usize) -> Option<f32> {
        let v = self.get(row, col);
        if is_nodata(v) {
            None
        } else {
            Some(v)
        }
    }

    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|v| !is_nodata(**v)).count()
    }

    /// Sets every cell outside `mask` to [`NODATA`].
    pub fn apply_mask(&mut self, mask: &RegionMask) {
        for (value, inside) in self.values.iter_mut().zip(&mask.inside) {
            if !inside {
                *value = NODATA;
            }
        }
    }
}

/// Cells whose centre lies inside the study region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionMask {
    pub spec: GridSpec,
    pub inside: Vec<bool>,
}

impl RegionMask {
    pub fn from_geometry(spec: GridSpec, geometry: &MultiPolygon<f64>) -> RegionMask {
        let mut inside = vec![false; spec.len()];
        spec.for_each_centre_inside(geometry, |row, col| inside[row * spec.ncols + col] = true);
        RegionMask { spec, inside }
    }

    pub fn all(spec: GridSpec) -> RegionMask {
        RegionMask {
            spec,
            inside: vec![true; spec.len()],
        }
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.inside[row * self.spec.ncols + col]
    }

    pub fn count(&self) -> usize {
        self.inside.iter().filter(|v| **v).count()
    }

    /// (row, col) of every cell inside the region, row-major.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let ncols = self.spec.ncols;
        self.inside
            .iter()
            .enumerate()
            .filter(|(_, inside)| **inside)
            .map(move |(index, _)| (index / ncols, index % ncols))
    }

    pub fn to_raster(&self) -> Raster {
        Raster {
            spec: self.spec,
            values: self
                .inside
                .iter()
                .map(|inside| if *inside { 1.0 } else { 0.0 })
                .collect(),
        }
    }

    pub fn from_raster(raster: &Raster) -> RegionMask {
        RegionMask {
            spec: raster.spec,
            inside: raster.values.iter().map(|v| *v == 1.0).collect(),
        }
    }
}
