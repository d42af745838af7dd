//! GeoTIFF access through GDAL.
//!
//! Only north-up rasters are supported, which covers 3DEP tiles,
//! AppEEARS exports, the NLCD mosaics and the MTBS severity mosaics.
//! Pixels are read through a window so a large mosaic never has to be
//! decoded in full.

use std::path::Path;

use gdal::raster::{Buffer, GdalType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use log::debug;

use crate::error::{CwfError, Result};
use crate::grid::{BoundingBox, NODATA};

/// EPSG codes the fixture writer tags rasters with.
const GEOGRAPHIC_EPSG: u32 = 4269;
const PROJECTED_EPSG: u32 = 5070;

/// The coordinate space of a raster, from its spatial reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    Projected,
    Geographic,
    Unknown,
}

/// Affine placement of a north-up raster: pixel (row, col) has its
/// north-west corner at `(origin_x + col * pixel_width,
/// origin_y - row * pixel_height)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Georeference {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub model: ModelType,
}

impl Georeference {
    /// Reads a GDAL geotransform, rejecting rotated or south-up rasters.
    pub fn from_geo_transform(gt: &[f64; 6], model: ModelType) -> Result<Self> {
        if gt[2] != 0.0 || gt[4] != 0.0 {
            return Err(CwfError::Georeference(format!(
                "rotated rasters are not supported ({}, {})",
                gt[2], gt[4]
            )));
        }
        if gt[1] <= 0.0 || gt[5] >= 0.0 {
            return Err(CwfError::Georeference(format!(
                "unsupported pixel size ({}, {})",
                gt[1], gt[5]
            )));
        }
        Ok(Georeference {
            origin_x: gt[0],
            origin_y: gt[3],
            pixel_width: gt[1],
            pixel_height: -gt[5],
            model,
        })
    }

    pub fn geo_transform(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            0.0,
            self.origin_y,
            0.0,
            -self.pixel_height,
        ]
    }

    pub fn pixel_centre(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y - (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional (row, col) of a point; may be out of range.
    pub fn pixel_position(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (self.origin_y - y) / self.pixel_height,
            (x - self.origin_x) / self.pixel_width,
        )
    }
}

/// A rectangle of pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub row: usize,
    pub col: usize,
    pub rows: usize,
    pub cols: usize,
}

/// Pixels of a [`PixelWindow`] converted to `f32`; nodata pixels hold
/// [`NODATA`].
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub window: PixelWindow,
    pub values: Vec<f32>,
}

impl Block {
    /// Value at an absolute raster position, `None` outside the block or
    /// on nodata.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        let w = &self.window;
        if row < w.row || col < w.col || row >= w.row + w.rows || col >= w.col + w.cols {
            return None;
        }
        let value = self.values[(row - w.row) * w.cols + (col - w.col)];
        if value == NODATA {
            None
        } else {
            Some(value)
        }
    }
}

/// An open single-band GeoTIFF.
pub struct GeoTiff {
    dataset: Dataset,
    pub width: usize,
    pub height: usize,
    pub georef: Georeference,
    pub nodata: Option<f64>,
    /// EPSG code of a projected raster, when its CRS has one.
    pub projected_cs: Option<i32>,
}

impl GeoTiff {
    pub fn open(path: &Path) -> Result<Self> {
        let dataset = Dataset::open(path)?;
        let (width, height) = dataset.raster_size();
        let gt = dataset.geo_transform().map_err(|e| {
            CwfError::Georeference(format!("{}: no geotransform ({})", path.display(), e))
        })?;

        let (model, projected_cs) = match dataset.spatial_ref() {
            Ok(srs) if srs.is_projected() => (ModelType::Projected, srs.auth_code().ok()),
            Ok(srs) if srs.is_geographic() => (ModelType::Geographic, None),
            _ => (ModelType::Unknown, None),
        };
        let georef = Georeference::from_geo_transform(&gt, model).map_err(|e| match e {
            CwfError::Georeference(reason) => {
                CwfError::Georeference(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })?;
        let nodata = dataset.rasterband(1)?.no_data_value();

        debug!(
            "GeoTIFF {} {}x{} {:?} {:?} nodata {:?}",
            path.display(),
            width,
            height,
            georef,
            projected_cs,
            nodata
        );

        Ok(GeoTiff {
            dataset,
            width,
            height,
            georef,
            nodata,
            projected_cs,
        })
    }

    pub fn bounds(&self) -> BoundingBox {
        let g = &self.georef;
        BoundingBox {
            min_x: g.origin_x,
            min_y: g.origin_y - self.height as f64 * g.pixel_height,
            max_x: g.origin_x + self.width as f64 * g.pixel_width,
            max_y: g.origin_y,
        }
    }

    /// Pixel containing a point, if it is inside the raster.
    pub fn pixel_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (row, col) = self.georef.pixel_position(x, y);
        let (row, col) = (row.floor(), col.floor());
        if row < 0.0 || col < 0.0 || row >= self.height as f64 || col >= self.width as f64 {
            None
        } else {
            Some((row as usize, col as usize))
        }
    }

    /// Pixels touching `bbox`, clipped to the raster, plus `pad` pixels on
    /// every side. `None` when the box misses the raster.
    pub fn window_for(&self, bbox: &BoundingBox, pad: usize) -> Option<PixelWindow> {
        let (top, left) = self.georef.pixel_position(bbox.min_x, bbox.max_y);
        let (bottom, right) = self.georef.pixel_position(bbox.max_x, bbox.min_y);
        let row0 = (top.floor() - pad as f64).max(0.0);
        let col0 = (left.floor() - pad as f64).max(0.0);
        let row1 = (bottom.ceil() + pad as f64).min(self.height as f64);
        let col1 = (right.ceil() + pad as f64).min(self.width as f64);
        if row0 >= row1 || col0 >= col1 {
            return None;
        }
        Some(PixelWindow {
            row: row0 as usize,
            col: col0 as usize,
            rows: (row1 - row0) as usize,
            cols: (col1 - col0) as usize,
        })
    }

    pub fn full_window(&self) -> PixelWindow {
        PixelWindow {
            row: 0,
            col: 0,
            rows: self.height,
            cols: self.width,
        }
    }

    pub fn read_all(&self) -> Result<Block> {
        self.read_window(self.full_window())
    }

    /// Reads band 1 under `window` as `f32`, mapping the band's nodata
    /// value and NaN to [`NODATA`].
    pub fn read_window(&self, window: PixelWindow) -> Result<Block> {
        if window.rows == 0 || window.cols == 0 {
            return Ok(Block {
                window,
                values: Vec::new(),
            });
        }
        let band = self.dataset.rasterband(1)?;
        let size = (window.cols, window.rows);
        let buffer = band.read_as::<f32>((window.col as isize, window.row as isize), size, size, None)?;
        let nodata = self.nodata.map(|v| v as f32);
        let values = buffer
            .data
            .into_iter()
            .map(|v| if Some(v) == nodata || v.is_nan() { NODATA } else { v })
            .collect();
        Ok(Block { window, values })
    }
}

/// Writes a single-band GeoTIFF. Projected rasters are tagged CONUS
/// Albers and geographic ones NAD83. Used for fixtures and small exports.
pub fn write<T: GdalType + Copy>(
    path: &Path,
    georef: &Georeference,
    width: usize,
    height: usize,
    data: &[T],
    nodata: Option<f64>,
) -> Result<()> {
    if data.len() != width * height {
        return Err(CwfError::InvalidFormat(format!(
            "{} values for a {}x{} raster",
            data.len(),
            width,
            height
        )));
    }
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset =
        driver.create_with_band_type::<T, _>(path, width as isize, height as isize, 1)?;
    dataset.set_geo_transform(&georef.geo_transform())?;
    let epsg = match georef.model {
        ModelType::Projected => Some(PROJECTED_EPSG),
        ModelType::Geographic => Some(GEOGRAPHIC_EPSG),
        ModelType::Unknown => None,
    };
    if let Some(epsg) = epsg {
        dataset.set_spatial_ref(&SpatialRef::from_epsg(epsg)?)?;
    }
    let mut band = dataset.rasterband(1)?;
    if nodata.is_some() {
        band.set_no_data_value(nodata)?;
    }
    band.write((0, 0), (width, height), &Buffer::new((width, height), data.to_vec()))?;
    Ok(())
}
