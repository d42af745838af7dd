//! Coordinate transforms between the target grid and projected sources.
//!
//! The target grid is NAD83 lon/lat. NLCD and the MTBS severity mosaics
//! are in CONUS Albers, so sample points are pushed through PROJ before
//! they are looked up.

use proj::Proj;

use crate::error::Result;

/// NAD83 geographic coordinates.
pub const NAD83: &str = "EPSG:4269";

/// NAD83 / Conus Albers equal-area.
pub const CONUS_ALBERS: &str = "EPSG:5070";

/// EPSG codes a raster may carry and still be treated as CONUS Albers.
/// 32767 is the GeoTIFF "user defined" code some NLCD releases use.
pub const CONUS_ALBERS_CODES: [i32; 2] = [5070, 32767];

/// A point transform from one CRS to another, longitude/easting first.
pub struct Reprojection {
    proj: Proj,
}

impl Reprojection {
    pub fn new(from: &str, to: &str) -> Result<Self> {
        let proj = Proj::new_known_crs(from, to, None)?;
        Ok(Reprojection { proj })
    }

    /// NAD83 lon/lat to CONUS Albers metres.
    pub fn to_conus_albers() -> Result<Self> {
        Reprojection::new(NAD83, CONUS_ALBERS)
    }

    pub fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        Ok(self.proj.convert((lon, lat))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conus_albers_origin() {
        // latitude of origin 23N, central meridian 96W
        let albers = Reprojection::to_conus_albers().unwrap();
        let (x, y) = albers.forward(-96.0, 23.0).unwrap();
        assert!(x.abs() < 1e-3 && y.abs() < 1e-3, "({}, {})", x, y);

        let (xw, yw) = albers.forward(-106.0, 40.0).unwrap();
        let (xe, ye) = albers.forward(-86.0, 40.0).unwrap();
        assert!((xw + xe).abs() < 1e-3);
        assert!((yw - ye).abs() < 1e-3);
    }

    #[test]
    fn test_san_diego_lands_in_the_south_west() {
        let albers = Reprojection::to_conus_albers().unwrap();
        let (x, y) = albers.forward(-117.0, 33.0).unwrap();
        assert!(x < -1_900_000.0 && x > -2_100_000.0, "x = {}", x);
        assert!(y > 1_200_000.0 && y < 1_400_000.0, "y = {}", y);
    }

    #[test]
    fn test_unknown_crs_is_an_error() {
        assert!(Reprojection::new(NAD83, "EPSG:not-a-code").is_err());
    }
}
