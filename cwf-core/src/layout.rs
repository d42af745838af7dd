//! Where every raw and normalized file lives under the data directory.

use cwf_utils::names::year_month_stamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::month::YearMonth;

/// The four PRISM variables used as predictors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClimateVariable {
    Ppt,
    Tmax,
    Vpdmax,
    Tdmean,
}

impl ClimateVariable {
    pub const ALL: [ClimateVariable; 4] = [
        ClimateVariable::Ppt,
        ClimateVariable::Tmax,
        ClimateVariable::Vpdmax,
        ClimateVariable::Tdmean,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ClimateVariable::Ppt => "ppt",
            ClimateVariable::Tmax => "tmax",
            ClimateVariable::Vpdmax => "vpdmax",
            ClimateVariable::Tdmean => "tdmean",
        }
    }
}

impl fmt::Display for ClimateVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static terrain layers derived from the DEM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerrainLayer {
    Elevation,
    Slope,
    Aspect,
}

impl TerrainLayer {
    pub const ALL: [TerrainLayer; 3] = [
        TerrainLayer::Elevation,
        TerrainLayer::Slope,
        TerrainLayer::Aspect,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TerrainLayer::Elevation => "elevation",
            TerrainLayer::Slope => "slope",
            TerrainLayer::Aspect => "aspect",
        }
    }
}

/// Paths under one data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> DataLayout {
        DataLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self, source: &str) -> PathBuf {
        self.root.join("raw").join(source)
    }

    pub fn raw_prism_dir(&self, variable: ClimateVariable) -> PathBuf {
        self.raw_dir("prism").join(variable.name())
    }

    pub fn raw_prism(&self, variable: ClimateVariable, month: YearMonth) -> PathBuf {
        self.raw_prism_dir(variable).join(format!(
            "prism_{}_us_30s_{}.asc",
            variable.name(),
            month.stamp()
        ))
    }

    pub fn raw_dem_tile(&self, tile: &str) -> PathBuf {
        self.raw_dir("dem").join(format!("USGS_1_{}.tif", tile))
    }

    pub fn raw_nlcd(&self, year: i32) -> PathBuf {
        self.raw_dir("nlcd")
            .join(format!("Annual_NLCD_LndCov_{}_CU_C1V1.tif", year))
    }

    /// Yearly MTBS burn-severity mosaic, e.g. `mtbs_CA_2007.tif`.
    pub fn raw_severity(&self, year: i32) -> PathBuf {
        self.raw_dir("severity").join(format!("mtbs_CA_{}.tif", year))
    }

    pub fn ndvi_download_list(&self) -> PathBuf {
        self.raw_dir("ndvi").join("download-list.txt")
    }

    pub fn raw_mtbs(&self) -> PathBuf {
        self.raw_dir("mtbs").join("mtbs_perims_DD.shp")
    }

    /// TIGER layer shapefile, e.g. `tl_2025_us_county.shp`.
    pub fn raw_boundary(&self, layer: &str, year: i32) -> PathBuf {
        self.raw_dir("boundary")
            .join(format!("tl_{}_us_{}.shp", year, layer.to_ascii_lowercase()))
    }

    pub fn grid(&self) -> PathBuf {
        self.root.join("grid.json")
    }

    pub fn mask(&self) -> PathBuf {
        self.root.join("mask.asc.gz")
    }

    pub fn prism_dir(&self, variable: ClimateVariable) -> PathBuf {
        self.root.join("prism").join(variable.name())
    }

    pub fn prism(&self, variable: ClimateVariable, month: YearMonth) -> PathBuf {
        self.prism_dir(variable)
            .join(format!("prism_{}_{}.asc.gz", variable.name(), month.stamp()))
    }

    pub fn terrain(&self, layer: TerrainLayer) -> PathBuf {
        self.root.join("dem").join(format!("{}.asc.gz", layer.name()))
    }

    pub fn nlcd_dir(&self) -> PathBuf {
        self.root.join("nlcd")
    }

    pub fn nlcd(&self, year: i32) -> PathBuf {
        self.nlcd_dir().join(format!("nlcd_{}.asc.gz", year))
    }

    pub fn ndvi_dir(&self) -> PathBuf {
        self.root.join("ndvi")
    }

    pub fn ndvi(&self, month: YearMonth) -> PathBuf {
        self.ndvi_dir().join(format!("ndvi_{}.asc.gz", month.stamp()))
    }

    pub fn severity_dir(&self) -> PathBuf {
        self.root.join("severity")
    }

    pub fn severity(&self, year: i32) -> PathBuf {
        self.severity_dir().join(format!("severity_{}.asc.gz", year))
    }

    pub fn labels_dir(&self) -> PathBuf {
        self.root.join("labels")
    }

    pub fn labels(&self, month: YearMonth) -> PathBuf {
        self.labels_dir()
            .join(format!("labels_{}.asc.gz", month.stamp()))
    }

    pub fn combined(&self) -> PathBuf {
        self.root.join("combined.parquet")
    }

    pub fn combined_split(&self) -> PathBuf {
        self.root.join("combined_split.parquet")
    }

    pub fn evaluation_dir(&self) -> PathBuf {
        self.root.join("evaluation")
    }

    pub fn metrics(&self) -> PathBuf {
        self.evaluation_dir().join("metrics.json")
    }

    pub fn score_map(&self) -> PathBuf {
        self.evaluation_dir().join("mean_score.asc.gz")
    }

    /// Months present in `dir` as `{prefix}YYYYMM{suffix}` files, sorted.
    pub fn months_in(dir: &Path, prefix: &str, suffix: &str) -> Result<Vec<YearMonth>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut months = Vec::new();
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(month) =
                year_month_stamp(name, prefix, suffix).and_then(|s| s.parse::<YearMonth>().ok())
            {
                months.push(month);
            }
        }
        months.sort();
        Ok(months)
    }

    /// Years with a normalized landcover raster, sorted.
    pub fn nlcd_years(&self) -> Result<Vec<i32>> {
        let dir = self.nlcd_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut years = Vec::new();
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name();
            let year = name
                .to_str()
                .and_then(|n| n.strip_prefix("nlcd_"))
                .and_then(|n| n.strip_suffix(".asc.gz"))
                .and_then(|n| n.parse::<i32>().ok());
            if let Some(year) = year {
                years.push(year);
            }
        }
        years.sort_unstable();
        Ok(years)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths() {
        let layout = DataLayout::new("data");
        let month = YearMonth::new(2003, 3).unwrap();
        assert_eq!(
            layout.raw_prism(ClimateVariable::Tmax, month),
            PathBuf::from("data/raw/prism/tmax/prism_tmax_us_30s_200303.asc")
        );
        assert_eq!(
            layout.prism(ClimateVariable::Ppt, month),
            PathBuf::from("data/prism/ppt/prism_ppt_200303.asc.gz")
        );
        assert_eq!(
            layout.terrain(TerrainLayer::Aspect),
            PathBuf::from("data/dem/aspect.asc.gz")
        );
        assert_eq!(
            layout.raw_boundary("County", 2025),
            PathBuf::from("data/raw/boundary/tl_2025_us_county.shp")
        );
        assert_eq!(
            layout.labels(month),
            PathBuf::from("data/labels/labels_200303.asc.gz")
        );
        assert_eq!(
            layout.raw_severity(2007),
            PathBuf::from("data/raw/severity/mtbs_CA_2007.tif")
        );
        assert_eq!(
            layout.severity(2007),
            PathBuf::from("data/severity/severity_2007.asc.gz")
        );
    }

    #[test]
    fn test_listing_months_and_years() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        fs::create_dir_all(layout.ndvi_dir()).unwrap();
        fs::create_dir_all(layout.nlcd_dir()).unwrap();
        for name in ["ndvi_200302.asc.gz", "ndvi_200301.asc.gz", "notes.txt"] {
            fs::write(layout.ndvi_dir().join(name), "").unwrap();
        }
        for name in ["nlcd_2004.asc.gz", "nlcd_2001.asc.gz"] {
            fs::write(layout.nlcd_dir().join(name), "").unwrap();
        }

        let months = DataLayout::months_in(&layout.ndvi_dir(), "ndvi_", ".asc.gz").unwrap();
        assert_eq!(
            months,
            vec![YearMonth::new(2003, 1).unwrap(), YearMonth::new(2003, 2).unwrap()]
        );
        assert_eq!(layout.nlcd_years().unwrap(), vec![2001, 2004]);
        assert!(DataLayout::months_in(&layout.labels_dir(), "labels_", ".asc.gz")
            .unwrap()
            .is_empty());
    }
}
