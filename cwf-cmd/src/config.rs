//! Pipeline settings shared by every stage.

use anyhow::Context;
use cwf_core::boundary::{Boundary, RegionSelector};
use cwf_core::layout::DataLayout;
use cwf_core::month::MonthRange;
use cwf_data::labels::LabelPolicy;
use cwf_data::split::SplitConfig;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Every setting has a default, so a config file only lists what it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    /// First and last calendar year of the study period.
    pub start_year: i32,
    pub end_year: i32,
    pub region: RegionSelector,
    /// TIGER/Line vintage of the boundary shapefile.
    pub tiger_year: i32,
    /// Years withheld from every training fold.
    pub validation_start: i32,
    pub validation_end: i32,
    pub folds: usize,
    pub seed: u64,
    /// Lattice size per target cell when aggregating NLCD.
    pub landcover_supersample: usize,
    pub label_policy: LabelPolicy,
    /// MTBS `Incid_Type` values that count as fires.
    pub incident_types: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            start_year: 2000,
            end_year: 2024,
            region: RegionSelector::default(),
            tiger_year: 2025,
            validation_start: 2005,
            validation_end: 2009,
            folds: 5,
            seed: 42,
            landcover_supersample: 16,
            label_policy: LabelPolicy::Overlap,
            incident_types: vec!["Wildfire".to_string()],
        }
    }
}

impl PipelineConfig {
    /// Defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                let config: PipelineConfig = serde_json::from_str(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?;
                info!("Loaded config from {}", path.display());
                config
            }
            None => PipelineConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.start_year > self.end_year {
            anyhow::bail!("start_year {} is after end_year {}", self.start_year, self.end_year);
        }
        if self.validation_start > self.validation_end {
            anyhow::bail!(
                "validation_start {} is after validation_end {}",
                self.validation_start,
                self.validation_end
            );
        }
        if self.folds == 0 {
            anyhow::bail!("folds must be at least 1");
        }
        if self.incident_types.is_empty() {
            anyhow::bail!("incident_types is empty; no perimeter would qualify");
        }
        Ok(())
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }

    pub fn period(&self) -> MonthRange {
        MonthRange::years(self.start_year, self.end_year)
    }

    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.start_year..=self.end_year
    }

    pub fn split(&self) -> SplitConfig {
        SplitConfig {
            validation_years: self.validation_start..=self.validation_end,
            folds: self.folds,
            seed: self.seed,
        }
    }

    /// The region polygon from the downloaded TIGER layer.
    pub fn boundary(&self) -> anyhow::Result<Boundary> {
        let shp = self
            .layout()
            .raw_boundary(self.region.layer.name(), self.tiger_year);
        let boundary = Boundary::load(&shp, &self.region).with_context(|| {
            format!(
                "loading {} from {} (run `fetch boundary` first)",
                self.region.describe(),
                shp.display()
            )
        })?;
        info!("Region: {}", boundary.name);
        Ok(boundary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::load(None).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.period().count(), 25 * 12);
        assert_eq!(config.split(), SplitConfig::default());
        assert_eq!(config.region.name, "San Diego");
        assert_eq!(config.label_policy, LabelPolicy::Overlap);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"end_year": 2010, "label_policy": "centroid", "region": {"name": "Riverside"}}"#,
        )
        .unwrap();
        let config = PipelineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.start_year, 2000);
        assert_eq!(config.end_year, 2010);
        assert_eq!(config.label_policy, LabelPolicy::Centroid);
        assert_eq!(config.region.name, "Riverside");
        assert_eq!(config.region.state_fp, "06");
    }

    #[test]
    fn test_inverted_years_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"start_year": 2020, "end_year": 2010}"#).unwrap();
        assert!(PipelineConfig::load(Some(&path)).is_err());
    }
}
