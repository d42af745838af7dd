//! The study region, read from a Census TIGER county or state layer.

use geo::MultiPolygon;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CwfError, Result};
use crate::grid::BoundingBox;
use crate::vector::{check_geographic, shape_to_multipolygon, text_field};

/// Which TIGER layer the region comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryLayer {
    County,
    State,
}

impl BoundaryLayer {
    pub fn name(self) -> &'static str {
        match self {
            BoundaryLayer::County => "county",
            BoundaryLayer::State => "state",
        }
    }
}

/// How to pick the region out of its layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionSelector {
    pub layer: BoundaryLayer,
    /// `NAME` of the county; ignored for the state layer.
    pub name: String,
    /// Two-digit `STATEFP` code.
    pub state_fp: String,
}

impl Default for RegionSelector {
    fn default() -> Self {
        RegionSelector {
            layer: BoundaryLayer::County,
            name: "San Diego".to_string(),
            state_fp: "06".to_string(),
        }
    }
}

impl RegionSelector {
    fn matches(&self, name: Option<&str>, state_fp: Option<&str>) -> bool {
        let state_ok = state_fp == Some(self.state_fp.as_str());
        match self.layer {
            BoundaryLayer::County => state_ok && name == Some(self.name.as_str()),
            BoundaryLayer::State => state_ok,
        }
    }

    pub fn describe(&self) -> String {
        match self.layer {
            BoundaryLayer::County => format!("county {} (STATEFP {})", self.name, self.state_fp),
            BoundaryLayer::State => format!("state STATEFP {}", self.state_fp),
        }
    }
}

/// Region geometry in geographic degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

impl Boundary {
    /// Reads `shp` and merges every record matching `selector`.
    pub fn load(shp: &Path, selector: &RegionSelector) -> Result<Boundary> {
        check_geographic(shp)?;
        let mut reader = shapefile::Reader::from_path(shp)?;
        let mut polygons = Vec::new();
        let mut found_name = None;
        for item in reader.iter_shapes_and_records() {
            let (shape, record) = item?;
            let name = text_field(&record, "NAME");
            let state_fp = text_field(&record, "STATEFP");
            if !selector.matches(name.as_deref(), state_fp.as_deref()) {
                continue;
            }
            if let Some(geometry) = shape_to_multipolygon(&shape) {
                polygons.extend(geometry.0);
                found_name = found_name.or(name);
            }
        }
        if polygons.is_empty() {
            return Err(CwfError::RegionNotFound(format!(
                "{} in {}",
                selector.describe(),
                shp.display()
            )));
        }
        let boundary = Boundary {
            name: found_name.unwrap_or_else(|| selector.name.clone()),
            geometry: MultiPolygon(polygons),
        };
        info!(
            "Loaded region {} with {} polygon(s)",
            boundary.name,
            boundary.geometry.0.len()
        );
        Ok(boundary)
    }

    pub fn bbox(&self) -> Result<BoundingBox> {
        BoundingBox::from_geometry(&self.geometry)
            .ok_or_else(|| CwfError::RegionNotFound(format!("{} has no extent", self.name)))
    }
}
