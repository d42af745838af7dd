//! MTBS burned-area perimeters.

use chrono::NaiveDate;
use geo::{Intersects, MultiPolygon};
use log::{debug, info};
use std::path::Path;

use crate::error::Result;
use crate::grid::BoundingBox;
use crate::month::{MonthRange, YearMonth};
use crate::vector::{check_geographic, date_field, shape_to_multipolygon, text_field};

/// One fire perimeter with the attributes the pipeline uses.
#[derive(Debug, Clone, PartialEq)]
pub struct Perimeter {
    pub event_id: String,
    pub name: String,
    pub incident_type: String,
    pub ignition: NaiveDate,
    pub geometry: MultiPolygon<f64>,
}

impl Perimeter {
    /// The month whose label this perimeter contributes to.
    pub fn month(&self) -> YearMonth {
        YearMonth::from_date(&self.ignition)
    }
}

/// Which perimeters qualify as labels.
pub struct PerimeterFilter<'a> {
    pub incident_types: &'a [String],
    pub period: MonthRange,
    pub region: &'a MultiPolygon<f64>,
}

impl PerimeterFilter<'_> {
    pub fn accepts(&self, perimeter: &Perimeter) -> bool {
        self.incident_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&perimeter.incident_type))
            && self.period.contains_date(&perimeter.ignition)
            && perimeter.geometry.intersects(self.region)
    }
}

/// Counts of why perimeters were dropped while loading.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub read: usize,
    pub kept: usize,
    pub no_date: usize,
    pub rejected: usize,
}

/// Streams an MTBS perimeter shapefile and keeps the perimeters `filter`
/// accepts. Records are checked cheaply (type, date, bounding box)
/// before the polygon test.
pub fn load_perimeters(shp: &Path, filter: &PerimeterFilter) -> Result<(Vec<Perimeter>, LoadStats)> {
    check_geographic(shp)?;
    let region_bbox = BoundingBox::from_geometry(filter.region);
    let mut reader = shapefile::Reader::from_path(shp)?;
    let mut stats = LoadStats::default();
    let mut kept = Vec::new();
    for item in reader.iter_shapes_and_records() {
        let (shape, record) = item?;
        stats.read += 1;
        let Some(ignition) = date_field(&record, "Ig_Date") else {
            stats.no_date += 1;
            continue;
        };
        let incident_type = text_field(&record, "Incid_Type").unwrap_or_default();
        if !filter
            .incident_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&incident_type))
            || !filter.period.contains_date(&ignition)
        {
            stats.rejected += 1;
            continue;
        }
        let Some(geometry) = shape_to_multipolygon(&shape) else {
            stats.rejected += 1;
            continue;
        };
        let overlaps_bbox = match (BoundingBox::from_geometry(&geometry), region_bbox) {
            (Some(a), Some(b)) => a.intersects(&b),
            _ => false,
        };
        let perimeter = Perimeter {
            event_id: text_field(&record, "Event_ID").unwrap_or_default(),
            name: text_field(&record, "Incid_Name").unwrap_or_default(),
            incident_type,
            ignition,
            geometry,
        };
        if overlaps_bbox && filter.accepts(&perimeter) {
            debug!(
                "Keeping {} {} ({})",
                perimeter.event_id, perimeter.name, perimeter.ignition
            );
            kept.push(perimeter);
        } else {
            stats.rejected += 1;
        }
    }
    stats.kept = kept.len();
    info!(
        "Read {} perimeters from {}: kept {}, {} without ignition date, {} filtered out",
        stats.read,
        shp.display(),
        stats.kept,
        stats.no_date,
        stats.rejected
    );
    Ok((kept, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::fixtures::{date, square, text, write, Feature};
    use geo::polygon;
    use tempfile::tempdir;

    fn fire(id: &str, kind: &str, year: u32, month: u32, x0: f64) -> Feature {
        Feature {
            rings: vec![square(x0, 32.6, x0 + 0.2, 32.8)],
            fields: vec![
                ("Event_ID", text(id)),
                ("Incid_Name", text("TEST")),
                ("Incid_Type", text(kind)),
                ("Ig_Date", date(year, month, 15)),
            ],
        }
    }

    #[test]
    fn test_filters_type_period_and_region() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mtbs_perims_DD.shp");
        write(
            &path,
            &[
                fire("CA001", "Wildfire", 2003, 10, -116.8),
                fire("CA002", "Prescribed Fire", 2003, 10, -116.8),
                fire("CA003", "Wildfire", 1999, 7, -116.8),
                fire("CA004", "Wildfire", 2003, 3, -110.0),
                fire("CA005", "Wildfire", 2007, 10, -116.5),
            ],
        );
        let region = MultiPolygon(vec![polygon![
            (x: -117.0, y: 32.5),
            (x: -116.0, y: 32.5),
            (x: -116.0, y: 33.5),
            (x: -117.0, y: 33.5),
        ]]);
        let types = vec!["Wildfire".to_string()];
        let filter = PerimeterFilter {
            incident_types: &types,
            period: MonthRange::years(2000, 2024),
            region: &region,
        };
        let (perimeters, stats) = load_perimeters(&path, &filter).unwrap();
        let ids: Vec<&str> = perimeters.iter().map(|p| p.event_id.as_str()).collect();
        assert_eq!(ids, vec!["CA001", "CA005"]);
        assert_eq!(perimeters[0].month(), YearMonth::new(2003, 10).unwrap());
        assert_eq!(stats.read, 5);
        assert_eq!(stats.rejected, 3);
    }
}
