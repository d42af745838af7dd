//! Helpers shared by the shapefile-backed sources.

use chrono::NaiveDate;
use cwf_utils::dates::parse_date;
use geo::{Coord, LineString, MultiPolygon, Polygon};
use shapefile::dbase::{FieldValue, Record};
use shapefile::{PolygonRing, Shape};
use std::fs;
use std::path::Path;

use crate::error::{CwfError, Result};

/// Fails when the `.prj` next to a shapefile declares a projected CRS.
/// Every vector source is expected in geographic NAD83 degrees.
pub fn check_geographic(shp: &Path) -> Result<()> {
    let prj = shp.with_extension("prj");
    if !prj.exists() {
        log::warn!("{} has no .prj; assuming geographic coordinates", shp.display());
        return Ok(());
    }
    let wkt = fs::read_to_string(&prj)?;
    if wkt.trim_start().starts_with("PROJCS") {
        return Err(CwfError::GridMismatch(format!(
            "{} is in a projected CRS; expected geographic degrees",
            shp.display()
        )));
    }
    Ok(())
}

fn ring(points: &[shapefile::Point]) -> LineString<f64> {
    LineString::from(
        points
            .iter()
            .map(|p| Coord { x: p.x, y: p.y })
            .collect::<Vec<_>>(),
    )
}

fn rings_to_multipolygon<P>(rings: &[PolygonRing<P>], xy: impl Fn(&P) -> shapefile::Point) -> MultiPolygon<f64> {
    let mut polygons: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
    for r in rings {
        let points: Vec<shapefile::Point> = r.points().iter().map(&xy).collect();
        match r {
            PolygonRing::Outer(_) => polygons.push((ring(&points), Vec::new())),
            PolygonRing::Inner(_) => match polygons.last_mut() {
                Some((_, holes)) => holes.push(ring(&points)),
                // a hole before any outer ring; treat it as an outer ring
                None => polygons.push((ring(&points), Vec::new())),
            },
        }
    }
    MultiPolygon(
        polygons
            .into_iter()
            .map(|(exterior, holes)| Polygon::new(exterior, holes))
            .collect(),
    )
}

/// Converts polygon shapes to geometry. Other shape types yield `None`.
pub fn shape_to_multipolygon(shape: &Shape) -> Option<MultiPolygon<f64>> {
    match shape {
        Shape::Polygon(p) => Some(rings_to_multipolygon(p.rings(), |pt| *pt)),
        Shape::PolygonM(p) => Some(rings_to_multipolygon(p.rings(), |pt| {
            shapefile::Point::new(pt.x, pt.y)
        })),
        Shape::PolygonZ(p) => Some(rings_to_multipolygon(p.rings(), |pt| {
            shapefile::Point::new(pt.x, pt.y)
        })),
        _ => None,
    }
}

/// Trimmed text of a character field, `None` when absent or empty.
pub fn text_field(record: &Record, name: &str) -> Option<String> {
    match record.get(name)? {
        FieldValue::Character(Some(text)) | FieldValue::Memo(text) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            }
        }
        _ => None,
    }
}

/// A date field, also accepting `YYYY-MM-DD` or `YYYYMMDD` text.
pub fn date_field(record: &Record, name: &str) -> Option<NaiveDate> {
    match record.get(name)? {
        FieldValue::Date(Some(date)) => {
            NaiveDate::from_ymd_opt(date.year() as i32, date.month(), date.day())
        }
        FieldValue::Character(Some(text)) => parse_date(text).ok(),
        _ => None,
    }
}
