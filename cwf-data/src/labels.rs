//! Monthly burn labels rasterized from fire perimeters.

use cwf_core::ascii_grid;
use cwf_core::grid::{BoundingBox, GridSpec, Raster};
use cwf_core::layout::DataLayout;
use cwf_core::month::{MonthRange, YearMonth};
use cwf_core::perimeter::Perimeter;
use geo::{Coord, Intersects, MultiPolygon, Rect};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::target::Target;

/// When a perimeter marks a cell as burned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelPolicy {
    /// The perimeter overlaps the cell's interior; touching an edge or
    /// corner is not enough.
    #[default]
    Overlap,
    /// The cell centre lies inside the perimeter.
    Centroid,
}

/// Inset of the cell rectangle, as a fraction of the cell size, so that
/// geometry lying exactly on a cell edge does not count as overlap.
const EDGE_INSET: f64 = 1e-6;

/// Row and column ranges of the cells whose footprint meets `bbox`.
fn cell_range(grid: &GridSpec, bbox: &BoundingBox) -> Option<((usize, usize), (usize, usize))> {
    let north = grid.north();
    let clamp_rows = |v: f64| v.clamp(0.0, grid.nrows as f64) as usize;
    let clamp_cols = |v: f64| v.clamp(0.0, grid.ncols as f64) as usize;
    let rows = (
        clamp_rows(((north - bbox.max_y) / grid.cellsize).floor()),
        clamp_rows(((north - bbox.min_y) / grid.cellsize).ceil()),
    );
    let cols = (
        clamp_cols(((bbox.min_x - grid.west) / grid.cellsize).floor()),
        clamp_cols(((bbox.max_x - grid.west) / grid.cellsize).ceil()),
    );
    if rows.0 < rows.1 && cols.0 < cols.1 {
        Some((rows, cols))
    } else {
        None
    }
}

/// Calls `visit(row, col)` once for every cell `geometry` labels under
/// `policy`.
pub fn cells_touched<F>(grid: &GridSpec, geometry: &MultiPolygon<f64>, policy: LabelPolicy, mut visit: F)
where
    F: FnMut(usize, usize),
{
    let Some(bbox) = BoundingBox::from_geometry(geometry) else {
        return;
    };
    let Some(((row0, row1), (col0, col1))) = cell_range(grid, &bbox) else {
        return;
    };
    let width = col1 - col0;
    let mut centre_inside = vec![false; (row1 - row0) * width];
    grid.for_each_centre_inside(geometry, |row, col| {
        if (row0..row1).contains(&row) && (col0..col1).contains(&col) {
            centre_inside[(row - row0) * width + (col - col0)] = true;
        }
    });

    let inset = grid.cellsize * EDGE_INSET;
    for row in row0..row1 {
        for col in col0..col1 {
            let hit = centre_inside[(row - row0) * width + (col - col0)]
                || (policy == LabelPolicy::Overlap && {
                    let cell = grid.cell_bounds(row, col);
                    let rect = Rect::new(
                        Coord {
                            x: cell.min_x + inset,
                            y: cell.min_y + inset,
                        },
                        Coord {
                            x: cell.max_x - inset,
                            y: cell.max_y - inset,
                        },
                    );
                    geometry.intersects(&rect.to_polygon())
                });
            if hit {
                visit(row, col);
            }
        }
    }
}

/// Label raster for one month: 1 where any of `perimeters` burns the
/// cell, 0 elsewhere in the region, no-data outside it.
pub fn rasterize_month(perimeters: &[&Perimeter], target: &Target, policy: LabelPolicy) -> Raster {
    let mut raster = Raster::filled(target.grid, 0.0);
    for perimeter in perimeters {
        cells_touched(&target.grid, &perimeter.geometry, policy, |row, col| {
            raster.set(row, col, 1.0)
        });
    }
    raster.apply_mask(&target.mask);
    raster
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct LabelSummary {
    pub months: usize,
    pub burned_months: usize,
    pub positive_cells: usize,
}

/// Writes a label raster for every month of `period`, zeros included.
/// Each perimeter contributes only to its ignition month.
pub fn rasterize_labels(
    layout: &DataLayout,
    perimeters: &[Perimeter],
    period: MonthRange,
    policy: LabelPolicy,
) -> anyhow::Result<LabelSummary> {
    let target = Target::load(layout)?;
    let mut by_month: BTreeMap<YearMonth, Vec<&Perimeter>> = BTreeMap::new();
    for perimeter in perimeters {
        by_month.entry(perimeter.month()).or_default().push(perimeter);
    }

    let mut summary = LabelSummary::default();
    for month in period {
        let fires = by_month.get(&month).map(Vec::as_slice).unwrap_or(&[]);
        let raster = rasterize_month(fires, &target, policy);
        let positives = raster.values.iter().filter(|v| **v == 1.0).count();
        if positives > 0 {
            summary.burned_months += 1;
            info!("{}: {} fire(s), {} burned cells", month, fires.len(), positives);
        }
        summary.positive_cells += positives;
        summary.months += 1;
        ascii_grid::write(&layout.labels(month), &raster)?;
    }
    info!(
        "Wrote {} label rasters; {} months with fire, {} positive cell-months",
        summary.months, summary.burned_months, summary.positive_cells
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use cwf_core::grid::{is_nodata, RegionMask};
    use geo::polygon;
    use tempfile::tempdir;

    fn grid() -> GridSpec {
        GridSpec {
            ncols: 4,
            nrows: 4,
            west: 0.0,
            south: 0.0,
            cellsize: 1.0,
        }
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
        ]])
    }

    fn touched(geometry: &MultiPolygon<f64>, policy: LabelPolicy) -> Vec<(usize, usize)> {
        let mut cells = Vec::new();
        cells_touched(&grid(), geometry, policy, |r, c| cells.push((r, c)));
        cells
    }

    fn fire(date: (i32, u32, u32), geometry: MultiPolygon<f64>) -> Perimeter {
        Perimeter {
            event_id: "CA3300011700020031025".to_string(),
            name: "CEDAR".to_string(),
            incident_type: "Wildfire".to_string(),
            ignition: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            geometry,
        }
    }

    #[test]
    fn test_exact_cell_does_not_leak_into_neighbours() {
        // cell (row 2, col 1) is x 1..2, y 1..2
        let cell = square(1.0, 1.0, 2.0, 2.0);
        assert_eq!(touched(&cell, LabelPolicy::Overlap), vec![(2, 1)]);
        assert_eq!(touched(&cell, LabelPolicy::Centroid), vec![(2, 1)]);
    }

    #[test]
    fn test_shared_edge_is_not_overlap() {
        // L-shape over cells (3, 0), (3, 1) and (2, 0); it only touches
        // cell (2, 1) along two of its edges
        let l_shape = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 0.0),
            (x: 2.0, y: 1.0),
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 2.0),
            (x: 0.0, y: 2.0),
        ]]);
        assert_eq!(
            touched(&l_shape, LabelPolicy::Overlap),
            vec![(2, 0), (3, 0), (3, 1)]
        );
    }

    #[test]
    fn test_overlap_catches_corners_centroid_does_not() {
        // small fire in the north-east corner of cell (3, 0)
        let corner = square(0.8, 0.8, 0.95, 0.95);
        assert_eq!(touched(&corner, LabelPolicy::Overlap), vec![(3, 0)]);
        assert!(touched(&corner, LabelPolicy::Centroid).is_empty());

        // straddles the corner shared by four cells
        let cross = square(1.9, 1.9, 2.1, 2.1);
        assert_eq!(
            touched(&cross, LabelPolicy::Overlap),
            vec![(1, 1), (1, 2), (2, 1), (2, 2)]
        );
    }

    #[test]
    fn test_outside_grid_is_ignored() {
        assert!(touched(&square(10.0, 10.0, 11.0, 11.0), LabelPolicy::Overlap).is_empty());
    }

    #[test]
    fn test_rasterize_month_masks_region() {
        let target = Target {
            grid: grid(),
            mask: {
                let mut mask = RegionMask::all(grid());
                mask.inside[0] = false;
                mask
            },
        };
        let fires = [fire((2003, 3, 10), square(0.0, 2.0, 2.0, 4.0))];
        let refs: Vec<&Perimeter> = fires.iter().collect();
        let raster = rasterize_month(&refs, &target, LabelPolicy::Overlap);
        assert!(is_nodata(raster.get(0, 0)));
        assert_eq!(raster.get(0, 1), 1.0);
        assert_eq!(raster.get(1, 0), 1.0);
        assert_eq!(raster.get(1, 1), 1.0);
        assert_eq!(raster.get(2, 0), 0.0);
        assert_eq!(raster.values.iter().filter(|v| **v == 1.0).count(), 3);
    }

    #[test]
    fn test_labels_only_in_ignition_month() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let target = Target {
            grid: grid(),
            mask: RegionMask::all(grid()),
        };
        target.save(&layout).unwrap();
        let fires = vec![fire((2003, 3, 10), square(1.0, 1.0, 2.0, 2.0))];
        let period = MonthRange::years(2003, 2003);
        let summary = rasterize_labels(&layout, &fires, period, LabelPolicy::Overlap).unwrap();
        assert_eq!(
            summary,
            LabelSummary {
                months: 12,
                burned_months: 1,
                positive_cells: 1
            }
        );
        for month in period {
            let raster = ascii_grid::read(&layout.labels(month)).unwrap();
            let expected = if month.month == 3 { 1.0 } else { 0.0 };
            assert_eq!(raster.get(2, 1), expected, "{}", month);
            assert_eq!(raster.get(0, 0), 0.0);
        }
    }
}
