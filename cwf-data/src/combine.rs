//! Joins the normalized rasters into one long table keyed by
//! (cell, month) and writes it as parquet.
//!
//! The row for label month M carries the predictors of month M-1, so the
//! first usable label month is the second month of the study period.

use anyhow::Context;
use cwf_core::ascii_grid;
use cwf_core::grid::Raster;
use cwf_core::layout::{ClimateVariable, DataLayout, TerrainLayer};
use cwf_core::month::{MonthRange, YearMonth};
use log::{info, warn};
use polars::prelude::*;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::target::Target;

/// Column order of the combined table.
pub const COLUMNS: [&str; 17] = [
    "cell_id", "row", "col", "lat", "lon", "year", "month", "ppt", "tmax", "vpdmax", "tdmean",
    "ndvi", "landcover", "elevation", "slope", "aspect", "label",
];

/// Access to normalized rasters, aligned to one target grid. `None`
/// means the raster does not exist.
pub trait MonthlySource {
    fn target(&self) -> &Target;
    fn climate(&self, variable: ClimateVariable, month: YearMonth) -> anyhow::Result<Option<Raster>>;
    fn ndvi(&self, month: YearMonth) -> anyhow::Result<Option<Raster>>;
    fn landcover_years(&self) -> anyhow::Result<Vec<i32>>;
    fn landcover(&self, year: i32) -> anyhow::Result<Option<Raster>>;
    fn terrain(&self, layer: TerrainLayer) -> anyhow::Result<Option<Raster>>;
    fn labels(&self, month: YearMonth) -> anyhow::Result<Option<Raster>>;
}

/// Normalized rasters under a data directory.
pub struct DiskSource {
    layout: DataLayout,
    target: Target,
}

impl DiskSource {
    pub fn open(layout: &DataLayout) -> anyhow::Result<DiskSource> {
        Ok(DiskSource {
            layout: layout.clone(),
            target: Target::load(layout)?,
        })
    }

    fn read(&self, path: &Path) -> anyhow::Result<Option<Raster>> {
        if !path.exists() {
            return Ok(None);
        }
        let raster = ascii_grid::read_window(path, &self.target.grid)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(raster))
    }
}

impl MonthlySource for DiskSource {
    fn target(&self) -> &Target {
        &self.target
    }

    fn climate(&self, variable: ClimateVariable, month: YearMonth) -> anyhow::Result<Option<Raster>> {
        self.read(&self.layout.prism(variable, month))
    }

    fn ndvi(&self, month: YearMonth) -> anyhow::Result<Option<Raster>> {
        self.read(&self.layout.ndvi(month))
    }

    fn landcover_years(&self) -> anyhow::Result<Vec<i32>> {
        Ok(self.layout.nlcd_years()?)
    }

    fn landcover(&self, year: i32) -> anyhow::Result<Option<Raster>> {
        self.read(&self.layout.nlcd(year))
    }

    fn terrain(&self, layer: TerrainLayer) -> anyhow::Result<Option<Raster>> {
        self.read(&self.layout.terrain(layer))
    }

    fn labels(&self, month: YearMonth) -> anyhow::Result<Option<Raster>> {
        self.read(&self.layout.labels(month))
    }
}

/// The latest available landcover year not after `year`.
pub fn landcover_year_for(available: &[i32], year: i32) -> Option<i32> {
    available.iter().copied().filter(|y| *y <= year).max()
}

#[derive(Debug, Clone, Copy)]
pub struct CombineOptions {
    pub period: MonthRange,
    /// Keep rows with missing predictors, writing nulls.
    pub keep_nodata: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CombineSummary {
    pub months: usize,
    pub rows: usize,
    pub positives: usize,
    pub skipped: Vec<YearMonth>,
}

struct Terrain {
    elevation: Raster,
    slope: Raster,
    aspect: Raster,
}

/// Predictor rasters for one label month.
struct MonthInputs<'a> {
    climate: [Raster; 4],
    ndvi: Option<Raster>,
    landcover: Option<&'a Raster>,
    terrain: &'a Terrain,
    labels: Raster,
}

fn round5(value: f64) -> f64 {
    (value * 1e5).round() / 1e5
}

/// Rows of one label month, one per region cell.
fn month_frame(
    target: &Target,
    label_month: YearMonth,
    inputs: &MonthInputs,
    keep_nodata: bool,
) -> PolarsResult<DataFrame> {
    let grid = &target.grid;
    let capacity = target.mask.count();
    let mut cell_id = Vec::with_capacity(capacity);
    let mut rows = Vec::with_capacity(capacity);
    let mut cols = Vec::with_capacity(capacity);
    let mut lat = Vec::with_capacity(capacity);
    let mut lon = Vec::with_capacity(capacity);
    let mut climate: [Vec<Option<f32>>; 4] = Default::default();
    let mut ndvi = Vec::with_capacity(capacity);
    let mut landcover = Vec::with_capacity(capacity);
    let mut elevation = Vec::with_capacity(capacity);
    let mut slope = Vec::with_capacity(capacity);
    let mut aspect = Vec::with_capacity(capacity);
    let mut label = Vec::with_capacity(capacity);

    for (row, col) in target.mask.cells() {
        let Some(burned) = inputs.labels.value(row, col) else {
            continue;
        };
        let climate_values = [0, 1, 2, 3].map(|i| inputs.climate[i].value(row, col));
        let ndvi_value = inputs.ndvi.as_ref().and_then(|r| r.value(row, col));
        let class = inputs.landcover.and_then(|r| r.value(row, col));
        let terrain = [
            inputs.terrain.elevation.value(row, col),
            inputs.terrain.slope.value(row, col),
            inputs.terrain.aspect.value(row, col),
        ];
        let complete = climate_values.iter().all(Option::is_some)
            && ndvi_value.is_some()
            && class.is_some()
            && terrain.iter().all(Option::is_some);
        if !complete && !keep_nodata {
            continue;
        }

        let (x, y) = grid.centre(row, col);
        cell_id.push(grid.cell_id(row, col));
        rows.push(row as u32);
        cols.push(col as u32);
        lat.push(round5(y));
        lon.push(round5(x));
        for (column, value) in climate.iter_mut().zip(climate_values) {
            column.push(value);
        }
        ndvi.push(ndvi_value);
        landcover.push(class.map(|c| c as i32));
        elevation.push(terrain[0]);
        slope.push(terrain[1]);
        aspect.push(terrain[2]);
        label.push(if burned >= 1.0 { 1i32 } else { 0 });
    }

    let n = cell_id.len();
    let [ppt, tmax, vpdmax, tdmean] = climate;
    df!(
        "cell_id" => cell_id,
        "row" => rows,
        "col" => cols,
        "lat" => lat,
        "lon" => lon,
        "year" => vec![label_month.year; n],
        "month" => vec![label_month.month as i32; n],
        "ppt" => ppt,
        "tmax" => tmax,
        "vpdmax" => vpdmax,
        "tdmean" => tdmean,
        "ndvi" => ndvi,
        "landcover" => landcover,
        "elevation" => elevation,
        "slope" => slope,
        "aspect" => aspect,
        "label" => label
    )
}

fn load_terrain<S: MonthlySource>(source: &S) -> anyhow::Result<Terrain> {
    let load = |layer: TerrainLayer| -> anyhow::Result<Raster> {
        source.terrain(layer)?.with_context(|| {
            format!("missing terrain layer {} (run `normalize dem` first)", layer.name())
        })
    };
    Ok(Terrain {
        elevation: load(TerrainLayer::Elevation)?,
        slope: load(TerrainLayer::Slope)?,
        aspect: load(TerrainLayer::Aspect)?,
    })
}

/// Builds the combined table for every label month of the period and
/// streams it to `out` as zstd parquet, one row group per month.
pub fn combine<S: MonthlySource, W: Write>(
    source: &S,
    options: &CombineOptions,
    out: W,
) -> anyhow::Result<CombineSummary> {
    let target = source.target();
    let terrain = load_terrain(source)?;
    let landcover_years = source.landcover_years()?;
    let mut landcover: Option<(i32, Raster)> = None;

    let mut writer = Some(ParquetWriter::new(out).with_compression(ParquetCompression::Zstd(None)));
    let mut batched = None;
    let mut summary = CombineSummary::default();

    let MonthRange(start, end) = options.period;
    for label_month in MonthRange(start.succ(), end) {
        let predictor_month = label_month.pred();

        let mut climate = Vec::with_capacity(4);
        for variable in ClimateVariable::ALL {
            match source.climate(variable, predictor_month)? {
                Some(raster) => climate.push(raster),
                None => break,
            }
        }
        let Ok(climate) = <[Raster; 4]>::try_from(climate) else {
            warn!(
                "Skipping {}: climate for {} is incomplete",
                label_month, predictor_month
            );
            summary.skipped.push(label_month);
            continue;
        };
        let Some(labels) = source.labels(label_month)? else {
            warn!("Skipping {}: no label raster (run `labels` first)", label_month);
            summary.skipped.push(label_month);
            continue;
        };
        let ndvi = source.ndvi(predictor_month)?;
        if ndvi.is_none() {
            warn!("No NDVI for {}; its rows have no ndvi value", predictor_month);
        }

        let wanted = landcover_year_for(&landcover_years, predictor_month.year);
        if wanted != landcover.as_ref().map(|(year, _)| *year) {
            landcover = match wanted {
                Some(year) => source.landcover(year)?.map(|raster| (year, raster)),
                None => {
                    warn!("No landcover at or before {}", predictor_month.year);
                    None
                }
            };
        }

        let inputs = MonthInputs {
            climate,
            ndvi,
            landcover: landcover.as_ref().map(|(_, raster)| raster),
            terrain: &terrain,
            labels,
        };
        let frame = month_frame(target, label_month, &inputs, options.keep_nodata)?;
        if batched.is_none() {
            if let Some(w) = writer.take() {
                batched = Some(w.batched(&frame.schema().clone())?);
            }
        }
        if let Some(b) = batched.as_mut() {
            b.write_batch(&frame)?;
        }

        let positives = frame.column("label")?.i32()?.sum().unwrap_or(0) as usize;
        summary.months += 1;
        summary.rows += frame.height();
        summary.positives += positives;
        if label_month.month == 12 || label_month == end {
            info!(
                "Combined through {}: {} rows, {} positive",
                label_month, summary.rows, summary.positives
            );
        }
    }

    match batched.as_mut() {
        Some(b) => {
            b.finish()?;
        }
        None => anyhow::bail!("no month of the study period had complete inputs"),
    }
    Ok(summary)
}

/// Combines the normalized rasters under `layout` into `combined.parquet`.
pub fn combine_dataset(layout: &DataLayout, options: &CombineOptions) -> anyhow::Result<CombineSummary> {
    let source = DiskSource::open(layout)?;
    let path = layout.combined();
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let summary = combine(&source, options, file)?;
    let rate = if summary.rows > 0 {
        summary.positives as f64 / summary.rows as f64
    } else {
        0.0
    };
    info!(
        "Wrote {} rows over {} months to {} (positive rate {:.4}%, {} months skipped)",
        summary.rows,
        summary.months,
        path.display(),
        rate * 100.0,
        summary.skipped.len()
    );
    Ok(summary)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use cwf_core::grid::{GridSpec, RegionMask, NODATA};
    use std::collections::HashMap;
    use tempfile::tempdir;

    /// Rasters held in memory, for tests.
    pub(crate) struct MemorySource {
        pub target: Target,
        pub climate: HashMap<(ClimateVariable, YearMonth), Raster>,
        pub ndvi: HashMap<YearMonth, Raster>,
        pub landcover: HashMap<i32, Raster>,
        pub terrain: HashMap<&'static str, Raster>,
        pub labels: HashMap<YearMonth, Raster>,
    }

    impl MonthlySource for MemorySource {
        fn target(&self) -> &Target {
            &self.target
        }
        fn climate(&self, variable: ClimateVariable, month: YearMonth) -> anyhow::Result<Option<Raster>> {
            Ok(self.climate.get(&(variable, month)).cloned())
        }
        fn ndvi(&self, month: YearMonth) -> anyhow::Result<Option<Raster>> {
            Ok(self.ndvi.get(&month).cloned())
        }
        fn landcover_years(&self) -> anyhow::Result<Vec<i32>> {
            let mut years: Vec<i32> = self.landcover.keys().copied().collect();
            years.sort_unstable();
            Ok(years)
        }
        fn landcover(&self, year: i32) -> anyhow::Result<Option<Raster>> {
            Ok(self.landcover.get(&year).cloned())
        }
        fn terrain(&self, layer: TerrainLayer) -> anyhow::Result<Option<Raster>> {
            Ok(self.terrain.get(layer.name()).cloned())
        }
        fn labels(&self, month: YearMonth) -> anyhow::Result<Option<Raster>> {
            Ok(self.labels.get(&month).cloned())
        }
    }

    pub(crate) fn ym(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }

    fn grid() -> GridSpec {
        GridSpec {
            ncols: 3,
            nrows: 2,
            west: -117.0,
            south: 32.0,
            cellsize: 1.0 / 120.0,
        }
    }

    /// Every source present for 2003; ppt equals the month number so the
    /// lag is visible; one fire in cell (1, 1) in March.
    pub(crate) fn source_2003() -> MemorySource {
        let grid = grid();
        let target = Target {
            grid,
            mask: RegionMask::all(grid),
        };
        let mut source = MemorySource {
            target,
            climate: HashMap::new(),
            ndvi: HashMap::new(),
            landcover: HashMap::new(),
            terrain: HashMap::new(),
            labels: HashMap::new(),
        };
        for month in MonthRange::years(2003, 2003) {
            for variable in ClimateVariable::ALL {
                let value = if variable == ClimateVariable::Ppt {
                    month.month as f32
                } else {
                    20.0
                };
                source.climate.insert((variable, month), Raster::filled(grid, value));
            }
            source.ndvi.insert(month, Raster::filled(grid, 0.3));
            let mut labels = Raster::filled(grid, 0.0);
            if month.month == 3 {
                labels.set(1, 1, 1.0);
            }
            source.labels.insert(month, labels);
        }
        source.landcover.insert(2001, Raster::filled(grid, 52.0));
        source.landcover.insert(2004, Raster::filled(grid, 71.0));
        source.terrain.insert("elevation", Raster::filled(grid, 500.0));
        source.terrain.insert("slope", Raster::filled(grid, 4.0));
        source.terrain.insert("aspect", Raster::filled(grid, 180.0));
        source
    }

    fn run(source: &MemorySource, keep_nodata: bool) -> (CombineSummary, DataFrame) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("combined.parquet");
        let options = CombineOptions {
            period: MonthRange::years(2003, 2003),
            keep_nodata,
        };
        let summary = combine(source, &options, File::create(&path).unwrap()).unwrap();
        let df = ParquetReader::new(File::open(&path).unwrap()).finish().unwrap();
        (summary, df)
    }

    fn rows_for(df: &DataFrame, cell: u32) -> Vec<(i32, i32, f32, i32)> {
        let ids = df.column("cell_id").unwrap().u32().unwrap();
        let months = df.column("month").unwrap().i32().unwrap();
        let ppt = df.column("ppt").unwrap().f32().unwrap();
        let labels = df.column("label").unwrap().i32().unwrap();
        let years = df.column("year").unwrap().i32().unwrap();
        (0..df.height())
            .filter(|i| ids.get(*i) == Some(cell))
            .map(|i| {
                (
                    years.get(i).unwrap(),
                    months.get(i).unwrap(),
                    ppt.get(i).unwrap(),
                    labels.get(i).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_single_fire_scenario_and_lag() {
        let source = source_2003();
        let (summary, df) = run(&source, false);

        // February through December for six cells
        assert_eq!(summary.months, 11);
        assert_eq!(df.height(), 66);
        assert_eq!(summary.positives, 1);
        let names: Vec<&str> = df.get_column_names().iter().map(|n| n.as_str()).collect();
        assert_eq!(names, COLUMNS.to_vec());

        let burned = source.target.grid.cell_id(1, 1);
        let rows = rows_for(&df, burned);
        assert_eq!(rows.len(), 11);
        for (year, month, ppt, label) in rows {
            assert_eq!(year, 2003);
            assert_eq!(label, if month == 3 { 1 } else { 0 });
            // predictors come from the previous month
            assert_eq!(ppt, (month - 1) as f32);
        }
        // every other cell is never burned
        let labels = df.column("label").unwrap().i32().unwrap();
        assert_eq!(labels.sum(), Some(1));
    }

    #[test]
    fn test_landcover_falls_back_to_earlier_year() {
        let (_, df) = run(&source_2003(), false);
        let classes = df.column("landcover").unwrap().i32().unwrap();
        assert!(classes.into_iter().all(|c| c == Some(52)));
    }

    #[test]
    fn test_nodata_rows_dropped_or_kept_as_nulls() {
        let mut source = source_2003();
        let mut ndvi = Raster::filled(source.target.grid, 0.3);
        ndvi.set(0, 0, NODATA);
        source.ndvi.insert(ym(2003, 4), ndvi);

        let (dropped, df) = run(&source, false);
        assert_eq!(dropped.rows, 65);
        assert_eq!(df.column("ndvi").unwrap().null_count(), 0);

        let (kept, df) = run(&source, true);
        assert_eq!(kept.rows, 66);
        assert_eq!(df.column("ndvi").unwrap().null_count(), 1);
    }

    #[test]
    fn test_month_without_climate_is_skipped() {
        let mut source = source_2003();
        source.climate.remove(&(ClimateVariable::Tdmean, ym(2003, 6)));
        source.labels.remove(&ym(2003, 9));
        let (summary, df) = run(&source, false);
        assert_eq!(summary.skipped, vec![ym(2003, 7), ym(2003, 9)]);
        assert_eq!(summary.months, 9);
        assert_eq!(df.height(), 54);
    }

    #[test]
    fn test_perimeter_to_parquet_on_disk() {
        use crate::labels::{rasterize_labels, LabelPolicy};
        use chrono::NaiveDate;
        use cwf_core::perimeter::Perimeter;
        use geo::{polygon, MultiPolygon};

        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let source = source_2003();
        let target = source.target.clone();
        target.save(&layout).unwrap();
        for ((variable, month), raster) in &source.climate {
            ascii_grid::write(&layout.prism(*variable, *month), raster).unwrap();
        }
        for (month, raster) in &source.ndvi {
            ascii_grid::write(&layout.ndvi(*month), raster).unwrap();
        }
        ascii_grid::write(&layout.nlcd(2001), &source.landcover[&2001]).unwrap();
        for layer in TerrainLayer::ALL {
            ascii_grid::write(&layout.terrain(layer), &source.terrain[layer.name()]).unwrap();
        }

        // exactly cell (1, 1)
        let cell = target.grid.cell_bounds(1, 1);
        let fire = Perimeter {
            event_id: "CA3290011690020030310".to_string(),
            name: "TEST".to_string(),
            incident_type: "Wildfire".to_string(),
            ignition: NaiveDate::from_ymd_opt(2003, 3, 10).unwrap(),
            geometry: MultiPolygon(vec![polygon![
                (x: cell.min_x, y: cell.min_y),
                (x: cell.max_x, y: cell.min_y),
                (x: cell.max_x, y: cell.max_y),
                (x: cell.min_x, y: cell.max_y),
            ]]),
        };
        let period = MonthRange::years(2003, 2003);
        rasterize_labels(&layout, &[fire], period, LabelPolicy::Overlap).unwrap();

        let options = CombineOptions {
            period,
            keep_nodata: false,
        };
        let summary = combine_dataset(&layout, &options).unwrap();
        assert_eq!(summary.rows, 66);
        assert_eq!(summary.positives, 1);

        let df = ParquetReader::new(File::open(layout.combined()).unwrap())
            .finish()
            .unwrap();
        for (_, month, ppt, label) in rows_for(&df, target.grid.cell_id(1, 1)) {
            assert_eq!(label, if month == 3 { 1 } else { 0 });
            assert_eq!(ppt, (month - 1) as f32);
        }
    }

    #[test]
    fn test_landcover_year_lookup() {
        assert_eq!(landcover_year_for(&[2001, 2004, 2006], 2005), Some(2004));
        assert_eq!(landcover_year_for(&[2001, 2004, 2006], 2004), Some(2004));
        assert_eq!(landcover_year_for(&[2001], 2000), None);
    }
}
