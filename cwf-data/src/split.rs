//! Validation hold-out and stratified cross-validation folds.
//!
//! `combined.parquet` is streamed in slices, so folds are dealt one row
//! at a time: each label class draws from its own shuffled deck of fold
//! numbers and a new deck is shuffled once the old one runs out. Every
//! fold therefore holds the same number of positives and of negatives,
//! give or take one.

use anyhow::Context;
use cwf_core::layout::DataLayout;
use log::info;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs::File;
use std::ops::RangeInclusive;
use std::path::Path;

/// Fold of the rows withheld for validation.
pub const VALIDATION_FOLD: i32 = -1;

/// Rows read from `combined.parquet` at a time.
pub const CHUNK_ROWS: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq)]
pub struct SplitConfig {
    pub validation_years: RangeInclusive<i32>,
    pub folds: usize,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig {
            validation_years: 2005..=2009,
            folds: 5,
            seed: 42,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SplitSummary {
    pub validation_rows: usize,
    /// (rows, positives) per training fold.
    pub folds: Vec<(usize, usize)>,
}

/// Deals folds to rows in file order.
pub struct FoldDealer {
    validation_years: RangeInclusive<i32>,
    folds: usize,
    rng: StdRng,
    /// Undealt fold numbers of the negative and positive class.
    decks: [Vec<i32>; 2],
    summary: SplitSummary,
}

impl FoldDealer {
    pub fn new(config: &SplitConfig) -> anyhow::Result<Self> {
        if config.folds == 0 {
            anyhow::bail!("fold count must be positive");
        }
        Ok(FoldDealer {
            validation_years: config.validation_years.clone(),
            folds: config.folds,
            rng: StdRng::seed_from_u64(config.seed),
            decks: [Vec::new(), Vec::new()],
            summary: SplitSummary {
                validation_rows: 0,
                folds: vec![(0, 0); config.folds],
            },
        })
    }

    /// Fold of the next row.
    pub fn deal(&mut self, year: i32, label: i32) -> i32 {
        if self.validation_years.contains(&year) {
            self.summary.validation_rows += 1;
            return VALIDATION_FOLD;
        }
        let positive = label == 1;
        let deck = &mut self.decks[positive as usize];
        if deck.is_empty() {
            deck.extend(0..self.folds as i32);
            deck.shuffle(&mut self.rng);
        }
        let fold = deck.pop().unwrap_or(0);
        let entry = &mut self.summary.folds[fold as usize];
        entry.0 += 1;
        if positive {
            entry.1 += 1;
        }
        fold
    }

    pub fn summary(&self) -> &SplitSummary {
        &self.summary
    }

    pub fn finish(self) -> SplitSummary {
        self.summary
    }
}

/// Fold of every row of an in-memory table.
pub fn assign_folds(years: &[i32], labels: &[i32], config: &SplitConfig) -> anyhow::Result<Vec<i32>> {
    if years.len() != labels.len() {
        anyhow::bail!("{} years for {} labels", years.len(), labels.len());
    }
    let mut dealer = FoldDealer::new(config)?;
    Ok(years
        .iter()
        .zip(labels)
        .map(|(year, label)| dealer.deal(*year, *label))
        .collect())
}

/// Appends a `fold` column to one slice of the table.
pub fn split_frame(df: &mut DataFrame, dealer: &mut FoldDealer) -> anyhow::Result<()> {
    let years = df.column("year")?.i32()?;
    let labels = df.column("label")?.i32()?;
    let folds: Vec<i32> = years
        .into_iter()
        .zip(labels)
        .map(|(year, label)| dealer.deal(year.unwrap_or(i32::MIN), label.unwrap_or(0)))
        .collect();
    df.with_column(Series::new("fold".into(), folds))?;
    Ok(())
}

/// Copies `input` to `output` with a `fold` column, `chunk_rows` rows at
/// a time.
pub fn split_file(
    input: &Path,
    output: &Path,
    config: &SplitConfig,
    chunk_rows: usize,
) -> anyhow::Result<SplitSummary> {
    let file = File::open(input)
        .with_context(|| format!("opening {} (run `combine` first)", input.display()))?;
    let total = ParquetReader::new(file).num_rows()?;
    let mut scan = LazyFrame::scan_parquet(input, ScanArgsParquet::default())?;
    let mut schema = (*scan.collect_schema()?).clone();
    schema.with_column("fold".into(), DataType::Int32);
    info!("Splitting {} rows of {}", total, input.display());

    let out = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut writer = ParquetWriter::new(out)
        .with_compression(ParquetCompression::Zstd(None))
        .batched(&schema)?;
    let mut dealer = FoldDealer::new(config)?;
    let chunk_rows = chunk_rows.max(1);
    let mut offset = 0;
    while offset < total {
        let mut chunk = scan
            .clone()
            .slice(offset as i64, chunk_rows as IdxSize)
            .collect()?;
        if chunk.height() == 0 {
            break;
        }
        offset += chunk.height();
        split_frame(&mut chunk, &mut dealer)?;
        writer.write_batch(&chunk)?;
    }
    writer.finish()?;
    Ok(dealer.finish())
}

/// Streams `combined.parquet` into `combined_split.parquet` with a
/// `fold` column.
pub fn split_dataset(layout: &DataLayout, config: &SplitConfig) -> anyhow::Result<SplitSummary> {
    let output = layout.combined_split();
    let summary = split_file(&layout.combined(), &output, config, CHUNK_ROWS)?;
    info!(
        "Validation {:?}: {} rows",
        config.validation_years, summary.validation_rows
    );
    for (fold, (rows, positives)) in summary.folds.iter().enumerate() {
        let rate = if *rows > 0 {
            *positives as f64 / *rows as f64
        } else {
            0.0
        };
        info!(
            "Fold {}: {} rows, {} positive ({:.4}%)",
            fold,
            rows,
            positives,
            rate * 100.0
        );
    }
    info!("Wrote {}", output.display());
    Ok(summary)
}
