//! Command implementations for the CWF CLI.
//!
//! Each subcommand runs one pipeline stage against the data directory;
//! `run` chains every stage after the downloads.

use clap::{Args, Subcommand};
use log::info;
use std::path::PathBuf;

pub mod config;
pub mod dataset;
pub mod fetch;
pub mod normalize;

use config::PipelineConfig;
use fetch::FetchSource;
use normalize::NormalizeSource;

/// Options accepted by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// JSON file overriding the default pipeline settings
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory (overrides `data_dir` from the config)
    #[arg(short = 'd', long, global = true)]
    pub data_dir: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn load_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = PipelineConfig::load(self.config.as_deref())?;
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Download raw inputs for one source into data/raw
    Fetch {
        #[arg(value_enum)]
        source: FetchSource,
    },

    /// Regrid one raw source onto the target grid
    Normalize {
        #[arg(value_enum)]
        source: NormalizeSource,
    },

    /// Rasterize MTBS fire perimeters into monthly labels
    Labels,

    /// Join predictors (month M-1) and labels (month M) into combined.parquet
    Combine {
        /// Keep rows with missing predictors as nulls instead of dropping them
        #[arg(long)]
        keep_nodata: bool,
    },

    /// Hold out the validation years and assign cross-validation folds
    Split,

    /// Score a predictions CSV (cell_id,year,month,label,score[,fold])
    Evaluate {
        /// Path to the predictions CSV
        #[arg(short = 'p', long)]
        predictions: PathBuf,

        /// Score at or above which a row is called positive
        #[arg(short = 't', long, default_value_t = 0.5)]
        threshold: f64,

        /// Also write the mean score per cell as a raster
        #[arg(long)]
        map: bool,
    },

    /// Run every stage after fetch: normalize, labels, combine, split
    Run {
        /// Keep rows with missing predictors as nulls instead of dropping them
        #[arg(long)]
        keep_nodata: bool,
    },
}

pub async fn run(args: GlobalArgs, command: Command) -> anyhow::Result<()> {
    let config = args.load_config()?;
    match command {
        Command::Fetch { source } => fetch::run_fetch(&config, source).await,
        Command::Normalize { source } => normalize::run_normalize(&config, source),
        Command::Labels => dataset::run_labels(&config),
        Command::Combine { keep_nodata } => dataset::run_combine(&config, keep_nodata),
        Command::Split => dataset::run_split(&config),
        Command::Evaluate {
            predictions,
            threshold,
            map,
        } => dataset::run_evaluate(&config, &predictions, threshold, map),
        Command::Run { keep_nodata } => {
            // prism first: it writes the target grid the others align to
            for source in [
                NormalizeSource::Prism,
                NormalizeSource::Dem,
                NormalizeSource::Nlcd,
                NormalizeSource::Ndvi,
            ] {
                info!("== normalize {:?} ==", source);
                normalize::run_normalize(&config, source)?;
            }
            info!("== labels ==");
            dataset::run_labels(&config)?;
            info!("== combine ==");
            dataset::run_combine(&config, keep_nodata)?;
            info!("== split ==");
            dataset::run_split(&config)
        }
    }
}
