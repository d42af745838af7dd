//! Downloads raw source files into `raw/<source>/`.
//!
//! Files already on disk are skipped, so an interrupted fetch can simply
//! be run again.

use anyhow::Context;
use clap::ValueEnum;
use cwf_core::archive;
use cwf_core::fetch::{
    dem_tile_url, file_name_from_url, nlcd_url, parse_download_list, prism_url, severity_url,
    tiger_url, Downloader, MTBS_URL,
};
use cwf_core::grid::BoundingBox;
use cwf_core::layout::{ClimateVariable, DataLayout};
use cwf_core::month::MonthRange;
use cwf_utils::names::dem_tile_name;
use log::{info, warn};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::PipelineConfig;

/// Pause between PRISM requests; the service throttles bursts.
const PRISM_REQUEST_DELAY: Duration = Duration::from_millis(100);

/// Environment variable holding the NASA Earthdata bearer token.
pub const EARTHDATA_TOKEN_VAR: &str = "EARTHDATA_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FetchSource {
    /// PRISM monthly climate grids
    Prism,
    /// USGS 3DEP 1 arc-second DEM tiles over the region
    Dem,
    /// MOD13A3 NDVI from an AppEEARS download list
    Ndvi,
    /// Annual NLCD landcover
    Nlcd,
    /// MTBS burned-area perimeters
    Mtbs,
    /// Yearly MTBS burn-severity mosaics of California
    Severity,
    /// Census TIGER/Line boundary layer
    Boundary,
}

/// 3DEP tiles intersecting `bbox`. A tile is named by its north-west
/// corner and spans one degree south and east of it.
pub fn dem_tiles_for(bbox: &BoundingBox) -> Vec<String> {
    let south = bbox.min_y.floor() as i32;
    let north = bbox.max_y.ceil() as i32;
    let west = bbox.min_x.floor() as i32;
    let east = bbox.max_x.ceil() as i32;
    let mut tiles = Vec::new();
    for top in (south + 1)..=north.max(south + 1) {
        for left in west..east.max(west + 1) {
            tiles.push(dem_tile_name(top, left));
        }
    }
    tiles
}

pub async fn run_fetch(config: &PipelineConfig, source: FetchSource) -> anyhow::Result<()> {
    let layout = config.layout();
    let downloader = Downloader::new()?;
    match source {
        FetchSource::Prism => fetch_prism(&downloader, &layout, config.period()).await,
        FetchSource::Dem => {
            let boundary = config.boundary()?;
            fetch_dem(&downloader, &layout, &boundary.bbox()?).await
        }
        FetchSource::Ndvi => {
            let token = std::env::var(EARTHDATA_TOKEN_VAR).with_context(|| {
                format!("{} must hold an Earthdata bearer token", EARTHDATA_TOKEN_VAR)
            })?;
            fetch_ndvi(&downloader.with_bearer(token), &layout).await
        }
        FetchSource::Nlcd => fetch_nlcd(&downloader, &layout, config.years()).await,
        FetchSource::Mtbs => fetch_mtbs(&downloader, &layout).await,
        FetchSource::Severity => fetch_severity(&downloader, &layout, config.years()).await,
        FetchSource::Boundary => {
            fetch_boundary(&downloader, &layout, config.region.layer.name(), config.tiger_year).await
        }
    }
}

async fn fetch_prism(
    downloader: &Downloader,
    layout: &DataLayout,
    period: MonthRange,
) -> anyhow::Result<()> {
    let (mut fetched, mut present) = (0, 0);
    for variable in ClimateVariable::ALL {
        let dir = layout.raw_prism_dir(variable);
        for month in period {
            let grid = layout.raw_prism(variable, month);
            if grid.exists() {
                present += 1;
                continue;
            }
            let zip = dir.join(format!("prism_{}_{}.zip", variable, month.stamp()));
            downloader.download(&prism_url(variable, month), &zip).await?;
            let extracted = archive::extract(&zip, &dir, |name| name.ends_with(".asc"))?;
            fs::remove_file(&zip)?;
            if !grid.exists() {
                anyhow::bail!(
                    "PRISM archive for {} {} held {:?}, not {}",
                    variable,
                    month,
                    extracted,
                    grid.display()
                );
            }
            fetched += 1;
            tokio::time::sleep(PRISM_REQUEST_DELAY).await;
        }
        info!("PRISM {}: done", variable);
    }
    info!("PRISM: {} grids fetched, {} already present", fetched, present);
    Ok(())
}

async fn fetch_dem(downloader: &Downloader, layout: &DataLayout, bbox: &BoundingBox) -> anyhow::Result<()> {
    let tiles = dem_tiles_for(bbox);
    info!("DEM: {} tiles cover the region", tiles.len());
    let mut missing = Vec::new();
    for tile in &tiles {
        let dest = layout.raw_dem_tile(tile);
        if dest.exists() {
            continue;
        }
        if downloader
            .download_if_exists(&dem_tile_url(tile), &dest)
            .await?
            .is_none()
        {
            warn!("DEM tile {} does not exist (open water?)", tile);
            missing.push(tile.clone());
        }
    }
    if missing.len() == tiles.len() {
        anyhow::bail!("none of the {} DEM tiles exist", tiles.len());
    }
    Ok(())
}

async fn fetch_ndvi(downloader: &Downloader, layout: &DataLayout) -> anyhow::Result<()> {
    let list = layout.ndvi_download_list();
    let text = fs::read_to_string(&list).with_context(|| {
        format!(
            "reading {} (save the AppEEARS bundle's download list there)",
            list.display()
        )
    })?;
    let urls = parse_download_list(&text);
    let dir = layout.raw_dir("ndvi");
    let mut fetched = 0;
    for url in &urls {
        let Some(name) = file_name_from_url(url) else {
            warn!("Skipping {}: no file name", url);
            continue;
        };
        if !name.ends_with(".tif") {
            continue;
        }
        let dest = dir.join(name);
        if dest.exists() {
            continue;
        }
        downloader.download(url, &dest).await?;
        fetched += 1;
    }
    info!("NDVI: {} of {} listed files fetched", fetched, urls.len());
    Ok(())
}

async fn fetch_nlcd(
    downloader: &Downloader,
    layout: &DataLayout,
    years: impl IntoIterator<Item = i32>,
) -> anyhow::Result<()> {
    let dir = layout.raw_dir("nlcd");
    for year in years {
        let raster = layout.raw_nlcd(year);
        if raster.exists() {
            continue;
        }
        let url = nlcd_url(year);
        let zip = dir.join(file_name_from_url(&url).unwrap_or("nlcd.zip"));
        downloader.download(&url, &zip).await?;
        let name = raster
            .file_name()
            .and_then(|n| n.to_str())
            .context("NLCD path has no file name")?;
        archive::extract_one(&zip, &dir, name)?;
        fs::remove_file(&zip)?;
    }
    Ok(())
}

async fn fetch_severity(
    downloader: &Downloader,
    layout: &DataLayout,
    years: impl IntoIterator<Item = i32>,
) -> anyhow::Result<()> {
    let dir = layout.raw_dir("severity");
    let mut unpublished = Vec::new();
    for year in years {
        let mosaic = layout.raw_severity(year);
        if mosaic.exists() {
            continue;
        }
        let url = severity_url(year);
        let zip = dir.join(file_name_from_url(&url).unwrap_or("mosaic.zip"));
        if downloader.download_if_exists(&url, &zip).await?.is_none() {
            unpublished.push(year);
            continue;
        }
        let extracted = archive::extract(&zip, &dir, |name| name.ends_with(".tif"))?;
        fs::remove_file(&zip)?;
        if !mosaic.exists() {
            anyhow::bail!("{} held {:?}, not {}", url, extracted, mosaic.display());
        }
    }
    if !unpublished.is_empty() {
        warn!("MTBS has not published severity mosaics for {:?}", unpublished);
    }
    Ok(())
}

async fn fetch_shapefile(downloader: &Downloader, url: &str, dir: &Path, shp: &Path) -> anyhow::Result<()> {
    if shp.exists() {
        info!("{} already present", shp.display());
        return Ok(());
    }
    let zip = dir.join(file_name_from_url(url).unwrap_or("bundle.zip"));
    downloader.download(url, &zip).await?;
    let parts = archive::extract(&zip, dir, archive::is_shapefile_part)?;
    fs::remove_file(&zip)?;
    if !shp.exists() {
        anyhow::bail!("{} held {:?}, not {}", url, parts, shp.display());
    }
    Ok(())
}

async fn fetch_mtbs(downloader: &Downloader, layout: &DataLayout) -> anyhow::Result<()> {
    fetch_shapefile(downloader, MTBS_URL, &layout.raw_dir("mtbs"), &layout.raw_mtbs()).await
}

async fn fetch_boundary(
    downloader: &Downloader,
    layout: &DataLayout,
    layer: &str,
    year: i32,
) -> anyhow::Result<()> {
    fetch_shapefile(
        downloader,
        &tiger_url(layer, year),
        &layout.raw_dir("boundary"),
        &layout.raw_boundary(layer, year),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dem_tiles_for_san_diego() {
        let bbox = BoundingBox {
            min_x: -117.6,
            min_y: 32.53,
            max_x: -116.08,
            max_y: 33.51,
        };
        assert_eq!(
            dem_tiles_for(&bbox),
            vec!["n33w118", "n33w117", "n34w118", "n34w117"]
        );
    }

    #[test]
    fn test_dem_tiles_for_exact_degree() {
        let bbox = BoundingBox {
            min_x: -117.0,
            min_y: 32.0,
            max_x: -116.0,
            max_y: 33.0,
        };
        assert_eq!(dem_tiles_for(&bbox), vec!["n33w117"]);
    }
}
