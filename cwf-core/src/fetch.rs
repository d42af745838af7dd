//! HTTP download client and the remote locations of every source.

use log::{debug, info};
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{CwfError, Result};
use crate::layout::ClimateVariable;
use crate::month::YearMonth;

pub const PRISM_BASE_URL: &str = "https://services.nacse.org/prism/data/get/us/800m";
pub const DEM_BASE_URL: &str =
    "https://prd-tnm.s3.amazonaws.com/StagedProducts/Elevation/1/TIFF/current";
pub const NLCD_BASE_URL: &str =
    "https://www.mrlc.gov/downloads/sciweb1/shared/mrlc/data-bundles";
pub const MTBS_URL: &str = "https://edcintl.cr.usgs.gov/downloads/sciweb1/shared/MTBS_Fire/data/composite_data/burned_area_extent_shapefile/mtbs_perimeter_data.zip";
pub const SEVERITY_BASE_URL: &str = "https://edcintl.cr.usgs.gov/downloads/sciweb1/shared/MTBS_Fire/data/composite_data/MTBS_BSmosaics";
pub const TIGER_BASE_URL: &str = "https://www2.census.gov/geo/tiger";

/// Monthly 30″ grid for one variable, served as a zipped ASCII grid.
pub fn prism_url(variable: ClimateVariable, month: YearMonth) -> String {
    format!(
        "{}/{}/{}?format=asc",
        PRISM_BASE_URL,
        variable.name(),
        month.stamp()
    )
}

pub fn dem_tile_url(tile: &str) -> String {
    format!("{}/{}/USGS_1_{}.tif", DEM_BASE_URL, tile, tile)
}

pub fn nlcd_url(year: i32) -> String {
    format!(
        "{}/Annual_NLCD_LndCov_{}_CU_C1V1.zip",
        NLCD_BASE_URL, year
    )
}

/// Zipped MTBS burn-severity mosaic of California for one year.
pub fn severity_url(year: i32) -> String {
    format!("{}/{}/mtbs_CA_{}.zip", SEVERITY_BASE_URL, year, year)
}

/// TIGER/Line layer bundle, e.g. `COUNTY/tl_2025_us_county.zip`.
pub fn tiger_url(layer: &str, year: i32) -> String {
    format!(
        "{}/TIGER{}/{}/tl_{}_us_{}.zip",
        TIGER_BASE_URL,
        year,
        layer.to_ascii_uppercase(),
        year,
        layer.to_ascii_lowercase()
    )
}

/// URLs of an AppEEARS bundle listing: one per line, blank lines and
/// `#` comments skipped.
pub fn parse_download_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Last path segment of a URL, without any query string.
pub fn file_name_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

/// Sequential downloader that streams response bodies to disk.
pub struct Downloader {
    client: Client,
    bearer: Option<String>,
}

impl Downloader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(60))
            .user_agent(concat!("cwf/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Downloader {
            client,
            bearer: None,
        })
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Downloads `url` to `dest`. Fails on any non-success status or an
    /// empty body. Returns the number of bytes written.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        match self.fetch(url, dest).await? {
            Some(bytes) => Ok(bytes),
            None => Err(CwfError::HttpStatus {
                status: StatusCode::NOT_FOUND.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    /// Like [`Downloader::download`] but a 404 yields `Ok(None)`; used for
    /// sources where a missing file means "no coverage" (ocean DEM tiles).
    pub async fn download_if_exists(&self, url: &str, dest: &Path) -> Result<Option<u64>> {
        self.fetch(url, dest).await
    }

    async fn fetch(&self, url: &str, dest: &Path) -> Result<Option<u64>> {
        debug!("GET {}", url);
        let mut request = self.client.get(url);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }
        let mut response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(CwfError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let partial = dest.with_extension("part");
        let mut file = fs::File::create(&partial).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        if written == 0 {
            fs::remove_file(&partial).await?;
            return Err(CwfError::InvalidFormat(format!("empty response from {}", url)));
        }
        fs::rename(&partial, dest).await?;
        info!("Downloaded {} ({} bytes)", dest.display(), written);
        Ok(Some(written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_urls() {
        let month = YearMonth::new(2003, 3).unwrap();
        assert_eq!(
            prism_url(ClimateVariable::Vpdmax, month),
            "https://services.nacse.org/prism/data/get/us/800m/vpdmax/200303?format=asc"
        );
        assert_eq!(
            dem_tile_url("n33w117"),
            "https://prd-tnm.s3.amazonaws.com/StagedProducts/Elevation/1/TIFF/current/n33w117/USGS_1_n33w117.tif"
        );
        assert_eq!(
            nlcd_url(2001),
            "https://www.mrlc.gov/downloads/sciweb1/shared/mrlc/data-bundles/Annual_NLCD_LndCov_2001_CU_C1V1.zip"
        );
        assert_eq!(
            severity_url(2007),
            "https://edcintl.cr.usgs.gov/downloads/sciweb1/shared/MTBS_Fire/data/composite_data/MTBS_BSmosaics/2007/mtbs_CA_2007.zip"
        );
        assert_eq!(
            tiger_url("county", 2025),
            "https://www2.census.gov/geo/tiger/TIGER2025/COUNTY/tl_2025_us_county.zip"
        );
    }

    #[test]
    fn test_download_list_and_file_names() {
        let list = "# AppEEARS bundle\nhttps://host/a/NDVI_doy2003060000000_aid0001.tif\n\n  https://host/b/x.tif?token=1  \n";
        let urls = parse_download_list(list);
        assert_eq!(urls.len(), 2);
        assert_eq!(
            file_name_from_url(&urls[0]),
            Some("NDVI_doy2003060000000_aid0001.tif")
        );
        assert_eq!(file_name_from_url(&urls[1]), Some("x.tif"));
        assert_eq!(file_name_from_url("https://host/dir/"), None);
    }
}
