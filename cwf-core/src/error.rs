/// Error types for the CWF core library
use thiserror::Error;

/// Main error type for CWF core operations
#[derive(Error, Debug)]
pub enum CwfError {
    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed ESRI ASCII grid
    #[error("Invalid ASCII grid {path}: {reason}")]
    AsciiGrid { path: String, reason: String },

    /// GDAL could not open, read or write a raster
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    /// A PROJ transform could not be built
    #[error("Failed to create projection: {0}")]
    ProjCreate(#[from] proj::ProjCreateError),

    /// A point could not be transformed
    #[error("Projection failed: {0}")]
    Projection(#[from] proj::ProjError),

    /// GeoTIFF is missing or has unusable georeferencing
    #[error("Invalid georeferencing: {0}")]
    Georeference(String),

    /// Shapefile could not be read
    #[error("Failed to read shapefile: {0}")]
    Shapefile(#[from] shapefile::Error),

    /// Zip archive could not be read
    #[error("Failed to read archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Failed to (de)serialize JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Two sources do not share a grid or projection
    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    /// A required input is not present in the data directory
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// The region boundary could not be found in the boundary layer
    #[error("Region not found: {0}")]
    RegionNotFound(String),

    /// Invalid data format
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    /// HTTP request failed
    #[cfg(feature = "api")]
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[cfg(feature = "api")]
    #[error("Unexpected HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Type alias for Results using CwfError
pub type Result<T> = std::result::Result<T, CwfError>;
