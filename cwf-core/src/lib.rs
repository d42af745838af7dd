pub mod archive;
pub mod ascii_grid;
pub mod boundary;
pub mod error;
#[cfg(feature = "api")]
pub mod fetch;
pub mod geotiff;
pub mod grid;
pub mod layout;
pub mod month;
pub mod perimeter;
pub mod projection;
pub mod vector;
