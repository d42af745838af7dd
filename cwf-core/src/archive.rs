//! Zip extraction for downloaded bundles.

use log::debug;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::error::{CwfError, Result};

/// Extracts the members of `archive` whose file name passes `keep` into
/// `dest`, flattening any directories inside the archive. Returns the
/// written paths.
pub fn extract<F>(archive: &Path, dest: &Path, keep: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&str) -> bool,
{
    let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;
    fs::create_dir_all(dest)?;
    let mut written = Vec::new();
    for i in 0..zip.len() {
        let mut member = zip.by_index(i)?;
        if member.is_dir() {
            continue;
        }
        // enclosed_name rejects absolute paths and `..` components
        let Some(name) = member
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_owned()))
        else {
            continue;
        };
        let Some(file_name) = name.to_str() else {
            continue;
        };
        if !keep(file_name) {
            continue;
        }
        let target = dest.join(file_name);
        debug!("Extracting {} -> {}", member.name(), target.display());
        let mut out = BufWriter::new(File::create(&target)?);
        io::copy(&mut member, &mut out)?;
        out.flush()?;
        written.push(target);
    }
    Ok(written)
}

/// Extracts exactly the member named `file_name`, failing if the archive
/// has none.
pub fn extract_one(archive: &Path, dest: &Path, file_name: &str) -> Result<PathBuf> {
    extract(archive, dest, |name| name == file_name)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            CwfError::MissingInput(format!("{} has no member {}", archive.display(), file_name))
        })
}

/// Shapefile sidecars worth keeping from a vector bundle.
pub fn is_shapefile_part(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    [".shp", ".shx", ".dbf", ".prj", ".cpg"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}
