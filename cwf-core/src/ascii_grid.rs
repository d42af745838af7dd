//! ESRI ASCII grid reading and writing.
//!
//! PRISM publishes its monthly grids in this format and the pipeline
//! keeps every normalized raster in it as well, gzipped when the path
//! ends in `.gz`. Reads are streaming: a window read only keeps the
//! rows that fall inside the requested grid.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{CwfError, Result};
use crate::grid::{GridSpec, Raster, NODATA};

/// Parsed header of an ASCII grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AsciiHeader {
    pub spec: GridSpec,
    pub nodata: Option<f64>,
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|ext| ext == "gz").unwrap_or(false)
}

fn open(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn invalid(path: &Path, reason: impl Into<String>) -> CwfError {
    CwfError::AsciiGrid {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Reads the header and returns it with the first data line, which the
/// header parser has to consume to know the header is over.
fn parse_header(path: &Path, reader: &mut dyn BufRead) -> Result<(AsciiHeader, String)> {
    let mut ncols = None;
    let mut nrows = None;
    let mut x = None;
    let mut y = None;
    let mut centred = false;
    let mut cellsize = None;
    let mut nodata = None;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(invalid(path, "no data rows"));
        }
        let mut parts = line.split_whitespace();
        let Some(key) = parts.next() else {
            continue;
        };
        if !key.starts_with(|c: char| c.is_ascii_alphabetic()) {
            break;
        }
        let value = parts
            .next()
            .ok_or_else(|| invalid(path, format!("header key {} has no value", key)))?;
        let number: f64 = value
            .parse()
            .map_err(|_| invalid(path, format!("bad header value {} for {}", value, key)))?;
        match key.to_ascii_lowercase().as_str() {
            "ncols" => ncols = Some(number as usize),
            "nrows" => nrows = Some(number as usize),
            "xllcorner" => x = Some(number),
            "yllcorner" => y = Some(number),
            "xllcenter" => {
                x = Some(number);
                centred = true;
            }
            "yllcenter" => {
                y = Some(number);
                centred = true;
            }
            "cellsize" => cellsize = Some(number),
            "nodata_value" => nodata = Some(number),
            other => return Err(invalid(path, format!("unknown header key {}", other))),
        }
    }

    let missing = |name: &str| invalid(path, format!("header is missing {}", name));
    let cellsize = cellsize.ok_or_else(|| missing("cellsize"))?;
    let mut west = x.ok_or_else(|| missing("xllcorner"))?;
    let mut south = y.ok_or_else(|| missing("yllcorner"))?;
    if centred {
        west -= cellsize / 2.0;
        south -= cellsize / 2.0;
    }
    let spec = GridSpec {
        ncols: ncols.ok_or_else(|| missing("ncols"))?,
        nrows: nrows.ok_or_else(|| missing("nrows"))?,
        west,
        south,
        cellsize,
    };
    Ok((AsciiHeader { spec, nodata }, line))
}

/// Reads only the header of a grid.
pub fn read_header(path: &Path) -> Result<AsciiHeader> {
    let mut reader = open(path)?;
    let (header, _) = parse_header(path, reader.as_mut())?;
    Ok(header)
}

/// Yields the grid one row at a time regardless of how values are
/// wrapped across lines.
struct RowReader<'a> {
    path: &'a Path,
    reader: Box<dyn BufRead>,
    ncols: usize,
    nodata: Option<f64>,
    pending: Vec<f32>,
    line: String,
}

impl<'a> RowReader<'a> {
    fn push_line(&mut self, text: &str) -> Result<()> {
        for token in text.split_whitespace() {
            let value: f64 = token
                .parse()
                .map_err(|_| invalid(self.path, format!("bad value {}", token)))?;
            let value = match self.nodata {
                Some(nodata) if value == nodata => NODATA,
                _ => value as f32,
            };
            self.pending.push(value);
        }
        Ok(())
    }

    fn next_row(&mut self, row: &mut Vec<f32>) -> Result<()> {
        while self.pending.len() < self.ncols {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Err(invalid(self.path, "fewer values than the header declares"));
            }
            let text = std::mem::take(&mut self.line);
            self.push_line(&text)?;
            self.line = text;
        }
        row.clear();
        row.extend(self.pending.drain(..self.ncols));
        Ok(())
    }
}

/// Reads a whole grid.
pub fn read(path: &Path) -> Result<Raster> {
    let header = read_header(path)?;
    read_window(path, &header.spec)
}

/// Reads the part of a grid that overlaps `target`. Cells of `target`
/// the file does not cover are [`NODATA`]. The file's cells must line up
/// with `target`'s; no resampling happens here.
pub fn read_window(path: &Path, target: &GridSpec) -> Result<Raster> {
    let mut reader = open(path)?;
    let (header, first_line) = parse_header(path, reader.as_mut())?;
    let source = header.spec;
    let (row_offset, col_offset) = source.offset_of(target).map_err(|_| {
        CwfError::GridMismatch(format!(
            "{} ({:?}) is not aligned with the target grid {:?}",
            path.display(),
            source,
            target
        ))
    })?;

    let mut rows = RowReader {
        path,
        reader,
        ncols: source.ncols,
        nodata: header.nodata,
        pending: Vec::with_capacity(source.ncols),
        line: String::new(),
    };
    rows.push_line(&first_line)?;

    let mut raster = Raster::nodata(*target);
    let last_row = (row_offset + target.nrows as i64).min(source.nrows as i64);
    let mut row = Vec::with_capacity(source.ncols);
    for src_row in 0..last_row.max(0) {
        rows.next_row(&mut row)?;
        let dst_row = src_row - row_offset;
        if dst_row < 0 {
            continue;
        }
        for dst_col in 0..target.ncols {
            let src_col = dst_col as i64 + col_offset;
            if src_col >= 0 && (src_col as usize) < source.ncols {
                raster.set(dst_row as usize, dst_col, row[src_col as usize]);
            }
        }
    }
    Ok(raster)
}

/// Writes a raster, gzipped when `path` ends in `.gz`. Parent
/// directories are created as needed.
pub fn write(path: &Path, raster: &Raster) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    if is_gzip(path) {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        write_to(&mut encoder, raster)?;
        encoder.finish()?.flush()?;
    } else {
        let mut writer = BufWriter::new(file);
        write_to(&mut writer, raster)?;
        writer.flush()?;
    }
    Ok(())
}

fn write_to<W: Write>(out: &mut W, raster: &Raster) -> Result<()> {
    let spec = &raster.spec;
    writeln!(out, "ncols {}", spec.ncols)?;
    writeln!(out, "nrows {}", spec.nrows)?;
    writeln!(out, "xllcorner {}", spec.west)?;
    writeln!(out, "yllcorner {}", spec.south)?;
    writeln!(out, "cellsize {}", spec.cellsize)?;
    writeln!(out, "NODATA_value {}", NODATA)?;
    for row in raster.values.chunks(spec.ncols.max(1)) {
        let mut first = true;
        for value in row {
            if !first {
                out.write_all(b" ")?;
            }
            write!(out, "{}", value)?;
            first = false;
        }
        out.write_all(b"\n")?;
    }
    Ok(())
}
