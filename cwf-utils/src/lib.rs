//! Shared utility functions for CWF crates.

/// Date utility functions
pub mod dates {
    use chrono::NaiveDate;

    /// Format a year and month as "YYYYMM"
    pub fn format_year_month(year: i32, month: u32) -> String {
        format!("{:04}{:02}", year, month)
    }

    /// Parse a "YYYYMM" string into (year, month)
    pub fn parse_year_month(s: &str) -> anyhow::Result<(i32, u32)> {
        let s = s.trim();
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            anyhow::bail!("expected YYYYMM, got '{}'", s);
        }
        let year: i32 = s[0..4].parse()?;
        let month: u32 = s[4..6].parse()?;
        if !(1..=12).contains(&month) {
            anyhow::bail!("month out of range in '{}'", s);
        }
        Ok((year, month))
    }

    /// Parse a date string in "YYYY-MM-DD" or basic "YYYYMMDD" format
    pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
        let s = s.trim();
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
            .map_err(|e| anyhow::anyhow!("invalid date '{}': {}", s, e))
    }

    /// Calendar date of a 1-based day of year.
    pub fn date_from_day_of_year(year: i32, day_of_year: u32) -> anyhow::Result<NaiveDate> {
        NaiveDate::from_yo_opt(year, day_of_year)
            .ok_or_else(|| anyhow::anyhow!("invalid day of year {} for {}", day_of_year, year))
    }

    /// Extract the acquisition date from a MODIS/AppEEARS file name.
    ///
    /// AppEEARS names carry a `doyYYYYDDD...` token, e.g.
    /// `MOD13A3.061__1_km_monthly_NDVI_doy2000032000000_aid0001.tif` is
    /// day 32 of 2000, i.e. 2000-02-01.
    pub fn parse_modis_doy(file_name: &str) -> anyhow::Result<NaiveDate> {
        let token = file_name
            .split(|c: char| c == '_' || c == '.')
            .find(|part| part.starts_with("doy") && part.len() >= 10)
            .ok_or_else(|| anyhow::anyhow!("no doy token in '{}'", file_name))?;
        let digits = &token[3..10];
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            anyhow::bail!("malformed doy token in '{}'", file_name);
        }
        let year: i32 = digits[0..4].parse()?;
        let day: u32 = digits[4..7].parse()?;
        date_from_day_of_year(year, day)
    }

}

/// File-name helpers
pub mod names {
    /// Pull a "YYYYMM" stamp out of a name shaped `{prefix}YYYYMM{suffix}`.
    pub fn year_month_stamp<'a>(name: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
        let stamp = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
        if stamp.len() == 6 && stamp.bytes().all(|b| b.is_ascii_digit()) {
            Some(stamp)
        } else {
            None
        }
    }

    /// Name of a USGS 3DEP 1 arc-second tile by its north-west corner,
    /// e.g. `n33w117` covers latitudes 32..33 and longitudes -117..-116.
    pub fn dem_tile_name(north: i32, west: i32) -> String {
        let ns = if north >= 0 { 'n' } else { 's' };
        let ew = if west < 0 { 'w' } else { 'e' };
        format!("{}{:02}{}{:03}", ns, north.abs(), ew, west.abs())
    }

    /// Parse a 3DEP tile token (`n33w117`) back into (north, west) degrees.
    pub fn parse_dem_tile_name(token: &str) -> Option<(i32, i32)> {
        let bytes = token.as_bytes();
        if bytes.len() != 7 {
            return None;
        }
        let lat: i32 = token[1..3].parse().ok()?;
        let lon: i32 = token[4..7].parse().ok()?;
        let north = match bytes[0] {
            b'n' => lat,
            b's' => -lat,
            _ => return None,
        };
        let west = match bytes[3] {
            b'w' => -lon,
            b'e' => lon,
            _ => return None,
        };
        Some((north, west))
    }

}
