//! Calendar months, the time step shared by every source.

use chrono::{Datelike, NaiveDate};
use cwf_utils::dates::{format_year_month, parse_year_month};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem::replace;
use std::str::FromStr;

use crate::error::CwfError;

/// A calendar month. Orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<YearMonth> {
        if (1..=12).contains(&month) {
            Some(YearMonth { year, month })
        } else {
            None
        }
    }

    pub fn from_date(date: &NaiveDate) -> YearMonth {
        YearMonth {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The month before this one.
    pub fn pred(self) -> YearMonth {
        if self.month == 1 {
            YearMonth {
                year: self.year - 1,
                month: 12,
            }
        } else {
            YearMonth {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// The month after this one.
    pub fn succ(self) -> YearMonth {
        if self.month == 12 {
            YearMonth {
                year: self.year + 1,
                month: 1,
            }
        } else {
            YearMonth {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Months elapsed since January of year 0; handy for distances.
    pub fn ordinal(self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    pub fn contains(self, date: &NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// "YYYYMM"
    pub fn stamp(self) -> String {
        format_year_month(self.year, self.month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = CwfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = parse_year_month(s)
            .map_err(|e| CwfError::InvalidFormat(format!("year-month: {}", e)))?;
        Ok(YearMonth { year, month })
    }
}

/// An inclusive range of months that yields each month from the start
/// through the end.
#[derive(Clone, Eq, PartialEq, Copy, Debug)]
pub struct MonthRange(pub YearMonth, pub YearMonth);

impl MonthRange {
    /// January of `start_year` through December of `end_year`.
    pub fn years(start_year: i32, end_year: i32) -> MonthRange {
        MonthRange(
            YearMonth {
                year: start_year,
                month: 1,
            },
            YearMonth {
                year: end_year,
                month: 12,
            },
        )
    }

    pub fn contains(&self, month: YearMonth) -> bool {
        self.0 <= month && month <= self.1
    }

    pub fn contains_date(&self, date: &NaiveDate) -> bool {
        self.contains(YearMonth::from_date(date))
    }
}

impl Iterator for MonthRange {
    type Item = YearMonth;
    fn next(&mut self) -> Option<Self::Item> {
        if self.0 <= self.1 {
            let next = self.0.succ();
            Some(replace(&mut self.0, next))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MonthRange, YearMonth};
    use chrono::NaiveDate;

    fn ym(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }

    #[test]
    fn test_pred_succ_wrap_years() {
        assert_eq!(ym(2003, 1).pred(), ym(2002, 12));
        assert_eq!(ym(2002, 12).succ(), ym(2003, 1));
        assert_eq!(ym(2003, 3).pred(), ym(2003, 2));
        assert_eq!(ym(2003, 3).pred().succ(), ym(2003, 3));
    }

    #[test]
    fn test_ordering_and_ordinal() {
        assert!(ym(2002, 12) < ym(2003, 1));
        assert_eq!(ym(2003, 1).ordinal() - ym(2002, 12).ordinal(), 1);
        assert!(YearMonth::new(2003, 13).is_none());
    }

    #[test]
    fn test_month_range_iteration() {
        let months: Vec<YearMonth> = MonthRange(ym(2002, 11), ym(2003, 2)).collect();
        assert_eq!(months, vec![ym(2002, 11), ym(2002, 12), ym(2003, 1), ym(2003, 2)]);
        assert_eq!(MonthRange::years(2000, 2024).count(), 25 * 12);
    }

    #[test]
    fn test_month_range_empty() {
        assert_eq!(MonthRange(ym(2003, 2), ym(2003, 1)).count(), 0);
    }

    #[test]
    fn test_stamp_and_parse() {
        assert_eq!(ym(2003, 3).stamp(), "200303");
        assert_eq!("200303".parse::<YearMonth>().unwrap(), ym(2003, 3));
        assert!("2003".parse::<YearMonth>().is_err());
        let date = NaiveDate::from_ymd_opt(2003, 3, 17).unwrap();
        assert!(ym(2003, 3).contains(&date));
        assert!(!ym(2003, 4).contains(&date));
    }
}
