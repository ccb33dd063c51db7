//! Water-year calendar: months, seasons and period enumeration.
//!
//! A water year runs October through September and is labeled by the
//! calendar year of its final month, so October–December of calendar year
//! `Y` belong to water year `Y + 1`.

use crate::error::{Error, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Month {
    Jan,
    Feb,
    Mar,
    Apr,
    May,
    Jun,
    Jul,
    Aug,
    Sep,
    Oct,
    Nov,
    Dec,
}

impl Month {
    pub const ALL: [Month; 12] = [
        Month::Jan,
        Month::Feb,
        Month::Mar,
        Month::Apr,
        Month::May,
        Month::Jun,
        Month::Jul,
        Month::Aug,
        Month::Sep,
        Month::Oct,
        Month::Nov,
        Month::Dec,
    ];

    /// Months in water-year order, October first
    pub const WATER_YEAR_ORDER: [Month; 12] = [
        Month::Oct,
        Month::Nov,
        Month::Dec,
        Month::Jan,
        Month::Feb,
        Month::Mar,
        Month::Apr,
        Month::May,
        Month::Jun,
        Month::Jul,
        Month::Aug,
        Month::Sep,
    ];

    /// Month from its number, 1 = January
    pub fn from_number(n: u32) -> Option<Month> {
        Month::ALL.get((n as usize).checked_sub(1)?).copied()
    }

    /// 1 = January
    pub fn number(self) -> u32 {
        self as u32 + 1
    }

    /// Lowercase three-letter abbreviation used in layer file names
    pub fn abbrev(self) -> &'static str {
        match self {
            Month::Jan => "jan",
            Month::Feb => "feb",
            Month::Mar => "mar",
            Month::Apr => "apr",
            Month::May => "may",
            Month::Jun => "jun",
            Month::Jul => "jul",
            Month::Aug => "aug",
            Month::Sep => "sep",
            Month::Oct => "oct",
            Month::Nov => "nov",
            Month::Dec => "dec",
        }
    }

    /// Whether this month opens a water year (October–December)
    pub fn starts_water_year(self) -> bool {
        matches!(self, Month::Oct | Month::Nov | Month::Dec)
    }

    /// Calendar year in which this month falls for the given water year
    pub fn calendar_year(self, water_year: i32) -> i32 {
        if self.starts_water_year() {
            water_year - 1
        } else {
            water_year
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbrev())
    }
}

impl FromStr for Month {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        if let Ok(n) = lower.parse::<u32>() {
            return Month::from_number(n)
                .ok_or_else(|| Error::configuration("month", format!("no month number {n}")));
        }
        lower
            .parse::<chrono::Month>()
            .ok()
            .and_then(|m| Month::from_number(m.number_from_month()))
            .ok_or_else(|| Error::configuration("month", format!("unknown month '{s}'")))
    }
}

impl TryFrom<String> for Month {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Month> for String {
    fn from(m: Month) -> String {
        m.abbrev().to_string()
    }
}

/// Water year of a calendar date
pub fn water_year_of(date: NaiveDate) -> i32 {
    let month = Month::from_number(date.month()).unwrap_or(Month::Jan);
    if month.starts_water_year() {
        date.year() + 1
    } else {
        date.year()
    }
}

/// Quarter of the water year summarized by a seasonal composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    /// December, January, February
    Winter,
    /// June, July, August
    Summer,
}

impl Season {
    pub const ALL: [Season; 2] = [Season::Winter, Season::Summer];

    pub fn name(self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Summer => "summer",
        }
    }

    pub fn months(self) -> [Month; 3] {
        match self {
            Season::Winter => [Month::Dec, Month::Jan, Month::Feb],
            Season::Summer => [Month::Jun, Month::Jul, Month::Aug],
        }
    }

    /// (calendar year, month) of the constituent months for a water year
    pub fn constituents(self, water_year: i32) -> [(i32, Month); 3] {
        self.months().map(|m| (m.calendar_year(water_year), m))
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Season {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "winter" => Ok(Season::Winter),
            "summer" => Ok(Season::Summer),
            _ => Err(Error::configuration(
                "season",
                format!("unsupported season '{s}' (expected winter or summer)"),
            )),
        }
    }
}

/// Cell-wise reduction used to build a composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Mean,
    Sum,
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Method::Mean => "mean",
            Method::Sum => "sum",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Method::Mean),
            "sum" => Ok(Method::Sum),
            _ => Err(Error::configuration(
                "method",
                format!("unsupported method '{s}' (expected mean or sum)"),
            )),
        }
    }
}

/// One month of the water-year calendar
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub water_year: i32,
    pub calendar_year: i32,
    pub month: Month,
}

impl Period {
    pub fn new(water_year: i32, month: Month) -> Self {
        Self {
            water_year,
            calendar_year: month.calendar_year(water_year),
            month,
        }
    }

    pub fn of_date(date: NaiveDate) -> Self {
        let month = Month::from_number(date.month()).unwrap_or(Month::Jan);
        Self::new(water_year_of(date), month)
    }

    pub fn month_name(&self) -> &'static str {
        self.month.abbrev()
    }

    pub fn month_number(&self) -> u32 {
        self.month.number()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02} (WY{})", self.calendar_year, self.month.number(), self.water_year)
    }
}

/// Inclusive range of water years
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterYearRange {
    pub start: i32,
    pub end: i32,
}

impl WaterYearRange {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.start..=self.end
    }

    pub fn contains(&self, water_year: i32) -> bool {
        (self.start..=self.end).contains(&water_year)
    }

    /// Whether a date falls inside the range under the water-year rule
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.contains(water_year_of(date))
    }
}

impl fmt::Display for WaterYearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WY{}..=WY{}", self.start, self.end)
    }
}

/// Water years the environmental data covers
pub const DEFAULT_MIN_WATER_YEAR: i32 = 2000;
pub const DEFAULT_MAX_WATER_YEAR: i32 = 2022;

/// Enumerates the monthly periods of a water-year range, validated against
/// the years the environmental data covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalIndexer {
    bounds: WaterYearRange,
}

impl Default for TemporalIndexer {
    fn default() -> Self {
        Self {
            bounds: WaterYearRange::new(DEFAULT_MIN_WATER_YEAR, DEFAULT_MAX_WATER_YEAR),
        }
    }
}

impl TemporalIndexer {
    pub fn new(bounds: WaterYearRange) -> Result<Self> {
        if bounds.start > bounds.end {
            return Err(Error::configuration(
                "years",
                format!("supported bounds {bounds} are inverted"),
            ));
        }
        Ok(Self { bounds })
    }

    pub fn bounds(&self) -> WaterYearRange {
        self.bounds
    }

    /// Validate a requested range against the supported bounds.
    pub fn validate(&self, range: WaterYearRange) -> Result<WaterYearRange> {
        if range.start > range.end
            || !self.bounds.contains(range.start)
            || !self.bounds.contains(range.end)
        {
            return Err(Error::YearRange {
                start: range.start,
                end: range.end,
                min: self.bounds.start,
                max: self.bounds.end,
            });
        }
        Ok(range)
    }

    /// Every month of `range`, water-year first, October first within a year.
    pub fn periods(&self, range: WaterYearRange) -> Result<Vec<Period>> {
        let range = self.validate(range)?;
        Ok(range
            .years()
            .flat_map(|wy| Month::WATER_YEAR_ORDER.map(|m| Period::new(wy, m)))
            .collect())
    }
}
