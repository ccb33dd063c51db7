//! Occurrence and background points

use crate::config::ObservationColumns;
use crate::crs::{transform_point, CRS};
use crate::error::{Error, Result};
use crate::time::{water_year_of, Month, Period, WaterYearRange};
use chrono::{Datelike, NaiveDate};
use geo_types::Point;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// One occurrence or background point
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: String,
    /// x = longitude / easting, y = latitude / northing, in `crs`
    pub location: Point<f64>,
    pub crs: CRS,
    pub date: Option<NaiveDate>,
    /// Free-form tag, e.g. `occurrence` or `background`
    pub source: Option<String>,
}

impl Observation {
    pub fn new(id: impl Into<String>, x: f64, y: f64, crs: CRS, date: Option<NaiveDate>) -> Self {
        Self {
            id: id.into(),
            location: Point::new(x, y),
            crs,
            date,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn x(&self) -> f64 {
        self.location.x()
    }

    pub fn y(&self) -> f64 {
        self.location.y()
    }

    pub fn year(&self) -> Option<i32> {
        self.date.map(|d| d.year())
    }

    pub fn month(&self) -> Option<Month> {
        self.date.and_then(|d| Month::from_number(d.month()))
    }

    pub fn water_year(&self) -> Option<i32> {
        self.date.map(water_year_of)
    }

    pub fn period(&self) -> Option<Period> {
        self.date.map(Period::of_date)
    }

    /// Location reprojected into `target`
    pub fn project_to(&self, target: &CRS) -> Result<(f64, f64)> {
        transform_point(&self.crs, target, self.x(), self.y())
            .map_err(|e| Error::geometry(&self.id, e.to_string()))
    }
}

/// Observations split by whether their date falls in a water-year range
#[derive(Debug, Clone, Default)]
pub struct RangePartition {
    pub inside: Vec<Observation>,
    /// Dated observations outside the range
    pub outside: Vec<Observation>,
    /// Observations with no date
    pub undated: Vec<Observation>,
}

/// Keep observations usable for extraction over `range`.
pub fn partition_by_range(observations: Vec<Observation>, range: WaterYearRange) -> RangePartition {
    let mut out = RangePartition::default();
    for obs in observations {
        match obs.water_year() {
            Some(wy) if range.contains(wy) => out.inside.push(obs),
            Some(_) => out.outside.push(obs),
            None => out.undated.push(obs),
        }
    }
    out
}

/// Remove exact duplicate observations, keeping the first occurrence.
///
/// Returns the kept observations and the number removed. Two rows with the
/// same id but different content are a [`Error::DuplicateKey`].
pub fn dedupe(observations: Vec<Observation>) -> Result<(Vec<Observation>, usize)> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<Observation> = Vec::with_capacity(observations.len());
    let mut removed = 0;

    for obs in observations {
        match seen.get(&obs.id) {
            Some(&idx) if kept[idx] == obs => removed += 1,
            Some(_) => {
                return Err(Error::DuplicateKey {
                    table: "observations".into(),
                    key: obs.id,
                })
            }
            None => {
                seen.insert(obs.id.clone(), kept.len());
                kept.push(obs);
            }
        }
    }
    if removed > 0 {
        debug!(removed, "dropped exact duplicate observations");
    }
    Ok((kept, removed))
}

/// Read an observation table using the configured column names.
///
/// Empty cells and the null token in the date column give an undated
/// observation; unparseable dates and coordinates are an
/// [`Error::InvalidRecord`]. The source column is optional: when the table
/// lacks it every observation has no source tag.
pub fn read_observations(path: impl AsRef<Path>, columns: &ObservationColumns) -> Result<Vec<Observation>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let required = [&columns.id, &columns.x, &columns.y, &columns.date];
    let missing: Vec<String> = required
        .iter()
        .filter(|name| !headers.iter().any(|h| h == name.as_str()))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::SchemaMismatch {
            context: path.display().to_string(),
            missing,
        });
    }
    let position = |name: &str| headers.iter().position(|h| h == name).unwrap_or(0);
    let (id_col, x_col, y_col, date_col) = (
        position(&columns.id),
        position(&columns.x),
        position(&columns.y),
        position(&columns.date),
    );
    let source_col = columns
        .source
        .as_deref()
        .and_then(|name| headers.iter().position(|h| h == name));
    if let (Some(name), None) = (columns.source.as_deref(), source_col) {
        debug!(column = name, path = %path.display(), "no source column, leaving tags empty");
    }

    let mut observations = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("").trim();
        let invalid = |reason: String| Error::InvalidRecord {
            table: path.display().to_string(),
            reason: format!("row {}: {reason}", line + 1),
        };

        let id = field(id_col).to_string();
        let coord = |i: usize, name: &str| {
            field(i)
                .parse::<f64>()
                .map_err(|_| invalid(format!("{name} '{}' is not a number", field(i))))
        };
        let x = coord(x_col, &columns.x)?;
        let y = coord(y_col, &columns.y)?;

        let raw_date = field(date_col);
        let date = if raw_date.is_empty() || raw_date == columns.null_token {
            None
        } else {
            Some(
                NaiveDate::parse_from_str(raw_date, &columns.date_format)
                    .map_err(|e| invalid(format!("date '{raw_date}': {e}")))?,
            )
        };

        let mut obs = Observation::new(id, x, y, columns.crs, date);
        if let Some(col) = source_col {
            let tag = field(col);
            if !tag.is_empty() && tag != columns.null_token {
                obs.source = Some(tag.to_string());
            }
        }
        observations.push(obs);
    }

    info!(rows = observations.len(), path = %path.display(), "read observations");
    Ok(observations)
}
