//! Samples-with-data feature tables: one row per observation, one column per
//! environmental covariate.

use crate::error::{Error, Result};
use crate::observation::Observation;
use chrono::{Datelike, NaiveDate};
use std::io::Write;
use std::path::Path;

/// Identifying columns written ahead of the environmental columns
pub const ID_COLUMNS: [&str; 8] = ["id", "x", "y", "date", "year", "month", "water_year", "source"];

/// One extracted observation
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub date: NaiveDate,
    pub water_year: i32,
    pub source: Option<String>,
    /// Environmental values in table column order; `None` is a null cell
    pub values: Vec<Option<f64>>,
}

impl FeatureRow {
    /// Row for a dated observation, coordinates as given in its own CRS
    pub fn from_observation(obs: &Observation, values: Vec<Option<f64>>) -> Result<Self> {
        let (date, water_year) = match (obs.date, obs.water_year()) {
            (Some(d), Some(wy)) => (d, wy),
            _ => {
                return Err(Error::configuration(
                    "observations",
                    format!("observation '{}' has no date", obs.id),
                ))
            }
        };
        Ok(Self {
            id: obs.id.clone(),
            x: obs.x(),
            y: obs.y(),
            date,
            water_year,
            source: obs.source.clone(),
            values,
        })
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> u32 {
        self.date.month()
    }

    /// Whether every environmental value is null
    pub fn is_null(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

/// Feature rows sharing one fixed column set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    columns: Vec<String>,
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn push(&mut self, row: FeatureRow) -> Result<()> {
        if row.values.len() != self.columns.len() {
            return Err(Error::InvalidRecord {
                table: "feature table".into(),
                reason: format!(
                    "row '{}' has {} values for {} columns",
                    row.id,
                    row.values.len(),
                    self.columns.len()
                ),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn extend(&mut self, rows: impl IntoIterator<Item = FeatureRow>) -> Result<()> {
        rows.into_iter().try_for_each(|row| self.push(row))
    }

    /// Value of `column` in row `row`
    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.values[col]
    }

    pub fn header(&self) -> Vec<String> {
        ID_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.columns.iter().cloned())
            .collect()
    }

    /// Write as CSV with `null_token` in null cells
    pub fn write_csv_to<W: Write>(&self, writer: W, null_token: &str) -> Result<()> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(self.header())?;

        let fmt_opt = |v: Option<f64>| v.map_or_else(|| null_token.to_string(), |v| v.to_string());
        for row in &self.rows {
            let mut record = vec![
                row.id.clone(),
                row.x.to_string(),
                row.y.to_string(),
                row.date.format("%Y-%m-%d").to_string(),
                row.year().to_string(),
                row.month().to_string(),
                row.water_year.to_string(),
                row.source.clone().unwrap_or_else(|| null_token.to_string()),
            ];
            record.extend(row.values.iter().map(|&v| fmt_opt(v)));
            out.write_record(&record)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: impl AsRef<Path>, null_token: &str) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv_to(std::io::BufWriter::new(file), null_token)
    }
}
