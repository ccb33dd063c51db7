//! Delimited tables read and written through serde records

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Read every record of a headed CSV file
pub fn read_csv<T, P>(path: P) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}

/// Write records to a headed CSV file, replacing any existing file
pub fn write_csv<T, P>(rows: &[T], path: P) -> Result<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
