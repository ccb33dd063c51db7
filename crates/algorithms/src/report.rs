//! Run summaries.
//!
//! Missing inputs and geometry failures are accumulated and reported at the
//! end of a run; every other error aborts it.

use habitat_core::time::Period;
use habitat_core::{Error, ErrorKind, Result};
use std::fmt;
use tracing::warn;

/// Extraction outcome for one period that had observations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodReport {
    pub period: Period,
    pub observations: usize,
    /// Columns with no layer for this period
    pub missing_layers: Vec<String>,
    /// Observations kept with null values because of a geometry failure
    pub geometry_failures: Vec<String>,
}

/// Summary of one extraction run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub periods: Vec<PeriodReport>,
    /// Periods with no matching observations
    pub skipped_periods: usize,
    pub rows: usize,
    pub duplicates_removed: usize,
    /// Static (soil) columns with no layer at all
    pub missing_static: Vec<String>,
}

impl RunReport {
    pub fn processed_periods(&self) -> usize {
        self.periods.len()
    }

    pub fn missing_layer_count(&self) -> usize {
        self.periods.iter().map(|p| p.missing_layers.len()).sum()
    }

    pub fn geometry_failure_count(&self) -> usize {
        self.periods.iter().map(|p| p.geometry_failures.len()).sum()
    }

    /// Whether every layer was found and every point sampled
    pub fn is_clean(&self) -> bool {
        self.missing_layer_count() == 0 && self.geometry_failure_count() == 0 && self.missing_static.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} rows from {} periods ({} skipped without observations), {} duplicates removed",
            self.rows,
            self.processed_periods(),
            self.skipped_periods,
            self.duplicates_removed
        )?;
        if !self.missing_static.is_empty() {
            writeln!(f, "  static layers missing: {}", self.missing_static.join(", "))?;
        }
        for p in &self.periods {
            if p.missing_layers.is_empty() && p.geometry_failures.is_empty() {
                continue;
            }
            writeln!(
                f,
                "  {}: {} observations, {} missing layers [{}], {} geometry failures",
                p.period,
                p.observations,
                p.missing_layers.len(),
                p.missing_layers.join(", "),
                p.geometry_failures.len()
            )?;
        }
        Ok(())
    }
}

/// One recorded, recoverable failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Variable, period or species that failed
    pub key: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Accumulates recoverable failures across a batch
#[derive(Debug, Clone, Default)]
pub struct FailureLog {
    entries: Vec<Failure>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `error` under `key` if it is recoverable, otherwise return it
    pub fn record(&mut self, key: impl Into<String>, error: Error) -> Result<()> {
        if !error.is_recoverable() {
            return Err(error);
        }
        let key = key.into();
        warn!(%key, %error, "recorded failure");
        self.entries.push(Failure {
            key,
            kind: error.kind(),
            message: error.to_string(),
        });
        Ok(())
    }

    /// Keep the value of `result`, recording a recoverable error as `None`
    pub fn absorb<T>(&mut self, key: impl Into<String>, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(v) => Ok(Some(v)),
            Err(e) => self.record(key, e).map(|_| None),
        }
    }

    pub fn entries(&self) -> &[Failure] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, kind: ErrorKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }
}

impl fmt::Display for FailureLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} failures ({} missing input, {} geometry)",
            self.len(),
            self.count(ErrorKind::MissingInput),
            self.count(ErrorKind::Geometry)
        )?;
        for e in &self.entries {
            writeln!(f, "  {}: {}", e.key, e.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use habitat_core::time::Month;

    #[test]
    fn test_failure_log_policy() {
        let mut log = FailureLog::new();
        log.record("ppt 2018", Error::missing_input("ppt2017dec", "not found")).unwrap();
        let kept = log.absorb("occ-1", Err::<(), _>(Error::geometry("occ-1", "outside"))).unwrap();
        assert_eq!(kept, None);
        assert_eq!(log.absorb("ok", Ok(5)).unwrap(), Some(5));

        let fatal = log.record(
            "model",
            Error::SchemaMismatch { context: "model".into(), missing: vec!["cwd".into()] },
        );
        assert!(fatal.is_err());
        assert_eq!(log.len(), 2);
        assert_eq!(log.count(ErrorKind::MissingInput), 1);
        assert!(log.to_string().starts_with("2 failures (1 missing input, 1 geometry)"));
    }

    #[test]
    fn test_run_report_counts() {
        let report = RunReport {
            periods: vec![PeriodReport {
                period: Period::new(2018, Month::Jan),
                observations: 3,
                missing_layers: vec!["cwd".into()],
                geometry_failures: vec!["occ-9".into()],
            }],
            skipped_periods: 11,
            rows: 3,
            duplicates_removed: 1,
            missing_static: vec![],
        };
        assert_eq!(report.missing_layer_count(), 1);
        assert_eq!(report.geometry_failure_count(), 1);
        assert!(!report.is_clean());
        assert!(report.to_string().contains("2018-01 (WY2018)"));
    }
}
