//! Point extraction: one feature row per observation
//!
//! Observations are grouped by the month they fall in. For every month of
//! the requested water-year range that has observations, the month's stack
//! (monthly climate, that water year's composites, static soil) is
//! assembled, points are reprojected into the stack CRS and every band is
//! sampled at the containing cell. Periods are independent and run through
//! `habitat-parallel`; their rows are concatenated in period order.

use crate::report::{PeriodReport, RunReport};
use crate::schema::{resolve_layers, CovariateTime, LayerSchema, StaticLayers};
use habitat_core::feature::{FeatureRow, FeatureTable};
use habitat_core::observation::{dedupe, Observation};
use habitat_core::store::{RasterStack, RasterStore};
use habitat_core::time::{Period, TemporalIndexer, WaterYearRange};
use habitat_core::{Error, Result};
use habitat_parallel::{no_progress, run_tasks, CancelToken, ProcessingMode};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Feature table and run summary
#[derive(Debug, Clone)]
pub struct Extraction {
    pub table: FeatureTable,
    pub report: RunReport,
}

/// Rows and counts for one period
#[derive(Debug)]
struct PeriodOutput {
    rows: Vec<FeatureRow>,
    report: PeriodReport,
}

/// Builds feature tables from observations and a [`RasterStore`]
pub struct ExtractionEngine<'a> {
    store: &'a RasterStore,
    schema: LayerSchema,
    indexer: TemporalIndexer,
    mode: ProcessingMode,
    cancel: CancelToken,
    progress: &'a (dyn Fn(usize, usize) + Sync),
}

impl<'a> ExtractionEngine<'a> {
    pub fn new(store: &'a RasterStore, schema: LayerSchema, indexer: TemporalIndexer) -> Self {
        Self {
            store,
            schema,
            indexer,
            mode: ProcessingMode::default(),
            cancel: CancelToken::new(),
            progress: &no_progress,
        }
    }

    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Token that stops periods not yet started
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Called with (periods done, periods total)
    pub fn with_progress(mut self, progress: &'a (dyn Fn(usize, usize) + Sync)) -> Self {
        self.progress = progress;
        self
    }

    pub fn schema(&self) -> &LayerSchema {
        &self.schema
    }

    /// Extract every observation over `range`.
    ///
    /// Exact duplicate observations are dropped first. Every remaining
    /// observation must carry a date inside `range`; filter beforehand with
    /// [`partition_by_range`](habitat_core::observation::partition_by_range).
    /// Missing layers and geometry failures give null cells and are counted
    /// in the report; any other error aborts the run.
    pub fn extract(&self, observations: Vec<Observation>, range: WaterYearRange) -> Result<Extraction> {
        let periods = self.indexer.periods(range)?;
        let (observations, duplicates_removed) = dedupe(observations)?;

        let mut by_period: BTreeMap<Period, Vec<&Observation>> = BTreeMap::new();
        for obs in &observations {
            let period = obs
                .period()
                .filter(|p| range.contains(p.water_year))
                .ok_or_else(|| {
                    Error::configuration(
                        "observations",
                        format!("observation '{}' has no date in water years {range}", obs.id),
                    )
                })?;
            by_period.entry(period).or_default().push(obs);
        }

        let statics = self.schema.load_static(self.store)?;
        let work: Vec<(Period, Vec<&Observation>)> = periods
            .iter()
            .filter_map(|p| by_period.remove(p).map(|obs| (*p, obs)))
            .collect();
        let skipped_periods = periods.len() - work.len();
        info!(
            observations = observations.len(),
            periods = work.len(),
            skipped = skipped_periods,
            "extracting"
        );

        let results = run_tasks(&work, self.mode, &self.cancel, self.progress, |(period, obs)| {
            self.extract_period(*period, obs, &statics)
        })?;

        let mut table = FeatureTable::new(self.schema.names());
        let mut report = RunReport {
            skipped_periods,
            duplicates_removed,
            missing_static: statics.missing.clone(),
            ..Default::default()
        };
        for result in results {
            let output = result.ok_or(Error::Cancelled)??;
            table.extend(output.rows)?;
            report.periods.push(output.report);
        }

        if table.len() != observations.len() {
            return Err(Error::RowCount {
                context: "extraction".into(),
                expected: observations.len(),
                actual: table.len(),
            });
        }
        report.rows = table.len();
        info!(rows = report.rows, "extraction complete");
        Ok(Extraction { table, report })
    }

    fn extract_period(&self, period: Period, observations: &[&Observation], statics: &StaticLayers) -> Result<PeriodOutput> {
        let (layers, missing_layers) =
            resolve_layers(&self.schema, self.store, statics, CovariateTime::Period(period))?;
        if !missing_layers.is_empty() {
            warn!(%period, missing = ?missing_layers, "period has missing layers");
        }

        let mut stack = RasterStack::new();
        for (name, raster) in layers {
            stack.push(name, raster)?;
        }
        let names = self.schema.names();
        let positions: Vec<usize> = stack
            .band_names()
            .iter()
            .filter_map(|band| names.iter().position(|n| n == band))
            .collect();

        let mut rows = Vec::with_capacity(observations.len());
        let mut geometry_failures = Vec::new();
        for obs in observations {
            let mut values = vec![None; names.len()];
            if !stack.is_empty() {
                match locate(&stack, obs) {
                    Ok((x, y)) => {
                        for (&pos, value) in positions.iter().zip(stack.sample(x, y)) {
                            values[pos] = value;
                        }
                    }
                    Err(e) => {
                        debug!(id = %obs.id, %period, error = %e, "keeping row with null values");
                        geometry_failures.push(obs.id.clone());
                    }
                }
            }
            rows.push(FeatureRow::from_observation(obs, values)?);
        }

        debug!(%period, rows = rows.len(), bands = stack.len(), "period extracted");
        Ok(PeriodOutput {
            rows,
            report: PeriodReport {
                period,
                observations: observations.len(),
                missing_layers,
                geometry_failures,
            },
        })
    }
}

/// Observation location in the stack's CRS, or a geometry error when it
/// cannot be reprojected or lies outside the stack extent
fn locate(stack: &RasterStack, obs: &Observation) -> Result<(f64, f64)> {
    let (x, y) = match stack.crs() {
        Some(crs) => obs.project_to(crs)?,
        None => (obs.x(), obs.y()),
    };
    if !stack.contains(x, y) {
        return Err(Error::geometry(&obs.id, "outside raster extent"));
    }
    Ok((x, y))
}
