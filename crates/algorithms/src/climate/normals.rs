//! Climatological normals: a month or season averaged over a water-year range

use super::composite::{composite, CompositeParams, NodataPolicy};
use super::seasonal::ensure_new_output;
use habitat_core::io::write_geotiff;
use habitat_core::raster::Raster;
use habitat_core::store::{LayerKey, RasterStore};
use habitat_core::time::{Method, Month, Season, TemporalIndexer, WaterYearRange};
use habitat_core::{Error, Result};
use std::path::PathBuf;
use tracing::{info, warn};

/// Builds `{variable}avg{mon}` and `{variable}avg{season}_{method}` layers
#[derive(Debug)]
pub struct NormalsBuilder<'a> {
    store: &'a RasterStore,
    output_dir: PathBuf,
    indexer: TemporalIndexer,
    overwrite: bool,
    allow_partial: bool,
}

impl<'a> NormalsBuilder<'a> {
    pub fn new(store: &'a RasterStore, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
            indexer: TemporalIndexer::default(),
            overwrite: false,
            allow_partial: false,
        }
    }

    /// Supported water years; requested ranges are validated against it
    pub fn with_indexer(mut self, indexer: TemporalIndexer) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Average whatever years are present instead of requiring all of them
    pub fn with_allow_partial(mut self, allow_partial: bool) -> Self {
        self.allow_partial = allow_partial;
        self
    }

    /// Mean of `month` over every water year of `range`.
    ///
    /// The calendar year of each input follows the water-year rule, so the
    /// October normal for 2001..=2010 averages October 2000..=2009.
    pub fn monthly(&self, variable: &str, month: Month, range: WaterYearRange) -> Result<Raster<f64>> {
        let range = self.indexer.validate(range)?;
        let inputs = range
            .years()
            .map(|wy| LayerKey::monthly(variable, month.calendar_year(wy), month));
        self.average(&LayerKey::monthly_normal(variable, month), inputs)
    }

    /// Mean of the `season`/`method` composite over every water year of `range`
    pub fn seasonal(
        &self,
        variable: &str,
        season: Season,
        method: Method,
        range: WaterYearRange,
    ) -> Result<Raster<f64>> {
        let range = self.indexer.validate(range)?;
        let inputs = range
            .years()
            .map(|wy| LayerKey::seasonal(variable, wy, season, method));
        self.average(&LayerKey::seasonal_normal(variable, season, method), inputs)
    }

    /// Write a normal computed by [`monthly`](Self::monthly) or
    /// [`seasonal`](Self::seasonal) under its key's file name.
    pub fn write(&self, key: &LayerKey, raster: &Raster<f64>) -> Result<PathBuf> {
        let name = key
            .file_name()
            .ok_or_else(|| Error::configuration("normal", format!("{key} has no file name")))?;
        let path = self.output_dir.join(name);
        if !self.overwrite {
            ensure_new_output(self.store, key, &path)?;
        }
        std::fs::create_dir_all(&self.output_dir)?;
        write_geotiff(raster, &path)?;
        info!(layer = %key, path = %path.display(), "wrote normal");
        Ok(path)
    }

    /// Compute and write a monthly normal
    pub fn build_monthly(&self, variable: &str, month: Month, range: WaterYearRange) -> Result<PathBuf> {
        let key = LayerKey::monthly_normal(variable, month);
        self.check_output(&key)?;
        let raster = self.monthly(variable, month, range)?;
        self.write(&key, &raster)
    }

    /// Compute and write a seasonal normal
    pub fn build_seasonal(
        &self,
        variable: &str,
        season: Season,
        method: Method,
        range: WaterYearRange,
    ) -> Result<PathBuf> {
        let key = LayerKey::seasonal_normal(variable, season, method);
        self.check_output(&key)?;
        let raster = self.seasonal(variable, season, method, range)?;
        self.write(&key, &raster)
    }

    fn check_output(&self, key: &LayerKey) -> Result<()> {
        if self.overwrite {
            return Ok(());
        }
        let name = key.file_name().unwrap_or_default();
        ensure_new_output(self.store, key, &self.output_dir.join(name))
    }

    fn average(&self, target: &LayerKey, inputs: impl Iterator<Item = LayerKey>) -> Result<Raster<f64>> {
        let mut layers = Vec::new();
        let mut missing = Vec::new();
        for key in inputs {
            match self.store.get_one(&key)? {
                Some(handle) => layers.push(handle.load()?),
                None => missing.push(key.file_name().unwrap_or_else(|| key.to_string())),
            }
        }

        if layers.is_empty() || (!missing.is_empty() && !self.allow_partial) {
            return Err(Error::missing_input(
                target.to_string(),
                format!("{} inputs found, missing {}", layers.len(), missing.join(", ")),
            ));
        }
        if !missing.is_empty() {
            warn!(layer = %target, found = layers.len(), missing = missing.len(), "partial normal");
        }

        composite(
            &layers,
            CompositeParams {
                method: Method::Mean,
                nodata: NodataPolicy::SkipMissing,
            },
        )
    }
}
