//! Winter and summer composites for one water year

use super::composite::{composite, CompositeParams, NodataPolicy};
use habitat_core::io::write_geotiff;
use habitat_core::raster::Raster;
use habitat_core::store::{LayerHandle, LayerKey, RasterStore};
use habitat_core::time::{Method, Season};
use habitat_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A composite to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonalRequest {
    pub variable: String,
    pub season: Season,
    pub method: Method,
    pub water_year: i32,
}

impl SeasonalRequest {
    pub fn new(variable: impl Into<String>, season: Season, method: Method, water_year: i32) -> Self {
        Self {
            variable: variable.into(),
            season,
            method,
            water_year,
        }
    }

    pub fn key(&self) -> LayerKey {
        LayerKey::seasonal(&self.variable, self.water_year, self.season, self.method)
    }

    /// Keys of the three constituent monthly layers
    pub fn constituents(&self) -> [LayerKey; 3] {
        self.season
            .constituents(self.water_year)
            .map(|(year, month)| LayerKey::monthly(&self.variable, year, month))
    }
}

/// Builds seasonal composites from the monthly layers of a [`RasterStore`]
#[derive(Debug)]
pub struct SeasonalAggregator<'a> {
    store: &'a RasterStore,
    output_dir: PathBuf,
    overwrite: bool,
}

impl<'a> SeasonalAggregator<'a> {
    pub fn new(store: &'a RasterStore, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
            overwrite: false,
        }
    }

    /// Replace existing output instead of failing
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn output_path(&self, request: &SeasonalRequest) -> PathBuf {
        let name = request.key().file_name().unwrap_or_default();
        self.output_dir.join(name)
    }

    /// The three constituent handles, or [`Error::MissingInput`] naming every
    /// absent month.
    pub fn constituents(&self, request: &SeasonalRequest) -> Result<Vec<&'a LayerHandle>> {
        let mut found = Vec::with_capacity(3);
        let mut missing = Vec::new();
        for key in request.constituents() {
            match self.store.get_one(&key)? {
                Some(handle) => found.push(handle),
                None => missing.push(key.file_name().unwrap_or_else(|| key.to_string())),
            }
        }
        if !missing.is_empty() {
            return Err(Error::missing_input(
                request.key().to_string(),
                format!(
                    "{} of 3 monthly layers found, missing {}",
                    found.len(),
                    missing.join(", ")
                ),
            ));
        }
        Ok(found)
    }

    /// Compute the composite in memory
    pub fn composite(&self, request: &SeasonalRequest) -> Result<Raster<f64>> {
        let layers = self
            .constituents(request)?
            .into_iter()
            .map(LayerHandle::load)
            .collect::<Result<Vec<_>>>()?;
        composite(
            &layers,
            CompositeParams {
                method: request.method,
                nodata: NodataPolicy::RequireAll,
            },
        )
    }

    /// Compute and write the composite, returning its path.
    ///
    /// Without overwrite, an existing file or an indexed layer under the same
    /// key is an [`Error::OutputExists`].
    pub fn build(&self, request: &SeasonalRequest) -> Result<PathBuf> {
        let path = self.output_path(request);
        if !self.overwrite {
            ensure_new_output(self.store, &request.key(), &path)?;
        }

        let raster = self.composite(request)?;
        std::fs::create_dir_all(&self.output_dir)?;
        write_geotiff(&raster, &path)?;
        info!(layer = %request.key(), path = %path.display(), "wrote seasonal composite");
        Ok(path)
    }
}

/// Fail if `path` exists or the store already indexes `key` elsewhere
pub(crate) fn ensure_new_output(store: &RasterStore, key: &LayerKey, path: &Path) -> Result<()> {
    if path.exists() {
        return Err(Error::OutputExists(path.to_path_buf()));
    }
    if let Some(existing) = store.get(key).first() {
        debug!(layer = %key, existing = %existing.path.display(), "key already indexed");
        return Err(Error::OutputExists(existing.path.clone()));
    }
    Ok(())
}
