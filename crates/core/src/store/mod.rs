//! Read-only access to a directory of single-band layers.
//!
//! [`RasterStore`] scans one or more directories once, parses every file name
//! under the layer naming convention and keeps a `LayerKey -> handles` index.
//! Lookups never touch the filesystem; only [`LayerHandle::load`] does.

mod naming;
mod stack;

pub use naming::{
    composite_band_name, parse_layer_name, parse_layer_path, short_key, LayerKey, ParsedLayer,
    SoilLayerName, TemporalKey,
};
pub use stack::{Band, RasterStack};

use crate::error::{Error, Result};
use crate::io::read_geotiff;
use crate::raster::Raster;
use crate::time::{Method, Month, Season};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A layer file found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerHandle {
    pub key: LayerKey,
    pub path: PathBuf,
    pub soil: Option<SoilLayerName>,
}

impl LayerHandle {
    /// Read the layer from disk
    pub fn load(&self) -> Result<Raster<f64>> {
        debug!(layer = %self.key, path = %self.path.display(), "loading layer");
        read_geotiff(&self.path)
    }

    pub fn band_name(&self, short_len: usize) -> String {
        self.key.band_name(short_len)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Key-indexed catalog of layer files
#[derive(Debug, Clone, Default)]
pub struct RasterStore {
    roots: Vec<PathBuf>,
    index: BTreeMap<LayerKey, Vec<LayerHandle>>,
}

impl RasterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every `.tif` directly inside `dirs`.
    ///
    /// Files whose names do not follow the convention are skipped.
    pub fn scan<P: AsRef<Path>>(dirs: &[P]) -> Result<Self> {
        let mut store = RasterStore::new();
        for dir in dirs {
            let dir = dir.as_ref();
            if !dir.is_dir() {
                return Err(Error::missing_input(
                    dir.display().to_string(),
                    "raster directory does not exist",
                ));
            }

            let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            paths.sort();

            for path in paths {
                if store.register(&path).is_none() {
                    debug!(path = %path.display(), "skipping file outside the naming convention");
                }
            }
            store.roots.push(dir.to_path_buf());
        }
        debug!(layers = store.len(), "raster store indexed");
        Ok(store)
    }

    /// Add one file to the index (e.g. a layer written after the scan).
    /// Returns its key, or `None` if the name does not parse.
    pub fn register(&mut self, path: &Path) -> Option<LayerKey> {
        let parsed = parse_layer_path(path)?;
        let handles = self.index.entry(parsed.key.clone()).or_default();
        if !handles.iter().any(|h| h.path == path) {
            handles.push(LayerHandle {
                key: parsed.key.clone(),
                path: path.to_path_buf(),
                soil: parsed.soil,
            });
            handles.sort_by(|a, b| a.path.cmp(&b.path));
        }
        Some(parsed.key)
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &LayerKey> {
        self.index.keys()
    }

    pub fn handles(&self) -> impl Iterator<Item = &LayerHandle> {
        self.index.values().flatten()
    }

    /// All handles for an exact key; empty when nothing matches
    pub fn get(&self, key: &LayerKey) -> &[LayerHandle] {
        self.index.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The single handle for `key`: `Ok(None)` when absent, an error when
    /// more than one file carries the key.
    pub fn get_one(&self, key: &LayerKey) -> Result<Option<&LayerHandle>> {
        match self.get(key) {
            [] => Ok(None),
            [one] => Ok(Some(one)),
            many => Err(Error::DuplicateKey {
                table: "raster store".into(),
                key: format!(
                    "{key} ({})",
                    many.iter()
                        .map(|h| h.path.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }),
        }
    }

    /// Monthly layers for a variable and calendar year/month
    pub fn find(&self, variable: &str, year: i32, month: Month) -> &[LayerHandle] {
        self.get(&LayerKey::monthly(variable, year, month))
    }

    /// Composite layers for a variable, water year and season (any method)
    pub fn find_seasonal(&self, variable: &str, water_year: i32, season: Season) -> Vec<&LayerHandle> {
        [Method::Mean, Method::Sum]
            .into_iter()
            .flat_map(|m| self.get(&LayerKey::seasonal(variable, water_year, season, m)))
            .collect()
    }

    pub fn find_monthly_normal(&self, variable: &str, month: Month) -> &[LayerHandle] {
        self.get(&LayerKey::monthly_normal(variable, month))
    }

    pub fn find_seasonal_normal(&self, variable: &str, season: Season, method: Method) -> &[LayerHandle] {
        self.get(&LayerKey::seasonal_normal(variable, season, method))
    }

    /// Soil layers whose file name contains `_{variable}_`
    pub fn find_soil(&self, variable: &str) -> Vec<&LayerHandle> {
        let needle = format!("_{variable}_");
        self.handles()
            .filter(|h| h.key.temporal == TemporalKey::Static)
            .filter(|h| h.file_name().contains(&needle))
            .collect()
    }

    /// Load `handles` into a stack, bands in the given order and labeled by
    /// their normalized short key.
    pub fn stack(&self, handles: &[&LayerHandle], short_len: usize) -> Result<RasterStack> {
        let mut stack = RasterStack::new();
        for handle in handles {
            stack.push(handle.band_name(short_len), Arc::new(handle.load()?))?;
        }
        Ok(stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::write_geotiff;
    use crate::raster::GeoTransform;

    fn write_layer(dir: &Path, name: &str, value: f64) {
        let mut r = Raster::filled(2, 2, value);
        r.set_transform(GeoTransform::new(0.0, 2.0, 1.0, -1.0));
        write_geotiff(&r, dir.join(name)).unwrap();
    }

    #[test]
    fn test_scan_and_find() {
        let dir = tempfile::tempdir().unwrap();
        write_layer(dir.path(), "ppt2017dec.tif", 10.0);
        write_layer(dir.path(), "ppt2018jan.tif", 20.0);
        write_layer(dir.path(), "ppt2018winter_sum.tif", 30.0);
        write_layer(dir.path(), "gnatsgo_om_270m_ca_2022.tif", 2.0);
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let store = RasterStore::scan(&[dir.path()]).unwrap();
        assert_eq!(store.len(), 4);
        assert_eq!(store.find("ppt", 2017, Month::Dec).len(), 1);
        assert!(store.find("ppt", 2017, Month::Nov).is_empty());
        assert_eq!(store.find_seasonal("ppt", 2018, Season::Winter).len(), 1);
        assert_eq!(store.find_soil("om").len(), 1);
        assert!(store.find_soil("cec").is_empty());

        let handles = [
            &store.find("ppt", 2018, Month::Jan)[0],
            store.find_soil("om")[0],
        ];
        let stack = store.stack(&handles, 3).unwrap();
        assert_eq!(stack.band_names(), vec!["ppt", "om"]);
        assert_eq!(stack.sample(0.5, 0.5), vec![Some(20.0), Some(2.0)]);
    }

    #[test]
    fn test_duplicate_key_across_roots() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        write_layer(a.path(), "aet2018oct.tif", 1.0);
        write_layer(b.path(), "aet2018oct.tif", 2.0);

        let store = RasterStore::scan(&[a.path(), b.path()]).unwrap();
        let key = LayerKey::monthly("aet", 2018, Month::Oct);
        assert_eq!(store.get(&key).len(), 2);
        assert!(matches!(store.get_one(&key), Err(Error::DuplicateKey { .. })));
    }

    #[test]
    fn test_missing_directory() {
        let err = RasterStore::scan(&[Path::new("/nonexistent/habitat/rasters")]).unwrap_err();
        assert!(matches!(err, Error::MissingInput { .. }));
    }
}
