//! The fixed covariate column set shared by extraction and prediction

use habitat_core::config::{CompositeLayer, PipelineConfig};
use habitat_core::raster::Raster;
use habitat_core::store::{short_key, LayerKey, RasterStore};
use habitat_core::time::{Month, Period};
use habitat_core::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a covariate column's values come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSource {
    /// Monthly climate variable
    Monthly(String),
    /// Seasonal composite of the observation's water year
    Composite(CompositeLayer),
    /// Static soil layer, found by `_{variable}_` in its file name
    Soil(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaColumn {
    pub name: String,
    pub source: ColumnSource,
}

/// Which climate layers to read for time-varying columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovariateTime {
    /// Actual layers of one month: its monthly layers and its water year's
    /// composites
    Period(Period),
    /// Long-term averages: `{var}avg{mon}` and `{var}avg{season}_{method}`
    Normal(Month),
}

/// Ordered covariate columns: monthly short keys, composite keys, soil
/// variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSchema {
    columns: Vec<SchemaColumn>,
}

impl LayerSchema {
    /// Fails with a configuration error when two columns share a name
    pub fn new(
        monthly: &[String],
        composites: &[CompositeLayer],
        soil: &[String],
        short_key_len: usize,
    ) -> Result<Self> {
        let columns: Vec<SchemaColumn> = monthly
            .iter()
            .map(|v| SchemaColumn {
                name: short_key(v, short_key_len),
                source: ColumnSource::Monthly(v.clone()),
            })
            .chain(composites.iter().map(|c| SchemaColumn {
                name: c.band_name(),
                source: ColumnSource::Composite(c.clone()),
            }))
            .chain(soil.iter().map(|v| SchemaColumn {
                name: v.clone(),
                source: ColumnSource::Soil(v.clone()),
            }))
            .collect();

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(Error::configuration(
                    "columns",
                    format!("column '{}' is produced twice", column.name),
                ));
            }
        }
        Ok(Self { columns })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(
            &config.climate.monthly,
            &config.climate.composites,
            &config.soil.variables,
            config.short_key_len,
        )
    }

    pub fn columns(&self) -> &[SchemaColumn] {
        &self.columns
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Layer key of a time-varying column; `None` for soil columns
    pub fn layer_key(column: &SchemaColumn, time: CovariateTime) -> Option<LayerKey> {
        match (&column.source, time) {
            (ColumnSource::Monthly(v), CovariateTime::Period(p)) => {
                Some(LayerKey::monthly(v, p.calendar_year, p.month))
            }
            (ColumnSource::Monthly(v), CovariateTime::Normal(m)) => Some(LayerKey::monthly_normal(v, m)),
            (ColumnSource::Composite(c), CovariateTime::Period(p)) => {
                Some(LayerKey::seasonal(&c.variable, p.water_year, c.season, c.method))
            }
            (ColumnSource::Composite(c), CovariateTime::Normal(_)) => {
                Some(LayerKey::seasonal_normal(&c.variable, c.season, c.method))
            }
            (ColumnSource::Soil(_), _) => None,
        }
    }

    /// Load every soil column's layer once.
    ///
    /// Returns the loaded layers by column name and the names with no layer.
    /// More than one matching file for a variable is a [`Error::DuplicateKey`].
    pub fn load_static(&self, store: &RasterStore) -> Result<StaticLayers> {
        let mut layers = BTreeMap::new();
        let mut missing = Vec::new();
        for column in &self.columns {
            let ColumnSource::Soil(variable) = &column.source else {
                continue;
            };
            match store.find_soil(variable).as_slice() {
                [] => {
                    warn!(variable = %variable, "no soil layer found");
                    missing.push(column.name.clone());
                }
                [handle] => {
                    debug!(variable = %variable, path = %handle.path.display(), "loading soil layer");
                    layers.insert(column.name.clone(), Arc::new(handle.load()?));
                }
                many => {
                    return Err(Error::DuplicateKey {
                        table: "soil layers".into(),
                        key: format!(
                            "{variable} ({})",
                            many.iter().map(|h| h.file_name()).collect::<Vec<_>>().join(", ")
                        ),
                    })
                }
            }
        }
        Ok(StaticLayers { layers, missing })
    }
}

/// Soil layers shared across every period of a run
#[derive(Debug, Clone, Default)]
pub struct StaticLayers {
    pub layers: BTreeMap<String, Arc<Raster<f64>>>,
    pub missing: Vec<String>,
}

/// Resolve and load the layers of `schema` for `time`.
///
/// Returns `(column name, layer)` pairs in schema order for the columns that
/// have a layer, plus the names of those that do not.
pub fn resolve_layers(
    schema: &LayerSchema,
    store: &RasterStore,
    statics: &StaticLayers,
    time: CovariateTime,
) -> Result<(Vec<(String, Arc<Raster<f64>>)>, Vec<String>)> {
    let mut found = Vec::new();
    let mut missing = Vec::new();
    for column in schema.columns() {
        let layer = match LayerSchema::layer_key(column, time) {
            Some(key) => match store.get_one(&key)? {
                Some(handle) => Some(Arc::new(handle.load()?)),
                None => None,
            },
            None => statics.layers.get(&column.name).cloned(),
        };
        match layer {
            Some(raster) => found.push((column.name.clone(), raster)),
            None => missing.push(column.name.clone()),
        }
    }
    Ok((found, missing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use habitat_core::time::{Method, Season};

    fn schema() -> LayerSchema {
        LayerSchema::new(
            &["ppt".into(), "tmax".into()],
            &[CompositeLayer::new("ppt", Season::Winter, Method::Sum)],
            &["om".into()],
            3,
        )
        .unwrap()
    }

    #[test]
    fn test_column_order() {
        assert_eq!(schema().names(), vec!["ppt", "tma", "ppt_winter_sum", "om"]);
    }

    #[test]
    fn test_duplicate_columns() {
        let err = LayerSchema::new(&["tmax".into(), "tmaxx".into()], &[], &[], 4);
        assert!(matches!(err, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_layer_keys_follow_the_water_year() {
        let s = schema();
        let nov = CovariateTime::Period(Period::new(2019, Month::Nov));
        let cols = s.columns();
        assert_eq!(
            LayerSchema::layer_key(&cols[0], nov),
            Some(LayerKey::monthly("ppt", 2018, Month::Nov))
        );
        assert_eq!(
            LayerSchema::layer_key(&cols[2], nov),
            Some(LayerKey::seasonal("ppt", 2019, Season::Winter, Method::Sum))
        );
        assert_eq!(LayerSchema::layer_key(&cols[3], nov), None);

        let normal = CovariateTime::Normal(Month::Jul);
        assert_eq!(
            LayerSchema::layer_key(&cols[1], normal),
            Some(LayerKey::monthly_normal("tmax", Month::Jul))
        );
        assert_eq!(
            LayerSchema::layer_key(&cols[2], normal),
            Some(LayerKey::seasonal_normal("ppt", Season::Winter, Method::Sum))
        );
    }
}
