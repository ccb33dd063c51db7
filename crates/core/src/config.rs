//! Pipeline configuration.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes. [`PipelineConfig::validate`] runs before any raster or table I/O.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::store::composite_band_name;
use crate::store::short_key;
use crate::time::{Method, Season, TemporalIndexer, WaterYearRange};
use crate::time::{DEFAULT_MAX_WATER_YEAR, DEFAULT_MIN_WATER_YEAR};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Column names and parsing rules for observation tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationColumns {
    pub id: String,
    pub x: String,
    pub y: String,
    pub date: String,
    /// Optional column holding a source tag (e.g. occurrence / background)
    pub source: Option<String>,
    /// `chrono` format string for the date column
    pub date_format: String,
    /// CRS of the x/y columns
    pub crs: CRS,
    /// Token written for missing values in feature tables
    pub null_token: String,
}

impl Default for ObservationColumns {
    fn default() -> Self {
        Self {
            id: "id".into(),
            x: "longitude".into(),
            y: "latitude".into(),
            date: "date".into(),
            source: Some("source".into()),
            date_format: "%Y-%m-%d".into(),
            crs: CRS::wgs84(),
            null_token: "NA".into(),
        }
    }
}

/// Climate covariates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateConfig {
    /// Monthly variables, sampled from the observation's own month
    pub monthly: Vec<String>,
    /// Seasonal composites, sampled from the observation's water year
    pub composites: Vec<CompositeLayer>,
}

/// A composite covariate `{variable}_{season}_{method}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeLayer {
    pub variable: String,
    pub season: Season,
    pub method: Method,
}

impl CompositeLayer {
    pub fn new(variable: impl Into<String>, season: Season, method: Method) -> Self {
        Self {
            variable: variable.into(),
            season,
            method,
        }
    }

    pub fn band_name(&self) -> String {
        composite_band_name(&self.variable, self.season, self.method)
    }
}

impl Default for ClimateConfig {
    fn default() -> Self {
        Self {
            monthly: ["aet", "cwd", "pck", "ppt", "tmn", "tmx"]
                .into_iter()
                .map(String::from)
                .collect(),
            composites: vec![
                CompositeLayer::new("ppt", Season::Winter, Method::Sum),
                CompositeLayer::new("tmn", Season::Winter, Method::Mean),
                CompositeLayer::new("tmx", Season::Summer, Method::Mean),
            ],
        }
    }
}

/// Soil covariates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoilConfig {
    pub variables: Vec<String>,
    /// Depth (cm) above which horizons are aggregated
    pub depth_cutoff: f64,
    pub allowed_depth_cutoffs: Vec<f64>,
}

impl Default for SoilConfig {
    fn default() -> Self {
        Self {
            variables: ["om", "cec", "ph"].into_iter().map(String::from).collect(),
            depth_cutoff: 200.0,
            allowed_depth_cutoffs: vec![30.0, 100.0, 200.0],
        }
    }
}

/// Top-level configuration for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Water years the environmental data covers
    pub years: WaterYearRange,
    /// Length of the short key used to label monthly bands
    pub short_key_len: usize,
    pub observations: ObservationColumns,
    pub climate: ClimateConfig,
    pub soil: SoilConfig,
    /// Worker threads; `None` uses every core
    pub threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            years: WaterYearRange::new(DEFAULT_MIN_WATER_YEAR, DEFAULT_MAX_WATER_YEAR),
            short_key_len: 3,
            observations: ObservationColumns::default(),
            climate: ClimateConfig::default(),
            soil: SoilConfig::default(),
            threads: None,
        }
    }
}

impl PipelineConfig {
    /// Read and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn indexer(&self) -> Result<TemporalIndexer> {
        TemporalIndexer::new(self.years)
    }

    /// Environment column names in output order: monthly short keys,
    /// composite keys, then soil variables.
    pub fn env_columns(&self) -> Vec<String> {
        self.climate
            .monthly
            .iter()
            .map(|v| short_key(v, self.short_key_len))
            .chain(self.climate.composites.iter().map(CompositeLayer::band_name))
            .chain(self.soil.variables.iter().cloned())
            .collect()
    }

    /// Check parameter combinations before any I/O
    pub fn validate(&self) -> Result<()> {
        self.indexer()?;

        if self.short_key_len == 0 {
            return Err(Error::configuration("short_key_len", "must be at least 1"));
        }
        if let Some(0) = self.threads {
            return Err(Error::configuration("threads", "must be at least 1"));
        }

        let cutoff = self.soil.depth_cutoff;
        if !(cutoff.is_finite() && cutoff > 0.0) {
            return Err(Error::configuration(
                "soil.depth_cutoff",
                format!("{cutoff} is not a positive depth"),
            ));
        }
        if !self.soil.allowed_depth_cutoffs.is_empty()
            && !self.soil.allowed_depth_cutoffs.iter().any(|&c| c == cutoff)
        {
            return Err(Error::configuration(
                "soil.depth_cutoff",
                format!(
                    "{cutoff} is not one of {:?}",
                    self.soil.allowed_depth_cutoffs
                ),
            ));
        }

        let cols = &self.observations;
        let mut id_fields = vec![&cols.id, &cols.x, &cols.y, &cols.date];
        id_fields.extend(cols.source.as_ref());
        let mut seen = HashSet::new();
        for field in id_fields {
            if field.is_empty() {
                return Err(Error::configuration("observations", "column names must not be empty"));
            }
            if !seen.insert(field.as_str()) {
                return Err(Error::configuration(
                    "observations",
                    format!("column '{field}' is used twice"),
                ));
            }
        }

        let mut seen = HashSet::new();
        for column in self.env_columns() {
            if !seen.insert(column.clone()) {
                return Err(Error::configuration(
                    "columns",
                    format!("environment column '{column}' is produced twice"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(
            config.env_columns(),
            vec![
                "aet", "cwd", "pck", "ppt", "tmn", "tmx", "ppt_winter_sum", "tmn_winter_mean",
                "tmx_summer_mean", "om", "cec", "ph"
            ]
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "years": {"start": 2005, "end": 2010},
            "climate": {"monthly": ["ppt"], "composites": [
                {"variable": "ppt", "season": "winter", "method": "sum"}
            ]},
            "observations": {"x": "lon", "y": "lat", "crs": 4269}
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.years, WaterYearRange::new(2005, 2010));
        assert_eq!(config.observations.id, "id");
        assert_eq!(config.observations.crs.epsg(), 4269);
        assert_eq!(config.soil.depth_cutoff, 200.0);
    }

    #[test]
    fn test_unknown_season_is_rejected() {
        let json = r#"{"climate": {"composites": [
            {"variable": "ppt", "season": "spring", "method": "sum"}
        ]}}"#;
        assert!(serde_json::from_str::<PipelineConfig>(json).is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = PipelineConfig::default();
        config.soil.depth_cutoff = 150.0;
        assert!(matches!(config.validate(), Err(Error::Configuration { .. })));

        let mut config = PipelineConfig::default();
        config.years = WaterYearRange::new(2022, 2000);
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.climate.monthly.push("pptx".into());
        assert!(matches!(config.validate(), Err(Error::Configuration { .. })));

        let mut config = PipelineConfig::default();
        config.observations.y = "longitude".into();
        assert!(config.validate().is_err());
    }
}
