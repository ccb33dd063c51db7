//! Suitability maps from a fitted model and a covariate stack

use crate::maybe_rayon::*;
use crate::schema::{resolve_layers, CovariateTime, LayerSchema, StaticLayers};
use habitat_core::io::write_geotiff;
use habitat_core::raster::Raster;
use habitat_core::store::{RasterStack, RasterStore};
use habitat_core::time::Month;
use habitat_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A fitted presence/background classifier.
///
/// Covariates are matched to stack bands by name, never by position.
pub trait SuitabilityModel: Sync {
    /// Covariate names, in the order `evaluate` expects values
    fn covariates(&self) -> &[String];

    /// Suitability for one cell
    fn evaluate(&self, values: &[f64]) -> f64;
}

/// Output scale of a linear model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputTransform {
    /// `exp(η)`
    Raw,
    /// `e^H·raw / (1 + e^H·raw)`
    #[default]
    Logistic,
    /// `1 - exp(-e^H·raw)`
    Cloglog,
}

/// One covariate term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub covariate: String,
    pub coefficient: f64,
    /// Values are clamped into the training range before weighting
    #[serde(default)]
    pub clamp: Option<(f64, f64)>,
}

/// JSON form of [`LinearSuitabilityModel`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModelFile {
    pub intercept: f64,
    pub terms: Vec<Term>,
    #[serde(default)]
    pub transform: OutputTransform,
    /// Entropy `H` of the fitted distribution
    #[serde(default)]
    pub entropy: f64,
}

/// Log-linear model with maximum-entropy style output transforms.
///
/// Stands in for a model fitted by an external library and exported as
/// coefficients: `η = intercept + Σ βᵢ·clamp(xᵢ)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LinearModelFile", into = "LinearModelFile")]
pub struct LinearSuitabilityModel {
    intercept: f64,
    terms: Vec<Term>,
    transform: OutputTransform,
    entropy: f64,
    names: Vec<String>,
}

impl TryFrom<LinearModelFile> for LinearSuitabilityModel {
    type Error = Error;

    fn try_from(file: LinearModelFile) -> Result<Self> {
        Self::new(file.intercept, file.terms, file.transform, file.entropy)
    }
}

impl From<LinearSuitabilityModel> for LinearModelFile {
    fn from(model: LinearSuitabilityModel) -> Self {
        Self {
            intercept: model.intercept,
            terms: model.terms,
            transform: model.transform,
            entropy: model.entropy,
        }
    }
}

impl LinearSuitabilityModel {
    /// Fails when a covariate appears twice or a clamp range is inverted
    pub fn new(intercept: f64, terms: Vec<Term>, transform: OutputTransform, entropy: f64) -> Result<Self> {
        let mut names: Vec<String> = Vec::with_capacity(terms.len());
        for term in &terms {
            if names.contains(&term.covariate) {
                return Err(Error::DuplicateKey {
                    table: "model terms".into(),
                    key: term.covariate.clone(),
                });
            }
            if let Some((lo, hi)) = term.clamp {
                if lo > hi {
                    return Err(Error::configuration(
                        "clamp",
                        format!("range for '{}' is inverted", term.covariate),
                    ));
                }
            }
            names.push(term.covariate.clone());
        }
        Ok(Self {
            intercept,
            terms,
            transform,
            entropy,
            names,
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn transform(&self) -> OutputTransform {
        self.transform
    }
}

impl SuitabilityModel for LinearSuitabilityModel {
    fn covariates(&self) -> &[String] {
        &self.names
    }

    fn evaluate(&self, values: &[f64]) -> f64 {
        let eta = self
            .terms
            .iter()
            .zip(values)
            .fold(self.intercept, |acc, (term, &x)| {
                let x = term.clamp.map_or(x, |(lo, hi)| x.clamp(lo, hi));
                acc + term.coefficient * x
            });
        let raw = eta.exp();
        let scaled = self.entropy.exp() * raw;
        match self.transform {
            OutputTransform::Raw => raw,
            OutputTransform::Logistic => scaled / (1.0 + scaled),
            OutputTransform::Cloglog => 1.0 - (-scaled).exp(),
        }
    }
}

/// Assembles full-extent covariate stacks and evaluates models on them
pub struct PredictionMapper<'a> {
    store: &'a RasterStore,
    schema: LayerSchema,
    statics: StaticLayers,
}

impl<'a> PredictionMapper<'a> {
    /// Loads the static (soil) layers once
    pub fn new(store: &'a RasterStore, schema: LayerSchema) -> Result<Self> {
        let statics = schema.load_static(store)?;
        Ok(Self {
            store,
            schema,
            statics,
        })
    }

    /// Every schema layer available for `time`, bands named by column
    pub fn assemble(&self, time: CovariateTime) -> Result<RasterStack> {
        let (layers, missing) = resolve_layers(&self.schema, self.store, &self.statics, time)?;
        if !missing.is_empty() {
            debug!(?time, ?missing, "covariate layers not available");
        }
        let mut stack = RasterStack::new();
        for (name, raster) in layers {
            stack.push(name, raster)?;
        }
        Ok(stack)
    }

    /// Suitability for one month from the monthly and seasonal normals
    pub fn predict(&self, model: &dyn SuitabilityModel, month: Month) -> Result<Raster<f64>> {
        self.predict_at(model, CovariateTime::Normal(month))
    }

    pub fn predict_at(&self, model: &dyn SuitabilityModel, time: CovariateTime) -> Result<Raster<f64>> {
        let stack = self.assemble(time)?;
        predict_stack(model, &stack, &format!("{time:?}"))
    }

    /// `{species}_{scenario}_{mon}.tif`
    pub fn output_name(species: &str, scenario: &str, month: Month) -> String {
        format!("{species}_{scenario}_{}.tif", month.abbrev())
    }

    /// Predict and write one month's map into `dir`
    pub fn write_prediction(
        &self,
        model: &dyn SuitabilityModel,
        month: Month,
        species: &str,
        scenario: &str,
        dir: &Path,
    ) -> Result<PathBuf> {
        let raster = self.predict(model, month)?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(Self::output_name(species, scenario, month));
        write_geotiff(&raster, &path)?;
        info!(species, scenario, month = %month, path = %path.display(), "wrote suitability map");
        Ok(path)
    }
}

/// Evaluate `model` on every cell of `stack`.
///
/// Bands are selected by the model's covariate names; extra bands are
/// dropped, and absent ones fail with [`Error::SchemaMismatch`] before any
/// cell is evaluated. Cells where any covariate is no-data become NaN.
pub fn predict_stack(model: &dyn SuitabilityModel, stack: &RasterStack, context: &str) -> Result<Raster<f64>> {
    let wanted = model.covariates();
    let extra: Vec<&str> = stack
        .band_names()
        .into_iter()
        .filter(|b| !wanted.iter().any(|w| w == b))
        .collect();
    if !extra.is_empty() {
        debug!(?extra, "dropping bands the model does not use");
    }

    let selected = stack.select(wanted, context)?;
    let grid = selected
        .grid()
        .cloned()
        .ok_or_else(|| Error::configuration("model", "model declares no covariates"))?;
    let bands: Vec<&Raster<f64>> = selected.bands().iter().map(|b| b.raster.as_ref()).collect();

    let cols = grid.cols;
    let data: Vec<f64> = (0..grid.rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            let mut values = vec![0.0; bands.len()];
            for (col, out) in row_data.iter_mut().enumerate() {
                let complete = bands.iter().zip(values.iter_mut()).all(|(band, slot)| {
                    band.value_at(row, col).map(|v| *slot = v).is_some()
                });
                if complete {
                    *out = model.evaluate(&values);
                }
            }
            row_data
        })
        .collect();

    let mut output = Raster::from_vec(data, grid.rows, grid.cols)?;
    output.set_transform(grid.transform);
    output.set_crs(grid.crs);
    output.set_nodata(Some(f64::NAN));
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use habitat_core::GeoTransform;
    use std::sync::Arc;

    fn term(name: &str, coefficient: f64) -> Term {
        Term {
            covariate: name.into(),
            coefficient,
            clamp: None,
        }
    }

    fn band(value: f64) -> Arc<Raster<f64>> {
        let mut r = Raster::filled(2, 2, value);
        r.set_transform(GeoTransform::new(0.0, 2.0, 1.0, -1.0));
        Arc::new(r)
    }

    #[test]
    fn test_output_transforms() {
        let raw = LinearSuitabilityModel::new(0.0, vec![term("ppt", 1.0)], OutputTransform::Raw, 0.0).unwrap();
        assert_relative_eq!(raw.evaluate(&[0.0]), 1.0);

        let logistic =
            LinearSuitabilityModel::new(0.0, vec![term("ppt", 1.0)], OutputTransform::Logistic, 0.0).unwrap();
        assert_relative_eq!(logistic.evaluate(&[0.0]), 0.5);

        let cloglog =
            LinearSuitabilityModel::new(0.0, vec![term("ppt", 1.0)], OutputTransform::Cloglog, 0.0).unwrap();
        assert_relative_eq!(cloglog.evaluate(&[0.0]), 1.0 - (-1.0f64).exp());
    }

    #[test]
    fn test_clamping() {
        let mut t = term("ppt", 1.0);
        t.clamp = Some((0.0, 2.0));
        let model = LinearSuitabilityModel::new(0.0, vec![t], OutputTransform::Raw, 0.0).unwrap();
        assert_relative_eq!(model.evaluate(&[10.0]), 2.0f64.exp());
    }

    #[test]
    fn test_model_json() {
        let json = r#"{
            "intercept": -1.0,
            "terms": [
                {"covariate": "ppt", "coefficient": 0.01, "clamp": [0.0, 400.0]},
                {"covariate": "om", "coefficient": 0.2}
            ],
            "transform": "cloglog",
            "entropy": 5.2
        }"#;
        let model: LinearSuitabilityModel = serde_json::from_str(json).unwrap();
        assert_eq!(model.covariates(), ["ppt".to_string(), "om".to_string()]);
        assert_eq!(model.transform(), OutputTransform::Cloglog);

        let dup = r#"{"intercept": 0.0, "terms": [
            {"covariate": "ppt", "coefficient": 1.0},
            {"covariate": "ppt", "coefficient": 2.0}
        ]}"#;
        assert!(serde_json::from_str::<LinearSuitabilityModel>(dup).is_err());
    }

    #[test]
    fn test_predict_matches_by_name() {
        let mut stack = RasterStack::new();
        stack.push("om", band(2.0)).unwrap();
        stack.push("cwd", band(100.0)).unwrap();
        stack.push("ppt", band(3.0)).unwrap();

        // Declared order differs from band order; cwd is unused
        let model = LinearSuitabilityModel::new(
            0.0,
            vec![term("ppt", 1.0), term("om", 10.0)],
            OutputTransform::Raw,
            0.0,
        )
        .unwrap();
        let out = predict_stack(&model, &stack, "test").unwrap();
        assert_relative_eq!(out.get(1, 1).unwrap(), 23.0f64.exp());
    }

    #[test]
    fn test_missing_covariates_fail_before_evaluation() {
        let mut stack = RasterStack::new();
        stack.push("ppt", band(3.0)).unwrap();
        let model = LinearSuitabilityModel::new(
            0.0,
            vec![term("ppt", 1.0), term("om", 1.0), term("tmx", 1.0)],
            OutputTransform::Raw,
            0.0,
        )
        .unwrap();
        match predict_stack(&model, &stack, "test") {
            Err(Error::SchemaMismatch { missing, .. }) => assert_eq!(missing, vec!["om", "tmx"]),
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_nodata_cells() {
        let mut ppt = Raster::filled(2, 2, 1.0);
        ppt.set_transform(GeoTransform::new(0.0, 2.0, 1.0, -1.0));
        ppt.set(0, 1, f64::NAN).unwrap();
        let mut stack = RasterStack::new();
        stack.push("ppt", Arc::new(ppt)).unwrap();

        let model = LinearSuitabilityModel::new(0.0, vec![term("ppt", 1.0)], OutputTransform::Logistic, 0.0).unwrap();
        let out = predict_stack(&model, &stack, "test").unwrap();
        assert_eq!(out.value_at(0, 1), None);
        assert!(out.value_at(0, 0).is_some());
    }

    #[test]
    fn test_output_name() {
        assert_eq!(
            PredictionMapper::output_name("lupinus", "historical", Month::Apr),
            "lupinus_historical_apr.tif"
        );
    }
}
