//! # Habitat Algorithms
//!
//! Pipeline stages for habitat.
//!
//! ## Stages
//!
//! - **climate**: seasonal composites and climatological normals
//! - **soil**: survey aggregation to map units and rasterization onto the climate grid
//! - **resample**: nearest and bilinear resampling onto a reference grid
//! - **extraction**: per-observation feature rows over a water-year range
//! - **prediction**: suitability maps from a fitted model

pub mod climate;
pub mod extraction;
pub(crate) mod maybe_rayon;
pub mod prediction;
pub mod report;
pub mod resample;
pub mod schema;
pub mod soil;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::climate::{composite, NormalsBuilder, SeasonalAggregator, SeasonalRequest};
    pub use crate::extraction::{Extraction, ExtractionEngine};
    pub use crate::prediction::{
        predict_stack, LinearSuitabilityModel, OutputTransform, PredictionMapper, SuitabilityModel,
    };
    pub use crate::report::{FailureLog, RunReport};
    pub use crate::resample::{resample_to_grid, ResampleMethod};
    pub use crate::schema::{CovariateTime, LayerSchema};
    pub use crate::soil::{aggregate, SoilAggregator, SoilRasterizer, SoilSurvey};
    pub use habitat_core::prelude::*;
}
