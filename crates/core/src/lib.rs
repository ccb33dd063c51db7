//! # Habitat Core
//!
//! Core types, traits and I/O for the habitat environmental-data pipeline.
//!
//! This crate provides:
//! - `Raster<T>`, `GeoTransform`, `GridSpec`: georeferenced grids
//! - `CRS` and point reprojection
//! - GeoTIFF and CSV I/O
//! - `RasterStore`: key index over name-encoded layer files
//! - `TemporalIndexer`: the October–September water-year calendar
//! - Observations, soil survey records and feature tables
//! - `PipelineConfig` and the error taxonomy

pub mod config;
pub mod crs;
pub mod error;
pub mod feature;
pub mod io;
pub mod observation;
pub mod raster;
pub mod soil;
pub mod store;
pub mod time;

pub use config::PipelineConfig;
pub use crs::CRS;
pub use error::{Error, ErrorKind, Result};
pub use raster::{GeoTransform, GridSpec, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::crs::CRS;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::observation::Observation;
    pub use crate::raster::{GeoTransform, GridSpec, Raster, RasterElement};
    pub use crate::store::{LayerKey, RasterStack, RasterStore};
    pub use crate::time::{Method, Month, Period, Season, TemporalIndexer, WaterYearRange};
    pub use crate::Algorithm;
}

/// Core trait for pipeline stages.
///
/// A stage is a pure transformation of its input according to parameters;
/// file I/O stays with the caller.
pub trait Algorithm {
    /// Input type for the stage
    type Input;
    /// Output type for the stage
    type Output;
    /// Parameters controlling stage behavior
    type Params: Default;
    /// Error type for stage execution
    type Error: std::error::Error;

    /// Returns the stage name
    fn name(&self) -> &'static str;

    /// Returns a description of what the stage does
    fn description(&self) -> &'static str;

    /// Execute the stage
    fn execute(&self, input: Self::Input, params: Self::Params) -> std::result::Result<Self::Output, Self::Error>;

    /// Execute with default parameters
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
