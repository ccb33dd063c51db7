//! Soil survey aggregation and rasterization

pub mod aggregate;
pub mod rasterize;

pub use aggregate::{
    aggregate, dominant_component, SoilAggregateParams, SoilAggregateSummary, SoilAggregation,
    SoilAggregator, SoilSurvey,
};
pub use rasterize::SoilRasterizer;
