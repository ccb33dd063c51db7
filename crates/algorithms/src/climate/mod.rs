//! Derived climate layers: seasonal composites and normals

pub mod composite;
pub mod normals;
pub mod seasonal;

pub use composite::{composite, Composite, CompositeParams, NodataPolicy};
pub use normals::NormalsBuilder;
pub use seasonal::{SeasonalAggregator, SeasonalRequest};
