//! Multi-band stacks of grid-aligned layers

use crate::error::{Error, Result};
use crate::raster::{GridSpec, Raster};
use crate::crs::CRS;
use std::sync::Arc;

/// One named band of a [`RasterStack`]
#[derive(Debug, Clone)]
pub struct Band {
    pub name: String,
    pub raster: Arc<Raster<f64>>,
}

/// Ordered, named bands that share one grid.
///
/// Bands are reference-counted so static layers (soil) can be loaded once and
/// appear in the stack of every period.
#[derive(Debug, Clone, Default)]
pub struct RasterStack {
    grid: Option<GridSpec>,
    bands: Vec<Band>,
}

impl RasterStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a band. Fails on a duplicate name or a grid that differs from
    /// the bands already present.
    pub fn push(&mut self, name: impl Into<String>, raster: Arc<Raster<f64>>) -> Result<()> {
        let name = name.into();
        if self.bands.iter().any(|b| b.name == name) {
            return Err(Error::DuplicateKey {
                table: "raster stack".into(),
                key: name,
            });
        }

        let grid = raster.grid();
        match &self.grid {
            Some(expected) => expected.ensure_aligned(&grid, &name)?,
            None => self.grid = Some(grid),
        }
        self.bands.push(Band { name, raster });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn grid(&self) -> Option<&GridSpec> {
        self.grid.as_ref()
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.grid.as_ref().and_then(|g| g.crs.as_ref())
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn band(&self, name: &str) -> Option<&Raster<f64>> {
        self.bands
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.raster.as_ref())
    }

    /// Nearest-cell values of every band at (x, y), in band order.
    ///
    /// Coordinates must already be in the stack's CRS.
    pub fn sample(&self, x: f64, y: f64) -> Vec<Option<f64>> {
        self.bands.iter().map(|b| b.raster.sample(x, y)).collect()
    }

    /// Whether (x, y) falls inside the shared extent
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.bands.first().is_some_and(|b| b.raster.contains(x, y))
    }

    /// New stack holding exactly `names`, in that order.
    ///
    /// Fails with [`Error::SchemaMismatch`] listing every name that is absent.
    pub fn select(&self, names: &[String], context: &str) -> Result<RasterStack> {
        let missing: Vec<String> = names
            .iter()
            .filter(|n| self.band(n).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::SchemaMismatch {
                context: context.to_string(),
                missing,
            });
        }

        let mut out = RasterStack::new();
        for name in names {
            if let Some(band) = self.bands.iter().find(|b| &b.name == name) {
                out.push(name.clone(), Arc::clone(&band.raster))?;
            }
        }
        Ok(out)
    }
}
