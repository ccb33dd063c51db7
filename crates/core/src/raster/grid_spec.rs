//! Grid descriptions shared by rasters that must line up cell for cell

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::GeoTransform;
use std::fmt;

/// Relative tolerance (fraction of a cell) when comparing transforms
pub const GRID_TOLERANCE: f64 = 1e-6;

/// Shape, transform and CRS of a raster grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    pub crs: Option<CRS>,
}

impl GridSpec {
    pub fn new(rows: usize, cols: usize, transform: GeoTransform, crs: Option<CRS>) -> Self {
        Self {
            rows,
            cols,
            transform,
            crs,
        }
    }

    /// Whether two grids share shape, transform and CRS.
    ///
    /// A missing CRS on one side is accepted; two different known CRSs are not.
    pub fn aligned_with(&self, other: &GridSpec) -> bool {
        let crs_ok = match (&self.crs, &other.crs) {
            (Some(a), Some(b)) => a.is_equivalent(b),
            _ => true,
        };
        self.rows == other.rows
            && self.cols == other.cols
            && crs_ok
            && self.transform.approx_eq(&other.transform, GRID_TOLERANCE)
    }

    /// Fail with [`Error::GridMismatch`] unless `other` is aligned with `self`.
    pub fn ensure_aligned(&self, other: &GridSpec, layer: &str) -> Result<()> {
        if self.aligned_with(other) {
            Ok(())
        } else {
            Err(Error::GridMismatch {
                layer: layer.to_string(),
                expected: self.to_string(),
                actual: other.to_string(),
            })
        }
    }

    /// Map coordinates of the center of cell (row, col)
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.transform.pixel_to_geo(col, row)
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for GridSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.rows, self.cols, self.transform)?;
        match &self.crs {
            Some(crs) => write!(f, " {}", crs),
            None => write!(f, " (no CRS)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        let a = GridSpec::new(4, 5, GeoTransform::new(0.0, 4.0, 1.0, -1.0), Some(CRS::from_epsg(3310)));
        let mut b = a.clone();
        assert!(a.aligned_with(&b));

        b.crs = None;
        assert!(a.aligned_with(&b));

        b.crs = Some(CRS::from_epsg(5070));
        assert!(!a.aligned_with(&b));

        let c = GridSpec::new(4, 6, a.transform, a.crs.clone());
        assert!(matches!(
            a.ensure_aligned(&c, "ppt2018jan"),
            Err(Error::GridMismatch { .. })
        ));
    }
}
