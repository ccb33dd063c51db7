//! Affine georeferencing for raster grids

use serde::{Deserialize, Serialize};
use std::fmt;

/// Affine transformation between cell indices and map coordinates.
///
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// Climate and soil grids are north-up, so the rotation terms are zero and
/// `pixel_height` is negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Usually negative
    pub pixel_height: f64,
    pub row_rotation: f64,
    pub col_rotation: f64,
}

impl GeoTransform {
    /// North-up transform with no rotation
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    /// Map coordinates of the center of cell (col, row)
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        self.fractional_to_geo(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Map coordinates of a fractional cell position (0.0 = upper-left edge)
    pub fn fractional_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.origin_x + col * self.pixel_width + row * self.row_rotation;
        let y = self.origin_y + col * self.col_rotation + row * self.pixel_height;
        (x, y)
    }

    /// Fractional cell position of a map coordinate.
    ///
    /// Use `.floor()` on the result to get the containing cell.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation;
        if det.abs() < 1e-12 {
            return (f64::NAN, f64::NAN);
        }

        let dx = x - self.origin_x;
        let dy = y - self.origin_y;

        let col = (self.pixel_height * dx - self.row_rotation * dy) / det;
        let row = (-self.col_rotation * dx + self.pixel_width * dy) / det;
        (col, row)
    }

    /// Cell containing (x, y) in a grid of `rows` x `cols`, if any.
    ///
    /// Cells are half-open: a point on the right or bottom edge of the grid
    /// is outside.
    pub fn cell_of(&self, x: f64, y: f64, rows: usize, cols: usize) -> Option<(usize, usize)> {
        let (col, row) = self.geo_to_pixel(x, y);
        if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
            return None;
        }
        let (col, row) = (col.floor() as usize, row.floor() as usize);
        (row < rows && col < cols).then_some((row, col))
    }

    /// Cell size along x (assumes square, unrotated cells)
    pub fn cell_size(&self) -> f64 {
        self.pixel_width.abs()
    }

    /// Bounding box (min_x, min_y, max_x, max_y) of a `width` x `height` grid
    pub fn bounds(&self, width: usize, height: usize) -> (f64, f64, f64, f64) {
        let corners = [
            self.fractional_to_geo(0.0, 0.0),
            self.fractional_to_geo(width as f64, 0.0),
            self.fractional_to_geo(0.0, height as f64),
            self.fractional_to_geo(width as f64, height as f64),
        ];

        corners.iter().fold(
            (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
            |(min_x, min_y, max_x, max_y), &(x, y)| {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            },
        )
    }

    /// Equality up to a tolerance expressed as a fraction of the cell size.
    pub fn approx_eq(&self, other: &GeoTransform, rel_tol: f64) -> bool {
        let tol = self.cell_size().max(other.cell_size()).max(f64::MIN_POSITIVE) * rel_tol;
        [
            (self.origin_x, other.origin_x),
            (self.origin_y, other.origin_y),
            (self.pixel_width, other.pixel_width),
            (self.pixel_height, other.pixel_height),
            (self.row_rotation, other.row_rotation),
            (self.col_rotation, other.col_rotation),
        ]
        .iter()
        .all(|(a, b)| (a - b).abs() <= tol)
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

impl fmt::Display for GeoTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "origin ({}, {}) cell ({}, {})",
            self.origin_x, self.origin_y, self.pixel_width, self.pixel_height
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pixel_to_geo_roundtrip() {
        let gt = GeoTransform::new(-374_495.84, 592_636.69, 270.0, -270.0);

        let (x, y) = gt.pixel_to_geo(5, 10);
        let (col, row) = gt.geo_to_pixel(x, y);

        assert_relative_eq!(col, 5.5, epsilon = 1e-9);
        assert_relative_eq!(row, 10.5, epsilon = 1e-9);
    }

    #[test]
    fn test_cell_of_edges() {
        let gt = GeoTransform::new(0.0, 10.0, 1.0, -1.0);
        assert_eq!(gt.cell_of(0.0, 10.0, 10, 10), Some((0, 0)));
        assert_eq!(gt.cell_of(9.99, 0.01, 10, 10), Some((9, 9)));
        assert_eq!(gt.cell_of(10.0, 5.0, 10, 10), None);
        assert_eq!(gt.cell_of(-0.01, 5.0, 10, 10), None);
    }

    #[test]
    fn test_bounds() {
        let gt = GeoTransform::new(0.0, 100.0, 1.0, -1.0);
        let (min_x, min_y, max_x, max_y) = gt.bounds(100, 100);

        assert_relative_eq!(min_x, 0.0);
        assert_relative_eq!(min_y, 0.0);
        assert_relative_eq!(max_x, 100.0);
        assert_relative_eq!(max_y, 100.0);
    }

    #[test]
    fn test_approx_eq_tolerates_float_noise() {
        let a = GeoTransform::new(-374_495.8364, 592_636.6658, 270.0, -270.0);
        let b = GeoTransform::new(-374_495.8364 + 1e-7, 592_636.6658, 270.0, -270.0);
        assert!(a.approx_eq(&b, 1e-6));
        let c = GeoTransform::new(-374_225.8364, 592_636.6658, 270.0, -270.0);
        assert!(!a.approx_eq(&c, 1e-6));
    }
}
