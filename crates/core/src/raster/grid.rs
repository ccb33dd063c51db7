//! Georeferenced raster grid

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, GridSpec, RasterElement};
use ndarray::Array2;

/// A georeferenced 2D grid of cell values.
///
/// `Raster<T>` stores values in row-major order together with the affine
/// transform, an optional CRS and an optional no-data value. Every climate,
/// composite, soil and suitability layer in the pipeline is a `Raster<f64>`.
///
/// # Example
///
/// ```ignore
/// use habitat_core::Raster;
///
/// let mut ppt: Raster<f64> = Raster::filled(4, 4, 10.0);
/// ppt.set(1, 2, 42.0)?;
/// assert_eq!(ppt.value_at(1, 2), Some(42.0));
/// ```
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    data: Array2<T>,
    transform: GeoTransform,
    crs: Option<CRS>,
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Create a new raster filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    /// Create a new raster filled with a specific value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Create a raster on an existing grid, filled with a value
    pub fn on_grid(grid: &GridSpec, value: T) -> Self {
        let mut raster = Self::filled(grid.rows, grid.cols, value);
        raster.transform = grid.transform;
        raster.crs = grid.crs.clone();
        raster
    }

    /// Create a raster from row-major data
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;
        Ok(Self::from_array(array))
    }

    /// Create a raster from an ndarray
    pub fn from_array(data: Array2<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
        }
    }

    /// Replace the cell values while keeping the grid.
    pub fn with_data<U: RasterElement>(&self, data: Vec<U>) -> Result<Raster<U>> {
        let (rows, cols) = self.shape();
        let mut out = Raster::from_vec(data, rows, cols)?;
        out.transform = self.transform;
        out.crs = self.crs.clone();
        Ok(out)
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    /// Value at (row, col), `None` when out of bounds or no-data
    pub fn value_at(&self, row: usize, col: usize) -> Option<T> {
        self.data
            .get((row, col))
            .copied()
            .filter(|v| !self.is_nodata(*v))
    }

    /// Set value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        let (rows, cols) = self.shape();
        match self.data.get_mut((row, col)) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Error::IndexOutOfBounds { row, col, rows, cols }),
        }
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    pub fn set_crs(&mut self, crs: Option<CRS>) {
        self.crs = crs;
    }

    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }

    /// Grid description (shape, transform, CRS) without the data
    pub fn grid(&self) -> GridSpec {
        GridSpec {
            rows: self.rows(),
            cols: self.cols(),
            transform: self.transform,
            crs: self.crs.clone(),
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.transform.cell_size()
    }

    /// Geographic bounds (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols(), self.rows())
    }

    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        self.transform.pixel_to_geo(col, row)
    }

    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        self.transform.geo_to_pixel(x, y)
    }

    /// Whether (x, y) falls inside the grid extent
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.transform.cell_of(x, y, self.rows(), self.cols()).is_some()
    }

    /// Nearest-cell sample at map coordinates (x, y), in the raster's CRS.
    ///
    /// Returns `None` outside the extent or on a no-data cell; no
    /// interpolation across cells.
    pub fn sample(&self, x: f64, y: f64) -> Option<T> {
        let (row, col) = self.transform.cell_of(x, y, self.rows(), self.cols())?;
        self.value_at(row, col)
    }

    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }

    /// Min, max, mean and count of valid cells
    pub fn statistics(&self) -> RasterStatistics {
        let mut stats = RasterStatistics {
            min: None,
            max: None,
            mean: None,
            valid_count: 0,
            nodata_count: 0,
        };
        let mut sum = 0.0;

        for v in self.data.iter().filter(|v| !self.is_nodata(**v)) {
            let Some(v) = v.to_f64() else { continue };
            stats.min = Some(stats.min.map_or(v, |m: f64| m.min(v)));
            stats.max = Some(stats.max.map_or(v, |m: f64| m.max(v)));
            sum += v;
            stats.valid_count += 1;
        }

        if stats.valid_count > 0 {
            stats.mean = Some(sum / stats.valid_count as f64);
        }
        stats.nodata_count = self.len() - stats.valid_count;
        stats
    }
}

/// Basic statistics for a raster
#[derive(Debug, Clone)]
pub struct RasterStatistics {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub valid_count: usize,
    pub nodata_count: usize,
}
