//! Resampling a raster onto another grid
//!
//! Every target cell center is mapped back into the source CRS and read
//! from the source grid, so the output lines up cell for cell with the
//! reference.

use crate::maybe_rayon::*;
use habitat_core::crs::transform_point;
use habitat_core::raster::{GridSpec, Raster};
use habitat_core::soil::LayerKind;
use habitat_core::{Algorithm, Error, Result};

/// Resampling kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleMethod {
    /// Value of the source cell containing the point; keeps categories intact
    #[default]
    Nearest,
    /// Distance-weighted mean of the four surrounding cell centers
    Bilinear,
}

impl From<LayerKind> for ResampleMethod {
    fn from(kind: LayerKind) -> Self {
        match kind {
            LayerKind::Continuous => ResampleMethod::Bilinear,
            LayerKind::Categorical => ResampleMethod::Nearest,
        }
    }
}

/// Parameters for [`Resample`]
#[derive(Debug, Clone, Default)]
pub struct ResampleParams {
    /// Grid to resample onto; `None` keeps the source grid
    pub target: Option<GridSpec>,
    pub method: ResampleMethod,
}

/// Resampling stage
#[derive(Debug, Clone, Default)]
pub struct Resample;

impl Algorithm for Resample {
    type Input = Raster<f64>;
    type Output = Raster<f64>;
    type Params = ResampleParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Resample"
    }

    fn description(&self) -> &'static str {
        "Resample a raster onto a reference grid (nearest or bilinear)"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        match params.target {
            Some(target) => resample_to_grid(&input, &target, params.method),
            None => Ok(input),
        }
    }
}

/// Resample `source` onto `target`.
///
/// Cells whose center falls outside the source, fails to reproject, or has
/// no valid neighbors become NaN. A missing CRS on either side is taken to
/// mean both grids share one.
pub fn resample_to_grid(source: &Raster<f64>, target: &GridSpec, method: ResampleMethod) -> Result<Raster<f64>> {
    let src_grid = source.grid();
    if src_grid.aligned_with(target) {
        let mut out = source.clone();
        out.set_crs(target.crs.or(src_grid.crs));
        return Ok(out);
    }

    let reproject = match (&target.crs, &src_grid.crs) {
        (Some(t), Some(s)) if !t.is_equivalent(s) => Some((*t, *s)),
        _ => None,
    };

    let cols = target.cols;
    let data: Vec<f64> = (0..target.rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for (col, out) in row_data.iter_mut().enumerate() {
                let (x, y) = target.cell_center(row, col);
                let point = match reproject {
                    Some((t, s)) => match transform_point(&t, &s, x, y) {
                        Ok(p) => p,
                        Err(_) => continue,
                    },
                    None => (x, y),
                };
                let value = match method {
                    ResampleMethod::Nearest => source.sample(point.0, point.1),
                    ResampleMethod::Bilinear => bilinear(source, point.0, point.1),
                };
                *out = value.unwrap_or(f64::NAN);
            }
            row_data
        })
        .collect();

    let mut output = Raster::from_vec(data, target.rows, target.cols)?;
    output.set_transform(target.transform);
    output.set_crs(target.crs.or(src_grid.crs));
    output.set_nodata(Some(f64::NAN));
    Ok(output)
}

/// Bilinear interpolation between cell centers.
///
/// Neighbors that are outside the grid or no-data are dropped and the
/// remaining weights renormalized. Points outside the source extent give
/// `None`.
fn bilinear(source: &Raster<f64>, x: f64, y: f64) -> Option<f64> {
    if !source.contains(x, y) {
        return None;
    }
    let (col, row) = source.geo_to_pixel(x, y);
    let (fx, fy) = (col - 0.5, row - 0.5);
    let (c0, r0) = (fx.floor(), fy.floor());
    let (dx, dy) = (fx - c0, fy - r0);

    let mut sum = 0.0;
    let mut weight = 0.0;
    for (dr, wy) in [(0.0, 1.0 - dy), (1.0, dy)] {
        for (dc, wx) in [(0.0, 1.0 - dx), (1.0, dx)] {
            let (r, c) = (r0 + dr, c0 + dc);
            let w = wx * wy;
            if r < 0.0 || c < 0.0 || w <= 0.0 {
                continue;
            }
            if let Some(v) = source.value_at(r as usize, c as usize) {
                sum += v * w;
                weight += w;
            }
        }
    }
    (weight > 0.0).then(|| sum / weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use habitat_core::{GeoTransform, CRS};

    fn gradient() -> Raster<f64> {
        // Values equal to the column index, 1 unit cells, origin (0, 4)
        let mut r = Raster::from_vec((0..16).map(|i| (i % 4) as f64).collect(), 4, 4).unwrap();
        r.set_transform(GeoTransform::new(0.0, 4.0, 1.0, -1.0));
        r
    }

    #[test]
    fn test_bilinear_between_centers() {
        let src = gradient();
        // Target cell centered at x = 1.0, halfway between columns 0 and 1
        let target = GridSpec::new(1, 1, GeoTransform::new(0.5, 2.5, 1.0, -1.0), None);
        let out = resample_to_grid(&src, &target, ResampleMethod::Bilinear).unwrap();
        assert_relative_eq!(out.get(0, 0).unwrap(), 0.5);

        let near = resample_to_grid(&src, &target, ResampleMethod::Nearest).unwrap();
        assert_relative_eq!(near.get(0, 0).unwrap(), 1.0);
    }

    #[test]
    fn test_bilinear_renormalizes_around_nodata() {
        let mut src = gradient();
        src.set(1, 0, f64::NAN).unwrap();
        src.set(2, 0, f64::NAN).unwrap();
        let target = GridSpec::new(1, 1, GeoTransform::new(0.5, 2.5, 1.0, -1.0), None);
        let out = resample_to_grid(&src, &target, ResampleMethod::Bilinear).unwrap();
        assert_relative_eq!(out.get(0, 0).unwrap(), 1.0);
    }

    #[test]
    fn test_outside_source_is_nodata() {
        let src = gradient();
        // Centers at x = 3 (inside) and x = 5 (outside)
        let target = GridSpec::new(2, 2, GeoTransform::new(2.0, 4.0, 2.0, -2.0), None);
        let out = resample_to_grid(&src, &target, ResampleMethod::Nearest).unwrap();
        assert_relative_eq!(out.get(0, 0).unwrap(), 3.0);
        assert_eq!(out.value_at(0, 1), None);
        assert_eq!(out.value_at(1, 1), None);
    }

    #[test]
    fn test_reprojected_target() {
        // Source in UTM 10N around a known point; target in geographic degrees
        let utm = CRS::from_epsg(32610);
        let (x, y) = transform_point(&CRS::wgs84(), &utm, -122.0, 38.0).unwrap();
        let mut src = Raster::filled(10, 10, 7.0);
        src.set_transform(GeoTransform::new(x - 5000.0, y + 5000.0, 1000.0, -1000.0));
        src.set_crs(Some(utm));

        let target = GridSpec::new(
            2,
            2,
            GeoTransform::new(-122.01, 38.01, 0.01, -0.01),
            Some(CRS::wgs84()),
        );
        let out = resample_to_grid(&src, &target, ResampleMethod::Bilinear).unwrap();
        assert_eq!(out.crs(), Some(&CRS::wgs84()));
        assert!(out.data().iter().all(|&v| (v - 7.0).abs() < 1e-9));
    }

    #[test]
    fn test_algorithm_trait() {
        let src = gradient();
        let params = ResampleParams {
            target: Some(GridSpec::new(2, 2, GeoTransform::new(0.0, 4.0, 2.0, -2.0), None)),
            method: ResampleMethod::Nearest,
        };
        let out = Resample.execute(src, params).unwrap();
        assert_eq!(out.shape(), (2, 2));
    }
}
