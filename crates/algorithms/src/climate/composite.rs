//! Cell-wise reduction of grid-aligned layers

use crate::maybe_rayon::*;
use habitat_core::raster::Raster;
use habitat_core::time::Method;
use habitat_core::{Algorithm, Error, Result};

/// Rule for cells where some inputs carry no data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodataPolicy {
    /// Any no-data input makes the output cell no-data
    #[default]
    RequireAll,
    /// Reduce over the valid inputs; no-data only when none is valid
    SkipMissing,
}

/// Parameters for [`Composite`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeParams {
    pub method: Method,
    pub nodata: NodataPolicy,
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self {
            method: Method::Mean,
            nodata: NodataPolicy::RequireAll,
        }
    }
}

/// Cell-wise mean or sum of a set of layers
#[derive(Debug, Clone, Default)]
pub struct Composite;

impl Algorithm for Composite {
    type Input = Vec<Raster<f64>>;
    type Output = Raster<f64>;
    type Params = CompositeParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Composite"
    }

    fn description(&self) -> &'static str {
        "Cell-wise mean or sum of grid-aligned layers"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        composite(&input, params)
    }
}

/// Reduce `layers` cell by cell.
///
/// All layers must share one grid. Output no-data is NaN.
pub fn composite(layers: &[Raster<f64>], params: CompositeParams) -> Result<Raster<f64>> {
    let first = layers
        .first()
        .ok_or_else(|| Error::Other("composite needs at least one layer".into()))?;
    let grid = first.grid();
    for (i, layer) in layers.iter().enumerate().skip(1) {
        grid.ensure_aligned(&layer.grid(), &format!("composite input {i}"))?;
    }

    let (rows, cols) = first.shape();
    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            let mut cell = Vec::with_capacity(layers.len());
            for (col, out) in row_data.iter_mut().enumerate() {
                cell.clear();
                cell.extend(layers.iter().filter_map(|l| l.value_at(row, col)));
                *out = reduce_cell(&cell, layers.len(), params).unwrap_or(f64::NAN);
            }
            row_data
        })
        .collect();

    let mut output = first.with_data(data)?;
    output.set_nodata(Some(f64::NAN));
    Ok(output)
}

fn reduce_cell(valid: &[f64], expected: usize, params: CompositeParams) -> Option<f64> {
    if valid.is_empty() {
        return None;
    }
    if params.nodata == NodataPolicy::RequireAll && valid.len() < expected {
        return None;
    }
    let sum: f64 = valid.iter().sum();
    Some(match params.method {
        Method::Sum => sum,
        Method::Mean => sum / valid.len() as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use habitat_core::GeoTransform;

    fn layer(values: Vec<f64>) -> Raster<f64> {
        let mut r = Raster::from_vec(values, 2, 2).unwrap();
        r.set_transform(GeoTransform::new(0.0, 2.0, 1.0, -1.0));
        r.set_nodata(Some(-9999.0));
        r
    }

    #[test]
    fn test_sum_and_mean() {
        let layers = vec![
            layer(vec![10.0, 1.0, 2.0, 3.0]),
            layer(vec![20.0, 1.0, 2.0, 3.0]),
            layer(vec![30.0, 1.0, 2.0, -9999.0]),
        ];
        let params = CompositeParams { method: Method::Sum, ..Default::default() };
        let sum = composite(&layers, params).unwrap();
        assert_relative_eq!(sum.get(0, 0).unwrap(), 60.0);
        assert_eq!(sum.value_at(1, 1), None);

        let mean = Composite.execute_default(layers.clone()).unwrap();
        assert_relative_eq!(mean.get(0, 0).unwrap(), 20.0);
        assert_relative_eq!(mean.get(1, 0).unwrap(), 2.0);

        let partial = composite(
            &layers,
            CompositeParams { method: Method::Mean, nodata: NodataPolicy::SkipMissing },
        )
        .unwrap();
        assert_relative_eq!(partial.get(1, 1).unwrap(), 3.0);
    }

    #[test]
    fn test_misaligned_inputs() {
        let mut shifted = layer(vec![1.0; 4]);
        shifted.set_transform(GeoTransform::new(5.0, 2.0, 1.0, -1.0));
        let err = composite(&[layer(vec![1.0; 4]), shifted], CompositeParams::default());
        assert!(matches!(err, Err(Error::GridMismatch { .. })));
    }
}
