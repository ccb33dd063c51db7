//! Map-unit rasters to soil property layers on the climate grid

use crate::maybe_rayon::*;
use crate::resample::{resample_to_grid, ResampleMethod};
use habitat_core::io::write_geotiff;
use habitat_core::raster::{GridSpec, Raster};
use habitat_core::soil::{Codebook, LayerKind, MapUnitKey, SoilAttribute, SoilTable};
use habitat_core::store::SoilLayerName;
use habitat_core::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Turns a map-unit key raster into per-attribute layers.
///
/// Categorical attributes are carried as integer codes: drainage class and
/// taxonomy kind as their ordinal codes, taxon names through a codebook
/// built once from the whole table.
#[derive(Debug, Clone)]
pub struct SoilRasterizer<'a> {
    table: &'a SoilTable,
    codebook: Codebook,
}

impl<'a> SoilRasterizer<'a> {
    pub fn new(table: &'a SoilTable) -> Self {
        Self {
            table,
            codebook: table.taxon_codebook(),
        }
    }

    pub fn codebook(&self) -> &Codebook {
        &self.codebook
    }

    /// Replace each map-unit key with the attribute value, on the map-unit
    /// grid. Keys missing from the table and empty values become NaN.
    pub fn reclassify(&self, mapunits: &Raster<f64>, attribute: SoilAttribute) -> Result<Raster<f64>> {
        let lookup: HashMap<MapUnitKey, f64> = self
            .table
            .rows()
            .iter()
            .filter_map(|row| {
                self.table
                    .value(row.mukey, attribute, &self.codebook)
                    .map(|v| (row.mukey, v))
            })
            .collect();

        let (rows, cols) = mapunits.shape();
        let data: Vec<f64> = (0..rows)
            .into_par_iter()
            .flat_map(|row| {
                let mut row_data = vec![f64::NAN; cols];
                for (col, out) in row_data.iter_mut().enumerate() {
                    let Some(value) = mapunits.value_at(row, col) else {
                        continue;
                    };
                    if let Some(&v) = map_unit_key(value).and_then(|k| lookup.get(&k)) {
                        *out = v;
                    }
                }
                row_data
            })
            .collect();

        let mut output = mapunits.with_data(data)?;
        output.set_nodata(Some(f64::NAN));
        Ok(output)
    }

    /// Reclassify, then resample onto `reference`.
    ///
    /// Continuous attributes are resampled bilinearly, categorical ones by
    /// nearest neighbor. Asking for continuous treatment of a categorical
    /// attribute is a configuration error.
    pub fn rasterize(
        &self,
        mapunits: &Raster<f64>,
        attribute: SoilAttribute,
        kind: LayerKind,
        reference: &GridSpec,
    ) -> Result<Raster<f64>> {
        if kind == LayerKind::Continuous && attribute.kind() == LayerKind::Categorical {
            return Err(Error::configuration(
                "kind",
                format!("{attribute} is categorical and cannot be interpolated"),
            ));
        }
        let values = self.reclassify(mapunits, attribute)?;
        debug!(%attribute, ?kind, target = %reference, "resampling soil layer");
        resample_to_grid(&values, reference, ResampleMethod::from(kind))
    }

    /// Write a rasterized layer as `{prefix}_{variable}_{res}_{region}_{vintage}.tif`,
    /// plus a `.codes.json` sidecar for taxon names.
    pub fn write_layer(
        &self,
        raster: &Raster<f64>,
        attribute: SoilAttribute,
        name: &SoilLayerName,
        dir: &Path,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(name.file_name());
        write_geotiff(raster, &path)?;
        if attribute == SoilAttribute::DominantTaxonName {
            self.codebook.write_json(Codebook::sidecar_path(&path))?;
        }
        info!(%attribute, path = %path.display(), "wrote soil layer");
        Ok(path)
    }
}

/// Map-unit key stored in a raster cell, if the value is a whole number
fn map_unit_key(value: f64) -> Option<MapUnitKey> {
    (value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64).then_some(value as MapUnitKey)
}
