//! GeoTIFF reading/writing with the `tiff` crate.
//!
//! Reads the georeferencing the pipeline relies on: pixel scale and tiepoint
//! (transform), the GeoKey directory (EPSG code) and GDAL's no-data tag.
//! Writes Float32 with the same tags; no-data cells are written as NaN.
//! Each call opens and closes its own file handle.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Read the first band of a GeoTIFF file
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_geotiff(file)
}

/// Read a GeoTIFF from an in-memory buffer
pub fn read_geotiff_from_buffer<T>(data: &[u8]) -> Result<Raster<T>>
where
    T: RasterElement,
{
    decode_geotiff(Cursor::new(data))
}

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

fn tiff_err(what: &str) -> impl Fn(tiff::TiffError) -> Error + '_ {
    move |e| Error::Other(format!("{what}: {e}"))
}

fn cast_all<S, T>(buf: Vec<S>) -> Vec<T>
where
    S: num_traits::NumCast + Copy,
    T: RasterElement,
{
    buf.into_iter()
        .map(|v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
        .collect()
}

fn decode_geotiff<T, R>(reader: R) -> Result<Raster<T>>
where
    T: RasterElement,
    R: Read + Seek,
{
    let mut decoder = Decoder::new(reader).map_err(tiff_err("TIFF decode error"))?;
    let (width, height) = decoder
        .dimensions()
        .map_err(tiff_err("Cannot read dimensions"))?;
    let (rows, cols) = (height as usize, width as usize);

    let data: Vec<T> = match decoder
        .read_image()
        .map_err(tiff_err("Cannot read image data"))?
    {
        DecodingResult::F32(buf) => cast_all(buf),
        DecodingResult::F64(buf) => cast_all(buf),
        DecodingResult::U8(buf) => cast_all(buf),
        DecodingResult::U16(buf) => cast_all(buf),
        DecodingResult::U32(buf) => cast_all(buf),
        DecodingResult::U64(buf) => cast_all(buf),
        DecodingResult::I8(buf) => cast_all(buf),
        DecodingResult::I16(buf) => cast_all(buf),
        DecodingResult::I32(buf) => cast_all(buf),
        DecodingResult::I64(buf) => cast_all(buf),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(Error::UnsupportedDataType(
                "Unsupported TIFF pixel format".to_string(),
            ))
        }
    };

    // Multi-band files decode interleaved; only single-band layers are supported.
    if data.len() != rows * cols {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;
    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    raster.set_crs(read_crs(&mut decoder));

    let nodata = decoder
        .get_tag_ascii_string(tag(GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());
    raster.set_nodata(match nodata {
        Some(nd) if !nd.is_nan() => Some(T::from_f64(nd)),
        _ => None,
    });

    Ok(raster)
}

/// GeoTransform from ModelPixelScaleTag + ModelTiepointTag
fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(tag(MODEL_PIXEL_SCALE)).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(tag(MODEL_TIEPOINT)).ok()?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    // tiepoint: [I, J, K, X, Y, Z]; scale: [ScaleX, ScaleY, ScaleZ]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

/// EPSG code from the GeoKey directory, when stored inline
fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<CRS> {
    let keys = decoder.get_tag_u16_vec(tag(GEO_KEY_DIRECTORY)).ok()?;
    let count = *keys.get(3)? as usize;

    let mut geographic = None;
    let mut projected = None;
    for entry in keys.get(4..4 + count * 4)?.chunks_exact(4) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        // location 0: value stored inline; 32767 means user-defined
        if location != 0 || value == 0 || value == 32767 {
            continue;
        }
        match key {
            PROJECTED_CS_TYPE_KEY => projected = Some(value),
            GEOGRAPHIC_TYPE_KEY => geographic = Some(value),
            _ => {}
        }
    }
    projected.or(geographic).map(|code| CRS::from_epsg(code as u32))
}

/// Write a raster to a Float32 GeoTIFF file
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    encode_geotiff(raster, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Write a raster to an in-memory GeoTIFF buffer
pub fn write_geotiff_to_buffer<T>(raster: &Raster<T>) -> Result<Vec<u8>>
where
    T: RasterElement,
{
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf))?;
    Ok(buf)
}

fn geo_keys(crs: Option<&CRS>) -> Result<Vec<u16>> {
    let mut keys = vec![1, 1, 0, 2];
    match crs {
        None => keys.extend([
            GT_MODEL_TYPE_KEY, 0, 1, MODEL_TYPE_PROJECTED,
            GT_RASTER_TYPE_KEY, 0, 1, RASTER_PIXEL_IS_AREA,
        ]),
        Some(crs) => {
            let code = u16::try_from(crs.epsg())
                .map_err(|_| Error::UnsupportedCrs(crs.identifier()))?;
            let (model, key) = if crs.is_geographic() {
                (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_KEY)
            } else {
                (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_KEY)
            };
            keys[3] = 3;
            keys.extend([
                GT_MODEL_TYPE_KEY, 0, 1, model,
                GT_RASTER_TYPE_KEY, 0, 1, RASTER_PIXEL_IS_AREA,
                key, 0, 1, code,
            ]);
        }
    }
    Ok(keys)
}

fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let mut encoder = TiffEncoder::new(writer).map_err(tiff_err("TIFF encoder error"))?;
    let (rows, cols) = raster.shape();

    let data: Vec<f32> = raster
        .data()
        .iter()
        .map(|&v| {
            if raster.is_nodata(v) {
                f32::NAN
            } else {
                num_traits::cast(v).unwrap_or(f32::NAN)
            }
        })
        .collect();

    let mut image = encoder
        .new_image::<Gray32Float>(cols as u32, rows as u32)
        .map_err(tiff_err("Cannot create TIFF image"))?;

    let gt = raster.transform();
    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_PIXEL_SCALE), &scale[..])
        .map_err(tiff_err("Cannot write scale tag"))?;

    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_TIEPOINT), &tiepoint[..])
        .map_err(tiff_err("Cannot write tiepoint tag"))?;

    let keys = geo_keys(raster.crs())?;
    image
        .encoder()
        .write_tag(Tag::Unknown(GEO_KEY_DIRECTORY), keys.as_slice())
        .map_err(tiff_err("Cannot write geokey tag"))?;

    image
        .encoder()
        .write_tag(Tag::Unknown(GDAL_NODATA), "nan")
        .map_err(tiff_err("Cannot write nodata tag"))?;

    image
        .write_data(&data)
        .map_err(tiff_err("Cannot write image data"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn albers_layer() -> Raster<f64> {
        let mut raster = Raster::from_vec((0..12).map(|v| v as f64 * 1.5).collect(), 3, 4).unwrap();
        raster.set_transform(GeoTransform::new(-374_495.0, 592_636.0, 270.0, -270.0));
        raster.set_crs(Some(CRS::california_albers()));
        raster
    }

    #[test]
    fn test_buffer_roundtrip_keeps_georeferencing() {
        let raster = albers_layer();
        let bytes = write_geotiff_to_buffer(&raster).unwrap();
        let back: Raster<f64> = read_geotiff_from_buffer(&bytes).unwrap();

        assert_eq!(back.shape(), (3, 4));
        assert_eq!(back.crs(), Some(&CRS::california_albers()));
        assert!(back.transform().approx_eq(raster.transform(), 1e-9));
        assert_relative_eq!(back.get(2, 3).unwrap(), 16.5);
    }

    #[test]
    fn test_nodata_written_as_nan() {
        let mut raster = albers_layer();
        raster.set_nodata(Some(-9999.0));
        raster.set(1, 1, -9999.0).unwrap();

        let bytes = write_geotiff_to_buffer(&raster).unwrap();
        let back: Raster<f64> = read_geotiff_from_buffer(&bytes).unwrap();
        assert!(back.get(1, 1).unwrap().is_nan());
        assert_eq!(back.value_at(1, 1), None);
    }

    #[test]
    fn test_geographic_crs_roundtrip() {
        let mut raster = albers_layer();
        raster.set_crs(Some(CRS::wgs84()));
        raster.set_transform(GeoTransform::new(-124.0, 42.0, 0.5, -0.5));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layer.tif");
        write_geotiff(&raster, &path).unwrap();
        let back: Raster<f64> = read_geotiff(&path).unwrap();
        assert_eq!(back.crs(), Some(&CRS::wgs84()));
    }
}
