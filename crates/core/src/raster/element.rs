//! Cell value types

use num_traits::{NumCast, Zero};
use std::fmt::Debug;

/// Types that can be stored in a raster cell.
///
/// Climate and soil layers are carried as `f64` through the pipeline;
/// integer types appear when reading categorical inputs such as map-unit
/// key rasters.
pub trait RasterElement:
    Copy + Clone + Debug + PartialOrd + PartialEq + NumCast + Zero + Send + Sync + 'static
{
    /// Value written into cells that carry no data
    fn default_nodata() -> Self;

    /// Check if this value represents no-data
    fn is_nodata(&self, nodata: Option<Self>) -> bool;

    fn to_f64(self) -> Option<f64> {
        NumCast::from(self)
    }

    /// Convert from `f64`, falling back to the type's no-data value when the
    /// value does not fit (NaN into an integer type, overflow).
    fn from_f64(value: f64) -> Self {
        NumCast::from(value).unwrap_or_else(Self::default_nodata)
    }
}

macro_rules! impl_raster_element_int {
    ($($t:ty),*) => {$(
        impl RasterElement for $t {
            fn default_nodata() -> Self {
                <$t>::MIN
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                nodata.is_some_and(|nd| *self == nd)
            }
        }
    )*};
}

macro_rules! impl_raster_element_float {
    ($($t:ty),*) => {$(
        impl RasterElement for $t {
            fn default_nodata() -> Self {
                <$t>::NAN
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                if self.is_nan() {
                    return true;
                }
                match nodata {
                    Some(nd) if nd.is_nan() => false,
                    Some(nd) => (self - nd).abs() <= <$t>::EPSILON * 100.0 * nd.abs().max(1.0),
                    None => false,
                }
            }
        }
    )*};
}

impl_raster_element_int!(i8, i16, i32, i64, u8, u16, u32, u64);
impl_raster_element_float!(f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_nodata() {
        assert!(f64::NAN.is_nodata(None));
        assert!((-9999.0f64).is_nodata(Some(-9999.0)));
        assert!(!(12.5f64).is_nodata(Some(-9999.0)));
    }

    #[test]
    fn test_int_from_nan_is_nodata() {
        assert_eq!(<i32 as RasterElement>::from_f64(f64::NAN), i32::MIN);
        assert_eq!(<i32 as RasterElement>::from_f64(463_211.0), 463_211);
    }
}
