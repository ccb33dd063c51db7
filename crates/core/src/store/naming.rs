//! File-name convention for climate, composite and soil layers.
//!
//! Layer identity lives in file names on disk:
//!
//! | layer | name |
//! |---|---|
//! | monthly | `{variable}{year}{mon}.tif` (`aet2018oct.tif`) |
//! | seasonal composite | `{variable}{water_year}{season}_{method}.tif` (`ppt2018winter_sum.tif`) |
//! | monthly normal | `{variable}avg{mon}.tif` |
//! | seasonal normal | `{variable}avg{season}_{method}.tif` |
//! | soil | `{prefix}_{variable}_{resolution}_{region}_{vintage}.tif` |
//!
//! Parsing happens once, when a directory is indexed; everything downstream
//! works with [`LayerKey`].

use crate::time::{Method, Month, Season};
use std::fmt;
use std::path::Path;

const NORMAL_TAG: &str = "avg";

/// Temporal part of a layer's identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TemporalKey {
    Monthly { year: i32, month: Month },
    Seasonal { water_year: i32, season: Season, method: Method },
    MonthlyNormal { month: Month },
    SeasonalNormal { season: Season, method: Method },
    /// Time-invariant layers (soil)
    Static,
}

/// Semantic identity of a single-band layer
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerKey {
    pub variable: String,
    pub temporal: TemporalKey,
}

impl LayerKey {
    pub fn monthly(variable: impl Into<String>, year: i32, month: Month) -> Self {
        Self {
            variable: variable.into(),
            temporal: TemporalKey::Monthly { year, month },
        }
    }

    pub fn seasonal(
        variable: impl Into<String>,
        water_year: i32,
        season: Season,
        method: Method,
    ) -> Self {
        Self {
            variable: variable.into(),
            temporal: TemporalKey::Seasonal {
                water_year,
                season,
                method,
            },
        }
    }

    pub fn monthly_normal(variable: impl Into<String>, month: Month) -> Self {
        Self {
            variable: variable.into(),
            temporal: TemporalKey::MonthlyNormal { month },
        }
    }

    pub fn seasonal_normal(variable: impl Into<String>, season: Season, method: Method) -> Self {
        Self {
            variable: variable.into(),
            temporal: TemporalKey::SeasonalNormal { season, method },
        }
    }

    pub fn soil(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            temporal: TemporalKey::Static,
        }
    }

    /// Band label, stable across periods: the first `short_len` characters
    /// of the variable for monthly layers, `variable_season_method` for
    /// composites, the variable itself for soil layers.
    pub fn band_name(&self, short_len: usize) -> String {
        match self.temporal {
            TemporalKey::Monthly { .. } | TemporalKey::MonthlyNormal { .. } => {
                short_key(&self.variable, short_len)
            }
            TemporalKey::Seasonal { season, method, .. }
            | TemporalKey::SeasonalNormal { season, method } => {
                composite_band_name(&self.variable, season, method)
            }
            TemporalKey::Static => self.variable.clone(),
        }
    }

    /// File name under the convention; `None` for soil layers, whose names
    /// carry more than the key (see [`SoilLayerName`]).
    pub fn file_name(&self) -> Option<String> {
        let v = &self.variable;
        match self.temporal {
            TemporalKey::Monthly { year, month } => Some(format!("{v}{year}{month}.tif")),
            TemporalKey::Seasonal {
                water_year,
                season,
                method,
            } => Some(format!("{v}{water_year}{season}_{method}.tif")),
            TemporalKey::MonthlyNormal { month } => Some(format!("{v}{NORMAL_TAG}{month}.tif")),
            TemporalKey::SeasonalNormal { season, method } => {
                Some(format!("{v}{NORMAL_TAG}{season}_{method}.tif"))
            }
            TemporalKey::Static => None,
        }
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.file_name() {
            Some(name) => f.write_str(name.trim_end_matches(".tif")),
            None => write!(f, "soil:{}", self.variable),
        }
    }
}

/// First `len` characters of a variable name
pub fn short_key(variable: &str, len: usize) -> String {
    variable.chars().take(len).collect()
}

pub fn composite_band_name(variable: &str, season: Season, method: Method) -> String {
    format!("{variable}_{season}_{method}")
}

/// Parts of a soil layer file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoilLayerName {
    pub prefix: String,
    pub variable: String,
    pub resolution: String,
    pub region: String,
    pub vintage: String,
}

impl SoilLayerName {
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}.tif",
            self.prefix, self.variable, self.resolution, self.region, self.vintage
        )
    }

    /// Prefix first and resolution, region, vintage last; the variable is
    /// everything between, so it may itself contain underscores.
    fn parse(stem: &str) -> Option<Self> {
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() < 5 || parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        let n = parts.len();
        Some(SoilLayerName {
            prefix: parts[0].to_string(),
            variable: parts[1..n - 3].join("_"),
            resolution: parts[n - 3].to_string(),
            region: parts[n - 2].to_string(),
            vintage: parts[n - 1].to_string(),
        })
    }
}

fn tif_stem(file_name: &str) -> Option<&str> {
    let lower = file_name.to_ascii_lowercase();
    [".tif", ".tiff"]
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| &file_name[..file_name.len() - ext.len()])
}

fn is_variable(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Split a trailing 4-digit year off `s`
fn split_year(s: &str) -> Option<(&str, i32)> {
    let cut = s.len().checked_sub(4)?;
    let (head, digits) = (s.get(..cut)?, s.get(cut..)?);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((head, digits.parse().ok()?))
}

enum Tail<'a> {
    Year(&'a str, i32),
    Normal(&'a str),
}

fn split_tail(s: &str) -> Option<Tail<'_>> {
    if let Some((variable, year)) = split_year(s) {
        return is_variable(variable).then_some(Tail::Year(variable, year));
    }
    let variable = s.strip_suffix(NORMAL_TAG)?;
    is_variable(variable).then_some(Tail::Normal(variable))
}

fn parse_seasonal(stem: &str) -> Option<LayerKey> {
    let (head, method) = stem.rsplit_once('_')?;
    let method: Method = method.parse().ok()?;
    let season = Season::ALL
        .into_iter()
        .find(|s| head.ends_with(s.name()))?;
    let rest = &head[..head.len() - season.name().len()];

    Some(match split_tail(rest)? {
        Tail::Year(variable, water_year) => LayerKey::seasonal(variable, water_year, season, method),
        Tail::Normal(variable) => LayerKey::seasonal_normal(variable, season, method),
    })
}

fn parse_monthly(stem: &str) -> Option<LayerKey> {
    let cut = stem.len().checked_sub(3)?;
    let abbrev = stem.get(cut..)?;
    let month = Month::ALL.into_iter().find(|m| m.abbrev() == abbrev)?;

    Some(match split_tail(&stem[..cut])? {
        Tail::Year(variable, year) => LayerKey::monthly(variable, year, month),
        Tail::Normal(variable) => LayerKey::monthly_normal(variable, month),
    })
}

/// Parsed identity of a layer file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLayer {
    pub key: LayerKey,
    pub soil: Option<SoilLayerName>,
}

/// Parse a layer file name (no directory) under the naming convention
pub fn parse_layer_name(file_name: &str) -> Option<ParsedLayer> {
    let stem = tif_stem(file_name)?;

    if !stem.contains('_') {
        return parse_monthly(stem).map(|key| ParsedLayer { key, soil: None });
    }
    if let Some(key) = parse_seasonal(stem) {
        return Some(ParsedLayer { key, soil: None });
    }
    SoilLayerName::parse(stem).map(|soil| ParsedLayer {
        key: LayerKey::soil(soil.variable.clone()),
        soil: Some(soil),
    })
}

/// Parse the file-name component of a path
pub fn parse_layer_path(path: &Path) -> Option<ParsedLayer> {
    parse_layer_name(path.file_name()?.to_str()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> LayerKey {
        parse_layer_name(name).unwrap().key
    }

    #[test]
    fn test_monthly_names() {
        assert_eq!(key("aet2018oct.tif"), LayerKey::monthly("aet", 2018, Month::Oct));
        assert_eq!(key("tmx2001feb.TIF"), LayerKey::monthly("tmx", 2001, Month::Feb));
        assert_eq!(key("pptavgjan.tif"), LayerKey::monthly_normal("ppt", Month::Jan));
        assert_eq!(key("tavg2018jan.tif"), LayerKey::monthly("tavg", 2018, Month::Jan));
    }

    #[test]
    fn test_seasonal_names() {
        assert_eq!(
            key("ppt2018winter_sum.tif"),
            LayerKey::seasonal("ppt", 2018, Season::Winter, Method::Sum)
        );
        assert_eq!(
            key("tmxavgsummer_mean.tif"),
            LayerKey::seasonal_normal("tmx", Season::Summer, Method::Mean)
        );
    }

    #[test]
    fn test_soil_names() {
        let parsed = parse_layer_name("gnatsgo_om_270m_ca_2022.tif").unwrap();
        assert_eq!(parsed.key, LayerKey::soil("om"));
        let soil = parsed.soil.unwrap();
        assert_eq!(soil.region, "ca");
        assert_eq!(soil.file_name(), "gnatsgo_om_270m_ca_2022.tif");

        let parsed = parse_layer_name("gnatsgo_drainage_class_270m_ca_2022.tif").unwrap();
        assert_eq!(parsed.key, LayerKey::soil("drainage_class"));
        assert_eq!(parsed.soil.unwrap().resolution, "270m");
    }

    #[test]
    fn test_unparseable_names() {
        for name in ["readme.txt", "2018oct.tif", "aet18oct.tif", "ppt2018spring_sum.tif", "aet2018.tif"] {
            assert!(parse_layer_name(name).is_none(), "{name} should not parse");
        }
    }

    #[test]
    fn test_file_name_roundtrip() {
        for k in [
            LayerKey::monthly("cwd", 2019, Month::Dec),
            LayerKey::seasonal("ppt", 2018, Season::Winter, Method::Sum),
            LayerKey::monthly_normal("aet", Month::Jul),
            LayerKey::seasonal_normal("tmn", Season::Winter, Method::Mean),
        ] {
            assert_eq!(key(&k.file_name().unwrap()), k);
        }
    }

    #[test]
    fn test_band_names() {
        assert_eq!(LayerKey::monthly("aet", 2018, Month::Oct).band_name(3), "aet");
        assert_eq!(LayerKey::monthly("tmax", 2018, Month::Oct).band_name(3), "tma");
        assert_eq!(LayerKey::monthly_normal("tmax", Month::Oct).band_name(3), "tma");
        assert_eq!(
            LayerKey::seasonal("ppt", 2018, Season::Winter, Method::Sum).band_name(3),
            "ppt_winter_sum"
        );
        assert_eq!(LayerKey::soil("cec").band_name(3), "cec");
    }
}
