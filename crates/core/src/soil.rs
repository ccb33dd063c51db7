//! Soil survey records and their categorical encodings.
//!
//! The survey is hierarchical: a map unit (the cell class of the map-unit
//! raster) holds one or more components, each of which holds zero or more
//! depth-bounded horizons. Column names follow the survey's own table schema.

use crate::error::{Error, Result};
use crate::io::{read_csv, write_csv};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Map-unit key; the value stored in map-unit raster cells
pub type MapUnitKey = u64;

/// One horizon of a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonRecord {
    pub cokey: String,
    /// Top depth (cm)
    #[serde(rename = "hzdept_r", deserialize_with = "csv::invalid_option")]
    pub top: Option<f64>,
    /// Bottom depth (cm)
    #[serde(rename = "hzdepb_r", deserialize_with = "csv::invalid_option")]
    pub bottom: Option<f64>,
    /// Organic matter (%)
    #[serde(rename = "om_r", deserialize_with = "csv::invalid_option")]
    pub om: Option<f64>,
    /// Cation exchange capacity at pH 7
    #[serde(rename = "cec7_r", deserialize_with = "csv::invalid_option")]
    pub cec: Option<f64>,
    /// pH in 1:1 water
    #[serde(rename = "ph1to1h2o_r", deserialize_with = "csv::invalid_option")]
    pub ph: Option<f64>,
}

impl HorizonRecord {
    /// Depths of a well-formed horizon (both present, bottom below top)
    pub fn depths(&self) -> Option<(f64, f64)> {
        match (self.top, self.bottom) {
            (Some(top), Some(bottom)) if bottom > top => Some((top, bottom)),
            _ => None,
        }
    }
}

/// A soil type occupying part of a map unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub cokey: String,
    pub mukey: MapUnitKey,
    /// Percent of the map unit's area
    #[serde(rename = "comppct_r", deserialize_with = "csv::invalid_option")]
    pub area_pct: Option<f64>,
    #[serde(rename = "compkind", default)]
    pub kind: TaxonomyKind,
    #[serde(rename = "compname", default)]
    pub name: String,
    #[serde(rename = "drainagecl", default, deserialize_with = "csv::invalid_option")]
    pub drainage: Option<DrainageClass>,
}

/// Map-unit descriptive attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapUnit {
    pub mukey: MapUnitKey,
    #[serde(default)]
    pub muname: String,
}

/// Taxonomic level of a component name.
///
/// Components recorded as a miscellaneous area (rock outcrop, water, urban
/// land) or only above the family level do not describe a usable soil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaxonomyKind {
    Series,
    Variant,
    Family,
    Taxadjunct,
    TaxonAboveFamily,
    MiscellaneousArea,
    #[default]
    Other,
}

impl TaxonomyKind {
    pub const ALL: [TaxonomyKind; 7] = [
        TaxonomyKind::Series,
        TaxonomyKind::Variant,
        TaxonomyKind::Family,
        TaxonomyKind::Taxadjunct,
        TaxonomyKind::TaxonAboveFamily,
        TaxonomyKind::MiscellaneousArea,
        TaxonomyKind::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TaxonomyKind::Series => "Series",
            TaxonomyKind::Variant => "Variant",
            TaxonomyKind::Family => "Family",
            TaxonomyKind::Taxadjunct => "Taxadjunct",
            TaxonomyKind::TaxonAboveFamily => "Taxon above family",
            TaxonomyKind::MiscellaneousArea => "Miscellaneous area",
            TaxonomyKind::Other => "Other",
        }
    }

    /// Whether a component of this kind can be a dominant taxon
    pub fn is_usable_soil(self) -> bool {
        !matches!(self, TaxonomyKind::MiscellaneousArea | TaxonomyKind::TaxonAboveFamily)
    }

    /// Raster code, 1-based
    pub fn code(self) -> u32 {
        self as u32 + 1
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get((code as usize).checked_sub(1)?).copied()
    }
}

impl From<&str> for TaxonomyKind {
    fn from(text: &str) -> Self {
        let text = text.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.label().eq_ignore_ascii_case(text))
            .unwrap_or(TaxonomyKind::Other)
    }
}

impl From<String> for TaxonomyKind {
    fn from(text: String) -> Self {
        TaxonomyKind::from(text.as_str())
    }
}

impl From<TaxonomyKind> for String {
    fn from(kind: TaxonomyKind) -> Self {
        kind.label().to_string()
    }
}

impl fmt::Display for TaxonomyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Natural drainage class, ordered from driest to wettest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DrainageClass {
    ExcessivelyDrained = 1,
    SomewhatExcessivelyDrained = 2,
    WellDrained = 3,
    ModeratelyWellDrained = 4,
    SomewhatPoorlyDrained = 5,
    PoorlyDrained = 6,
    VeryPoorlyDrained = 7,
    SubaqueousSoils = 8,
}

impl DrainageClass {
    pub const ALL: [DrainageClass; 8] = [
        DrainageClass::ExcessivelyDrained,
        DrainageClass::SomewhatExcessivelyDrained,
        DrainageClass::WellDrained,
        DrainageClass::ModeratelyWellDrained,
        DrainageClass::SomewhatPoorlyDrained,
        DrainageClass::PoorlyDrained,
        DrainageClass::VeryPoorlyDrained,
        DrainageClass::SubaqueousSoils,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DrainageClass::ExcessivelyDrained => "Excessively drained",
            DrainageClass::SomewhatExcessivelyDrained => "Somewhat excessively drained",
            DrainageClass::WellDrained => "Well drained",
            DrainageClass::ModeratelyWellDrained => "Moderately well drained",
            DrainageClass::SomewhatPoorlyDrained => "Somewhat poorly drained",
            DrainageClass::PoorlyDrained => "Poorly drained",
            DrainageClass::VeryPoorlyDrained => "Very poorly drained",
            DrainageClass::SubaqueousSoils => "Subaqueous",
        }
    }

    /// Ordinal code, 1 (excessively drained) to 8 (subaqueous)
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

impl FromStr for DrainageClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidRecord {
                table: "drainage class".into(),
                reason: format!("unknown drainage class '{s}'"),
            })
    }
}

impl TryFrom<String> for DrainageClass {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<DrainageClass> for String {
    fn from(class: DrainageClass) -> Self {
        class.label().to_string()
    }
}

impl fmt::Display for DrainageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Stable integer codes for a free-text categorical variable.
///
/// Codes run from 1 in lexicographic label order, so the same label set
/// always produces the same encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codebook {
    codes: BTreeMap<String, u32>,
}

impl Codebook {
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut codes: BTreeMap<String, u32> =
            labels.into_iter().map(|l| (l.into(), 0)).collect();
        for (i, code) in codes.values_mut().enumerate() {
            *code = i as u32 + 1;
        }
        Self { codes }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn code(&self, label: &str) -> Option<u32> {
        self.codes.get(label).copied()
    }

    pub fn label(&self, code: u32) -> Option<&str> {
        self.codes
            .iter()
            .find(|(_, &c)| c == code)
            .map(|(l, _)| l.as_str())
    }

    /// `<layer>.codes.json` next to a categorical raster
    pub fn sidecar_path(layer: &Path) -> PathBuf {
        layer.with_extension("codes.json")
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn read_json(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// One aggregated map unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapUnitSoil {
    pub mukey: MapUnitKey,
    pub muname: String,
    pub om: Option<f64>,
    pub cec: Option<f64>,
    pub ph: Option<f64>,
    pub drainage_class: Option<DrainageClass>,
    pub dominant_taxon_kind: Option<TaxonomyKind>,
    pub dominant_taxon_name: Option<String>,
}

impl MapUnitSoil {
    pub fn empty(mukey: MapUnitKey, muname: impl Into<String>) -> Self {
        Self {
            mukey,
            muname: muname.into(),
            om: None,
            cec: None,
            ph: None,
            drainage_class: None,
            dominant_taxon_kind: None,
            dominant_taxon_name: None,
        }
    }
}

/// A soil attribute that can be rasterized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoilAttribute {
    Om,
    Cec,
    Ph,
    DrainageClass,
    DominantTaxonKind,
    DominantTaxonName,
}

/// How a layer's values may be resampled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Continuous,
    Categorical,
}

impl SoilAttribute {
    pub const ALL: [SoilAttribute; 6] = [
        SoilAttribute::Om,
        SoilAttribute::Cec,
        SoilAttribute::Ph,
        SoilAttribute::DrainageClass,
        SoilAttribute::DominantTaxonKind,
        SoilAttribute::DominantTaxonName,
    ];

    /// Column name in the soil table and variable name in layer files
    pub fn name(self) -> &'static str {
        match self {
            SoilAttribute::Om => "om",
            SoilAttribute::Cec => "cec",
            SoilAttribute::Ph => "ph",
            SoilAttribute::DrainageClass => "drainage_class",
            SoilAttribute::DominantTaxonKind => "dominant_taxon_kind",
            SoilAttribute::DominantTaxonName => "dominant_taxon_name",
        }
    }

    pub fn kind(self) -> LayerKind {
        match self {
            SoilAttribute::Om | SoilAttribute::Cec | SoilAttribute::Ph => LayerKind::Continuous,
            _ => LayerKind::Categorical,
        }
    }
}

impl FromStr for SoilAttribute {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::configuration("soil variable", format!("unknown soil variable '{s}'")))
    }
}

impl fmt::Display for SoilAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Aggregated soil lookup table, one row per map unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoilTable {
    rows: Vec<MapUnitSoil>,
    index: BTreeMap<MapUnitKey, usize>,
}

impl SoilTable {
    /// Build from rows; map-unit keys must be unique
    pub fn new(rows: Vec<MapUnitSoil>) -> Result<Self> {
        let mut index = BTreeMap::new();
        for (i, row) in rows.iter().enumerate() {
            if index.insert(row.mukey, i).is_some() {
                return Err(Error::DuplicateKey {
                    table: "soil table".into(),
                    key: row.mukey.to_string(),
                });
            }
        }
        Ok(Self { rows, index })
    }

    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(read_csv(path)?)
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        write_csv(&self.rows, path)
    }

    pub fn rows(&self) -> &[MapUnitSoil] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, mukey: MapUnitKey) -> Option<&MapUnitSoil> {
        self.index.get(&mukey).map(|&i| &self.rows[i])
    }

    /// Codebook over the dominant taxon names present in the table
    pub fn taxon_codebook(&self) -> Codebook {
        Codebook::from_labels(self.rows.iter().filter_map(|r| r.dominant_taxon_name.clone()))
    }

    /// Numeric value of `attribute` for a map unit.
    ///
    /// Categorical attributes are returned as their codes; free-text taxon
    /// names are encoded through `codebook`.
    pub fn value(&self, mukey: MapUnitKey, attribute: SoilAttribute, codebook: &Codebook) -> Option<f64> {
        let row = self.get(mukey)?;
        match attribute {
            SoilAttribute::Om => row.om,
            SoilAttribute::Cec => row.cec,
            SoilAttribute::Ph => row.ph,
            SoilAttribute::DrainageClass => row.drainage_class.map(|c| c.code() as f64),
            SoilAttribute::DominantTaxonKind => row.dominant_taxon_kind.map(|k| k.code() as f64),
            SoilAttribute::DominantTaxonName => row
                .dominant_taxon_name
                .as_deref()
                .and_then(|n| codebook.code(n))
                .map(f64::from),
        }
    }
}
