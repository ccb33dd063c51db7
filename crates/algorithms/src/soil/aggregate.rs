//! Horizon → component → map-unit aggregation of soil survey tables
//!
//! Horizons are clipped to a depth cutoff and averaged per component by
//! thickness; components are averaged per map unit by area percentage. Each
//! map unit also gets the taxonomy and drainage class of its dominant usable
//! component.

use habitat_core::io::read_csv;
use habitat_core::soil::{
    Component, HorizonRecord, MapUnit, MapUnitKey, MapUnitSoil, SoilTable,
};
use habitat_core::{Algorithm, Error, Result};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Number of horizon properties carried through aggregation (om, cec, ph)
const N_PROPS: usize = 3;

/// The three survey tables
#[derive(Debug, Clone, Default)]
pub struct SoilSurvey {
    pub horizons: Vec<HorizonRecord>,
    pub components: Vec<Component>,
    pub mapunits: Vec<MapUnit>,
}

impl SoilSurvey {
    pub fn read_csv(
        horizons: impl AsRef<Path>,
        components: impl AsRef<Path>,
        mapunits: impl AsRef<Path>,
    ) -> Result<Self> {
        Ok(Self {
            horizons: read_csv(horizons)?,
            components: read_csv(components)?,
            mapunits: read_csv(mapunits)?,
        })
    }
}

/// Parameters for [`SoilAggregator`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoilAggregateParams {
    /// Depth (cm); horizons starting at or below it are ignored
    pub depth_cutoff: f64,
}

impl Default for SoilAggregateParams {
    fn default() -> Self {
        Self { depth_cutoff: 200.0 }
    }
}

/// Counts describing one aggregation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoilAggregateSummary {
    pub mapunits: usize,
    pub components: usize,
    pub horizons_used: usize,
    pub horizons_below_cutoff: usize,
    /// Horizons with a missing depth or bottom not below top
    pub horizons_invalid: usize,
    /// Map units left with no om, cec or ph value
    pub mapunits_without_data: usize,
    /// Map units with no usable component for a dominant taxon
    pub mapunits_without_taxon: usize,
}

impl fmt::Display for SoilAggregateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} map units from {} components; horizons: {} used, {} below cutoff, {} invalid; \
             {} map units without data, {} without a dominant taxon",
            self.mapunits,
            self.components,
            self.horizons_used,
            self.horizons_below_cutoff,
            self.horizons_invalid,
            self.mapunits_without_data,
            self.mapunits_without_taxon
        )
    }
}

/// Aggregated table plus run counts
#[derive(Debug, Clone)]
pub struct SoilAggregation {
    pub table: SoilTable,
    pub summary: SoilAggregateSummary,
}

/// Soil survey aggregation stage
#[derive(Debug, Clone, Default)]
pub struct SoilAggregator;

impl Algorithm for SoilAggregator {
    type Input = SoilSurvey;
    type Output = SoilAggregation;
    type Params = SoilAggregateParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "SoilAggregator"
    }

    fn description(&self) -> &'static str {
        "Depth- and area-weighted soil properties and dominant taxon per map unit"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        aggregate(&input.horizons, &input.components, &input.mapunits, params.depth_cutoff)
    }
}

/// Running weighted sum of one property
#[derive(Debug, Clone, Copy, Default)]
struct WeightedMean {
    sum: f64,
    weight: f64,
}

impl WeightedMean {
    fn add(&mut self, value: Option<f64>, weight: f64) {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            if weight > 0.0 {
                self.sum += v * weight;
                self.weight += weight;
            }
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.weight > 0.0).then(|| self.sum / self.weight)
    }
}

fn props(h: &HorizonRecord) -> [Option<f64>; N_PROPS] {
    [h.om, h.cec, h.ph]
}

/// Aggregate the survey to one row per map unit.
///
/// Rows come out in map-unit key order. A map unit with no horizons above
/// the cutoff keeps its row with empty numeric columns. Join keys are
/// checked: unique map units and components, every component's map unit
/// present, every horizon's component present.
pub fn aggregate(
    horizons: &[HorizonRecord],
    components: &[Component],
    mapunits: &[MapUnit],
    depth_cutoff: f64,
) -> Result<SoilAggregation> {
    if !(depth_cutoff.is_finite() && depth_cutoff > 0.0) {
        return Err(Error::configuration(
            "depth_cutoff",
            format!("{depth_cutoff} is not a positive depth"),
        ));
    }

    let mut summary = SoilAggregateSummary {
        mapunits: mapunits.len(),
        components: components.len(),
        ..Default::default()
    };

    let mut units: BTreeMap<MapUnitKey, &MapUnit> = BTreeMap::new();
    for mu in mapunits {
        if units.insert(mu.mukey, mu).is_some() {
            return Err(Error::DuplicateKey {
                table: "mapunit".into(),
                key: mu.mukey.to_string(),
            });
        }
    }

    let mut comp_index: HashMap<&str, usize> = HashMap::new();
    for (i, comp) in components.iter().enumerate() {
        if comp_index.insert(comp.cokey.as_str(), i).is_some() {
            return Err(Error::DuplicateKey {
                table: "component".into(),
                key: comp.cokey.clone(),
            });
        }
        if !units.contains_key(&comp.mukey) {
            return Err(Error::InvalidRecord {
                table: "component".into(),
                reason: format!("component '{}' references unknown map unit {}", comp.cokey, comp.mukey),
            });
        }
    }

    // Thickness-weighted means per component
    let mut comp_props = vec![[WeightedMean::default(); N_PROPS]; components.len()];
    for h in horizons {
        let Some(&ci) = comp_index.get(h.cokey.as_str()) else {
            return Err(Error::InvalidRecord {
                table: "horizon".into(),
                reason: format!("horizon references unknown component '{}'", h.cokey),
            });
        };
        let Some((top, bottom)) = h.depths() else {
            summary.horizons_invalid += 1;
            continue;
        };
        if top >= depth_cutoff {
            summary.horizons_below_cutoff += 1;
            continue;
        }
        let thickness = bottom.min(depth_cutoff) - top;
        for (acc, value) in comp_props[ci].iter_mut().zip(props(h)) {
            acc.add(value, thickness);
        }
        summary.horizons_used += 1;
    }

    let mut by_unit: BTreeMap<MapUnitKey, Vec<usize>> = BTreeMap::new();
    for (i, comp) in components.iter().enumerate() {
        by_unit.entry(comp.mukey).or_default().push(i);
    }

    let mut rows = Vec::with_capacity(units.len());
    for (&mukey, mu) in &units {
        let members = by_unit.get(&mukey).map(Vec::as_slice).unwrap_or(&[]);
        let mut row = MapUnitSoil::empty(mukey, mu.muname.clone());

        // Area-weighted means across components
        let mut unit_props = [WeightedMean::default(); N_PROPS];
        for &ci in members {
            let area = components[ci].area_pct.unwrap_or(0.0);
            for (acc, comp_mean) in unit_props.iter_mut().zip(comp_props[ci].iter()) {
                acc.add(comp_mean.mean(), area);
            }
        }
        row.om = unit_props[0].mean();
        row.cec = unit_props[1].mean();
        row.ph = unit_props[2].mean();
        if row.om.is_none() && row.cec.is_none() && row.ph.is_none() {
            summary.mapunits_without_data += 1;
        }

        match dominant_component(members.iter().map(|&ci| &components[ci])) {
            Some(dom) => {
                row.dominant_taxon_kind = Some(dom.kind);
                row.dominant_taxon_name = Some(dom.name.clone()).filter(|n| !n.is_empty());
                row.drainage_class = dom.drainage;
            }
            None => summary.mapunits_without_taxon += 1,
        }
        rows.push(row);
    }

    if rows.len() != mapunits.len() {
        return Err(Error::RowCount {
            context: "soil aggregation".into(),
            expected: mapunits.len(),
            actual: rows.len(),
        });
    }

    debug!(?summary, "soil aggregation counts");
    info!(mapunits = rows.len(), depth_cutoff, "aggregated soil survey");
    Ok(SoilAggregation {
        table: SoilTable::new(rows)?,
        summary,
    })
}

/// The usable component with the largest area; ties go to the
/// lexicographically smallest component key.
pub fn dominant_component<'c>(components: impl Iterator<Item = &'c Component>) -> Option<&'c Component> {
    components
        .filter(|c| c.kind.is_usable_soil())
        .min_by(|a, b| {
            let (pa, pb) = (a.area_pct.unwrap_or(0.0), b.area_pct.unwrap_or(0.0));
            pb.partial_cmp(&pa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.cokey.cmp(&b.cokey))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use habitat_core::soil::{DrainageClass, TaxonomyKind};

    fn horizon(cokey: &str, top: f64, bottom: f64, om: Option<f64>) -> HorizonRecord {
        HorizonRecord {
            cokey: cokey.into(),
            top: Some(top),
            bottom: Some(bottom),
            om,
            cec: Some(10.0),
            ph: Some(6.0),
        }
    }

    fn component(cokey: &str, mukey: u64, pct: f64, kind: TaxonomyKind, name: &str) -> Component {
        Component {
            cokey: cokey.into(),
            mukey,
            area_pct: Some(pct),
            kind,
            name: name.into(),
            drainage: Some(DrainageClass::WellDrained),
        }
    }

    fn mapunit(mukey: u64) -> MapUnit {
        MapUnit {
            mukey,
            muname: format!("unit {mukey}"),
        }
    }

    #[test]
    fn test_thickness_weighted_mean() {
        let horizons = vec![horizon("c1", 0.0, 10.0, Some(2.0)), horizon("c1", 10.0, 40.0, Some(4.0))];
        let comps = vec![component("c1", 1, 100.0, TaxonomyKind::Series, "Auburn")];
        let out = aggregate(&horizons, &comps, &[mapunit(1)], 200.0).unwrap();
        assert_relative_eq!(out.table.get(1).unwrap().om.unwrap(), 3.5);
    }

    #[test]
    fn test_depth_clipping() {
        // 20..250 clipped at 200 weighs 180, against 20 for the 0..20 horizon
        let horizons = vec![horizon("c1", 0.0, 20.0, Some(1.0)), horizon("c1", 20.0, 250.0, Some(2.0))];
        let comps = vec![component("c1", 1, 100.0, TaxonomyKind::Series, "Auburn")];
        let out = aggregate(&horizons, &comps, &[mapunit(1)], 200.0).unwrap();
        assert_relative_eq!(out.table.get(1).unwrap().om.unwrap(), (20.0 + 180.0 * 2.0) / 200.0);

        let deep = vec![horizon("c1", 200.0, 250.0, Some(2.0)), horizon("c1", 0.0, 0.0, Some(9.0))];
        let out = aggregate(&deep, &comps, &[mapunit(1)], 200.0).unwrap();
        let row = out.table.get(1).unwrap();
        assert_eq!(row.om, None);
        assert_eq!(row.dominant_taxon_name.as_deref(), Some("Auburn"));
        assert_eq!(out.summary.horizons_below_cutoff, 1);
        assert_eq!(out.summary.horizons_invalid, 1);
        assert_eq!(out.summary.mapunits_without_data, 1);
    }

    #[test]
    fn test_null_values_excluded_per_variable() {
        let horizons = vec![horizon("c1", 0.0, 10.0, None), horizon("c1", 10.0, 40.0, Some(4.0))];
        let comps = vec![component("c1", 1, 100.0, TaxonomyKind::Series, "Auburn")];
        let out = aggregate(&horizons, &comps, &[mapunit(1)], 200.0).unwrap();
        let row = out.table.get(1).unwrap();
        assert_relative_eq!(row.om.unwrap(), 4.0);
        assert_relative_eq!(row.cec.unwrap(), 10.0);
    }

    #[test]
    fn test_area_weighted_mapunit_mean() {
        let horizons = vec![horizon("c1", 0.0, 10.0, Some(2.0)), horizon("c2", 0.0, 10.0, Some(6.0))];
        let comps = vec![
            component("c1", 1, 75.0, TaxonomyKind::Series, "Auburn"),
            component("c2", 1, 25.0, TaxonomyKind::Series, "Sobrante"),
        ];
        let out = aggregate(&horizons, &comps, &[mapunit(1), mapunit(2)], 100.0).unwrap();
        assert_relative_eq!(out.table.get(1).unwrap().om.unwrap(), 3.0);
        assert_eq!(out.table.get(1).unwrap().dominant_taxon_name.as_deref(), Some("Auburn"));

        // Map unit 2 has no components but keeps its row
        assert_eq!(out.table.len(), 2);
        assert_eq!(out.table.get(2).unwrap().om, None);
    }

    #[test]
    fn test_dominant_taxon_skips_unusable_and_breaks_ties() {
        let comps = vec![
            component("c9", 1, 40.0, TaxonomyKind::Series, "Millsholm"),
            component("c1", 1, 50.0, TaxonomyKind::MiscellaneousArea, "Rock outcrop"),
            component("c3", 1, 40.0, TaxonomyKind::Series, "Auburn"),
        ];
        let mut reversed = comps.clone();
        reversed.reverse();

        for order in [&comps, &reversed] {
            let dom = dominant_component(order.iter()).unwrap();
            assert_eq!(dom.cokey, "c3");
        }

        let misc = vec![component("c1", 1, 100.0, TaxonomyKind::TaxonAboveFamily, "Xerorthents")];
        assert!(dominant_component(misc.iter()).is_none());
    }

    #[test]
    fn test_join_assertions() {
        let comps = vec![component("c1", 7, 100.0, TaxonomyKind::Series, "Auburn")];
        assert!(matches!(
            aggregate(&[], &comps, &[mapunit(1)], 200.0),
            Err(Error::InvalidRecord { .. })
        ));

        let comps = vec![component("c1", 1, 100.0, TaxonomyKind::Series, "Auburn")];
        let orphan = vec![horizon("c2", 0.0, 10.0, Some(1.0))];
        assert!(matches!(
            aggregate(&orphan, &comps, &[mapunit(1)], 200.0),
            Err(Error::InvalidRecord { .. })
        ));

        assert!(matches!(
            aggregate(&[], &[], &[mapunit(1), mapunit(1)], 200.0),
            Err(Error::DuplicateKey { .. })
        ));
        assert!(matches!(
            aggregate(&[], &[], &[mapunit(1)], -1.0),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_algorithm_trait() {
        let survey = SoilSurvey {
            horizons: vec![horizon("c1", 0.0, 30.0, Some(2.0))],
            components: vec![component("c1", 1, 100.0, TaxonomyKind::Series, "Auburn")],
            mapunits: vec![mapunit(1)],
        };
        let out = SoilAggregator.execute_default(survey).unwrap();
        assert_eq!(out.summary.horizons_used, 1);
        assert_eq!(out.table.get(1).unwrap().drainage_class, Some(DrainageClass::WellDrained));
    }
}
