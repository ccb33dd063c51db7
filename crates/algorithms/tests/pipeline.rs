//! End-to-end runs over small synthetic layer directories.
//!
//! Every layer is a 4×4 WGS84 grid with 0.5° cells covering
//! 121°W..119°W, 37°N..39°N, written as GeoTIFF into a temp directory and
//! read back through `RasterStore`.

use approx::assert_relative_eq;
use habitat_algorithms::climate::{NormalsBuilder, SeasonalAggregator, SeasonalRequest};
use habitat_algorithms::extraction::ExtractionEngine;
use habitat_algorithms::prediction::{LinearSuitabilityModel, OutputTransform, PredictionMapper, Term};
use habitat_algorithms::schema::LayerSchema;
use habitat_core::config::CompositeLayer;
use habitat_core::io::{read_geotiff, write_geotiff};
use chrono::NaiveDate;
use habitat_core::crs::transform_point;
use habitat_core::observation::{partition_by_range, read_observations, Observation};
use habitat_core::raster::Raster;
use habitat_core::store::RasterStore;
use habitat_core::time::{Method, Month, Season, WaterYearRange};
use habitat_core::{Error, GeoTransform, PipelineConfig, CRS};
use habitat_parallel::ProcessingMode;
use std::path::Path;

fn write_layer(dir: &Path, name: &str, value: f64) {
    let mut r = Raster::filled(4, 4, value);
    r.set_transform(GeoTransform::new(-121.0, 39.0, 0.5, -0.5));
    r.set_crs(Some(CRS::wgs84()));
    write_geotiff(&r, dir.join(name)).unwrap();
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.climate.monthly = vec!["ppt".into(), "tmx".into()];
    config.climate.composites = vec![CompositeLayer::new("ppt", Season::Winter, Method::Sum)];
    config.soil.variables = vec!["om".into()];
    config
}

/// Monthly layers for WY2018 winter, tmx only in January, one soil layer
fn monthly_inputs(dir: &Path) {
    write_layer(dir, "ppt2017dec.tif", 10.0);
    write_layer(dir, "ppt2018jan.tif", 20.0);
    write_layer(dir, "ppt2018feb.tif", 30.0);
    write_layer(dir, "tmx2018jan.tif", 5.0);
    write_layer(dir, "gnatsgo_om_270m_ca_2022.tif", 2.5);
}

fn winter_composite(data: &Path, derived: &Path) -> std::path::PathBuf {
    let store = RasterStore::scan(&[data]).unwrap();
    SeasonalAggregator::new(&store, derived)
        .build(&SeasonalRequest::new("ppt", Season::Winter, Method::Sum, 2018))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Seasonal composites
// ---------------------------------------------------------------------------

#[test]
fn winter_sum_spans_the_calendar_year_boundary() {
    let data = tempfile::tempdir().unwrap();
    let derived = tempfile::tempdir().unwrap();
    monthly_inputs(data.path());

    let path = winter_composite(data.path(), derived.path());
    assert_eq!(path.file_name().unwrap(), "ppt2018winter_sum.tif");

    let composite = read_geotiff::<f64, _>(&path).unwrap();
    assert_eq!(composite.shape(), (4, 4));
    assert!(composite.data().iter().all(|&v| (v - 60.0).abs() < 1e-9));

    // A second build without overwrite refuses to clobber the output
    let store = RasterStore::scan(&[data.path(), derived.path()]).unwrap();
    let again = SeasonalAggregator::new(&store, derived.path())
        .build(&SeasonalRequest::new("ppt", Season::Winter, Method::Sum, 2018));
    assert!(matches!(again, Err(Error::OutputExists(_))));
}

#[test]
fn summer_composite_with_gap_is_missing_input() {
    let data = tempfile::tempdir().unwrap();
    write_layer(data.path(), "tmx2018jun.tif", 25.0);
    write_layer(data.path(), "tmx2018aug.tif", 27.0);
    let store = RasterStore::scan(&[data.path()]).unwrap();

    let err = SeasonalAggregator::new(&store, data.path())
        .build(&SeasonalRequest::new("tmx", Season::Summer, Method::Mean, 2018))
        .unwrap_err();
    assert!(err.is_recoverable());
    assert!(err.to_string().contains("tmx2018jul"));
}

#[test]
fn overwrite_replaces_a_stale_composite() {
    let data = tempfile::tempdir().unwrap();
    let derived = tempfile::tempdir().unwrap();
    monthly_inputs(data.path());
    write_layer(derived.path(), "ppt2018winter_sum.tif", 99.0);
    let store = RasterStore::scan(&[data.path(), derived.path()]).unwrap();
    let request = SeasonalRequest::new("ppt", Season::Winter, Method::Sum, 2018);

    let path = SeasonalAggregator::new(&store, derived.path())
        .with_overwrite(true)
        .build(&request)
        .unwrap();
    assert_eq!(path, derived.path().join("ppt2018winter_sum.tif"));

    let composite = read_geotiff::<f64, _>(&path).unwrap();
    assert_relative_eq!(composite.get(3, 3).unwrap(), 60.0);
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

const OBSERVATIONS: &str = "\
id,longitude,latitude,date,source
a,-120.1,38.1,2018-01-15,survey
far,-100.0,38.1,2018-01-20,survey
b,-120.6,37.6,2018-02-03,NA
late,-120.1,38.1,2019-01-15,survey
";

fn extract_to_csv(data: &Path, derived: &Path, observations: &Path, out: &Path) -> habitat_algorithms::report::RunReport {
    let config = config();
    let range = WaterYearRange::new(2018, 2018);
    let store = RasterStore::scan(&[data, derived]).unwrap();
    let all = read_observations(observations, &config.observations).unwrap();
    let partition = partition_by_range(all, range);
    assert_eq!(partition.outside.len(), 1);

    let engine = ExtractionEngine::new(
        &store,
        LayerSchema::from_config(&config).unwrap(),
        config.indexer().unwrap(),
    )
    .with_mode(ProcessingMode::Parallel);
    let extraction = engine.extract(partition.inside, range).unwrap();
    extraction.table.write_csv(out, &config.observations.null_token).unwrap();

    let t = &extraction.table;
    let ids: Vec<&str> = t.rows().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "far", "b"]);

    assert_eq!(t.value(0, "ppt"), Some(20.0));
    assert_eq!(t.value(0, "tmx"), Some(5.0));
    assert_eq!(t.value(0, "ppt_winter_sum"), Some(60.0));
    assert_eq!(t.value(0, "om"), Some(2.5));

    // Outside the raster extent: kept, all nulls
    assert!(t.rows()[1].is_null());

    // February has no tmx layer
    assert_eq!(t.value(2, "ppt"), Some(30.0));
    assert_eq!(t.value(2, "tmx"), None);
    assert_eq!(t.value(2, "ppt_winter_sum"), Some(60.0));

    extraction.report
}

#[test]
fn extraction_keeps_every_row_and_counts_failures() {
    let data = tempfile::tempdir().unwrap();
    let derived = tempfile::tempdir().unwrap();
    monthly_inputs(data.path());
    winter_composite(data.path(), derived.path());

    let work = tempfile::tempdir().unwrap();
    let obs_path = work.path().join("observations.csv");
    std::fs::write(&obs_path, OBSERVATIONS).unwrap();

    let first = work.path().join("features_1.csv");
    let report = extract_to_csv(data.path(), derived.path(), &obs_path, &first);
    assert_eq!(report.rows, 3);
    assert_eq!(report.processed_periods(), 2);
    assert_eq!(report.skipped_periods, 10);
    assert_eq!(report.geometry_failure_count(), 1);
    assert_eq!(report.missing_layer_count(), 1);
    assert!(!report.is_clean());

    let text = std::fs::read_to_string(&first).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("id,x,y,date,year,month,water_year,source,ppt,tmx,ppt_winter_sum,om")
    );
    assert_eq!(lines.next(), Some("a,-120.1,38.1,2018-01-15,2018,1,2018,survey,20,5,60,2.5"));
    assert_eq!(lines.next(), Some("far,-100,38.1,2018-01-20,2018,1,2018,survey,NA,NA,NA,NA"));
    assert_eq!(lines.next(), Some("b,-120.6,37.6,2018-02-03,2018,2,2018,NA,30,NA,60,2.5"));

    // Re-running gives the same bytes
    let second = work.path().join("features_2.csv");
    extract_to_csv(data.path(), derived.path(), &obs_path, &second);
    assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
}

#[test]
fn extraction_reprojects_points_into_the_stack_crs() {
    // 10 km square of 1 km cells in California Albers, centered on Sacramento
    let data = tempfile::tempdir().unwrap();
    let albers = CRS::california_albers();
    let (cx, cy) = transform_point(&CRS::wgs84(), &albers, -121.49, 38.58).unwrap();
    let mut ppt = Raster::filled(10, 10, 7.0);
    ppt.set_transform(GeoTransform::new(cx - 5000.0, cy + 5000.0, 1000.0, -1000.0));
    ppt.set_crs(Some(albers));
    write_geotiff(&ppt, data.path().join("ppt2018jan.tif")).unwrap();
    let store = RasterStore::scan(&[data.path()]).unwrap();

    let date = NaiveDate::from_ymd_opt(2018, 1, 15);
    let observations = vec![
        Observation::new("sac", -121.49, 38.58, CRS::wgs84(), date),
        // Lambert-93 has no projection here, so the point cannot be placed
        Observation::new("lambert", 652_000.0, 6_862_000.0, CRS::from_epsg(2154), date),
    ];
    let schema = LayerSchema::new(&["ppt".into()], &[], &[], 3).unwrap();
    let extraction = ExtractionEngine::new(&store, schema, Default::default())
        .with_mode(ProcessingMode::Sequential)
        .extract(observations, WaterYearRange::new(2018, 2018))
        .unwrap();

    let t = &extraction.table;
    assert_eq!(t.len(), 2);
    assert_eq!(t.value(0, "ppt"), Some(7.0));
    assert_eq!(t.rows()[1].id, "lambert");
    assert!(t.rows()[1].is_null());
    assert_eq!(extraction.report.geometry_failure_count(), 1);
    assert_eq!(
        extraction.report.periods[0].geometry_failures,
        vec!["lambert".to_string()]
    );
}

// ---------------------------------------------------------------------------
// Normals and prediction
// ---------------------------------------------------------------------------

fn normals(data: &Path, derived: &Path) -> RasterStore {
    let range = WaterYearRange::new(2018, 2018);
    let store = RasterStore::scan(&[data, derived]).unwrap();
    let builder = NormalsBuilder::new(&store, derived);
    builder.build_monthly("ppt", Month::Jan, range).unwrap();
    builder.build_monthly("tmx", Month::Jan, range).unwrap();
    builder
        .build_seasonal("ppt", Season::Winter, Method::Sum, range)
        .unwrap();
    RasterStore::scan(&[data, derived]).unwrap()
}

fn term(covariate: &str, coefficient: f64) -> Term {
    Term {
        covariate: covariate.into(),
        coefficient,
        clamp: None,
    }
}

#[test]
fn prediction_from_normals() {
    let data = tempfile::tempdir().unwrap();
    let derived = tempfile::tempdir().unwrap();
    monthly_inputs(data.path());
    winter_composite(data.path(), derived.path());
    let store = normals(data.path(), derived.path());

    // Model covariates in a different order than the stack bands
    let model = LinearSuitabilityModel::new(
        -1.0,
        vec![term("om", 0.2), term("ppt", 0.05), term("ppt_winter_sum", -0.01)],
        OutputTransform::Raw,
        0.0,
    )
    .unwrap();
    let mapper = PredictionMapper::new(&store, LayerSchema::from_config(&config()).unwrap()).unwrap();

    let out_dir = tempfile::tempdir().unwrap();
    let path = mapper
        .write_prediction(&model, Month::Jan, "bobcat", "current", out_dir.path())
        .unwrap();
    assert_eq!(path.file_name().unwrap(), "bobcat_current_jan.tif");

    let map = read_geotiff::<f64, _>(&path).unwrap();
    assert_eq!(map.grid().transform, GeoTransform::new(-121.0, 39.0, 0.5, -0.5));
    let expected = (-1.0_f64 + 0.2 * 2.5 + 0.05 * 20.0 - 0.01 * 60.0).exp();
    // Stored as Float32
    assert_relative_eq!(map.get(2, 1).unwrap(), expected, epsilon = 1e-6);
}

#[test]
fn prediction_reports_every_missing_covariate() {
    let data = tempfile::tempdir().unwrap();
    let derived = tempfile::tempdir().unwrap();
    monthly_inputs(data.path());
    winter_composite(data.path(), derived.path());
    let store = normals(data.path(), derived.path());

    let model = LinearSuitabilityModel::new(
        0.0,
        vec![term("ppt", 1.0), term("elev", 1.0), term("cwd", 1.0)],
        OutputTransform::Logistic,
        0.0,
    )
    .unwrap();
    let mapper = PredictionMapper::new(&store, LayerSchema::from_config(&config()).unwrap()).unwrap();

    match mapper.predict(&model, Month::Jan) {
        Err(Error::SchemaMismatch { missing, .. }) => {
            assert_eq!(missing, vec!["elev".to_string(), "cwd".to_string()]);
        }
        other => panic!("expected a schema mismatch, got {other:?}"),
    }
}
