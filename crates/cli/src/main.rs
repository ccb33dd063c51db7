//! Habitat CLI - environmental covariates for species-distribution models

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use habitat_algorithms::climate::{NormalsBuilder, SeasonalAggregator, SeasonalRequest};
use habitat_algorithms::extraction::ExtractionEngine;
use habitat_algorithms::prediction::{LinearSuitabilityModel, PredictionMapper};
use habitat_algorithms::report::FailureLog;
use habitat_algorithms::schema::LayerSchema;
use habitat_algorithms::soil::{aggregate, SoilRasterizer, SoilSurvey};
use habitat_core::io::read_geotiff;
use habitat_core::observation::{partition_by_range, read_observations};
use habitat_core::soil::{LayerKind, SoilAttribute, SoilTable};
use habitat_core::store::{RasterStore, SoilLayerName};
use habitat_core::time::{Method, Month, Season, WaterYearRange};
use habitat_core::PipelineConfig;
use habitat_parallel::ProcessingMode;

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "habitat")]
#[command(author, version, about = "Environmental covariates for species-distribution models", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pipeline configuration (JSON); built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Water-year range arguments; each bound defaults to the configured one
#[derive(clap::Args)]
struct YearArgs {
    /// First water year
    #[arg(long)]
    start: Option<i32>,
    /// Last water year (inclusive)
    #[arg(long)]
    end: Option<i32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// List the monthly periods of a water-year range
    Periods {
        #[command(flatten)]
        years: YearArgs,
    },
    /// Index layer directories and summarize what they hold
    Index {
        /// Directories holding layer files
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },
    /// Build seasonal composites for every water year of a range
    Seasonal {
        /// Directories holding monthly layers
        #[arg(short, long, required = true)]
        data: Vec<PathBuf>,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// Climate variable (e.g. ppt)
        #[arg(long)]
        variable: String,
        /// winter or summer
        #[arg(long)]
        season: String,
        /// sum or mean
        #[arg(long)]
        method: String,
        #[command(flatten)]
        years: YearArgs,
        /// Replace existing outputs
        #[arg(long)]
        overwrite: bool,
    },
    /// Long-term average layers
    Normals {
        #[command(subcommand)]
        kind: NormalsCommands,
    },
    /// Soil survey aggregation and rasterization
    Soil {
        #[command(subcommand)]
        step: SoilCommands,
    },
    /// Extract environmental values at observation points
    Extract {
        /// Observation table (CSV)
        observations: PathBuf,
        /// Output feature table (CSV)
        output: PathBuf,
        /// Directories holding climate, composite and soil layers
        #[arg(short, long, required = true)]
        data: Vec<PathBuf>,
        #[command(flatten)]
        years: YearArgs,
    },
    /// Map habitat suitability from monthly and seasonal normals
    Predict {
        /// Fitted model (JSON)
        model: PathBuf,
        /// Output directory
        output: PathBuf,
        /// Directories holding normals and soil layers
        #[arg(short, long, required = true)]
        data: Vec<PathBuf>,
        /// Species label used in output names
        #[arg(long)]
        species: String,
        /// Scenario label used in output names
        #[arg(long, default_value = "current")]
        scenario: String,
        /// Months to map (e.g. jan,jul); all twelve when omitted
        #[arg(long, value_delimiter = ',')]
        months: Vec<String>,
    },
}

// ─── Normals subcommands ────────────────────────────────────────────────

#[derive(Subcommand)]
enum NormalsCommands {
    /// Per-month normals `{var}avg{mon}.tif`
    Monthly {
        /// Directories holding monthly layers
        #[arg(short, long, required = true)]
        data: Vec<PathBuf>,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// Climate variable
        #[arg(long)]
        variable: String,
        /// Months to build (e.g. jan,jul); all twelve when omitted
        #[arg(long, value_delimiter = ',')]
        months: Vec<String>,
        #[command(flatten)]
        years: YearArgs,
        /// Average over the years present instead of failing on gaps
        #[arg(long)]
        allow_partial: bool,
        /// Replace existing outputs
        #[arg(long)]
        overwrite: bool,
    },
    /// Seasonal normals `{var}avg{season}_{method}.tif`
    Seasonal {
        /// Directories holding seasonal composites
        #[arg(short, long, required = true)]
        data: Vec<PathBuf>,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// Climate variable
        #[arg(long)]
        variable: String,
        /// winter or summer
        #[arg(long)]
        season: String,
        /// sum or mean
        #[arg(long)]
        method: String,
        #[command(flatten)]
        years: YearArgs,
        /// Average over the years present instead of failing on gaps
        #[arg(long)]
        allow_partial: bool,
        /// Replace existing outputs
        #[arg(long)]
        overwrite: bool,
    },
}

// ─── Soil subcommands ───────────────────────────────────────────────────

#[derive(Subcommand)]
enum SoilCommands {
    /// Aggregate horizon and component tables to one row per map unit
    Aggregate {
        /// Horizon table (CSV)
        #[arg(long)]
        horizons: PathBuf,
        /// Component table (CSV)
        #[arg(long)]
        components: PathBuf,
        /// Map-unit table (CSV)
        #[arg(long)]
        mapunits: PathBuf,
        /// Output map-unit soil table (CSV)
        output: PathBuf,
        /// Depth cutoff in cm; the configured one when omitted
        #[arg(long)]
        depth_cutoff: Option<f64>,
    },
    /// Turn a map-unit raster into soil layers on a reference grid
    Rasterize {
        /// Map-unit soil table written by `soil aggregate`
        #[arg(long)]
        table: PathBuf,
        /// Raster of map-unit keys
        #[arg(long)]
        mapunits: PathBuf,
        /// Any layer on the target grid (e.g. a monthly climate layer)
        #[arg(long)]
        reference: PathBuf,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// Attributes to write; the configured soil variables when omitted
        #[arg(long, value_delimiter = ',')]
        attributes: Vec<String>,
        /// continuous or categorical; each attribute's own kind when omitted
        #[arg(long)]
        kind: Option<String>,
        /// File name prefix
        #[arg(long, default_value = "gnatsgo")]
        prefix: String,
        /// Resolution label
        #[arg(long, default_value = "270m")]
        resolution: String,
        /// Region label
        #[arg(long, default_value = "ca")]
        region: String,
        /// Survey vintage
        #[arg(long, default_value = "2022")]
        vintage: String,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn spinner(msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

fn progress_bar(msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} periods ({elapsed})")?
            .progress_chars("=> "),
    );
    pb.set_message(msg.to_string());
    Ok(pb)
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::from_json_file(p)
            .with_context(|| format!("Failed to load config: {}", p.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn year_range(config: &PipelineConfig, args: &YearArgs) -> Result<WaterYearRange> {
    let range = WaterYearRange::new(
        args.start.unwrap_or(config.years.start),
        args.end.unwrap_or(config.years.end),
    );
    Ok(config.indexer()?.validate(range)?)
}

fn scan(dirs: &[PathBuf]) -> Result<RasterStore> {
    let store = RasterStore::scan(dirs).context("Failed to index layer directories")?;
    info!(layers = store.len(), "indexed layer files");
    Ok(store)
}

fn parse_months(months: &[String]) -> Result<Vec<Month>> {
    if months.is_empty() {
        return Ok(Month::ALL.to_vec());
    }
    months
        .iter()
        .map(|m| m.parse::<Month>().with_context(|| format!("Unknown month: {m}")))
        .collect()
}

fn parse_season(season: &str, method: &str) -> Result<(Season, Method)> {
    let season = season
        .parse::<Season>()
        .with_context(|| format!("Unknown season: {season}. Use: winter, summer"))?;
    let method = method
        .parse::<Method>()
        .with_context(|| format!("Unknown method: {method}. Use: sum, mean"))?;
    Ok((season, method))
}

fn parse_kind(kind: &str) -> Result<LayerKind> {
    match kind.to_lowercase().as_str() {
        "continuous" => Ok(LayerKind::Continuous),
        "categorical" => Ok(LayerKind::Categorical),
        _ => bail!("Unknown layer kind: {kind}. Use: continuous, categorical"),
    }
}

/// Print accumulated recoverable failures
fn summarize(failures: &FailureLog) {
    if failures.is_empty() {
        return;
    }
    warn!(count = failures.len(), "some outputs were skipped");
    eprintln!("{failures}");
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info { input } => {
            let raster = read_geotiff::<f64, _>(&input)
                .with_context(|| format!("Failed to read raster: {}", input.display()))?;
            let (rows, cols) = raster.shape();
            let stats = raster.statistics();
            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
            println!("Cell size: {}", raster.cell_size());
            let bounds = raster.bounds();
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.0, bounds.1, bounds.2, bounds.3
            );
            match raster.crs() {
                Some(crs) => println!("CRS: {crs}"),
                None => println!("CRS: none"),
            }
            println!(
                "Statistics: min={:?} max={:?} mean={:?} valid={}",
                stats.min, stats.max, stats.mean, stats.valid_count
            );
        }

        Commands::Periods { years } => {
            let range = year_range(&config, &years)?;
            let periods = config.indexer()?.periods(range)?;
            for period in &periods {
                println!("{period}");
            }
            info!(count = periods.len(), %range, "periods");
        }

        Commands::Index { dirs } => {
            let store = scan(&dirs)?;
            let mut by_variable: std::collections::BTreeMap<&str, usize> = Default::default();
            for key in store.keys() {
                *by_variable.entry(key.variable.as_str()).or_default() += store.get(key).len();
            }
            for (variable, count) in by_variable {
                println!("{variable:<24} {count} layers");
            }
        }

        Commands::Seasonal {
            data,
            output,
            variable,
            season,
            method,
            years,
            overwrite,
        } => {
            let range = year_range(&config, &years)?;
            let (season, method) = parse_season(&season, &method)?;
            let store = scan(&data)?;
            let aggregator = SeasonalAggregator::new(&store, &output).with_overwrite(overwrite);

            let start = Instant::now();
            let pb = spinner(&format!("Building {variable} {season} {method} composites..."))?;
            let mut failures = FailureLog::new();
            let mut written = 0;
            for water_year in range.years() {
                let request = SeasonalRequest::new(&variable, season, method, water_year);
                if failures.absorb(request.key().to_string(), aggregator.build(&request))?.is_some() {
                    written += 1;
                }
            }
            pb.finish_and_clear();
            summarize(&failures);
            println!("{written} composites saved to: {}", output.display());
            println!("  Processing time: {:.2?}", start.elapsed());
        }

        Commands::Normals { kind } => match kind {
            NormalsCommands::Monthly {
                data,
                output,
                variable,
                months,
                years,
                allow_partial,
                overwrite,
            } => {
                let range = year_range(&config, &years)?;
                let months = parse_months(&months)?;
                let store = scan(&data)?;
                let builder = NormalsBuilder::new(&store, &output)
                    .with_indexer(config.indexer()?)
                    .with_overwrite(overwrite)
                    .with_allow_partial(allow_partial);

                let start = Instant::now();
                let pb = spinner(&format!("Averaging {variable} over {range}..."))?;
                let mut failures = FailureLog::new();
                for month in months {
                    failures.absorb(
                        format!("{variable} {month}"),
                        builder.build_monthly(&variable, month, range),
                    )?;
                }
                pb.finish_and_clear();
                summarize(&failures);
                done("Monthly normals", &output, start.elapsed());
            }
            NormalsCommands::Seasonal {
                data,
                output,
                variable,
                season,
                method,
                years,
                allow_partial,
                overwrite,
            } => {
                let range = year_range(&config, &years)?;
                let (season, method) = parse_season(&season, &method)?;
                let store = scan(&data)?;
                let builder = NormalsBuilder::new(&store, &output)
                    .with_indexer(config.indexer()?)
                    .with_overwrite(overwrite)
                    .with_allow_partial(allow_partial);

                let start = Instant::now();
                let pb = spinner(&format!("Averaging {variable} {season} {method} over {range}..."))?;
                let path = builder.build_seasonal(&variable, season, method, range)?;
                pb.finish_and_clear();
                done("Seasonal normal", &path, start.elapsed());
            }
        },

        Commands::Soil { step } => match step {
            SoilCommands::Aggregate {
                horizons,
                components,
                mapunits,
                output,
                depth_cutoff,
            } => {
                let cutoff = depth_cutoff.unwrap_or(config.soil.depth_cutoff);
                let allowed = &config.soil.allowed_depth_cutoffs;
                if !allowed.is_empty() && !allowed.contains(&cutoff) {
                    bail!("Depth cutoff {cutoff} is not one of {allowed:?}");
                }
                let survey = SoilSurvey::read_csv(&horizons, &components, &mapunits)
                    .context("Failed to read soil survey tables")?;

                let start = Instant::now();
                let pb = spinner("Aggregating soil survey...")?;
                let result = aggregate(&survey.horizons, &survey.components, &survey.mapunits, cutoff)?;
                pb.finish_and_clear();
                result.table.write_csv(&output)?;
                info!(summary = %result.summary, "soil aggregation");
                done("Soil table", &output, start.elapsed());
            }
            SoilCommands::Rasterize {
                table,
                mapunits,
                reference,
                output,
                attributes,
                kind,
                prefix,
                resolution,
                region,
                vintage,
            } => {
                let attributes: Vec<SoilAttribute> = if attributes.is_empty() {
                    config
                        .soil
                        .variables
                        .iter()
                        .map(|v| v.parse())
                        .collect::<habitat_core::Result<_>>()?
                } else {
                    attributes.iter().map(|v| v.parse()).collect::<habitat_core::Result<_>>()?
                };
                let kind = kind.as_deref().map(parse_kind).transpose()?;
                let table = SoilTable::read_csv(&table)
                    .with_context(|| format!("Failed to read soil table: {}", table.display()))?;
                let mapunits = read_geotiff::<f64, _>(&mapunits)
                    .with_context(|| format!("Failed to read map units: {}", mapunits.display()))?;
                let reference = read_geotiff::<f64, _>(&reference)
                    .with_context(|| format!("Failed to read reference grid: {}", reference.display()))?
                    .grid();
                let rasterizer = SoilRasterizer::new(&table);

                let start = Instant::now();
                for attribute in attributes {
                    let pb = spinner(&format!("Rasterizing {attribute}..."))?;
                    let kind = kind.unwrap_or_else(|| attribute.kind());
                    let layer = rasterizer.rasterize(&mapunits, attribute, kind, &reference)?;
                    let name = SoilLayerName {
                        prefix: prefix.clone(),
                        variable: attribute.name().to_string(),
                        resolution: resolution.clone(),
                        region: region.clone(),
                        vintage: vintage.clone(),
                    };
                    let path = rasterizer.write_layer(&layer, attribute, &name, &output)?;
                    pb.finish_and_clear();
                    println!("{} saved to: {}", attribute, path.display());
                }
                println!("  Processing time: {:.2?}", start.elapsed());
            }
        },

        Commands::Extract {
            observations,
            output,
            data,
            years,
        } => {
            let range = year_range(&config, &years)?;
            let schema = LayerSchema::from_config(&config)?;
            let store = scan(&data)?;
            let all = read_observations(&observations, &config.observations)
                .with_context(|| format!("Failed to read observations: {}", observations.display()))?;
            let partition = partition_by_range(all, range);
            if !partition.outside.is_empty() || !partition.undated.is_empty() {
                warn!(
                    outside = partition.outside.len(),
                    undated = partition.undated.len(),
                    %range,
                    "dropping observations outside the water-year range"
                );
            }

            let start = Instant::now();
            let pb = progress_bar("Extracting")?;
            let progress = |done: usize, total: usize| {
                pb.set_length(total as u64);
                pb.set_position(done as u64);
            };
            let engine = ExtractionEngine::new(&store, schema, config.indexer()?)
                .with_mode(ProcessingMode::from_threads(config.threads))
                .with_progress(&progress);
            let extraction = engine.extract(partition.inside, range)?;
            pb.finish_and_clear();

            extraction
                .table
                .write_csv(&output, &config.observations.null_token)
                .with_context(|| format!("Failed to write feature table: {}", output.display()))?;
            print!("{}", extraction.report);
            done("Feature table", &output, start.elapsed());
        }

        Commands::Predict {
            model,
            output,
            data,
            species,
            scenario,
            months,
        } => {
            let months = parse_months(&months)?;
            let model = LinearSuitabilityModel::from_json_file(&model)
                .with_context(|| format!("Failed to read model: {}", model.display()))?;
            let schema = LayerSchema::from_config(&config)?;
            let store = scan(&data)?;
            let mapper = PredictionMapper::new(&store, schema)?;

            let start = Instant::now();
            for month in months {
                let pb = spinner(&format!("Predicting {species} {scenario} {month}..."))?;
                let path = mapper.write_prediction(&model, month, &species, &scenario, &output)?;
                pb.finish_and_clear();
                println!("{} saved to: {}", month, path.display());
            }
            println!("  Processing time: {:.2?}", start.elapsed());
        }
    }

    Ok(())
}
