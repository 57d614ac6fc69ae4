//! Hydronet CLI - build phases of a water authority's network model

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use geo::MultiPolygon;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use hydronet_algorithms::aggregation::{aggregate_zones, AggregationParams};
use hydronet_algorithms::assignment::{assign_basin_areas, candidates_from_layer, AssignmentParams, CandidateArea};
use hydronet_algorithms::crossings::{extract_crossings, CrossingsInput, CrossingsParams};
use hydronet_algorithms::editlog::replay;
use hydronet_algorithms::forcing::{distribute_forcing, BudgetStep, ForcingParams, MeteoGrid};
use hydronet_algorithms::parameterize::{
    basin_bottom_levels, generate_basin_profiles, inventory_from_layer, propagate, PropagationParams,
};
use hydronet_algorithms::solver::run_solver;
use hydronet_algorithms::validation::{validate, Results, ValidationParams, REPORT_FILE};
use hydronet_algorithms::zone::zones_from_layer;
use hydronet_core::geometry::union_all;
use hydronet_core::io::{read_all_bands, read_model, write_json_atomic, write_model};
use hydronet_core::model::{AreaFixMethod, NodeType};
use hydronet_core::vector::{read_layer, read_package, LayerKind};
use hydronet_core::{AuthorityConfig, Diagnostics, Model, ModelConfig};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "hydronet")]
#[command(author, version, about = "Build, parameterize and validate surface-water network models", long_about = None)]
struct Cli {
    /// Directory holding one subdirectory per authority
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Water authority name, also its directory name
    authority: String,

    phase: Phase,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Phase {
    /// Replay the edit log and repair area rows
    Fix,
    /// Crossings, aggregation and area assignment
    Prepare,
    /// Parameter propagation, forcing and budgets
    Parametrize,
    /// Run the solver
    Run,
    /// Check invariants and solver results
    Validate,
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("a global tracing subscriber is already set");
    }
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Authority directory and its model stage directories
struct Workspace {
    root: PathBuf,
    authority: AuthorityConfig,
}

impl Workspace {
    fn open(data_dir: &Path, name: &str) -> Result<Self> {
        let authority = AuthorityConfig::load(data_dir, name)
            .with_context(|| format!("Failed to load authority config for '{name}'"))?;
        Ok(Self {
            root: data_dir.join(name),
            authority,
        })
    }

    fn stage(&self, stage: &str) -> PathBuf {
        self.root.join(stage)
    }

    fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn load(&self, stage: &str) -> Result<(ModelConfig, Model)> {
        let pb = spinner(&format!("Reading {stage} model..."));
        let dir = self.stage(stage);
        let loaded = read_model(&dir).with_context(|| format!("Failed to read model {}", dir.display()))?;
        pb.finish_and_clear();
        Ok(loaded)
    }

    fn save(&self, stage: &str, config: &ModelConfig, model: &mut Model) -> Result<()> {
        let pb = spinner(&format!("Writing {stage} model..."));
        let dir = self.stage(stage);
        write_model(&dir, config, model).with_context(|| format!("Failed to write model {}", dir.display()))?;
        pb.finish_and_clear();
        println!("Model saved to: {}", dir.display());
        Ok(())
    }

    fn layer(&self, name: &str, kind: LayerKind) -> Result<hydronet_core::vector::FeatureCollection> {
        let path = self.file(name);
        read_layer(&path, kind).with_context(|| format!("Failed to read layer {}", path.display()))
    }
}

fn print_diagnostics(step: &str, diagnostics: &Diagnostics) {
    if diagnostics.is_empty() {
        return;
    }
    println!("{step}: {} diagnostic(s)", diagnostics.len());
    for d in diagnostics.iter() {
        println!("  [{:?}] {} {}: {}", d.severity, d.rule, d.id.as_deref().unwrap_or("-"), d.message);
    }
}

// ─── Phases ─────────────────────────────────────────────────────────────

fn fix(ws: &Workspace) -> Result<()> {
    let (config, mut model) = ws.load("model")?;

    let edits = ws.file(&ws.authority.files.edits);
    if edits.exists() {
        let log = read_package(&edits).with_context(|| format!("Failed to read edit log {}", edits.display()))?;
        let report = replay(&mut model, &log);
        println!(
            "Edit log: {} applied, {} failed, {} layer(s) skipped",
            report.applied,
            report.failed,
            report.skipped_layers.len()
        );
        print_diagnostics("Edit log", &report.diagnostics);
    } else {
        info!("no edit log at {}", edits.display());
    }

    let within = model.fix_unassigned_basin_area(AreaFixMethod::Within)?;
    let closest = model.fix_unassigned_basin_area(AreaFixMethod::Closest {
        distance: ws.authority.closest_area_distance,
    })?;
    info!("attached {} orphan area(s)", within + closest);

    let violations = model.validate();
    for v in &violations {
        warn!("invariant {} broken at {}: {}", v.rule, v.id, v.message);
    }
    let structural = violations.iter().filter(|v| v.is_structural()).count();
    if structural > 0 {
        bail!("{structural} structural invariant violation(s) remain after fixing");
    }
    ws.save("fixed", &config, &mut model)
}

fn prepare(ws: &Workspace) -> Result<()> {
    let (config, mut model) = ws.load("fixed")?;
    let files = &ws.authority.files;

    let pb = spinner("Extracting crossings...");
    let zones = zones_from_layer(&ws.layer(&files.zones, LayerKind::Zones)?)?;
    let lines = ws
        .layer(&files.lines, LayerKind::HydroLines)?
        .iter()
        .flat_map(|f| f.lines())
        .collect();
    let filter = match &files.filter_lines {
        Some(name) => Some(
            ws.layer(name, LayerKind::FilterLines)?
                .iter()
                .flat_map(|f| f.lines())
                .collect(),
        ),
        None => None,
    };
    let params = CrossingsParams {
        tolerance: ws.authority.crossing_tolerance,
        lobe_area: ws.authority.butterfly_lobe_area,
        include_internal: false,
        aggregate_parallel: ws.authority.aggregate_parallel_crossings,
    };
    let set = extract_crossings(CrossingsInput { lines, zones, filter }, &params)?;
    pb.finish_and_clear();
    println!(
        "Crossings: {} found, {} in use, {} zones",
        set.crossings.len(),
        set.in_use().count(),
        set.zones.len()
    );
    write_json_atomic(&ws.stage("prepared").join("crossings.json"), &set)?;

    let aggregation = aggregate_zones(
        &set,
        &AggregationParams {
            joker_area: ws.authority.joker_area,
        },
    )?;
    println!("Aggregation: {} group(s)", aggregation.groups.len());
    write_json_atomic(&ws.stage("prepared").join("aggregation.json"), &aggregation)?;

    let candidates = match &files.areas {
        Some(name) => candidates_from_layer(&ws.layer(name, LayerKind::Areas)?),
        None => aggregation
            .groups
            .iter()
            .map(|g| CandidateArea {
                code: g.codes.first().cloned(),
                geometry: union_all(g.zones.iter().map(|&i| &set.zones[i].geometry)),
            })
            .collect(),
    };
    let alternative: Option<Vec<MultiPolygon<f64>>> = match &files.alternative_areas {
        Some(name) => Some(
            ws.layer(name, LayerKind::Areas)?
                .iter()
                .filter_map(|f| f.multi_polygon())
                .collect(),
        ),
        None => None,
    };

    let mut diagnostics = Diagnostics::new();
    if model.nodes_of_type(NodeType::Basin).next().is_some() {
        let pb = spinner("Assigning basin areas...");
        let report = assign_basin_areas(
            &mut model,
            &candidates,
            alternative.as_deref(),
            &ws.authority.area_overrides,
            &AssignmentParams {
                sliver_area: ws.authority.sliver_area,
            },
        )?;
        pb.finish_and_clear();
        println!("Areas: {} candidate(s) assigned", report.assigned.len());
        diagnostics.extend(report.diagnostics);
    } else {
        warn!("model has no basins; area assignment skipped");
    }
    generate_basin_profiles(&mut model, ws.authority.depth_profile, &mut diagnostics)?;
    print_diagnostics("Prepare", &diagnostics);
    ws.save("prepared", &config, &mut model)
}

fn parametrize(ws: &Workspace) -> Result<()> {
    let (config, mut model) = ws.load("prepared")?;
    let files = &ws.authority.files;

    let inventory = match &files.inventory {
        Some(name) => inventory_from_layer(&ws.layer(name, LayerKind::Inventory)?, ws.authority.inventory_flow_unit),
        None => Default::default(),
    };
    let mut params = PropagationParams::from_authority(&ws.authority, inventory);
    if let Some(name) = &files.hydrology_raster {
        let band = files.bottom_band()?;
        let pb = spinner("Reading water-course bottom levels...");
        let bottom = band
            .read(&ws.file(name))
            .with_context(|| format!("Failed to read band {} of {name}", band.band()))?;
        params.bottom_levels = basin_bottom_levels(&model, &bottom)?;
        pb.finish_and_clear();
    }
    let pb = spinner("Propagating parameters...");
    let report = propagate(&mut model, &params)?;
    pb.finish_and_clear();
    print_diagnostics("Parameters", &report.diagnostics);
    if !report.unknown_basins.is_empty() {
        warn!("{} basin(s) without a target level", report.unknown_basins.len());
    }

    let meteo = match (&files.precipitation_raster, &files.evaporation_raster) {
        (Some(p), Some(e)) => {
            let pb = spinner("Reading meteo grids...");
            let precipitation = read_all_bands::<f64, _>(ws.file(p)).context("Failed to read precipitation")?;
            let evaporation = read_all_bands::<f64, _>(ws.file(e)).context("Failed to read evaporation")?;
            pb.finish_and_clear();
            Some(MeteoGrid::daily(config.starttime, precipitation, evaporation))
        }
        _ => None,
    };
    let mut budgets = Vec::with_capacity(files.budget_rasters.len());
    for raster in &files.budget_rasters {
        let bands = read_all_bands::<f64, _>(ws.file(&raster.path))
            .with_context(|| format!("Failed to read budget raster {}", raster.path))?;
        budgets.push(BudgetStep {
            time: raster.time,
            bands,
        });
    }
    let params = ForcingParams {
        static_forcing: ws.authority.static_forcing,
        start: config.starttime,
        end: config.endtime,
        primary_bands: files.budget_primary_bands.clone(),
    };
    let rows = distribute_forcing(&mut model, meteo.as_ref(), &budgets, &params)?;
    println!("Forcing: {rows} basin time row(s)");

    write_json_atomic(&ws.stage("parametrized").join("diagnostics.json"), &report.diagnostics)?;
    ws.save("parametrized", &config, &mut model)
}

fn run(ws: &Workspace) -> Result<()> {
    let (config, _) = ws.load("parametrized")?;
    let pb = spinner("Running solver...");
    let run = run_solver(&ws.stage("parametrized"), &config);
    pb.finish_and_clear();
    let run = run.context("Solver run failed")?;
    println!("Solver log: {}", run.log.display());
    println!("  Solver time: {:.2?}", run.elapsed);
    Ok(())
}

fn validate_phase(ws: &Workspace) -> Result<()> {
    let (config, model) = ws.load("parametrized")?;
    let results_dir = ws.stage("parametrized").join(&config.results_dir);
    let results = if results_dir.exists() {
        Some(Results::read(&results_dir).context("Failed to read solver results")?)
    } else {
        warn!("no results at {}; checking the model only", results_dir.display());
        None
    };
    let report = validate(&model, results.as_ref(), &ValidationParams::default());
    let path = results_dir.join(REPORT_FILE);
    report.write(&path)?;
    println!("Report saved to: {}", path.display());
    println!(
        "  {} violation(s), max balance error {:.2e}, {} non-stationary basin(s), {} reversed link(s)",
        report.violations.len(),
        report.max_balance_error,
        report.non_stationary_basins,
        report.reversed_links
    );
    if !report.is_valid() {
        bail!("{} invariant violation(s)", report.violations.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let ws = Workspace::open(&cli.data_dir, &cli.authority)?;
    let start = Instant::now();
    match cli.phase {
        Phase::Fix => fix(&ws)?,
        Phase::Prepare => prepare(&ws)?,
        Phase::Parametrize => parametrize(&ws)?,
        Phase::Run => run(&ws)?,
        Phase::Validate => validate_phase(&ws)?,
    }
    println!("{} {:?} done in {:.2?}", ws.authority.name, cli.phase, start.elapsed());
    Ok(())
}
