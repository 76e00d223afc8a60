//! CLI entry point (spec §6 "CLI surface").
//!
//! Grounded in dfyz-osm-renderer's `bin/importer.rs`/`bin/renderer.rs` shape
//! (`env_logger::init`, a `log`-macro-reported failure path, a nonzero
//! exit code on error), generalized from `clap`'s old builder API to its
//! `derive` macro, already part of this crate's dependency stack.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};

use tilecraft::config::Config;
use tilecraft::coords::{lat_to_latp, GeoBox};
use tilecraft::driver::{self, DriverSettings, SharedData};
use tilecraft::extractor::script::RuleScript;
use tilecraft::extractor::FeatureExtractor;
use tilecraft::layer::LayerDef;
use tilecraft::osm::ingest::ingest_osm_xml;
use tilecraft::osm::store::{NodeStore, RelationStore, WayStore};
use tilecraft::output_sink::open_sink;
use tilecraft::shapefile_source::ShapefileSource;
use tilecraft::tile_data::TileDataFacade;
use tilecraft::tile_index::TileIndex;

#[derive(Parser, Debug)]
#[command(name = "tilecraft", about = "Renders OpenStreetMap data into a Mapbox Vector Tile pyramid")]
struct Cli {
    /// OSM XML input file (repeatable).
    #[arg(long = "input", required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory or `.mbtiles` file.
    #[arg(long = "output")]
    output: PathBuf,

    /// Config JSON file.
    #[arg(long = "config", default_value = "config.json")]
    config: PathBuf,

    /// User logic script (not executed by this build; see DESIGN.md).
    #[arg(long = "process", default_value = "process.lua")]
    process: PathBuf,

    #[arg(long = "verbose")]
    verbose: bool,

    /// Worker thread count; 0 means auto (`num_cpus::get()`).
    #[arg(long = "threads", default_value_t = 0)]
    threads: usize,
}

fn clip_box_from_settings(config: &Config) -> Option<GeoBox> {
    let [min_lon, min_lat, max_lon, max_lat] = config.settings.bounding_box?;
    Some(GeoBox::new(
        (min_lon * tilecraft::coords::COORD_SCALE).round() as i32,
        (lat_to_latp(min_lat) * tilecraft::coords::COORD_SCALE).round() as i32,
        (max_lon * tilecraft::coords::COORD_SCALE).round() as i32,
        (lat_to_latp(max_lat) * tilecraft::coords::COORD_SCALE).round() as i32,
    ))
}

fn run(cli: &Cli) -> Result<()> {
    if cli.verbose {
        info!("verbose diagnostics enabled");
    }

    let config = Config::load(&cli.config).with_context(|| format!("loading config {:?}", cli.config))?;

    if cli.process != PathBuf::from("process.lua") || cli.process.exists() {
        warn!(
            "--process {:?} ignored: this build has no embedded scripting engine, falling back to the built-in rule script (see DESIGN.md)",
            cli.process
        );
    }

    let mut tile_index = TileIndex::new(config.settings.basezoom);
    let mut layer_defs = config.layer_defs.clone();
    let mut order = config.order.clone();

    let clip_box = clip_box_from_settings(&config);
    let shapefile = if layer_defs.values().any(|def| def.source.is_some()) {
        let clip_box = clip_box.unwrap_or_else(|| GeoBox::new(i32::MIN / 2, i32::MIN / 2, i32::MAX / 2, i32::MAX / 2));
        Some(ShapefileSource::load(&layer_defs, &order, clip_box, &mut tile_index).context("loading shapefile layers")?)
    } else {
        None
    };

    let mut script = RuleScript::default();

    let mut nodes = NodeStore::new();
    let mut ways = WayStore::new();
    let mut relations = RelationStore::new();

    let mut read_any = false;
    for input in &cli.inputs {
        let file = match File::open(input) {
            Ok(file) => file,
            Err(err) => {
                error!("could not open input {input:?}: {err}");
                continue;
            }
        };
        let reader = BufReader::new(file);
        let mut extractor = FeatureExtractor::new(&mut script, shapefile.as_ref(), &mut tile_index, &mut order, &mut layer_defs);
        match ingest_osm_xml(reader, &mut nodes, &mut ways, &mut relations, &mut extractor) {
            Ok(()) => {
                info!("ingested {input:?}");
                read_any = true;
            }
            Err(err) => error!("failed to ingest {input:?}: {err:#}"),
        }
    }
    if !read_any {
        anyhow::bail!("no input was successfully read");
    }

    // `tile_worker.rs` indexes this slice directly by `layer_id`
    // (`layers[id as usize]`), so it must be dense and ordered by id,
    // not by whatever order a `HashMap` happens to iterate in.
    let mut layer_slots: Vec<Option<LayerDef>> = vec![None; order.len()];
    for def in layer_defs.values() {
        if let Some(id) = order.layer_id(&def.name) {
            layer_slots[id as usize] = Some(def.clone());
        }
    }
    let layer_list: Vec<LayerDef> = layer_slots
        .into_iter()
        .enumerate()
        .map(|(id, def)| def.unwrap_or_else(|| panic!("layer id {id} registered in LayerOrder has no matching LayerDef")))
        .collect();

    let mut sources: Vec<Box<dyn tilecraft::tile_data::TileDataSource + Send + Sync>> = vec![Box::new(tile_index)];
    if let Some(shapefile) = shapefile {
        sources.push(Box::new(shapefile));
    }
    let facade = TileDataFacade::new(sources);

    let sink = open_sink(
        &cli.output,
        &config.settings.name,
        &config.settings.description,
        &config.settings.version,
        &config.settings.metadata,
        config.settings.mvt_version,
    )
    .with_context(|| format!("opening output sink {:?}", cli.output))?;

    let thread_count = if cli.threads == 0 { num_cpus::get() } else { cli.threads };
    let settings = DriverSettings {
        start_zoom: config.settings.minzoom,
        end_zoom: config.settings.maxzoom,
        thread_count,
        mvt_version: config.settings.mvt_version,
        include_ids: config.settings.include_ids,
        compress: config.compress(),
        gzip: config.gzip(),
    };

    // NodeStore/WayStore stay put from here on; only read during output.
    let shared = SharedData {
        nodes: &nodes,
        ways: &ways,
        layers: &layer_list,
        order: &order,
        facade: &facade,
        sink: sink.as_ref(),
    };

    let failed = driver::run(&settings, &shared);
    if failed > 0 {
        anyhow::bail!("{failed} tile(s) failed to render or write, see log for detail");
    }
    info!("done");
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        error!("{err:#}");
        std::process::exit(1);
    }
}
