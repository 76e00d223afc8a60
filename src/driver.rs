//! Output driver (spec §4.7): for each zoom, spawns N worker threads
//! that round-robin over the tile list and render+write every tile they
//! own, then joins before advancing to the next zoom.
//!
//! Grounded in dfyz-osm-renderer's `http_server.rs` thread-fan-out shape (one
//! `Arc`-shared, read-only server object, N worker threads, round-robin
//! dispatch) — generalized from "one thread per TCP connection handler"
//! to "one thread per output worker," and from push-dispatch over an
//! `mpsc` channel to pull-dispatch over a `TileDataFacade::worker_cursor`
//! (spec §4.7's "iterates the global tile list, skips tile i unless
//! i mod N == w" is naturally a pull, not a push).

use std::sync::atomic::{AtomicU64, Ordering};

use log::{error, info};

use crate::layer::{LayerDef, LayerOrder};
use crate::osm::store::{NodeStore, WayStore};
use crate::output_sink::{maybe_compress, TileSink};
use crate::tile_data::TileDataFacade;
use crate::tile_worker::render_tile;

pub struct DriverSettings {
    pub start_zoom: u8,
    pub end_zoom: u8,
    pub thread_count: usize,
    pub mvt_version: u32,
    pub include_ids: bool,
    pub compress: bool,
    pub gzip: bool,
}

/// Every read-only collaborator an output worker thread needs (spec
/// §4.7 "SharedData: immutable refs to config, layer defs, tile data
/// facade").
pub struct SharedData<'a> {
    pub nodes: &'a NodeStore,
    pub ways: &'a WayStore,
    pub layers: &'a [LayerDef],
    pub order: &'a LayerOrder,
    pub facade: &'a TileDataFacade,
    pub sink: &'a dyn TileSink,
}

/// Advisory progress cadence (spec §4.7): coarser at low zoom, finer at
/// high zoom, where there are vastly more tiles.
fn progress_interval(zoom: u8) -> u64 {
    match zoom {
        0..=4 => 1,
        5..=9 => 10,
        _ => 100,
    }
}

/// Runs the full zoom range, joining all workers before advancing (spec
/// §4.7's outer loop). Returns the number of tiles that failed to
/// compress or write; a failure is fatal for that tile only, but the
/// caller is expected to turn a nonzero count into a nonzero process
/// exit code (spec §4.7/§6: "exit code reflects the worst outcome").
pub fn run(settings: &DriverSettings, shared: &SharedData<'_>) -> u64 {
    let failures = AtomicU64::new(0);
    for z in settings.start_zoom..=settings.end_zoom {
        shared.facade.set_zoom(z);
        info!("rendering zoom {z}");

        std::thread::scope(|scope| {
            for worker in 0..settings.thread_count.max(1) {
                scope.spawn(|| {
                    run_worker(worker, settings, shared, z, &failures);
                });
            }
        });
    }
    failures.load(Ordering::Relaxed)
}

fn run_worker(worker: usize, settings: &DriverSettings, shared: &SharedData<'_>, z: u8, failures: &AtomicU64) {
    let interval = progress_interval(z);
    let cursor = shared.facade.worker_cursor(worker, settings.thread_count.max(1));
    // Worker 0 is the designated progress reporter (spec §4.7), counting
    // only the tiles it personally renders; every worker shares stdout
    // unsynchronized (interleaved lines are acceptable).
    let mut rendered = 0u64;
    for tile in cursor {
        let bytes = render_tile(tile, shared.facade, shared.nodes, shared.ways, shared.layers, shared.order, settings.mvt_version, settings.include_ids);
        let bytes = match maybe_compress(bytes, settings.compress, settings.gzip) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!("tile {tile:?}: compression failed: {err}");
                failures.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        if let Err(err) = shared.sink.write_tile(tile.z, tile.x, tile.y, &bytes) {
            error!("tile {tile:?}: write failed: {err}");
            failures.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        rendered += 1;
        if worker == 0 && rendered % interval == 0 {
            info!("zoom {z}: worker 0 rendered {rendered} tiles");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_interval_coarsens_at_low_zoom() {
        assert_eq!(progress_interval(0), 1);
        assert_eq!(progress_interval(7), 10);
        assert_eq!(progress_interval(14), 100);
    }
}
