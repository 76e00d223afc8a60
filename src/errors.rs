//! Crate-wide error taxonomy (spec §7).
//!
//! Configuration and input errors are fatal and propagate with `anyhow`
//! context all the way to `main`. Per-entity and per-tile errors are
//! logged and the offending entity/feature is skipped; they are still
//! represented here so call sites can match on them before deciding to
//! downgrade to a log line.

use thiserror::Error;

use crate::osm::store::{NodeId, WayId};
use crate::tile::TileCoord;

#[derive(Debug, Error)]
pub enum Error {
    #[error("node {0} missing from node store")]
    NodeMissing(NodeId),

    #[error("way {0} missing from way store")]
    WayMissing(WayId),

    #[error("unknown layer {0:?}")]
    UnknownLayer(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("failed rendering tile {tile:?}, object {object_id}: {reason}")]
    TileRender {
        tile: TileCoord,
        object_id: u64,
        reason: String,
    },

    #[error("output error: {0}")]
    Output(String),
}
