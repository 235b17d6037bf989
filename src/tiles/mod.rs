//! Basemap tiles: addressing, fetching, decoding, caching
//!
//! `CellStateUpdateSystem` turns the viewport into the set of needed cell
//! keys; `TileLoadingSystem` owns the `TileLoader` (and through it the only
//! mutable handle to the tile cache) and mirrors the needed set as tile
//! entities the placement and render code can work with.

pub mod cache;
pub mod cell_key;
pub mod decode;
pub mod loader;
pub mod source;
mod systems;

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub use cache::TileCache;
pub use cell_key::{CellKey, CellKeyError};
pub use decode::{DecodedTile, RasterTileDecoder, TileDecoder};
pub use loader::{LoaderStats, TileLoader, TileLoaderOptions};
pub use source::{transport_for, FileTileTransport, HttpTileTransport, TileTransport, UrlTemplate};
pub use systems::{
    CellComponent, CellStateUpdateSystem, RequestTilesComponent, TileComponent, TileLoadingSystem,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TileError {
    #[error("tile fetch failed ({}): {reason}", describe_status(.status))]
    FetchFailed { status: Option<u16>, reason: String },
    #[error("tile {key} could not be decoded: {reason}")]
    DecodeFailed { key: CellKey, reason: String },
    #[error("tile fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("tile url template '{0}' has no placeholders")]
    InvalidTemplate(String),
    #[error("tile fetch cancelled")]
    Cancelled,
}

fn describe_status(status: &Option<u16>) -> String {
    status.map_or_else(|| "no status".to_string(), |code| format!("status {code}"))
}

/// Load state of one tile slot, as seen from the update thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TileState {
    /// Not requested, or failed and not yet retried after a reset.
    #[default]
    Empty,
    Queued,
    Loading,
    Loaded,
    Failed,
}
