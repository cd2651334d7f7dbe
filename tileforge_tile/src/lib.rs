//! Tile assembly: clipping, simplification, merging, and serialisation
//! to the vector-tile wire format, driven by a per-tile worker pool.

pub mod bbox;
pub mod build;
pub mod clip;
pub mod config;
pub mod merge;
pub mod mvt;
pub mod simplify;
pub mod worker;
pub mod writer;

pub use bbox::TileBbox;
pub use config::{Compression, Config, LayerDef, LayerDefinition};
pub use worker::{Source, generate_tile, write_tiles};
pub use writer::{DirectoryTileWriter, MemoryTileWriter, TileWriter};
