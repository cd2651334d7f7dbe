//! Shared foundations: primitive types, integer codecs, Mercator math,
//! the mmap arena, compression and progress reporting.

pub mod arena;
pub mod codec;
pub mod compression;
pub mod coordinates;
pub mod progress;
pub mod types;
pub use types::*;
