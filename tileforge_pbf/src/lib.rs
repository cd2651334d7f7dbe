//! Reading OSM PBF inputs: the block-format reader and the phased,
//! parallel processor that populates the stores.

pub mod bridge;
pub mod processor;
pub mod reader;
pub mod tags;
pub mod used;

pub use bridge::{EmittedFeature, FeatureSink, RelationMembers, RelationScanResult, TagTransform};
pub use processor::{PbfProcessor, ProcessorConfig, ReadPhase};
pub use reader::{BlockMetadata, HeaderInfo, scan_pbf};
pub use tags::{SignificantTags, TagFilter, TagMap};
