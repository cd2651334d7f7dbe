//! The multi-phase pipeline that turns PBF blocks into populated
//! stores.
//!
//! Phases run strictly in order — RelationScan, WayScan, Nodes, Ways,
//! Relations — and a phase's store is finalised before the next phase
//! starts. Within a phase, blocks are independent work items pulled
//! from a bounded channel by a pool of OS threads; the bound gives
//! backpressure against the decompressed block buffers.

use crate::bridge::{EmittedFeature, FeatureSink, RelationMembers, TagTransform};
use crate::reader::{
	BlockMetadata, DenseNodes, HeaderInfo, MEMBER_NODE, MEMBER_RELATION, MEMBER_WAY,
	PrimitiveBlock, PrimitiveGroup, RawRelation, RawWay, read_blob, scan_pbf,
};
use crate::tags::{SignificantTags, TagMap};
use crate::used::UsedObjects;
use anyhow::{Context, Result, bail};
use crossbeam_channel::bounded;
use geo::{Contains, Winding};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tileforge_core::progress::{Progress as _, get_progress};
use tileforge_core::{LatpLon, NodeId, RelationId, WayId, coordinates};
use tileforge_store::attribute::{AttributeSet, AttributeStore};
use tileforge_store::geom::{
	Linestring, MultiPolygon, Polygon, latplon_to_point, latplons_to_linestring,
};
use tileforge_store::node::NodeStore;
use tileforge_store::output_object::{GeomType, GeometrySource, OutputObject, tag_object_id};
use tileforge_store::tile_index::TileDataSource;
use tileforge_store::way::WayStore;

/// The processing phases, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadPhase {
	RelationScan = 0,
	WayScan = 1,
	Nodes = 2,
	Ways = 3,
	Relations = 4,
}

/// Counters a driver can poll (or print from a signal handler) to see
/// where a stuck build is.
#[derive(Default)]
pub struct ProgressCounters {
	pub phase: AtomicU8,
	pub current_id: AtomicU64,
}

pub struct ProcessorConfig {
	pub threads: usize,
	/// Store way geometries eagerly instead of re-resolving node ids
	/// at tile time.
	pub materialize_geometries: bool,
	/// Abort on missing referents instead of skipping the object.
	pub strict: bool,
}

impl Default for ProcessorConfig {
	fn default() -> Self {
		ProcessorConfig {
			threads: num_cpus::get(),
			materialize_geometries: false,
			strict: false,
		}
	}
}

pub struct PbfProcessor<'a> {
	config: ProcessorConfig,
	transform: &'a dyn TagTransform,
	node_store: &'a dyn NodeStore,
	way_store: &'a dyn WayStore,
	attributes: &'a AttributeStore,
	tile_data: &'a TileDataSource,

	node_filter: SignificantTags,
	way_filter: Option<SignificantTags>,
	used: UsedObjects,
	relation_tags: Mutex<HashMap<RelationId, Vec<(String, String)>>>,
	pub counters: ProgressCounters,
}

impl<'a> PbfProcessor<'a> {
	pub fn new(
		config: ProcessorConfig,
		transform: &'a dyn TagTransform,
		node_store: &'a dyn NodeStore,
		way_store: &'a dyn WayStore,
		attributes: &'a AttributeStore,
		tile_data: &'a TileDataSource,
	) -> Result<PbfProcessor<'a>> {
		let node_filter = SignificantTags::new(&transform.significant_node_keys())?;
		let way_filter = match transform.significant_way_keys() {
			Some(filters) => Some(SignificantTags::new(
				&filters
					.iter()
					.map(|f| {
						let tilde = if f.accept { "" } else { "~" };
						if f.value.is_empty() {
							format!("{tilde}{}", f.key)
						} else {
							format!("{tilde}{}={}", f.key, f.value)
						}
					})
					.collect::<Vec<_>>(),
			)?),
			None => None,
		};
		Ok(PbfProcessor {
			config,
			transform,
			node_store,
			way_store,
			attributes,
			tile_data,
			node_filter,
			way_filter,
			used: UsedObjects::default(),
			relation_tags: Mutex::new(HashMap::new()),
			counters: ProgressCounters::default(),
		})
	}

	/// Run all phases over the file. The node and way stores are
	/// finalised at the phase boundaries that require it; the tile
	/// index and attribute store are left open for any further data
	/// sources and must be finalised by the driver.
	pub fn process(&self, path: &Path) -> Result<HeaderInfo> {
		let (header, blocks) = scan_pbf(path)?;
		if !header.sort_type_then_id {
			log::warn!(
				"input does not advertise {}; every block will be visited in every phase",
				crate::reader::OPTION_SORT_TYPE_THEN_ID
			);
		}

		let relation_blocks: Vec<BlockMetadata> =
			blocks.iter().filter(|b| b.has_relations).copied().collect();
		let way_blocks: Vec<BlockMetadata> = blocks.iter().filter(|b| b.has_ways).copied().collect();
		let node_blocks: Vec<BlockMetadata> = blocks.iter().filter(|b| b.has_nodes).copied().collect();

		self.run_phase(path, ReadPhase::RelationScan, &relation_blocks, &header)?;

		if self.way_filter.is_some() {
			self.run_phase(path, ReadPhase::WayScan, &way_blocks, &header)?;
		}

		self.run_phase(path, ReadPhase::Nodes, &node_blocks, &header)?;
		self.node_store.finalize(self.config.threads);

		let shards = self.node_store.shards();
		for shard in 0..shards {
			self.run_phase_sharded(path, ReadPhase::Ways, &way_blocks, &header, shard, shards)?;
		}
		self.way_store.finalize(self.config.threads);

		// Blocks light on relations are subdivided so all cores stay busy.
		let chunks = if relation_blocks.len() < self.config.threads && !relation_blocks.is_empty() {
			self.config.threads.div_ceil(relation_blocks.len())
		} else {
			1
		};
		let chunked: Vec<BlockMetadata> = relation_blocks
			.iter()
			.flat_map(|b| {
				(0..chunks).map(|chunk| BlockMetadata {
					chunk,
					chunks,
					..*b
				})
			})
			.collect();
		let way_shards = self.way_store.shards();
		for shard in 0..way_shards {
			self.run_phase_sharded(path, ReadPhase::Relations, &chunked, &header, shard, way_shards)?;
		}

		Ok(header)
	}

	fn run_phase(
		&self,
		path: &Path,
		phase: ReadPhase,
		blocks: &[BlockMetadata],
		header: &HeaderInfo,
	) -> Result<()> {
		self.run_phase_sharded(path, phase, blocks, header, 0, 1)
	}

	fn run_phase_sharded(
		&self,
		path: &Path,
		phase: ReadPhase,
		blocks: &[BlockMetadata],
		header: &HeaderInfo,
		shard: usize,
		shards: usize,
	) -> Result<()> {
		if blocks.is_empty() {
			return Ok(());
		}
		self.counters.phase.store(phase as u8, Ordering::Relaxed);
		let progress = Mutex::new(get_progress(&format!("{phase:?}"), blocks.len() as u64));

		let threads = self.config.threads.max(1);
		// Work items are contiguous runs of blocks: the sorted stores
		// accumulate whole id groups only while one worker sees
		// consecutive blocks, so batches must not interleave.
		let batch_size = blocks.len().div_ceil(threads * 4).max(1);
		let (tx, rx) = bounded::<&[BlockMetadata]>(threads * 2);

		std::thread::scope(|scope| -> Result<()> {
			let mut workers = Vec::new();
			for _ in 0..threads {
				let rx = rx.clone();
				let progress = &progress;
				workers.push(scope.spawn(move || -> Result<()> {
					let mut file = File::open(path)?;
					while let Ok(batch) = rx.recv() {
						match phase {
							ReadPhase::Nodes => self.node_store.batch_start(),
							ReadPhase::Ways => self.way_store.batch_start(),
							_ => {}
						}
						for block in batch {
							self.read_block(&mut file, block, phase, header, shard, shards)?;
							progress.lock().inc(1);
						}
					}
					Ok(())
				}));
			}
			drop(rx);

			for batch in blocks.chunks(batch_size) {
				if tx.send(batch).is_err() {
					bail!("worker pool died");
				}
			}
			drop(tx);

			let mut result = Ok(());
			for worker in workers {
				let outcome = worker.join().expect("phase worker panicked");
				if result.is_ok() {
					result = outcome;
				}
			}
			result
		})?;

		progress.lock().finish();
		Ok(())
	}

	fn read_block(
		&self,
		file: &mut File,
		block: &BlockMetadata,
		phase: ReadPhase,
		header: &HeaderInfo,
		shard: usize,
		shards: usize,
	) -> Result<()> {
		let (blob_type, payload, _) = read_blob(file, block.offset)
			.with_context(|| format!("reading block at offset {}", block.offset))?;
		if blob_type != "OSMData" {
			bail!("expected OSMData at offset {}", block.offset);
		}
		let pb = match PrimitiveBlock::parse(&payload) {
			Ok(pb) => pb,
			Err(e) => {
				// A malformed block costs its objects, not the build.
				log::warn!("skipping malformed block at offset {}: {e:#}", block.offset);
				return Ok(());
			}
		};

		for group in &pb.groups {
			match (phase, group) {
				(ReadPhase::RelationScan, PrimitiveGroup::Relations(relations)) => {
					self.scan_relations(&pb, relations)?;
				}
				(ReadPhase::WayScan, PrimitiveGroup::Ways(ways)) => {
					self.scan_ways(&pb, ways)?;
				}
				(ReadPhase::Nodes, PrimitiveGroup::Dense(dense)) => {
					self.read_nodes(&pb, dense)?;
				}
				(ReadPhase::Ways, PrimitiveGroup::Ways(ways)) => {
					self.read_ways(&pb, ways, header, shard, shards)?;
				}
				(ReadPhase::Relations, PrimitiveGroup::Relations(relations)) => {
					self.read_relations(&pb, relations, block, shard, shards)?;
				}
				_ => {}
			}
		}
		Ok(())
	}

	fn tags_for<'b>(&self, pb: &PrimitiveBlock<'b>, keys: &[u64], vals: &[u64]) -> Result<TagMap<'b>> {
		let mut tags = TagMap::new();
		for (k, v) in keys.iter().zip(vals) {
			tags.add(pb.string(*k)?, pb.string(*v)?);
		}
		Ok(tags)
	}

	fn scan_relations(&self, pb: &PrimitiveBlock, relations: &[RawRelation]) -> Result<()> {
		for relation in relations {
			self.counters.current_id.store(relation.id, Ordering::Relaxed);
			let tags = match self.tags_for(pb, &relation.keys, &relation.vals) {
				Ok(tags) => tags,
				Err(e) => {
					log::warn!("skipping relation {} with bad tags: {e:#}", relation.id);
					continue;
				}
			};
			let scan = self
				.transform
				.scan_relation(relation.id, &tags)
				.with_context(|| format!("relation_scan callback failed for relation {}", relation.id))?;
			if !scan.accepted {
				continue;
			}

			self.used.relations.mark(relation.id);
			if !scan.added_tags.is_empty() {
				self.relation_tags.lock().insert(relation.id, scan.added_tags);
			}
			for (memid, member_type) in relation.memids.iter().zip(&relation.types) {
				match *member_type {
					MEMBER_NODE => self.used.nodes.mark(*memid as u64),
					MEMBER_WAY => self.used.ways.mark(*memid as u64),
					MEMBER_RELATION => self.used.relations.mark(*memid as u64),
					_ => {}
				}
			}
		}
		Ok(())
	}

	fn scan_ways(&self, pb: &PrimitiveBlock, ways: &[RawWay]) -> Result<()> {
		let filter = self.way_filter.as_ref().expect("way scan without filters");
		for way in ways {
			self.counters.current_id.store(way.id, Ordering::Relaxed);
			let tags = match self.tags_for(pb, &way.keys, &way.vals) {
				Ok(tags) => tags,
				Err(e) => {
					log::warn!("skipping way {} with bad tags: {e:#}", way.id);
					continue;
				}
			};
			if filter.filter(&tags) || self.used.ways.contains(way.id) {
				for node in &way.refs {
					self.used.nodes.mark(*node as u64);
				}
			}
		}
		Ok(())
	}

	fn read_nodes(&self, pb: &PrimitiveBlock, dense: &DenseNodes) -> Result<()> {
		// With no way filters, every way is significant, so every node
		// must be resolvable.
		let store_all = self.way_filter.is_none();
		let mut batch = Vec::with_capacity(dense.ids.len());
		let mut kv = dense.keys_vals.iter();

		for ((id, lat), lon) in dense.ids.iter().zip(&dense.lats).zip(&dense.lons) {
			let id = *id as NodeId;
			self.counters.current_id.store(id, Ordering::Relaxed);

			let mut tags = TagMap::new();
			loop {
				let Some(key) = kv.next() else { break };
				if *key == 0 {
					break;
				}
				let Some(value) = kv.next() else { break };
				tags.add(pb.string(*key)?, pb.string(*value)?);
			}

			let ll = pb.latplon(*lat, *lon);
			let significant = !tags.is_empty() && self.node_filter.filter(&tags);

			if significant {
				let mut sink = FeatureSink::new();
				self
					.transform
					.node_function(id, ll, &tags, &mut sink)
					.with_context(|| format!("node callback failed for node {id}"))?;
				for feature in sink.into_features() {
					self.emit_node_feature(id, ll, &feature)?;
				}
			}

			if store_all || significant || self.used.nodes.contains(id) {
				batch.push((id, ll));
			}
		}

		if !batch.is_empty() {
			self.node_store.insert(&batch);
		}
		Ok(())
	}

	fn emit_node_feature(&self, id: NodeId, ll: LatpLon, feature: &EmittedFeature) -> Result<()> {
		let oo = OutputObject {
			layer: feature.layer,
			geom_type: GeomType::Point,
			min_zoom: feature.min_zoom,
			z_order: feature.z_order,
			object_id: tag_object_id(GeometrySource::Node, id),
			attr_set: self.intern_attributes(feature)?,
		};
		let index = coordinates::latplon2index(ll, self.tile_data.index_zoom());
		self.tile_data.add_object(index, oo, id);
		Ok(())
	}

	fn read_ways(
		&self,
		pb: &PrimitiveBlock,
		ways: &[RawWay],
		header: &HeaderInfo,
		shard: usize,
		shards: usize,
	) -> Result<()> {
		let mut node_batch: Vec<(WayId, Vec<NodeId>)> = Vec::new();
		let mut latplon_batch: Vec<(WayId, Vec<LatpLon>)> = Vec::new();

		for way in ways {
			let id = way.id;
			self.counters.current_id.store(id, Ordering::Relaxed);

			let tags = match self.tags_for(pb, &way.keys, &way.vals) {
				Ok(tags) => tags,
				Err(e) => {
					log::warn!("skipping way {id} with bad tags: {e:#}");
					continue;
				}
			};
			let significant = self.way_filter.as_ref().is_none_or(|f| f.filter(&tags));
			let used_by_relation = self.used.ways.contains(id);
			if !significant && !used_by_relation {
				continue;
			}

			let refs: Vec<NodeId> = way.refs.iter().map(|r| *r as NodeId).collect();
			if shards > 1 && !self.way_in_shard(&refs, shard, shards) {
				continue;
			}

			let coords = if header.locations_on_ways && !way.lats.is_empty() {
				way
					.lats
					.iter()
					.zip(&way.lons)
					.map(|(lat, lon)| pb.latplon(*lat, *lon))
					.collect::<Vec<_>>()
			} else {
				match refs.iter().map(|r| self.node_store.at(*r)).collect::<Result<Vec<_>, _>>() {
					Ok(coords) => coords,
					Err(e) => {
						if self.config.strict {
							bail!("way {id} references missing node: {e}");
						}
						log::warn!("skipping way {id}: {e}");
						continue;
					}
				}
			};
			if coords.len() < 2 {
				continue;
			}

			// Relation-used ways get the callback too; they may emit
			// standalone features of their own.
			let mut sink = FeatureSink::new();
			if significant || used_by_relation {
				self
					.transform
					.way_function(id, &coords, &tags, &mut sink)
					.with_context(|| format!("way callback failed for way {id}"))?;
			}
			let features = sink.into_features();

			if used_by_relation || !features.is_empty() {
				if self.way_store.requires_nodes() {
					node_batch.push((id, refs.clone()));
				} else {
					latplon_batch.push((id, coords.clone()));
				}
			}

			for feature in &features {
				self.emit_way_feature(id, &coords, feature)?;
			}
		}

		if !node_batch.is_empty() {
			self.way_store.insert_nodes(&node_batch);
		}
		if !latplon_batch.is_empty() {
			self.way_store.insert_latplons(&latplon_batch);
		}
		Ok(())
	}

	/// A way belongs to the shard holding all of its nodes; ways that
	/// straddle shards run in the last pass.
	fn way_in_shard(&self, refs: &[NodeId], shard: usize, shards: usize) -> bool {
		let mut home: Option<usize> = None;
		for node in refs {
			let mut found = None;
			for candidate in 0..shards {
				if self.node_store.contains(candidate, *node) {
					found = Some(candidate);
					break;
				}
			}
			match (home, found) {
				(_, None) => {}
				(None, Some(s)) => home = Some(s),
				(Some(h), Some(s)) if h != s => return shard == shards - 1,
				_ => {}
			}
		}
		home.is_none_or(|h| h == shard)
	}

	fn emit_way_feature(&self, id: WayId, coords: &[LatpLon], feature: &EmittedFeature) -> Result<()> {
		let attr_set = self.intern_attributes(feature)?;
		let make_oo = |geom_type: GeomType, object_id: u64| OutputObject {
			layer: feature.layer,
			geom_type,
			min_zoom: feature.min_zoom,
			z_order: feature.z_order,
			object_id,
			attr_set,
		};

		match feature.geom_type {
			GeomType::Point => {
				// A way emitting a point becomes its centroid.
				let centroid = centroid_of(coords);
				let lease = self.tile_data.points.lease();
				let handle = lease.add(latplon_to_point(centroid));
				let oo = make_oo(GeomType::Point, tag_object_id(GeometrySource::Stored, handle));
				let index = coordinates::latplon2index(centroid, self.tile_data.index_zoom());
				self.tile_data.add_object(index, oo, id);
			}
			GeomType::Linestring | GeomType::Polygon => {
				let object_id = if self.config.materialize_geometries {
					let handle = if feature.geom_type == GeomType::Polygon {
						let lease = self.tile_data.multipolygons.lease();
						lease.add(geo::MultiPolygon(vec![Polygon::new(
							closed_ring(coords),
							Vec::new(),
						)]))
					} else {
						let lease = self.tile_data.linestrings.lease();
						lease.add(latplons_to_linestring(coords))
					};
					tag_object_id(GeometrySource::Stored, handle)
				} else {
					tag_object_id(GeometrySource::Way, id)
				};
				let oo = make_oo(feature.geom_type, object_id);
				self
					.tile_data
					.add_linestring_to_index(&latplons_to_linestring(coords), &[oo], id);
			}
			GeomType::MultiLinestring => {
				// Single ways only ever produce one linestring.
				let mls = geo::MultiLineString(vec![latplons_to_linestring(coords)]);
				let lease = self.tile_data.multilinestrings.lease();
				let handle = lease.add(mls.clone());
				drop(lease);
				let oo = make_oo(
					GeomType::MultiLinestring,
					tag_object_id(GeometrySource::Stored, handle),
				);
				self.tile_data.add_multilinestring_to_index(&mls, &[oo], id);
			}
		}
		Ok(())
	}

	fn read_relations(
		&self,
		pb: &PrimitiveBlock,
		relations: &[RawRelation],
		block: &BlockMetadata,
		shard: usize,
		shards: usize,
	) -> Result<()> {
		for (index, relation) in relations.iter().enumerate() {
			if index % block.chunks != block.chunk {
				continue;
			}
			let id = relation.id;
			if !self.used.relations.contains(id) {
				continue;
			}
			self.counters.current_id.store(id, Ordering::Relaxed);

			let mut members = RelationMembers::default();
			for ((memid, member_type), role_sid) in relation
				.memids
				.iter()
				.zip(&relation.types)
				.zip(&relation.roles_sid)
			{
				if *member_type != MEMBER_WAY {
					continue;
				}
				let role = pb.string(*role_sid).unwrap_or("");
				if role == "inner" {
					members.inner_ways.push(*memid as WayId);
				} else {
					members.outer_ways.push(*memid as WayId);
				}
			}
			if members.outer_ways.is_empty() {
				continue;
			}

			if shards > 1 && !self.relation_in_shard(&members, shard, shards) {
				continue;
			}

			let added = self.relation_tags.lock().get(&id).cloned();
			let mut tags = match self.tags_for(pb, &relation.keys, &relation.vals) {
				Ok(tags) => tags,
				Err(e) => {
					log::warn!("skipping relation {id} with bad tags: {e:#}");
					continue;
				}
			};
			if let Some(added) = &added {
				for (k, v) in added {
					tags.add(k, v);
				}
			}

			let mut sink = FeatureSink::new();
			self
				.transform
				.relation_function(id, &members, &tags, &mut sink)
				.with_context(|| format!("relation callback failed for relation {id}"))?;
			let features = sink.into_features();
			if features.is_empty() {
				continue;
			}

			let (outers, inners) = match self.resolve_member_rings(id, &members) {
				Some(rings) => rings,
				None => continue,
			};

			for feature in &features {
				self.emit_relation_feature(id, &outers, &inners, feature)?;
			}
		}
		Ok(())
	}

	fn relation_in_shard(&self, members: &RelationMembers, shard: usize, shards: usize) -> bool {
		let mut home: Option<usize> = None;
		for way in members.outer_ways.iter().chain(&members.inner_ways) {
			let mut found = None;
			for candidate in 0..shards {
				if self.way_store.contains(candidate, *way) {
					found = Some(candidate);
					break;
				}
			}
			match (home, found) {
				(_, None) => {}
				(None, Some(s)) => home = Some(s),
				(Some(h), Some(s)) if h != s => return shard == shards - 1,
				_ => {}
			}
		}
		home.is_none_or(|h| h == shard)
	}

	fn resolve_member_rings(
		&self,
		id: RelationId,
		members: &RelationMembers,
	) -> Option<(Vec<Vec<LatpLon>>, Vec<Vec<LatpLon>>)> {
		let resolve = |ways: &[WayId]| -> Vec<Vec<LatpLon>> {
			let mut out = Vec::new();
			for way in ways {
				match self.way_store.at(*way) {
					Ok(coords) => out.push(coords),
					Err(e) => log::warn!("relation {id}: member way {way} unavailable: {e}"),
				}
			}
			out
		};
		let outers = merge_rings(resolve(&members.outer_ways));
		let inners = merge_rings(resolve(&members.inner_ways));
		if outers.is_empty() {
			log::warn!("relation {id}: no usable outer ways");
			return None;
		}
		Some((outers, inners))
	}

	fn emit_relation_feature(
		&self,
		id: RelationId,
		outers: &[Vec<LatpLon>],
		inners: &[Vec<LatpLon>],
		feature: &EmittedFeature,
	) -> Result<()> {
		let attr_set = self.intern_attributes(feature)?;
		let make_oo = |geom_type: GeomType, object_id: u64| OutputObject {
			layer: feature.layer,
			geom_type,
			min_zoom: feature.min_zoom,
			z_order: feature.z_order,
			object_id,
			attr_set,
		};
		match feature.geom_type {
			GeomType::Polygon => {
				// Reassembled multipolygons are always materialised; the
				// way store is finalised by now and cannot take pseudo
				// ways, and re-merging members per tile would repeat the
				// join work thousands of times.
				let mp = assemble_multipolygon(outers, inners);
				let lease = self.tile_data.multipolygons.lease();
				let object_id = tag_object_id(GeometrySource::Stored, lease.add(mp.clone()));
				drop(lease);
				let oo = make_oo(GeomType::Polygon, object_id);
				self.tile_data.add_multipolygon_to_index(&mp, &[oo], id);
			}
			GeomType::Linestring | GeomType::MultiLinestring => {
				// Not really meaningful for most relations, but the rules
				// may ask for it (e.g. route relations).
				let mls = geo::MultiLineString(
					outers
						.iter()
						.chain(inners)
						.map(|ring| latplons_to_linestring(ring))
						.collect(),
				);
				let lease = self.tile_data.multilinestrings.lease();
				let handle = lease.add(mls.clone());
				let oo = make_oo(
					GeomType::MultiLinestring,
					tag_object_id(GeometrySource::Stored, handle),
				);
				self.tile_data.add_multilinestring_to_index(&mls, &[oo], id);
			}
			GeomType::Point => {
				let all: Vec<LatpLon> = outers.iter().flatten().copied().collect();
				let centroid = centroid_of(&all);
				let lease = self.tile_data.points.lease();
				let handle = lease.add(latplon_to_point(centroid));
				let oo = make_oo(GeomType::Point, tag_object_id(GeometrySource::Stored, handle));
				let index = coordinates::latplon2index(centroid, self.tile_data.index_zoom());
				self.tile_data.add_object(index, oo, id);
			}
		}
		Ok(())
	}

	fn intern_attributes(&self, feature: &EmittedFeature) -> Result<u32> {
		let mut set = AttributeSet::new();
		for (key, value, min_zoom) in &feature.attributes {
			self
				.attributes
				.add_attribute(&mut set, key, value.clone(), *min_zoom)
				.with_context(|| format!("interning attribute {key}"))?;
		}
		Ok(self.attributes.add_set(set))
	}
}

fn centroid_of(coords: &[LatpLon]) -> LatpLon {
	let mut coords = coords;
	if coords.len() > 1 && coords.first() == coords.last() {
		coords = &coords[..coords.len() - 1];
	}
	let n = coords.len().max(1) as i64;
	let latp = coords.iter().map(|c| i64::from(c.latp)).sum::<i64>() / n;
	let lon = coords.iter().map(|c| i64::from(c.lon)).sum::<i64>() / n;
	LatpLon::new(latp as i32, lon as i32)
}

fn closed_ring(coords: &[LatpLon]) -> Linestring {
	let mut ring = latplons_to_linestring(coords);
	ring.close();
	ring
}

/// Join open way fragments into closed rings by matching endpoints:
/// closed ways pass through; open ways are appended (forwards or
/// reversed) to whichever partial ring they extend, reseeding with an
/// arbitrary leftover when nothing joins.
fn merge_rings(ways: Vec<Vec<LatpLon>>) -> Vec<Vec<LatpLon>> {
	let mut results: Vec<Vec<LatpLon>> = Vec::new();
	let mut remaining: Vec<Vec<LatpLon>> = ways.into_iter().filter(|w| w.len() >= 2).collect();

	while !remaining.is_empty() {
		let mut added = 0;
		let mut i = 0;
		while i < remaining.len() {
			let way = &remaining[i];
			if way.first() == way.last() {
				results.push(remaining.swap_remove(i));
				added += 1;
				continue;
			}
			let first = *way.first().unwrap();
			let last = *way.last().unwrap();
			let mut joined = false;
			for result in &mut results {
				if result.first() == result.last() {
					continue;
				}
				let open_end = *result.last().unwrap();
				let open_start = *result.first().unwrap();
				if open_end == first {
					result.extend(remaining[i].iter().skip(1));
					joined = true;
				} else if open_end == last {
					result.extend(remaining[i].iter().rev().skip(1));
					joined = true;
				} else if open_start == last {
					let mut extended = remaining[i].clone();
					extended.extend(result.iter().skip(1));
					*result = extended;
					joined = true;
				} else if open_start == first {
					let mut extended: Vec<LatpLon> = remaining[i].iter().rev().copied().collect();
					extended.extend(result.iter().skip(1));
					*result = extended;
					joined = true;
				}
				if joined {
					break;
				}
			}
			if joined {
				remaining.swap_remove(i);
				added += 1;
			} else {
				i += 1;
			}
		}

		if added == 0 {
			// Seed with a leftover to attract the rest.
			results.push(remaining.pop().unwrap());
		}
	}

	results
}

/// Build a multipolygon from merged outer and inner rings, assigning
/// each inner to the outer that contains it and fixing winding order.
fn assemble_multipolygon(outers: &[Vec<LatpLon>], inners: &[Vec<LatpLon>]) -> MultiPolygon {
	let mut inner_rings: Vec<Linestring> = inners.iter().map(|r| closed_ring(r)).collect();

	let mut polygons = Vec::new();
	for outer in outers {
		let mut exterior = closed_ring(outer);
		exterior.make_ccw_winding();
		let shell = Polygon::new(exterior.clone(), Vec::new());

		let mut holes = Vec::new();
		inner_rings.retain(|inner| {
			if inner.0.first().is_some_and(|p| shell.contains(p)) {
				let mut hole = inner.clone();
				hole.make_cw_winding();
				holes.push(hole);
				false
			} else {
				true
			}
		});
		polygons.push(Polygon::new(exterior, holes));
	}
	geo::MultiPolygon(polygons)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ll(latp: i32, lon: i32) -> LatpLon {
		LatpLon::new(latp, lon)
	}

	#[test]
	fn merge_rings_joins_fragments() {
		let a = vec![ll(0, 0), ll(0, 10)];
		let b = vec![ll(0, 10), ll(10, 10)];
		let c = vec![ll(10, 10), ll(0, 0)];
		let rings = merge_rings(vec![a, b, c]);
		assert_eq!(rings.len(), 1);
		let ring = &rings[0];
		assert_eq!(ring.first(), ring.last());
		assert_eq!(ring.len(), 4);
	}

	#[test]
	fn merge_rings_reverses_when_needed() {
		let a = vec![ll(0, 0), ll(0, 10)];
		let b = vec![ll(10, 10), ll(0, 10)]; // needs reversal
		let c = vec![ll(10, 10), ll(0, 0)];
		let rings = merge_rings(vec![a, b, c]);
		assert_eq!(rings.len(), 1);
		assert_eq!(rings[0].first(), rings[0].last());
	}

	#[test]
	fn merge_rings_keeps_disjoint_rings_separate() {
		let closed1 = vec![ll(0, 0), ll(0, 1), ll(1, 1), ll(0, 0)];
		let closed2 = vec![ll(5, 5), ll(5, 6), ll(6, 6), ll(5, 5)];
		let rings = merge_rings(vec![closed1, closed2]);
		assert_eq!(rings.len(), 2);
	}

	#[test]
	fn assemble_assigns_holes_to_outers() {
		let outer = vec![ll(0, 0), ll(0, 100), ll(100, 100), ll(100, 0), ll(0, 0)];
		let hole = vec![ll(40, 40), ll(40, 60), ll(60, 60), ll(60, 40), ll(40, 40)];
		let far_outer = vec![ll(0, 200), ll(0, 300), ll(100, 300), ll(100, 200), ll(0, 200)];

		let mp = assemble_multipolygon(&[outer, far_outer], &[hole]);
		assert_eq!(mp.0.len(), 2);
		assert_eq!(mp.0[0].interiors().len(), 1);
		assert_eq!(mp.0[1].interiors().len(), 0);
	}

	#[test]
	fn centroid_ignores_closing_point() {
		let square = vec![ll(0, 0), ll(0, 100), ll(100, 100), ll(100, 0), ll(0, 0)];
		assert_eq!(centroid_of(&square), ll(50, 50));
	}
}
