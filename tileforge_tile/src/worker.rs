//! Per-tile assembly: select, sort, merge, serialise, compress.

use crate::bbox::TileBbox;
use crate::build::{BuiltGeometry, GeometryBuilder};
use crate::config::{Compression, Config, LayerDef};
use crate::merge::{
	merge_multilinestrings, merge_multipolygons, remove_parts_below_size, reorder_multilinestring,
};
use crate::mvt::{
	GEOM_LINESTRING, GEOM_POINT, GEOM_POLYGON, MvtLayerBuilder, MvtValue, build_tile,
	encode_multilinestring, encode_multipolygon, encode_point,
};
use crate::simplify::{simplify_multilinestring, simplify_multipolygon};
use crate::writer::TileWriter;
use anyhow::Result;
use rayon::prelude::*;
use tileforge_core::coordinates::{
	PreciseTileCoordinatesSet, TileCoordinatesSet, meter2degp, tiley2latp,
};
use tileforge_core::progress::{Progress, get_progress};
use tileforge_core::types::TileCoordinate;
use tileforge_core::{Blob, TileXY, compression};
use tileforge_store::attribute::{AttributeStore, AttributeValue};
use tileforge_store::geom::{MultiLinestring, MultiPolygon};
use tileforge_store::node::NodeStore;
use tileforge_store::output_object::GeomType;
use tileforge_store::tile_index::{OutputObjectID, TileDataSource};
use tileforge_store::way::WayStore;

/// One data source and the stores its lazy geometries resolve through.
pub struct Source<'a> {
	pub data: &'a TileDataSource,
	pub node_store: &'a dyn NodeStore,
	pub way_store: &'a dyn WayStore,
}

impl Source<'_> {
	fn builder(&self) -> GeometryBuilder<'_> {
		GeometryBuilder {
			source: self.data,
			node_store: self.node_store,
			way_store: self.way_store,
		}
	}
}

/// Generate and write every tile between the configured start and end
/// zooms. Tiles are independent work items; output order is up to the
/// writer.
pub fn write_tiles(
	config: &Config,
	attributes: &AttributeStore,
	sources: &[Source],
	writer: &dyn TileWriter,
) -> Result<()> {
	let max_precise = config.end_zoom.min(config.base_zoom);
	let mut zooms: Vec<PreciseTileCoordinatesSet> =
		(0..=max_precise).map(PreciseTileCoordinatesSet::new).collect();
	for source in sources {
		source.data.collect_tiles_with_objects(&mut zooms);
		source.data.collect_tiles_with_large_objects(&mut zooms);
	}

	for zoom in config.start_zoom..=config.end_zoom {
		let coords = tiles_at_zoom(&zooms, zoom, max_precise);
		let mut progress = get_progress(&format!("z{zoom}"), coords.len() as u64);
		let progress = parking_lot::Mutex::new(&mut progress);

		coords.par_iter().try_for_each(|index| -> Result<()> {
			if let Some(blob) = generate_tile(config, attributes, sources, zoom, *index)? {
				writer.write_tile(zoom, u32::from(index.x), u32::from(index.y), blob.as_slice())?;
			}
			progress.lock().inc(1);
			Ok(())
		})?;
		progress.into_inner().finish();
	}

	// The final summary, whatever the per-object logs said.
	use std::sync::atomic::Ordering;
	let corrected: u64 = sources
		.iter()
		.map(|s| s.data.stats.corrected_geometries.load(Ordering::Relaxed))
		.sum();
	let dropped: u64 = sources
		.iter()
		.map(|s| s.data.stats.dropped_geometries.load(Ordering::Relaxed))
		.sum();
	log::info!("tile generation finished: {corrected} geometries corrected, {dropped} dropped");
	Ok(())
}

fn tiles_at_zoom(zooms: &[PreciseTileCoordinatesSet], zoom: u8, max_precise: u8) -> Vec<TileXY> {
	let mut coords = Vec::new();
	if zoom <= max_precise {
		let set = &zooms[usize::from(zoom)];
		let side = 1u32 << zoom;
		for x in 0..side {
			for y in 0..side {
				if set.test(x as TileCoordinate, y as TileCoordinate) {
					coords.push(TileXY::new(x as TileCoordinate, y as TileCoordinate));
				}
			}
		}
	} else {
		// Past the precise sets, every descendant of a marked tile is a
		// candidate.
		let scale = zoom - max_precise;
		let side = 1u32 << max_precise;
		for x in 0..side {
			for y in 0..side {
				if zooms[usize::from(max_precise)].test(x as TileCoordinate, y as TileCoordinate) {
					for dx in 0..(1u32 << scale) {
						for dy in 0..(1u32 << scale) {
							coords.push(TileXY::new(
								((x << scale) + dx) as TileCoordinate,
								((y << scale) + dy) as TileCoordinate,
							));
						}
					}
				}
			}
		}
	}
	coords
}

/// Assemble one tile. Returns None when the tile has no features or
/// lies outside the configured clipping box.
pub fn generate_tile(
	config: &Config,
	attributes: &AttributeStore,
	sources: &[Source],
	zoom: u8,
	index: TileXY,
) -> Result<Option<Blob>> {
	let hires = config.high_resolution && zoom == config.end_zoom;
	let bbox = TileBbox::new(index, zoom, hires, zoom == config.end_zoom);

	if let Some((min_lon, min_lat, max_lon, max_lat)) = config.clipping_box
		&& (max_lon <= bbox.min_lon
			|| min_lon >= bbox.max_lon
			|| max_lat <= bbox.min_lat
			|| min_lat >= bbox.max_lat)
	{
		return Ok(None);
	}

	// Gather this tile's objects from every source, sorted so that
	// merge candidates are adjacent, and deduplicated.
	let sort_orders = config.layers.sort_orders();
	let mut data: Vec<Vec<OutputObjectID>> = Vec::with_capacity(sources.len());
	for source in sources {
		let mut objects = Vec::new();
		source.data.collect_objects_for_tile(zoom, index, &mut objects);
		source.data.collect_large_objects_for_tile(zoom, index, &mut objects);
		objects.sort_unstable_by(|a, b| {
			a.oo
				.compare(&b.oo, sort_orders.get(a.oo.layer as usize).copied().unwrap_or(false))
				.then(a.osm_id.cmp(&b.osm_id))
		});
		objects.dedup();
		data.push(objects);
	}
	if data.iter().all(|d| d.is_empty()) {
		return Ok(None);
	}

	let mut layers = Vec::new();
	for group in &config.layers.layer_order {
		let name = &config.layers.layers[group[0]].name;
		let mut vt_layer = MvtLayerBuilder::new(name, bbox.extent(), config.mvt_version);

		for layer_num in group {
			let ld = &config.layers.layers[*layer_num];
			if zoom < ld.min_zoom || zoom > ld.max_zoom {
				continue;
			}
			if let Err(e) = process_layer(
				config,
				attributes,
				sources,
				&data,
				*layer_num,
				ld,
				zoom,
				&bbox,
				&mut vt_layer,
			) {
				// One broken layer doesn't cost the tile.
				log::warn!("abandoning layer {} in z{zoom}/{}/{}: {e:#}", ld.name, index.x, index.y);
			}
		}
		layers.push(vt_layer);
	}

	let blob = build_tile(layers);
	if blob.is_empty() {
		return Ok(None);
	}
	Ok(Some(match config.compress {
		Compression::None => blob,
		Compression::Gzip => compression::compress_gzip(&blob)?,
		Compression::Deflate => compression::compress_deflate(&blob)?,
	}))
}

#[allow(clippy::too_many_arguments)]
fn process_layer(
	config: &Config,
	attributes: &AttributeStore,
	sources: &[Source],
	data: &[Vec<OutputObjectID>],
	layer_num: usize,
	ld: &LayerDef,
	zoom: u8,
	bbox: &TileBbox,
	vt_layer: &mut MvtLayerBuilder,
) -> Result<()> {
	// Zoom-scaled simplification and area thresholds.
	let mut simplify_level = 0.0;
	let mut filter_area = 0.0;
	if zoom < ld.simplify_below || zoom < ld.filter_below {
		let latp = (tiley2latp(u32::from(bbox.index.y), zoom)
			+ tiley2latp(u32::from(bbox.index.y) + 1, zoom))
			/ 2.0;
		if zoom < ld.simplify_below {
			simplify_level = if ld.simplify_length > 0.0 {
				meter2degp(ld.simplify_length, latp)
			} else {
				ld.simplify_level
			};
			simplify_level *= ld.simplify_ratio.powi(i32::from(ld.simplify_below) - 1 - i32::from(zoom));
		}
		if zoom < ld.filter_below {
			filter_area = meter2degp(ld.filter_area, latp)
				* 2f64.powi(i32::from(ld.filter_below) - 1 - i32::from(zoom));
		}
	}

	for (source, objects) in sources.iter().zip(data) {
		let start = objects.partition_point(|o| (o.oo.layer as usize) < layer_num);
		let mut end = objects.partition_point(|o| (o.oo.layer as usize) <= layer_num);
		if ld.feature_limit > 0
			&& zoom < ld.feature_limit_below_zoom
			&& end - start > ld.feature_limit
		{
			end = start + ld.feature_limit;
		}
		process_objects(
			config,
			attributes,
			source,
			&objects[start..end],
			ld,
			zoom,
			bbox,
			simplify_level,
			filter_area,
			vt_layer,
		);
	}
	Ok(())
}

#[allow(clippy::too_many_arguments)]
fn process_objects(
	config: &Config,
	attributes: &AttributeStore,
	source: &Source,
	objects: &[OutputObjectID],
	ld: &LayerDef,
	zoom: u8,
	bbox: &TileBbox,
	simplify_level: f64,
	filter_area: f64,
	vt_layer: &mut MvtLayerBuilder,
) {
	let builder = source.builder();
	let mut i = 0;
	while i < objects.len() {
		let oo = objects[i];
		i += 1;
		if zoom < oo.oo.min_zoom {
			continue;
		}

		match oo.oo.geom_type {
			GeomType::Point => {
				match builder.build_node_geometry(oo.oo.object_id, bbox) {
					Ok(Some(ll)) => {
						let (x, y) = bbox.scale_latp_lon(ll.latp_degrees(), ll.lon_degrees());
						let tags = encode_tags(attributes, vt_layer, oo.oo.attr_set, zoom);
						let id = feature_id(config, oo.osm_id);
						vt_layer.add_feature(id, &tags, GEOM_POINT, &encode_point(x, y));
					}
					Ok(None) => {}
					Err(e) => log::warn!("skipping point object: {e}"),
				}
				continue;
			}
			GeomType::Linestring | GeomType::MultiLinestring => {
				let mut mls = match builder.build_way_geometry(oo.oo.geom_type, oo.oo.object_id, bbox) {
					Ok(BuiltGeometry::MultiLinestring(mls)) => mls,
					Ok(_) => continue,
					Err(e) => {
						log::warn!("skipping line object: {e}");
						continue;
					}
				};
				let mut oo = oo;
				if oo.oo.geom_type == GeomType::Linestring && zoom < config.combine_below {
					// Fold the following same-attribute linestrings in.
					while let Some(next) = merge_candidate(objects, i, &oo) {
						match builder.build_way_geometry(next.oo.geom_type, next.oo.object_id, bbox) {
							Ok(BuiltGeometry::MultiLinestring(next_mls)) => {
								merge_multilinestrings(&mut mls, next_mls);
							}
							Ok(_) => {}
							Err(e) => log::warn!("skipping merged line object: {e}"),
						}
						oo = *next;
						i += 1;
					}
					mls = reorder_multilinestring(mls);
				}
				write_multilinestring(config, attributes, vt_layer, bbox, &oo, zoom, simplify_level, &mls);
			}
			GeomType::Polygon => {
				let mut mp = match builder.build_way_geometry(GeomType::Polygon, oo.oo.object_id, bbox) {
					Ok(BuiltGeometry::MultiPolygon(mp)) => mp,
					Ok(_) => continue,
					Err(e) => {
						log::warn!("skipping polygon object: {e}");
						continue;
					}
				};
				if filter_area > 0.0 {
					remove_parts_below_size(&mut mp, filter_area);
					if mp.0.is_empty() {
						continue;
					}
				}
				let mut oo = oo;
				if zoom < ld.combine_polygons_below {
					while let Some(next) = merge_candidate(objects, i, &oo) {
						match builder.build_way_geometry(GeomType::Polygon, next.oo.object_id, bbox) {
							Ok(BuiltGeometry::MultiPolygon(next_mp)) => {
								merge_multipolygons(&mut mp, next_mp);
							}
							Ok(_) => {}
							Err(e) => log::warn!("skipping merged polygon object: {e}"),
						}
						oo = *next;
						i += 1;
					}
				}
				write_multipolygon(config, attributes, vt_layer, bbox, &oo, zoom, simplify_level, &mp);
			}
		}
	}
}

/// The next object merges into the current one if it shares geometry
/// type, z-order and attributes.
fn merge_candidate<'a>(
	objects: &'a [OutputObjectID],
	i: usize,
	oo: &OutputObjectID,
) -> Option<&'a OutputObjectID> {
	let next = objects.get(i)?;
	(next.oo.geom_type == oo.oo.geom_type
		&& next.oo.z_order == oo.oo.z_order
		&& next.oo.attr_set == oo.oo.attr_set)
		.then_some(next)
}

fn feature_id(config: &Config, osm_id: u64) -> Option<u64> {
	(config.include_id && osm_id != 0).then_some(osm_id)
}

#[allow(clippy::too_many_arguments)]
fn write_multilinestring(
	config: &Config,
	attributes: &AttributeStore,
	vt_layer: &mut MvtLayerBuilder,
	bbox: &TileBbox,
	oo: &OutputObjectID,
	zoom: u8,
	simplify_level: f64,
	mls: &MultiLinestring,
) {
	let simplified;
	let to_write = if simplify_level > 0.0 {
		simplified = simplify_multilinestring(mls, simplify_level);
		&simplified
	} else {
		mls
	};

	let lines: Vec<Vec<(i32, i32)>> = to_write
		.0
		.iter()
		.map(|ls| ls.0.iter().map(|c| bbox.scale_latp_lon(c.y, c.x)).collect())
		.collect();
	if let Some(geometry) = encode_multilinestring(&lines) {
		let tags = encode_tags(attributes, vt_layer, oo.oo.attr_set, zoom);
		vt_layer.add_feature(feature_id(config, oo.osm_id), &tags, GEOM_LINESTRING, &geometry);
	}
}

#[allow(clippy::too_many_arguments)]
fn write_multipolygon(
	config: &Config,
	attributes: &AttributeStore,
	vt_layer: &mut MvtLayerBuilder,
	bbox: &TileBbox,
	oo: &OutputObjectID,
	zoom: u8,
	simplify_level: f64,
	mp: &MultiPolygon,
) {
	// Scale to pixel space first, then simplify at pixel resolution.
	let mut current = bbox.scale_geometry(mp);
	if simplify_level > 0.0 {
		current = simplify_multipolygon(&current, simplify_level / bbox.xscale);
		current = crate::build::remove_spikes(&current);
	}
	if current.0.is_empty() {
		return;
	}

	let polygons: Vec<Vec<Vec<(i32, i32)>>> = current
		.0
		.iter()
		.map(|polygon| {
			std::iter::once(polygon.exterior())
				.chain(polygon.interiors())
				.map(|ring| ring.0.iter().map(|c| (c.x as i32, c.y as i32)).collect())
				.collect()
		})
		.collect();
	if let Some(geometry) = encode_multipolygon(&polygons) {
		let tags = encode_tags(attributes, vt_layer, oo.oo.attr_set, zoom);
		vt_layer.add_feature(feature_id(config, oo.osm_id), &tags, GEOM_POLYGON, &geometry);
	}
}

/// Dictionary-encode the attribute pairs visible at this zoom.
fn encode_tags(
	attributes: &AttributeStore,
	vt_layer: &mut MvtLayerBuilder,
	attr_set: u32,
	zoom: u8,
) -> Vec<u32> {
	let mut tags = Vec::new();
	for pair in attributes.get(attr_set) {
		if pair.min_zoom > zoom {
			continue;
		}
		let key_id = vt_layer.key_id(&attributes.keys.key(pair.key_index));
		let value_id = vt_layer.value_id(match &pair.value {
			AttributeValue::Bool(b) => MvtValue::Bool(*b),
			AttributeValue::Float(f) => MvtValue::Float(*f),
			AttributeValue::String(s) => MvtValue::String(s.clone()),
		});
		tags.push(key_id);
		tags.push(value_id);
	}
	tags
}
