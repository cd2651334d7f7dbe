//! Layer and build configuration, set once by the embedding
//! application before tiles are generated.

use anyhow::{Result, ensure};

/// How finished tiles are compressed before being handed to the writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
	None,
	Gzip,
	/// Raw deflate, no framing.
	Deflate,
}

/// Appearance rules for one output layer.
#[derive(Clone, Debug)]
pub struct LayerDef {
	pub name: String,
	pub min_zoom: u8,
	pub max_zoom: u8,
	/// Below this zoom, geometry is simplified.
	pub simplify_below: u8,
	/// Simplification tolerance in projected degrees.
	pub simplify_level: f64,
	/// Simplification tolerance in metres; overrides `simplify_level`
	/// when positive.
	pub simplify_length: f64,
	/// Per-zoom growth factor of the tolerance.
	pub simplify_ratio: f64,
	/// Below this zoom, small polygon parts are dropped.
	pub filter_below: u8,
	/// Minimum part area in square metres at `filter_below - 1`.
	pub filter_area: f64,
	/// Below this zoom, adjacent same-attribute polygons are unioned.
	pub combine_polygons_below: u8,
	/// Cap on features per tile, applied below
	/// `feature_limit_below_zoom`; zero means no limit.
	pub feature_limit: usize,
	pub feature_limit_below_zoom: u8,
	/// Sort direction of `z_order` within this layer.
	pub z_order_descending: bool,
}

impl Default for LayerDef {
	fn default() -> Self {
		LayerDef {
			name: String::new(),
			min_zoom: 0,
			max_zoom: 14,
			simplify_below: 0,
			simplify_level: 0.01,
			simplify_length: 0.0,
			simplify_ratio: 2.0,
			filter_below: 0,
			filter_area: 0.5,
			combine_polygons_below: 0,
			feature_limit: 0,
			feature_limit_below_zoom: 0,
			z_order_descending: false,
		}
	}
}

/// The ordered set of layers. Several layers may be written into one
/// output layer (`write_to`), forming a layer group.
#[derive(Clone, Debug, Default)]
pub struct LayerDefinition {
	pub layers: Vec<LayerDef>,
	/// Groups of layer indices, in output order; the first layer of a
	/// group names the output layer.
	pub layer_order: Vec<Vec<usize>>,
}

impl LayerDefinition {
	/// Add a layer, optionally merging its features into a previously
	/// added layer's output (`write_to`).
	pub fn add_layer(&mut self, def: LayerDef, write_to: Option<&str>) -> Result<u8> {
		ensure!(self.layers.len() < 256, "more than 256 layers");
		let index = self.layers.len();
		match write_to {
			Some(target) => {
				let group = self
					.layer_order
					.iter_mut()
					.find(|group| self.layers[group[0]].name == target);
				ensure!(group.is_some(), "write_to target {target} does not exist");
				group.unwrap().push(index);
			}
			None => self.layer_order.push(vec![index]),
		}
		self.layers.push(def);
		Ok(index as u8)
	}

	#[must_use]
	pub fn sort_orders(&self) -> Vec<bool> {
		self.layers.iter().map(|l| l.z_order_descending).collect()
	}
}

/// Global build configuration.
#[derive(Clone, Debug)]
pub struct Config {
	/// Resolution of the tile index; at most 14.
	pub base_zoom: u8,
	pub start_zoom: u8,
	pub end_zoom: u8,
	pub mvt_version: u32,
	/// Write source ids on features.
	pub include_id: bool,
	pub compress: Compression,
	/// Use a 8192 pixel extent at the end zoom.
	pub high_resolution: bool,
	/// Merge same-attribute linestrings below this zoom.
	pub combine_below: u8,
	/// Optional clipping box `(min_lon, min_lat, max_lon, max_lat)`.
	pub clipping_box: Option<(f64, f64, f64, f64)>,
	pub layers: LayerDefinition,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			base_zoom: 14,
			start_zoom: 0,
			end_zoom: 14,
			mvt_version: 2,
			include_id: false,
			compress: Compression::Gzip,
			high_resolution: false,
			combine_below: 0,
			clipping_box: None,
			layers: LayerDefinition::default(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn write_to_groups_layers() -> Result<()> {
		let mut layers = LayerDefinition::default();
		let a = layers.add_layer(LayerDef { name: "roads".into(), ..LayerDef::default() }, None)?;
		let b = layers.add_layer(
			LayerDef { name: "rail".into(), ..LayerDef::default() },
			Some("roads"),
		)?;
		let c = layers.add_layer(LayerDef { name: "water".into(), ..LayerDef::default() }, None)?;
		assert_eq!((a, b, c), (0, 1, 2));
		assert_eq!(layers.layer_order, vec![vec![0, 1], vec![2]]);
		assert!(
			layers
				.add_layer(LayerDef::default(), Some("missing"))
				.is_err()
		);
		Ok(())
	}
}
