//! Contract tests shared by every store variant.

use rstest::rstest;
use std::sync::Arc;
use tileforge_core::LatpLon;
use tileforge_core::arena::MmapArena;
use tileforge_store::StoreError;
use tileforge_store::node::{
	BinarySearchNodeStore, NodeStore, ShardedNodeStore, SortedNodeStore,
};
use tileforge_store::way::{BinarySearchWayStore, SortedWayStore, WayStore};

fn node_store(variant: &str) -> Box<dyn NodeStore> {
	let arena = Arc::new(MmapArena::new_anonymous());
	match variant {
		"binary_search" => Box::new(BinarySearchNodeStore::new()),
		"sorted" => Box::new(SortedNodeStore::new(true, arena)),
		"sorted_uncompressed" => Box::new(SortedNodeStore::new(false, arena)),
		"sharded" => Box::new(ShardedNodeStore::new(BinarySearchNodeStore::new)),
		_ => unreachable!(),
	}
}

#[rstest]
#[case::binary_search("binary_search")]
#[case::sorted("sorted")]
#[case::sorted_uncompressed("sorted_uncompressed")]
#[case::sharded("sharded")]
fn tiny_node_store(#[case] variant: &str) {
	let store = node_store(variant);
	store.insert(&[(1, LatpLon::new(10, 20)), (5, LatpLon::new(30, 40))]);
	store.batch_start();
	store.finalize(1);

	assert_eq!(store.at(1), Ok(LatpLon::new(10, 20)));
	assert_eq!(store.at(5), Ok(LatpLon::new(30, 40)));
	assert_eq!(store.at(2), Err(StoreError::NotFound(2)));
	assert_eq!(store.size(), 2);
}

#[rstest]
#[case::binary_search(false)]
#[case::sorted(true)]
fn way_store_round_trip(#[case] sorted: bool) {
	let nodes = [
		(1u64, LatpLon::new(100, 200)),
		(2, LatpLon::new(110, 210)),
		(3, LatpLon::new(120, 220)),
	];
	let coords: Vec<LatpLon> = nodes.iter().map(|n| n.1).collect();

	let store: Box<dyn WayStore> = if sorted {
		let node_store = Arc::new(BinarySearchNodeStore::new());
		node_store.insert(&nodes);
		node_store.finalize(1);
		Box::new(SortedWayStore::new(
			true,
			node_store,
			Arc::new(MmapArena::new_anonymous()),
		))
	} else {
		Box::new(BinarySearchWayStore::new())
	};

	if store.requires_nodes() {
		store.insert_nodes(&[(42, vec![1, 2, 3])]);
	} else {
		store.insert_latplons(&[(42, coords.clone())]);
	}
	store.batch_start();
	store.finalize(1);

	assert_eq!(store.at(42), Ok(coords));
	assert_eq!(store.at(41), Err(StoreError::NotFound(41)));
	assert_eq!(store.size(), 1);
}
