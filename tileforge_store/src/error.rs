//! Typed errors for store lookups and capacity limits.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
	/// The id was never inserted into this store.
	#[error("id {0} not found")]
	NotFound(u64),

	/// A fixed-size table or id space is exhausted; the build cannot
	/// continue.
	#[error("capacity exceeded: {0}")]
	CapacityExceeded(&'static str),
}

pub type StoreResult<T> = Result<T, StoreError>;
