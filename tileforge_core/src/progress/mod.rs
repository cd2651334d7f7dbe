//! Progress reporting for the long-running phases.
//!
//! Library code reports through the [`Progress`] trait so that embedders
//! decide how (and whether) to render it. [`get_progress`] returns a
//! stderr bar outside tests and a silent drain inside them.

mod progress_bar;
mod progress_drain;

pub use progress_bar::ProgressBar;
pub use progress_drain::ProgressDrain;

/// A progress indicator for one long-running task.
pub trait Progress: Send + Sync {
	/// Start (or restart) with a message and an expected maximum.
	fn init(&mut self, message: &str, max_value: u64);
	/// Set the absolute position.
	fn set_position(&mut self, value: u64);
	/// Advance the position.
	fn inc(&mut self, delta: u64);
	/// Finish and release the output line.
	fn finish(&mut self);
}

/// Factory returning the progress implementation for this build.
#[must_use]
pub fn get_progress(message: &str, max_value: u64) -> Box<dyn Progress> {
	#[cfg(not(test))]
	let mut progress = ProgressBar::new();
	#[cfg(test)]
	let mut progress = ProgressDrain::new();
	progress.init(message, max_value);
	Box::new(progress)
}
