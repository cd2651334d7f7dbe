//! A throttled stderr progress line.

use super::Progress;
use std::io::{IsTerminal, Write};
use std::time::{Duration, Instant};

const REDRAW_EVERY: Duration = Duration::from_millis(200);

pub struct ProgressBar {
	message: String,
	max_value: u64,
	value: u64,
	start: Instant,
	last_draw: Option<Instant>,
	is_terminal: bool,
}

impl ProgressBar {
	#[must_use]
	pub fn new() -> ProgressBar {
		ProgressBar {
			message: String::new(),
			max_value: 0,
			value: 0,
			start: Instant::now(),
			last_draw: None,
			is_terminal: std::io::stderr().is_terminal(),
		}
	}

	fn draw(&mut self, force: bool) {
		if !self.is_terminal {
			return;
		}
		let now = Instant::now();
		if !force
			&& let Some(last) = self.last_draw
			&& now.duration_since(last) < REDRAW_EVERY
		{
			return;
		}
		self.last_draw = Some(now);

		let percent = if self.max_value == 0 {
			100.0
		} else {
			self.value as f64 * 100.0 / self.max_value as f64
		};
		let elapsed = self.start.elapsed().as_secs();
		let mut stderr = std::io::stderr().lock();
		let _ = write!(
			stderr,
			"\r{}: {}/{} ({percent:.1}%) {elapsed}s ",
			self.message, self.value, self.max_value
		);
		let _ = stderr.flush();
	}
}

impl Default for ProgressBar {
	fn default() -> Self {
		ProgressBar::new()
	}
}

impl Progress for ProgressBar {
	fn init(&mut self, message: &str, max_value: u64) {
		self.message = message.to_string();
		self.max_value = max_value;
		self.value = 0;
		self.start = Instant::now();
		self.last_draw = None;
		self.draw(true);
	}

	fn set_position(&mut self, value: u64) {
		self.value = value;
		self.draw(false);
	}

	fn inc(&mut self, delta: u64) {
		self.value += delta;
		self.draw(false);
	}

	fn finish(&mut self) {
		self.value = self.max_value;
		self.draw(true);
		if self.is_terminal {
			let mut stderr = std::io::stderr().lock();
			let _ = writeln!(stderr);
		}
	}
}
