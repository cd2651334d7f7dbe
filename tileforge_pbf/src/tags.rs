//! Tag views and significance filters.

/// The tags of one object, borrowed from the block's string table.
///
/// Objects rarely carry more than a handful of tags, so a flat vector
/// with linear search beats a map.
#[derive(Debug, Default)]
pub struct TagMap<'a> {
	entries: Vec<(&'a str, &'a str)>,
}

impl<'a> TagMap<'a> {
	#[must_use]
	pub fn new() -> TagMap<'a> {
		TagMap { entries: Vec::new() }
	}

	pub fn add(&mut self, key: &'a str, value: &'a str) {
		self.entries.push((key, value));
	}

	#[must_use]
	pub fn get(&self, key: &str) -> Option<&'a str> {
		self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
		self.entries.iter().copied()
	}
}

/// One `[~]key[=value]` filter term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
	pub accept: bool,
	pub key: String,
	pub value: String,
}

impl TagFilter {
	/// Parse a raw filter string; a leading `~` inverts it.
	#[must_use]
	pub fn parse(raw: &str) -> TagFilter {
		let (accept, rest) = match raw.strip_prefix('~') {
			Some(rest) => (false, rest),
			None => (true, raw),
		};
		match rest.split_once('=') {
			Some((key, value)) => TagFilter {
				accept,
				key: key.to_string(),
				value: value.to_string(),
			},
			None => TagFilter {
				accept,
				key: rest.to_string(),
				value: String::new(),
			},
		}
	}

	fn matches(&self, key: &str, value: &str) -> bool {
		self.key == key && (self.value.is_empty() || self.value == value)
	}
}

/// A user-supplied list of filters deciding which objects are worth
/// processing at all. A disabled filter accepts everything.
#[derive(Debug, Clone, Default)]
pub struct SignificantTags {
	enabled: bool,
	filters: Vec<TagFilter>,
}

impl SignificantTags {
	/// The pass-through filter.
	#[must_use]
	pub fn disabled() -> SignificantTags {
		SignificantTags {
			enabled: false,
			filters: Vec::new(),
		}
	}

	/// Build from raw filter strings. Mixing accept and reject terms in
	/// one list is not meaningful and is refused.
	pub fn new(raw: &[String]) -> anyhow::Result<SignificantTags> {
		let filters: Vec<TagFilter> = raw.iter().map(|r| TagFilter::parse(r)).collect();
		if let Some(first) = filters.first() {
			for (filter, raw) in filters.iter().zip(raw) {
				anyhow::ensure!(
					filter.accept == first.accept,
					"cannot mix reject and accept filters: {raw}"
				);
			}
		}
		Ok(SignificantTags {
			enabled: true,
			filters,
		})
	}

	#[must_use]
	pub fn enabled(&self) -> bool {
		self.enabled
	}

	/// Whether an object with these tags passes.
	#[must_use]
	pub fn filter(&self, tags: &TagMap) -> bool {
		if !self.enabled {
			return true;
		}
		if self.filters.is_empty() {
			return false;
		}

		if self.filters[0].accept {
			// At least one tag must be matched by a filter.
			tags
				.iter()
				.any(|(k, v)| self.filters.iter().any(|f| f.matches(k, v)))
		} else {
			// At least one tag must be matched by no filter.
			tags
				.iter()
				.any(|(k, v)| !self.filters.iter().any(|f| f.matches(k, v)))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tags<'a>(pairs: &[(&'a str, &'a str)]) -> TagMap<'a> {
		let mut map = TagMap::new();
		for (k, v) in pairs {
			map.add(k, v);
		}
		map
	}

	#[test]
	fn parse_filter_forms() {
		assert_eq!(
			TagFilter::parse("highway"),
			TagFilter { accept: true, key: "highway".into(), value: String::new() }
		);
		assert_eq!(
			TagFilter::parse("railway=rail"),
			TagFilter { accept: true, key: "railway".into(), value: "rail".into() }
		);
		assert_eq!(
			TagFilter::parse("~building"),
			TagFilter { accept: false, key: "building".into(), value: String::new() }
		);
	}

	#[test]
	fn accept_list_needs_one_match() -> anyhow::Result<()> {
		let sig = SignificantTags::new(&["highway".into(), "railway=rail".into()])?;
		assert!(sig.filter(&tags(&[("highway", "primary")])));
		assert!(sig.filter(&tags(&[("railway", "rail")])));
		assert!(!sig.filter(&tags(&[("railway", "abandoned")])));
		assert!(!sig.filter(&tags(&[("building", "yes")])));
		Ok(())
	}

	#[test]
	fn reject_list_needs_one_unmatched() -> anyhow::Result<()> {
		let sig = SignificantTags::new(&["~created_by".into(), "~source".into()])?;
		assert!(!sig.filter(&tags(&[("created_by", "JOSM")])));
		assert!(sig.filter(&tags(&[("created_by", "JOSM"), ("highway", "yes")])));
		Ok(())
	}

	#[test]
	fn mixed_lists_are_refused() {
		assert!(SignificantTags::new(&["highway".into(), "~source".into()]).is_err());
	}

	#[test]
	fn disabled_accepts_everything() {
		assert!(SignificantTags::disabled().filter(&tags(&[])));
	}
}
