//! Comparison and merging of server-issued version tokens.
//!
//! Tokens are produced by the server in recency order (they are time sortable), so the
//! lexicographically greater token is always the more recent one. Nothing in here ever
//! creates a token, it only picks between tokens that were received.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque optimistic-concurrency token, ordered by byte-wise string comparison.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
	pub fn new(token: impl Into<String>) -> Self {
		Self(token.into())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Whether `self` is strictly older than `other`.
	#[must_use]
	pub fn is_dominated_by(&self, other: &Self) -> bool {
		self < other
	}
}

impl fmt::Display for VersionToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for VersionToken {
	fn from(token: &str) -> Self {
		Self(token.to_string())
	}
}

impl From<String> for VersionToken {
	fn from(token: String) -> Self {
		Self(token)
	}
}

/// Returns whichever token is present, or the greater-or-equal one when both are.
#[must_use]
pub fn dominant<'a>(
	a: Option<&'a VersionToken>,
	b: Option<&'a VersionToken>,
) -> Option<&'a VersionToken> {
	match (a, b) {
		(Some(a), Some(b)) => Some(if a >= b { a } else { b }),
		(a, None) => a,
		(None, b) => b,
	}
}

/// Folds [`dominant`] over every candidate.
pub fn dominant_of<'a>(
	candidates: impl IntoIterator<Item = Option<&'a VersionToken>>,
) -> Option<&'a VersionToken> {
	candidates.into_iter().fold(None, dominant)
}
