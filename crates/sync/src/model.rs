use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::VersionToken;

/// Attribute holding the server-computed per-owner map found on legacy activity payloads.
pub const OWNER_MAP_ATTRIBUTE: &str = "serviceByOwner";

pub type EntityId = String;
pub type Attributes = Map<String, Value>;

/// An independently versioned partition of activities and resources (a "stage").
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ScopeId(String);

impl ScopeId {
	pub fn new(scope: impl Into<String>) -> Self {
		Self(scope.into())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ScopeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ScopeId {
	fn from(scope: &str) -> Self {
		Self(scope.to_string())
	}
}

/// Half-open interval `[start, end)`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
	start: DateTime<Utc>,
	end: DateTime<Utc>,
}

impl TimeWindow {
	/// Builds a window, pushing `end` one day past `start` when it doesn't lie after it.
	#[must_use]
	pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
		Self {
			start,
			end: if end > start {
				end
			} else {
				start + Duration::days(1)
			},
		}
	}

	#[must_use]
	pub const fn start(&self) -> DateTime<Utc> {
		self.start
	}

	#[must_use]
	pub const fn end(&self) -> DateTime<Utc> {
		self.end
	}

	/// Whether `[start, end)` intersects the window. A missing `end` is a point event.
	#[must_use]
	pub fn overlaps(&self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> bool {
		let end = end.unwrap_or(start);

		!(end <= self.start || start >= self.end)
	}

	/// Same as [`TimeWindow::new`] but for windows that arrive deserialized from the wire.
	#[must_use]
	pub fn corrected(self) -> Self {
		Self::new(self.start, self.end)
	}
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
	pub resource_id: EntityId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub role: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
	pub id: EntityId,
	pub start: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub end: Option<DateTime<Utc>>,
	#[serde(default)]
	pub participants: Vec<Participant>,
	#[serde(default)]
	pub attributes: Attributes,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub row_version: Option<VersionToken>,
}

impl Activity {
	pub fn new(id: impl Into<EntityId>, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
		Self {
			id: id.into(),
			start,
			end,
			participants: vec![],
			attributes: Map::new(),
			row_version: None,
		}
	}

	#[must_use]
	pub fn with_participant(mut self, resource_id: impl Into<EntityId>) -> Self {
		self.participants.push(Participant {
			resource_id: resource_id.into(),
			role: None,
		});
		self
	}

	#[must_use]
	pub fn with_row_version(mut self, version: impl Into<VersionToken>) -> Self {
		self.row_version = Some(version.into());
		self
	}

	/// Resource ids this activity is attached to: its participants, plus the owners of the
	/// computed per-owner map carried by older payloads.
	pub fn resource_ids(&self) -> impl Iterator<Item = &str> {
		self.participants
			.iter()
			.map(|participant| participant.resource_id.as_str())
			.chain(
				self.attributes
					.get(OWNER_MAP_ATTRIBUTE)
					.and_then(Value::as_object)
					.into_iter()
					.flat_map(|owners| owners.keys().map(String::as_str)),
			)
	}
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
	pub id: EntityId,
	pub kind: String,
	#[serde(default)]
	pub attributes: Attributes,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub row_version: Option<VersionToken>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "entityType", rename_all = "camelCase")]
pub enum Entity {
	Activity(Activity),
	Resource(Resource),
}

impl Entity {
	#[must_use]
	pub fn id(&self) -> &str {
		match self {
			Self::Activity(activity) => &activity.id,
			Self::Resource(resource) => &resource.id,
		}
	}

	#[must_use]
	pub const fn row_version(&self) -> Option<&VersionToken> {
		match self {
			Self::Activity(activity) => activity.row_version.as_ref(),
			Self::Resource(resource) => resource.row_version.as_ref(),
		}
	}
}
