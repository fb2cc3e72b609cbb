use serde::{Deserialize, Serialize};

use crate::{Activity, EntityId, Resource, ScopeId, TimeWindow, VersionToken};

/// Change notification pushed by the server for one scope.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEvent {
	pub scope: ScopeId,
	#[serde(flatten)]
	pub kind: RemoteEventKind,
	#[serde(default)]
	pub version: Option<VersionToken>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub origin_connection_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub origin_user_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RemoteEventKind {
	#[serde(rename_all = "camelCase")]
	Upsert {
		#[serde(default)]
		activities: Vec<Activity>,
		#[serde(default)]
		resources: Vec<Resource>,
	},
	#[serde(rename_all = "camelCase")]
	Delete { delete_ids: Vec<EntityId> },
	RangeChanged { range: TimeWindow },
}

impl RemoteEvent {
	#[must_use]
	pub fn upsert(scope: ScopeId, activities: Vec<Activity>, version: Option<VersionToken>) -> Self {
		Self {
			scope,
			kind: RemoteEventKind::Upsert {
				activities,
				resources: vec![],
			},
			version,
			origin_connection_id: None,
			origin_user_id: None,
		}
	}

	#[must_use]
	pub fn delete(scope: ScopeId, delete_ids: Vec<EntityId>, version: Option<VersionToken>) -> Self {
		Self {
			scope,
			kind: RemoteEventKind::Delete { delete_ids },
			version,
			origin_connection_id: None,
			origin_user_id: None,
		}
	}

	#[must_use]
	pub fn range_changed(scope: ScopeId, range: TimeWindow, version: Option<VersionToken>) -> Self {
		Self {
			scope,
			kind: RemoteEventKind::RangeChanged { range },
			version,
			origin_connection_id: None,
			origin_user_id: None,
		}
	}

	#[must_use]
	pub fn from_connection(mut self, connection_id: impl Into<String>) -> Self {
		self.origin_connection_id = Some(connection_id.into());
		self
	}

	#[must_use]
	pub fn from_user(mut self, user_id: impl Into<String>) -> Self {
		self.origin_user_id = Some(user_id.into());
		self
	}
}
