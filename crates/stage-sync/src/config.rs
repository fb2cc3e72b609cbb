//! Engine configuration

use rp_sync::ScopeId;

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{error::ConfigIoError, Error};

/// Tunables for the stage synchronization engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
	/// How many times a batch rejected with version conflicts is resubmitted
	pub max_conflict_retries: u8,

	/// Capacity of each scope actor's request channel
	pub request_buffer: usize,

	/// Capacity of the broadcast channel carrying [`crate::SyncEvent`]s
	pub event_buffer: usize,

	/// Scopes whose content is derived server side and never mutated locally
	pub read_only_scopes: Vec<ScopeId>,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			max_conflict_retries: 3,
			request_buffer: 64,
			event_buffer: 256,
			read_only_scopes: vec![ScopeId::from("operations")],
		}
	}
}

impl SyncConfig {
	pub fn from_json_str(json: &str) -> Result<Self, Error> {
		Ok(serde_json::from_str(json)?)
	}

	pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Error> {
		let path = path.as_ref();

		info!("Loading sync config from {}", path.display());

		let json = fs::read_to_string(path).map_err(|source| ConfigIoError {
			path: path.into(),
			source,
		})?;

		Self::from_json_str(&json)
	}

	#[must_use]
	pub fn is_read_only(&self, scope: &ScopeId) -> bool {
		self.read_only_scopes.contains(scope)
	}
}

/// Identifies the local session so our own changes echoed by the push channel are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdentity {
	pub connection_id: Option<String>,
	pub user_id: Option<String>,
}

impl SessionIdentity {
	pub fn new(connection_id: impl Into<String>, user_id: impl Into<String>) -> Self {
		Self {
			connection_id: Some(connection_id.into()),
			user_id: Some(user_id.into()),
		}
	}

	/// Whether an event with these origins was produced by this session.
	#[must_use]
	pub fn originated(
		&self,
		origin_connection_id: Option<&str>,
		origin_user_id: Option<&str>,
	) -> bool {
		match origin_connection_id {
			Some(origin) => self.connection_id.as_deref() == Some(origin),
			None => origin_user_id.is_some() && self.user_id.as_deref() == origin_user_id,
		}
	}
}
