use rp_sync::{EntityId, ScopeId, VersionToken};

use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::Value;

const GENERIC_FAILURE_MESSAGE: &str = "The changes could not be saved, the stage was reloaded.";

/// One id the server refused because the submitted version was stale.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VersionConflict {
	pub id: EntityId,
	pub expected: Option<VersionToken>,
	pub current: Option<VersionToken>,
}

/// Failures reported by the mutation API.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ApiError {
	#[error("version conflict on {} entities", conflicts.len())]
	Conflict { conflicts: Vec<VersionConflict> },
	#[error("server error: {}", display_status(*status))]
	Server {
		status: Option<u16>,
		payload: Option<Value>,
	},
	#[error("transport error: {0}")]
	Transport(String),
}

fn display_status(status: Option<u16>) -> String {
	status.map_or_else(|| "<unknown status>".to_string(), |status| status.to_string())
}

impl ApiError {
	/// A human readable sentence for the planner, taken from the structured error payload
	/// when the server sent one.
	#[must_use]
	pub fn user_message(&self) -> String {
		match self {
			Self::Server {
				payload: Some(payload),
				..
			} => ["message", "error", "detail"]
				.iter()
				.find_map(|key| payload.get(key).and_then(Value::as_str))
				.or_else(|| payload.as_str())
				.filter(|message| !message.trim().is_empty())
				.map_or_else(|| GENERIC_FAILURE_MESSAGE.to_string(), ToString::to_string),
			_ => GENERIC_FAILURE_MESSAGE.to_string(),
		}
	}

	#[must_use]
	pub fn conflicts(&self) -> Option<&[VersionConflict]> {
		match self {
			Self::Conflict { conflicts } => Some(conflicts),
			_ => None,
		}
	}
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("scope is not open: <scope='{0}'>")]
	ScopeNotOpen(ScopeId),
	#[error("scope is already open: <scope='{0}'>")]
	ScopeAlreadyOpen(ScopeId),
	#[error("reconciliation actor stopped: <scope='{0}'>")]
	ActorStopped(ScopeId),
	#[error(transparent)]
	Api(#[from] ApiError),
	#[error("invalid sync config: {0}")]
	Config(#[from] serde_json::Error),
	#[error(transparent)]
	ConfigIo(#[from] ConfigIoError),
}

/// Config file I/O error that includes the path that caused it
#[derive(thiserror::Error, Debug)]
pub struct ConfigIoError {
	pub path: Box<Path>,
	#[source]
	pub source: std::io::Error,
}

impl fmt::Display for ConfigIoError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"failed to read sync config: {}; path: '{}'",
			self.source,
			self.path.display()
		)
	}
}
