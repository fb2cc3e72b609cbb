//! Seams to the server: the mutation endpoints and the push channel.

use rp_sync::{Activity, Entity, EntityId, ScopeId, TimeWindow, VersionToken};

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ApiError;

/// One outbound batch of local intent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchMutation {
	pub upserts: Vec<Activity>,
	pub deletes: Vec<EntityId>,
	pub correlation_id: Uuid,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
	#[serde(default)]
	pub upserts: Vec<Activity>,
	#[serde(default)]
	pub deleted_ids: Vec<EntityId>,
	#[serde(default)]
	pub version: Option<VersionToken>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
	pub window: TimeWindow,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resource_ids: Option<BTreeSet<EntityId>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
	pub id: EntityId,
	pub message: String,
	#[serde(default)]
	pub details: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
	#[serde(default)]
	pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
	#[must_use]
	pub fn is_valid(&self) -> bool {
		self.issues.is_empty()
	}
}

#[async_trait]
pub trait MutationApi: Send + Sync + 'static {
	async fn batch_mutate(
		&self,
		scope: &ScopeId,
		batch: BatchMutation,
	) -> Result<BatchResponse, ApiError>;

	async fn list_entities(&self, scope: &ScopeId, query: ListQuery)
		-> Result<Vec<Entity>, ApiError>;

	async fn validate(&self, scope: &ScopeId, ids: Vec<EntityId>)
		-> Result<ValidationResult, ApiError>;
}

#[async_trait]
pub trait PushChannel: Send + Sync + 'static {
	/// Resolves once the server acknowledged the new subscription.
	async fn subscribe_viewport(
		&self,
		scope: &ScopeId,
		window: TimeWindow,
		resource_ids: Option<BTreeSet<EntityId>>,
	) -> Result<(), ApiError>;
}
