use rp_stage_sync::{
	rp_sync::{Entity, EntityId, ScopeId, TimeWindow, VersionToken},
	ApiError, BatchMutation, BatchResponse, ListQuery, MutationApi, PushChannel, ValidationIssue,
	ValidationResult,
};

use std::{
	collections::{BTreeSet, VecDeque},
	sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

/// Version tokens handed out by the mock server, in commit order.
pub fn server_version(n: u32) -> VersionToken {
	VersionToken::new(format!("2024-03-01T10:00:{n:02}.000Z"))
}

/// In-memory stand-in for the planning server: records every call and answers batches with
/// scripted responses first. Unscripted batches are accepted and stored.
#[derive(Debug)]
pub struct MockServer {
	batches: Mutex<Vec<(ScopeId, BatchMutation)>>,
	scripted: Mutex<VecDeque<Result<BatchResponse, ApiError>>>,
	entities: Mutex<Vec<Entity>>,
	subscriptions: Mutex<Vec<(ScopeId, TimeWindow, Option<BTreeSet<EntityId>>)>>,
	invalid: Mutex<BTreeSet<EntityId>>,
	list_calls: AtomicU32,
	commits: AtomicU32,
	gated: AtomicBool,
	gate: Semaphore,
	held_subscriptions: Mutex<BTreeSet<ScopeId>>,
	subscription_gate: Semaphore,
}

impl Default for MockServer {
	fn default() -> Self {
		Self {
			batches: Mutex::default(),
			scripted: Mutex::default(),
			entities: Mutex::default(),
			subscriptions: Mutex::default(),
			invalid: Mutex::default(),
			list_calls: AtomicU32::new(0),
			commits: AtomicU32::new(0),
			gated: AtomicBool::new(false),
			gate: Semaphore::new(0),
			held_subscriptions: Mutex::default(),
			subscription_gate: Semaphore::new(0),
		}
	}
}

impl MockServer {
	/// Makes every batch wait for [`MockServer::release`].
	pub fn gated() -> Self {
		let server = Self::default();
		server.gated.store(true, Ordering::SeqCst);
		server
	}

	pub fn release(&self, batches: usize) {
		self.gate.add_permits(batches);
	}

	/// Makes viewport subscriptions for `scope` wait for [`MockServer::acknowledge`].
	pub async fn hold_subscription(&self, scope: &ScopeId) {
		self.held_subscriptions.lock().await.insert(scope.clone());
	}

	pub fn acknowledge(&self, subscriptions: usize) {
		self.subscription_gate.add_permits(subscriptions);
	}

	pub async fn script(&self, response: Result<BatchResponse, ApiError>) {
		self.scripted.lock().await.push_back(response);
	}

	pub async fn seed(&self, entities: Vec<Entity>) {
		*self.entities.lock().await = entities;
	}

	pub async fn reject(&self, id: &str) {
		self.invalid.lock().await.insert(id.to_string());
	}

	pub async fn batches(&self) -> Vec<BatchMutation> {
		self.batches
			.lock()
			.await
			.iter()
			.map(|(_, batch)| batch.clone())
			.collect()
	}

	pub async fn subscriptions(&self) -> Vec<(ScopeId, TimeWindow, Option<BTreeSet<EntityId>>)> {
		self.subscriptions.lock().await.clone()
	}

	pub fn list_calls(&self) -> u32 {
		self.list_calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl MutationApi for MockServer {
	async fn batch_mutate(
		&self,
		scope: &ScopeId,
		batch: BatchMutation,
	) -> Result<BatchResponse, ApiError> {
		self.batches.lock().await.push((scope.clone(), batch.clone()));

		if self.gated.load(Ordering::SeqCst) {
			self.gate
				.acquire()
				.await
				.map_err(|e| ApiError::Transport(e.to_string()))?
				.forget();
		}

		if let Some(response) = self.scripted.lock().await.pop_front() {
			debug!(?response, "Answering with scripted response;");
			return response;
		}

		let version = server_version(self.commits.fetch_add(1, Ordering::SeqCst) + 1);

		let upserts = batch
			.upserts
			.into_iter()
			.map(|activity| activity.with_row_version(version.clone()))
			.collect::<Vec<_>>();

		let mut entities = self.entities.lock().await;
		entities.retain(|entity| {
			!batch.deletes.iter().any(|id| id == entity.id())
				&& !upserts.iter().any(|activity| activity.id == entity.id())
		});
		entities.extend(upserts.iter().cloned().map(Entity::Activity));

		Ok(BatchResponse {
			upserts,
			deleted_ids: batch.deletes,
			version: Some(version),
		})
	}

	async fn list_entities(
		&self,
		_scope: &ScopeId,
		_query: ListQuery,
	) -> Result<Vec<Entity>, ApiError> {
		self.list_calls.fetch_add(1, Ordering::SeqCst);

		Ok(self.entities.lock().await.clone())
	}

	async fn validate(
		&self,
		_scope: &ScopeId,
		ids: Vec<EntityId>,
	) -> Result<ValidationResult, ApiError> {
		let invalid = self.invalid.lock().await;

		Ok(ValidationResult {
			issues: ids
				.into_iter()
				.filter(|id| invalid.contains(id))
				.map(|id| ValidationIssue {
					id,
					message: "resource is double booked".to_string(),
					details: None,
				})
				.collect(),
		})
	}
}

#[async_trait]
impl PushChannel for MockServer {
	async fn subscribe_viewport(
		&self,
		scope: &ScopeId,
		window: TimeWindow,
		resource_ids: Option<BTreeSet<EntityId>>,
	) -> Result<(), ApiError> {
		self.subscriptions
			.lock()
			.await
			.push((scope.clone(), window, resource_ids));

		let held = self.held_subscriptions.lock().await.contains(scope);
		if held {
			self.subscription_gate
				.acquire()
				.await
				.map_err(|e| ApiError::Transport(e.to_string()))?
				.forget();
		}

		Ok(())
	}
}
