use rp_sync::{
	dominant_of, Activity, Entity, EntityId, Resource, ScopeId, TimeWindow, VersionToken,
};

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, error, instrument, trace, warn};
use uuid::Uuid;

use crate::{
	api::{BatchMutation, BatchResponse, ListQuery},
	conflict::{ConflictRetryController, RetryDecision},
	queue::{InFlightMutationSet, PendingMutationSet, SubmittedBatch},
	remote::DeferredRemoteMutationSet,
	viewport::{self, Viewport},
	ApiError, SessionIdentity, StageSnapshot, StageState, StageStore, SyncConfig,
};

/// I/O and notifications the engine asks its driver to carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
	/// Submit this batch; report back through [`ScopeEngine::on_batch_settled`].
	Submit(BatchMutation),
	/// Re-read the whole scope; report back through [`ScopeEngine::on_refresh_loaded`].
	Refresh { generation: u64, query: ListQuery },
	/// A version conflict is being resolved by resubmitting.
	Retrying { attempt: u8 },
	/// A batch was accepted and merged.
	Committed { version: Option<VersionToken> },
	/// Something the planner has to be told about.
	ScopeError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
	/// Nothing queued, nothing outstanding.
	Idle,
	/// Local intent waiting for the next flush.
	Queued,
	/// One batch outstanding.
	InFlight,
	/// One batch outstanding, resubmitted after `n` version conflicts.
	Retrying(u8),
}

/// All reconciliation state of one scope. Every method runs to completion and only describes
/// the I/O it needs as [`Effect`]s, so the caller decides how requests are executed.
#[derive(Debug)]
pub struct ScopeEngine {
	pub(crate) scope: ScopeId,
	pub(crate) read_only: bool,
	pub(crate) session: SessionIdentity,
	pub(crate) store: StageStore,
	pub(crate) resource_ids: Option<BTreeSet<EntityId>>,
	pub(crate) pending: PendingMutationSet,
	pub(crate) in_flight: InFlightMutationSet,
	pub(crate) deferred: DeferredRemoteMutationSet,
	pub(crate) retry: ConflictRetryController,
	/// Latest row version the server reported for each id, from any source.
	pub(crate) known_versions: HashMap<EntityId, VersionToken>,
	/// Ids the planner brought into the cache by editing them, kept regardless of viewport.
	pub(crate) locally_loaded: BTreeSet<EntityId>,
	refresh_generation: u64,
}

impl ScopeEngine {
	#[must_use]
	pub fn new(
		scope: ScopeId,
		viewport: Viewport,
		config: &SyncConfig,
		session: SessionIdentity,
	) -> Self {
		Self {
			read_only: config.is_read_only(&scope),
			scope,
			session,
			store: StageStore::new(StageState::new(viewport.window)),
			resource_ids: viewport.resource_ids,
			pending: PendingMutationSet::default(),
			in_flight: InFlightMutationSet::default(),
			deferred: DeferredRemoteMutationSet::default(),
			retry: ConflictRetryController::new(config.max_conflict_retries),
			known_versions: HashMap::new(),
			locally_loaded: BTreeSet::new(),
			refresh_generation: 0,
		}
	}

	#[must_use]
	pub const fn scope(&self) -> &ScopeId {
		&self.scope
	}

	#[must_use]
	pub const fn is_read_only(&self) -> bool {
		self.read_only
	}

	#[must_use]
	pub fn state(&self) -> &StageState {
		self.store.read()
	}

	pub fn subscribe(&self) -> tokio::sync::watch::Receiver<StageSnapshot> {
		self.store.subscribe()
	}

	#[must_use]
	pub fn viewport(&self) -> Viewport {
		Viewport {
			window: self.store.read().window,
			resource_ids: self.resource_ids.clone(),
		}
	}

	#[must_use]
	pub fn pending(&self) -> &PendingMutationSet {
		&self.pending
	}

	#[must_use]
	pub const fn deferred(&self) -> &DeferredRemoteMutationSet {
		&self.deferred
	}

	#[must_use]
	pub const fn conflict_attempts(&self) -> u8 {
		self.retry.attempts()
	}

	#[must_use]
	pub fn phase(&self) -> SyncPhase {
		match (self.in_flight.is_active(), self.retry.attempts()) {
			(true, 0) => SyncPhase::InFlight,
			(true, attempt) => SyncPhase::Retrying(attempt),
			(false, _) if !self.pending.is_empty() => SyncPhase::Queued,
			(false, _) => SyncPhase::Idle,
		}
	}

	/// Ids with local intent pending or in flight; remote changes to them must wait.
	#[must_use]
	pub fn is_blocked(&self, id: &str) -> bool {
		self.pending.contains(id) || self.in_flight.contains(id)
	}

	/// Queues local edits, shows them right away and tries to flush.
	#[instrument(skip_all, fields(scope = %self.scope, upserts = upserts.len(), deletes = deletes.len()))]
	pub fn enqueue(&mut self, upserts: Vec<Activity>, deletes: Vec<EntityId>) -> Vec<Effect> {
		if self.read_only {
			debug!("Ignoring local mutation on read-only scope;");
			return vec![];
		}

		let upserts = self.queue_intent(upserts, deletes.clone());

		for activity in &upserts {
			self.locally_loaded.insert(activity.id.clone());
		}
		for id in &deletes {
			self.locally_loaded.remove(id);
		}

		self.store.replace(|state| {
			for activity in upserts {
				state.upsert_activity(activity);
			}

			for id in &deletes {
				state.remove(id);
			}
		});

		self.flush()
	}

	/// Puts intent in the pending set with versions patched, returning the queued upserts.
	fn queue_intent(&mut self, upserts: Vec<Activity>, deletes: Vec<EntityId>) -> Vec<Activity> {
		let mut queued = Vec::with_capacity(upserts.len());

		for mut activity in upserts {
			activity.row_version = dominant_of([
				activity.row_version.as_ref(),
				self.store.read().row_version(&activity.id),
				self.retry.hint(&activity.id),
			])
			.cloned();

			self.pending.upsert(activity.clone());
			queued.push(activity);
		}

		for id in deletes {
			self.pending.delete(id);
		}

		queued
	}

	/// Submits everything queued as one batch, unless a batch is already outstanding.
	#[instrument(skip_all, fields(scope = %self.scope))]
	pub fn flush(&mut self) -> Vec<Effect> {
		if self.read_only || self.in_flight.is_active() || self.pending.is_empty() {
			return vec![];
		}

		let (mut upserts, deletes) = self.pending.take();

		let state = self.store.read();
		for activity in &mut upserts {
			activity.row_version = dominant_of([
				activity.row_version.as_ref(),
				state.row_version(&activity.id),
				self.known_versions.get(&activity.id),
				state.version.as_ref(),
			])
			.cloned();
		}

		let correlation_id = Uuid::new_v4();

		self.in_flight.begin(SubmittedBatch {
			correlation_id,
			upserts: upserts.clone(),
			deletes: deletes.clone(),
		});

		debug!(
			%correlation_id,
			upserts = upserts.len(),
			deletes = deletes.len(),
			"Submitting batch;"
		);

		vec![Effect::Submit(BatchMutation {
			upserts,
			deletes,
			correlation_id,
		})]
	}

	/// Outcome of the batch submitted with `correlation_id`.
	pub fn on_batch_settled(
		&mut self,
		correlation_id: Uuid,
		result: Result<BatchResponse, ApiError>,
	) -> Vec<Effect> {
		if self.in_flight.correlation_id() != Some(correlation_id) {
			warn!(
				scope = %self.scope,
				%correlation_id,
				"Ignoring completion of a batch that is not in flight;"
			);
			return vec![];
		}

		match result {
			Ok(response) => self.on_batch_success(response),
			Err(e) => self.on_batch_failure(e),
		}
	}

	#[instrument(skip_all, fields(scope = %self.scope))]
	fn on_batch_success(&mut self, response: BatchResponse) -> Vec<Effect> {
		let BatchResponse {
			upserts,
			deleted_ids,
			version,
		} = response;

		for activity in &upserts {
			self.observe_version(&activity.id, activity.row_version.as_ref());
		}

		// Ids edited again during the round trip keep their newer optimistic copy
		let upserts = upserts
			.into_iter()
			.filter(|activity| !self.pending.contains(&activity.id))
			.collect();
		let deletes = deleted_ids
			.into_iter()
			.filter(|id| !self.pending.contains(id))
			.collect();

		self.merge(upserts, deletes, vec![], version.as_ref());

		self.in_flight.finish();
		self.retry.reset();

		debug!(version = ?self.store.read().version, "Batch committed;");

		let mut effects = vec![Effect::Committed {
			version: self.store.read().version.clone(),
		}];

		self.drain_deferred();
		effects.extend(self.flush());

		effects
	}

	#[instrument(skip_all, fields(scope = %self.scope, error = %e))]
	fn on_batch_failure(&mut self, e: ApiError) -> Vec<Effect> {
		let Some(batch) = self.in_flight.finish() else {
			return vec![];
		};

		if let Some(conflicts) = e.conflicts() {
			if let RetryDecision::Retry { attempt } = self.retry.evaluate(conflicts) {
				debug!(attempt, "Resubmitting batch with hinted versions;");

				// Anything edited again meanwhile already carries newer intent
				let upserts = batch
					.upserts
					.into_iter()
					.filter(|activity| !self.pending.contains(&activity.id))
					.collect();
				let deletes = batch
					.deletes
					.into_iter()
					.filter(|id| !self.pending.contains(id))
					.collect();

				self.queue_intent(upserts, deletes);

				let mut effects = vec![Effect::Retrying { attempt }, self.refresh()];
				effects.extend(self.flush());

				return effects;
			}
		}

		error!("Batch failed, reloading scope;");

		self.retry.reset();

		let mut effects = vec![
			Effect::ScopeError {
				message: e.user_message(),
			},
			self.refresh(),
		];

		self.drain_deferred();
		effects.extend(self.flush());

		effects
	}

	/// Starts a full re-read of the scope. Only the latest requested re-read is applied.
	pub fn refresh(&mut self) -> Effect {
		self.refresh_generation += 1;

		Effect::Refresh {
			generation: self.refresh_generation,
			query: ListQuery {
				window: self.store.read().window,
				resource_ids: self.resource_ids.clone(),
			},
		}
	}

	/// Replaces the cache with a full read, keeping local copies of blocked ids.
	#[instrument(skip(self, result), fields(scope = %self.scope))]
	pub fn on_refresh_loaded(
		&mut self,
		generation: u64,
		result: Result<Vec<Entity>, ApiError>,
	) -> Vec<Effect> {
		if generation != self.refresh_generation {
			trace!(
				latest = self.refresh_generation,
				"Dropping superseded scope read;"
			);
			return vec![];
		}

		let entities = match result {
			Ok(entities) => entities,
			Err(e) => {
				warn!(%e, "Failed to reload scope;");
				return vec![Effect::ScopeError {
					message: e.user_message(),
				}];
			}
		};

		let mut returned = BTreeSet::new();
		for entity in &entities {
			self.observe_version(entity.id(), entity.row_version());
			returned.insert(entity.id().to_string());
		}

		let mut activities = BTreeMap::new();
		let mut resources = BTreeMap::new();

		for entity in entities {
			match entity {
				Entity::Activity(activity) if !self.is_blocked(&activity.id) => {
					activities.insert(activity.id.clone(), activity);
				}
				Entity::Activity(_) => {}
				Entity::Resource(resource) => {
					resources.insert(resource.id.clone(), resource);
				}
			}
		}

		let (pending, in_flight) = (&self.pending, &self.in_flight);

		self.locally_loaded
			.retain(|id| pending.contains(id) || in_flight.contains(id));
		self.known_versions.retain(|id, _| {
			returned.contains(id) || pending.contains(id) || in_flight.contains(id)
		});

		self.store.replace(|state| {
			activities.extend(
				state
					.activities
					.iter()
					.filter(|(id, _)| pending.contains(id) || in_flight.contains(id))
					.map(|(id, activity)| (id.clone(), activity.clone())),
			);

			state.activities = activities;
			state.resources = resources;
		});

		vec![]
	}

	/// Moves the subscribed viewport and re-reads the scope for it.
	#[instrument(skip(self), fields(scope = %self.scope))]
	pub fn set_viewport(
		&mut self,
		window: TimeWindow,
		resource_ids: Option<BTreeSet<EntityId>>,
	) -> Effect {
		self.resource_ids = resource_ids;
		self.store.replace(|state| state.set_window(window));

		self.refresh()
	}

	/// Filters changes through the viewport and merges them, advancing the scope version.
	pub(crate) fn merge(
		&mut self,
		upserts: Vec<Activity>,
		deletes: Vec<EntityId>,
		resources: Vec<Resource>,
		version: Option<&VersionToken>,
	) -> bool {
		let filtered = viewport::filter(&self.viewport(), &self.locally_loaded, upserts, deletes);

		for id in &filtered.deletes {
			self.locally_loaded.remove(id);
			self.known_versions.remove(id);
		}

		self.store.replace(|state| {
			filtered.apply(state);

			for resource in resources {
				state.upsert_resource(resource);
			}

			state.advance_version(version);
		})
	}

	pub(crate) fn observe_version(&mut self, id: &str, version: Option<&VersionToken>) {
		let Some(version) = version else {
			return;
		};

		let known = self
			.known_versions
			.entry(id.to_string())
			.or_insert_with(|| version.clone());

		if *version > *known {
			*known = version.clone();
		}
	}
}
