use rp_sync::{Activity, EntityId, RemoteEvent, ScopeId, TimeWindow};

use std::{
	collections::{BTreeSet, HashMap},
	sync::Arc,
};

use futures::{pin_mut, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tracing::{debug, info, instrument, trace};

use crate::{
	actor::{self, Request, ScopeActor, ScopeHandle},
	api::{MutationApi, PushChannel, ValidationResult},
	Error, ScopeEngine, SessionIdentity, StageSnapshot, StageState, SyncConfig, SyncEvent,
	SyncPhase, Viewport,
};

/// Entry point for callers: opens scopes, routes edits and push events to the right scope actor
/// and hands out read access to the published stages.
pub struct Manager {
	api: Arc<dyn MutationApi>,
	push: Arc<dyn PushChannel>,
	config: SyncConfig,
	session: SessionIdentity,
	scopes: RwLock<HashMap<ScopeId, ScopeHandle>>,
	tx: broadcast::Sender<SyncEvent>,
}

impl std::fmt::Debug for Manager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Manager")
			.field("config", &self.config)
			.field("session", &self.session)
			.finish_non_exhaustive()
	}
}

impl Manager {
	pub fn new(
		api: Arc<dyn MutationApi>,
		push: Arc<dyn PushChannel>,
		config: SyncConfig,
		session: SessionIdentity,
	) -> (Self, broadcast::Receiver<SyncEvent>) {
		let (tx, rx) = broadcast::channel(config.event_buffer.max(1));

		(
			Self {
				api,
				push,
				config,
				session,
				scopes: RwLock::default(),
				tx,
			},
			rx,
		)
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
		self.tx.subscribe()
	}

	/// Subscribes the push channel to `viewport`, starts the scope's actor and kicks off the
	/// initial read. The returned receiver sees every published stage.
	#[instrument(skip(self, viewport), err)]
	pub async fn open(
		&self,
		scope: ScopeId,
		viewport: Viewport,
	) -> Result<watch::Receiver<StageSnapshot>, Error> {
		if self.scopes.read().await.contains_key(&scope) {
			return Err(Error::ScopeAlreadyOpen(scope));
		}

		// Other scopes keep serving requests while we wait for the acknowledgement
		self.push
			.subscribe_viewport(&scope, viewport.window, viewport.resource_ids.clone())
			.await?;

		let mut scopes = self.scopes.write().await;

		if scopes.contains_key(&scope) {
			return Err(Error::ScopeAlreadyOpen(scope));
		}

		let engine = ScopeEngine::new(scope.clone(), viewport, &self.config, self.session.clone());
		let read_only = engine.is_read_only();

		let handle = ScopeActor::spawn(
			engine,
			Arc::clone(&self.api),
			self.tx.clone(),
			self.config.request_buffer,
		);

		actor::send(&handle.req_tx, &scope, Request::Refresh).await?;

		let state_rx = handle.state_rx.clone();
		scopes.insert(scope, handle);
		drop(scopes);

		info!(read_only, "Opened scope;");

		Ok(state_rx)
	}

	/// Stops the scope's actor. Queued intent that wasn't submitted yet is dropped.
	#[instrument(skip(self))]
	pub async fn close(&self, scope: &ScopeId) -> Result<(), Error> {
		let handle = self
			.scopes
			.write()
			.await
			.remove(scope)
			.ok_or_else(|| Error::ScopeNotOpen(scope.clone()))?;

		handle.stop().await;

		debug!("Closed scope;");

		Ok(())
	}

	/// The latest published stage.
	pub async fn read(&self, scope: &ScopeId) -> Result<Arc<StageState>, Error> {
		self.scopes
			.read()
			.await
			.get(scope)
			.map(|handle| Arc::clone(&handle.state_rx.borrow().state))
			.ok_or_else(|| Error::ScopeNotOpen(scope.clone()))
	}

	pub async fn watch(&self, scope: &ScopeId) -> Result<watch::Receiver<StageSnapshot>, Error> {
		self.scopes
			.read()
			.await
			.get(scope)
			.map(|handle| handle.state_rx.clone())
			.ok_or_else(|| Error::ScopeNotOpen(scope.clone()))
	}

	/// Queues local edits. The actor applies them to the published stage right away and sends
	/// them with the next batch.
	#[instrument(skip(self, upserts, deletes), fields(upserts = upserts.len(), deletes = deletes.len()), err)]
	pub async fn mutate(
		&self,
		scope: &ScopeId,
		upserts: Vec<Activity>,
		deletes: Vec<EntityId>,
	) -> Result<(), Error> {
		self.request(scope, Request::Mutate { upserts, deletes })
			.await
	}

	/// Submits queued intent now if no batch is outstanding.
	pub async fn flush(&self, scope: &ScopeId) -> Result<(), Error> {
		self.request(scope, Request::Flush).await
	}

	/// Re-reads the whole scope from the server.
	pub async fn refresh(&self, scope: &ScopeId) -> Result<(), Error> {
		self.request(scope, Request::Refresh).await
	}

	/// Routes one push event to its scope. Events for scopes that aren't open are ignored.
	pub async fn on_remote_event(&self, event: RemoteEvent) -> Result<(), Error> {
		let Some(req_tx) = self.sender(&event.scope).await else {
			trace!(scope = %event.scope, "Ignoring push event for a scope that isn't open;");
			return Ok(());
		};

		let scope = event.scope.clone();

		actor::send(&req_tx, &scope, Request::Remote(event)).await
	}

	/// Feeds a push channel's event stream into the engine until the stream ends.
	pub async fn pump_remote_events(
		&self,
		events: impl Stream<Item = RemoteEvent>,
	) -> Result<(), Error> {
		pin_mut!(events);

		while let Some(event) = events.next().await {
			self.on_remote_event(event).await?;
		}

		debug!("Push event stream ended;");

		Ok(())
	}

	/// Moves the viewport of an open scope: resubscribes the push channel, then re-reads.
	#[instrument(skip(self, resource_ids), err)]
	pub async fn set_viewport(
		&self,
		scope: &ScopeId,
		window: TimeWindow,
		resource_ids: Option<BTreeSet<EntityId>>,
	) -> Result<(), Error> {
		let req_tx = self
			.sender(scope)
			.await
			.ok_or_else(|| Error::ScopeNotOpen(scope.clone()))?;

		let window = window.corrected();

		self.push
			.subscribe_viewport(scope, window, resource_ids.clone())
			.await?;

		actor::send(
			&req_tx,
			scope,
			Request::SetViewport {
				window,
				resource_ids,
			},
		)
		.await
	}

	/// Asks the server to validate entities. Pending and in-flight intent are left alone.
	pub async fn validate(
		&self,
		scope: &ScopeId,
		ids: Vec<EntityId>,
	) -> Result<ValidationResult, Error> {
		if self.sender(scope).await.is_none() {
			return Err(Error::ScopeNotOpen(scope.clone()));
		}

		Ok(self.api.validate(scope, ids).await?)
	}

	pub async fn phase(&self, scope: &ScopeId) -> Result<SyncPhase, Error> {
		let (tx, rx) = oneshot::channel();

		self.request(scope, Request::Phase(tx)).await?;

		rx.await.map_err(|_| Error::ActorStopped(scope.clone()))
	}

	/// Stops every scope actor.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		let handles = self.scopes.write().await.drain().collect::<Vec<_>>();

		for (scope, handle) in handles {
			trace!(%scope, "Stopping scope actor;");
			handle.stop().await;
		}

		info!("Sync manager shut down;");
	}

	async fn sender(&self, scope: &ScopeId) -> Option<mpsc::Sender<Request>> {
		self.scopes
			.read()
			.await
			.get(scope)
			.map(|handle| handle.req_tx.clone())
	}

	async fn request(&self, scope: &ScopeId, request: Request) -> Result<(), Error> {
		let req_tx = self
			.sender(scope)
			.await
			.ok_or_else(|| Error::ScopeNotOpen(scope.clone()))?;

		actor::send(&req_tx, scope, request).await
	}
}
