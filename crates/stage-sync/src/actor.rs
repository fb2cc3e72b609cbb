//! One reconciliation actor per scope. The actor owns the scope's [`ScopeEngine`] and handles
//! one request at a time, so a mutation and the flush it triggers finish before anything else
//! touches the scope. Server round trips run in spawned tasks that post their outcome back.

use rp_sync::{Activity, Entity, EntityId, RemoteEvent, ScopeId, TimeWindow};

use std::{collections::BTreeSet, sync::Arc};

use tokio::{
	spawn,
	sync::{broadcast, mpsc, oneshot, watch},
	task::JoinHandle,
};
use tracing::{debug, error, instrument, trace, warn, Instrument};
use uuid::Uuid;

use crate::{
	api::{BatchResponse, MutationApi},
	engine::{Effect, ScopeEngine, SyncPhase},
	ApiError, StageSnapshot, SyncEvent,
};

/// Everything a scope actor consumes, from callers and from its own finished round trips.
#[derive(Debug)]
pub enum Request {
	Mutate {
		upserts: Vec<Activity>,
		deletes: Vec<EntityId>,
	},
	Flush,
	Refresh,
	Remote(RemoteEvent),
	SetViewport {
		window: TimeWindow,
		resource_ids: Option<BTreeSet<EntityId>>,
	},
	Phase(oneshot::Sender<SyncPhase>),
	BatchSettled {
		correlation_id: Uuid,
		result: Result<BatchResponse, ApiError>,
	},
	RefreshLoaded {
		generation: u64,
		result: Result<Vec<Entity>, ApiError>,
	},
	Stop,
}

/// Caller side of a running scope actor.
#[derive(Debug)]
pub struct ScopeHandle {
	pub req_tx: mpsc::Sender<Request>,
	pub state_rx: watch::Receiver<StageSnapshot>,
	handle: JoinHandle<()>,
}

impl ScopeHandle {
	pub async fn stop(self) {
		if self.req_tx.send(Request::Stop).await.is_err() {
			trace!("Scope actor already gone");
		}

		if self.handle.await.is_err() {
			error!("Scope actor unexpectedly panicked");
		}
	}
}

pub struct ScopeActor {
	engine: ScopeEngine,
	api: Arc<dyn MutationApi>,
	events_tx: broadcast::Sender<SyncEvent>,
	/// Handed to spawned round trips; only [`ScopeHandle`] keeps the actor alive.
	req_tx: mpsc::WeakSender<Request>,
	req_rx: mpsc::Receiver<Request>,
}

impl ScopeActor {
	pub fn spawn(
		engine: ScopeEngine,
		api: Arc<dyn MutationApi>,
		events_tx: broadcast::Sender<SyncEvent>,
		buffer: usize,
	) -> ScopeHandle {
		let (req_tx, req_rx) = mpsc::channel(buffer.max(1));
		let state_rx = engine.subscribe();

		let actor = Self {
			engine,
			api,
			events_tx,
			req_tx: req_tx.downgrade(),
			req_rx,
		};

		ScopeHandle {
			req_tx,
			state_rx,
			handle: spawn(actor.run()),
		}
	}

	async fn run(mut self) {
		debug!(scope = %self.engine.scope(), "Scope actor started;");

		// Ends on `Stop` or once every `ScopeHandle` sender is dropped
		while let Some(request) = self.req_rx.recv().await {
			if matches!(request, Request::Stop) {
				break;
			}

			self.handle(request);
		}

		debug!(scope = %self.engine.scope(), "Scope actor stopped;");
	}

	#[instrument(skip_all, fields(scope = %self.engine.scope()))]
	fn handle(&mut self, request: Request) {
		trace!(?request, "Handling request;");

		let effects = match request {
			Request::Mutate { upserts, deletes } => self.engine.enqueue(upserts, deletes),
			Request::Flush => self.engine.flush(),
			Request::Refresh => vec![self.engine.refresh()],
			Request::Remote(event) => {
				self.engine.on_remote_event(event);
				vec![]
			}
			Request::SetViewport {
				window,
				resource_ids,
			} => vec![self.engine.set_viewport(window, resource_ids)],
			Request::Phase(tx) => {
				if tx.send(self.engine.phase()).is_err() {
					warn!("Phase requester went away");
				}
				vec![]
			}
			Request::BatchSettled {
				correlation_id,
				result,
			} => self.engine.on_batch_settled(correlation_id, result),
			Request::RefreshLoaded { generation, result } => {
				self.engine.on_refresh_loaded(generation, result)
			}
			Request::Stop => vec![],
		};

		for effect in effects {
			self.execute(effect);
		}
	}

	fn execute(&self, effect: Effect) {
		let scope = self.engine.scope().clone();

		match effect {
			Effect::Submit(batch) => {
				let api = Arc::clone(&self.api);
				let req_tx = self.req_tx.clone();
				let correlation_id = batch.correlation_id;

				spawn(
					async move {
						let result = api.batch_mutate(&scope, batch).await;

						reply(
							&req_tx,
							Request::BatchSettled {
								correlation_id,
								result,
							},
						)
						.await;
					}
					.in_current_span(),
				);
			}

			Effect::Refresh { generation, query } => {
				let api = Arc::clone(&self.api);
				let req_tx = self.req_tx.clone();

				spawn(
					async move {
						let result = api.list_entities(&scope, query).await;

						reply(&req_tx, Request::RefreshLoaded { generation, result }).await;
					}
					.in_current_span(),
				);
			}

			Effect::Retrying { attempt } => self.emit(SyncEvent::Retrying { scope, attempt }),

			Effect::Committed { version } => self.emit(SyncEvent::Committed { scope, version }),

			Effect::ScopeError { message } => {
				error!(%scope, %message, "Surfacing scope error;");
				self.emit(SyncEvent::ScopeError { scope, message });
			}
		}
	}

	fn emit(&self, event: SyncEvent) {
		if self.events_tx.send(event).is_err() {
			trace!("No sync event subscribers");
		}
	}
}

/// Posts the outcome of a round trip back to the actor, unless every handle to it is gone.
async fn reply(req_tx: &mpsc::WeakSender<Request>, request: Request) {
	let Some(req_tx) = req_tx.upgrade() else {
		debug!("Scope actor stopped before the round trip finished;");
		return;
	};

	if req_tx.send(request).await.is_err() {
		warn!("Scope actor stopped before the round trip finished");
	}
}

/// Convenience for the manager: sends a request, mapping a closed channel to an error.
pub async fn send(
	req_tx: &mpsc::Sender<Request>,
	scope: &ScopeId,
	request: Request,
) -> Result<(), crate::Error> {
	req_tx
		.send(request)
		.await
		.map_err(|_| crate::Error::ActorStopped(scope.clone()))
}
