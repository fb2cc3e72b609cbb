use rp_sync::{dominant, Activity, EntityId, Resource, TimeWindow, VersionToken};

use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::watch;
use tracing::trace;

/// Canonical local mirror of one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct StageState {
	pub activities: BTreeMap<EntityId, Activity>,
	pub resources: BTreeMap<EntityId, Resource>,
	pub window: TimeWindow,
	pub version: Option<VersionToken>,
}

impl StageState {
	#[must_use]
	pub fn new(window: TimeWindow) -> Self {
		Self {
			activities: BTreeMap::new(),
			resources: BTreeMap::new(),
			window: window.corrected(),
			version: None,
		}
	}

	/// Moves the scope version forward, never backwards.
	pub fn advance_version(&mut self, incoming: Option<&VersionToken>) {
		self.version = dominant(self.version.as_ref(), incoming).cloned();
	}

	/// Overwrites by id, keeping the known row version when the incoming copy has none.
	pub fn upsert_activity(&mut self, mut incoming: Activity) {
		if incoming.row_version.is_none() {
			incoming.row_version = self
				.activities
				.get(&incoming.id)
				.and_then(|known| known.row_version.clone());
		}

		self.activities.insert(incoming.id.clone(), incoming);
	}

	pub fn upsert_resource(&mut self, mut incoming: Resource) {
		if incoming.row_version.is_none() {
			incoming.row_version = self
				.resources
				.get(&incoming.id)
				.and_then(|known| known.row_version.clone());
		}

		self.resources.insert(incoming.id.clone(), incoming);
	}

	/// Drops the entity from either collection.
	pub fn remove(&mut self, id: &str) {
		self.activities.remove(id);
		self.resources.remove(id);
	}

	pub fn set_window(&mut self, window: TimeWindow) {
		self.window = window.corrected();
	}

	#[must_use]
	pub fn row_version(&self, id: &str) -> Option<&VersionToken> {
		self.activities
			.get(id)
			.and_then(|activity| activity.row_version.as_ref())
			.or_else(|| {
				self.resources
					.get(id)
					.and_then(|resource| resource.row_version.as_ref())
			})
	}
}

/// What readers observe: the state plus a counter bumped on every effective change.
#[derive(Debug, Clone)]
pub struct StageSnapshot {
	pub revision: u64,
	pub state: Arc<StageState>,
}

/// Holds a scope's [`StageState`] and publishes it to readers only when it changes.
#[derive(Debug)]
pub struct StageStore {
	current: StageSnapshot,
	tx: watch::Sender<StageSnapshot>,
}

impl StageStore {
	#[must_use]
	pub fn new(initial: StageState) -> Self {
		let current = StageSnapshot {
			revision: 0,
			state: Arc::new(initial),
		};
		let (tx, _) = watch::channel(current.clone());

		Self { current, tx }
	}

	#[must_use]
	pub fn read(&self) -> &StageState {
		&self.current.state
	}

	pub fn subscribe(&self) -> watch::Receiver<StageSnapshot> {
		self.tx.subscribe()
	}

	/// Applies `updater` to a draft copy and publishes it if anything changed.
	pub fn replace(&mut self, updater: impl FnOnce(&mut StageState)) -> bool {
		let mut draft = StageState::clone(&self.current.state);
		updater(&mut draft);

		if draft == *self.current.state {
			return false;
		}

		self.current = StageSnapshot {
			revision: self.current.revision + 1,
			state: Arc::new(draft),
		};

		trace!(revision = self.current.revision, "Stage state changed;");

		self.tx.send_replace(self.current.clone());

		true
	}
}
