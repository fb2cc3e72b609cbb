use rp_sync::{Activity, EntityId};

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

/// Local intent not yet submitted. An id is either an upsert or a delete, never both, and the
/// most recent operation on it wins.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PendingMutationSet {
	upserts: BTreeMap<EntityId, Activity>,
	deletes: BTreeSet<EntityId>,
}

impl PendingMutationSet {
	pub fn upsert(&mut self, activity: Activity) {
		self.deletes.remove(&activity.id);
		self.upserts.insert(activity.id.clone(), activity);
	}

	pub fn delete(&mut self, id: EntityId) {
		self.upserts.remove(&id);
		self.deletes.insert(id);
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.upserts.is_empty() && self.deletes.is_empty()
	}

	#[must_use]
	pub fn contains(&self, id: &str) -> bool {
		self.upserts.contains_key(id) || self.deletes.contains(id)
	}

	#[must_use]
	pub fn is_deleted(&self, id: &str) -> bool {
		self.deletes.contains(id)
	}

	/// Snapshot-and-clear, leaving the queue empty.
	#[must_use]
	pub fn take(&mut self) -> (Vec<Activity>, Vec<EntityId>) {
		let Self { upserts, deletes } = std::mem::take(self);

		(upserts.into_values().collect(), deletes.into_iter().collect())
	}
}

/// The batch currently outstanding for a scope.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedBatch {
	pub correlation_id: Uuid,
	pub upserts: Vec<Activity>,
	pub deletes: Vec<EntityId>,
}

/// Ids submitted in the outstanding batch. Empty when nothing is in flight.
#[derive(Debug, Default)]
pub struct InFlightMutationSet {
	ids: BTreeSet<EntityId>,
	batch: Option<SubmittedBatch>,
}

impl InFlightMutationSet {
	pub fn begin(&mut self, batch: SubmittedBatch) {
		self.ids = batch
			.upserts
			.iter()
			.map(|activity| activity.id.clone())
			.chain(batch.deletes.iter().cloned())
			.collect();
		self.batch = Some(batch);
	}

	/// Clears the bookkeeping, handing back the batch that was outstanding.
	pub fn finish(&mut self) -> Option<SubmittedBatch> {
		self.ids.clear();
		self.batch.take()
	}

	#[must_use]
	pub const fn is_active(&self) -> bool {
		self.batch.is_some()
	}

	#[must_use]
	pub fn correlation_id(&self) -> Option<Uuid> {
		self.batch.as_ref().map(|batch| batch.correlation_id)
	}

	#[must_use]
	pub fn contains(&self, id: &str) -> bool {
		self.ids.contains(id)
	}
}
