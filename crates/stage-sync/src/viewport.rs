//! Cache membership: which entities belong in a scope given what the planner is looking at.

use rp_sync::{Activity, EntityId, TimeWindow};

use std::collections::BTreeSet;

use crate::StageState;

/// The subscribed time window plus an optional resource subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewport {
	pub window: TimeWindow,
	pub resource_ids: Option<BTreeSet<EntityId>>,
}

impl Viewport {
	#[must_use]
	pub fn new(window: TimeWindow) -> Self {
		Self {
			window: window.corrected(),
			resource_ids: None,
		}
	}

	#[must_use]
	pub fn with_resources(mut self, resource_ids: impl IntoIterator<Item = EntityId>) -> Self {
		self.resource_ids = Some(resource_ids.into_iter().collect());
		self
	}

	/// Whether an activity lies in the window and touches the resource subset, if any.
	#[must_use]
	pub fn admits(&self, activity: &Activity) -> bool {
		self.window.overlaps(activity.start, activity.end)
			&& self.resource_ids.as_ref().map_or(true, |subset| {
				activity.resource_ids().any(|id| subset.contains(id))
			})
	}
}

/// Outcome of filtering candidate changes against a viewport.
#[derive(Debug, Default, PartialEq)]
pub struct Filtered {
	pub upserts: Vec<Activity>,
	pub deletes: Vec<EntityId>,
}

impl Filtered {
	pub fn apply(self, state: &mut StageState) {
		for activity in self.upserts {
			state.upsert_activity(activity);
		}

		for id in &self.deletes {
			state.remove(id);
		}
	}
}

/// Keeps upserts for entities the planner loaded locally or that are visible in the viewport.
/// Everything else is turned into a delete so stale copies leave the cache.
#[must_use]
pub fn filter(
	viewport: &Viewport,
	locally_loaded: &BTreeSet<EntityId>,
	upserts: Vec<Activity>,
	deletes: Vec<EntityId>,
) -> Filtered {
	let mut filtered = Filtered {
		upserts: Vec::with_capacity(upserts.len()),
		deletes,
	};

	for activity in upserts {
		if locally_loaded.contains(&activity.id) || viewport.admits(&activity) {
			filtered.upserts.push(activity);
		} else {
			filtered.deletes.push(activity.id);
		}
	}

	filtered
}
