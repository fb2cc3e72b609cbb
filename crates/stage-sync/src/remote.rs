//! Applying push events from other planners without overtaking our own unsettled edits.

use rp_sync::{
	dominant, dominant_of, Activity, EntityId, RemoteEvent, RemoteEventKind, VersionToken,
};

use std::collections::BTreeMap;

use tracing::{debug, instrument, trace, warn};

use crate::engine::ScopeEngine;

#[derive(Debug, Clone, PartialEq)]
pub enum DeferredChange {
	Upsert(Activity),
	Delete,
}

/// A remote change withheld because its id was blocked when it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredMutation {
	pub change: DeferredChange,
	/// Dominant version of every event seen for this id while it was deferred.
	pub version: Option<VersionToken>,
}

#[derive(Debug, Default)]
pub struct DeferredRemoteMutationSet {
	entries: BTreeMap<EntityId, DeferredMutation>,
}

impl DeferredRemoteMutationSet {
	/// Parks a change, replacing any earlier payload for the id but keeping the dominant
	/// version of both.
	pub fn park(&mut self, id: EntityId, change: DeferredChange, version: Option<VersionToken>) {
		let version = match self.entries.get(&id) {
			Some(existing) => dominant(existing.version.as_ref(), version.as_ref()).cloned(),
			None => version,
		};

		self.entries
			.insert(id, DeferredMutation { change, version });
	}

	#[must_use]
	pub fn get(&self, id: &str) -> Option<&DeferredMutation> {
		self.entries.get(id)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Removes and returns every entry whose id is no longer blocked.
	pub fn take_unblocked(
		&mut self,
		is_blocked: impl Fn(&str) -> bool,
	) -> Vec<(EntityId, DeferredMutation)> {
		let ready = self
			.entries
			.keys()
			.filter(|id| !is_blocked(id))
			.cloned()
			.collect::<Vec<_>>();

		ready
			.into_iter()
			.filter_map(|id| self.entries.remove(&id).map(|entry| (id, entry)))
			.collect()
	}
}

impl ScopeEngine {
	/// Applies a push event, deferring the parts that target blocked ids.
	#[instrument(skip_all, fields(scope = %self.scope, version = ?event.version))]
	pub fn on_remote_event(&mut self, event: RemoteEvent) {
		let RemoteEvent {
			scope,
			kind,
			version,
			origin_connection_id,
			origin_user_id,
		} = event;

		if scope != self.scope {
			warn!(event_scope = %scope, "Dropping event addressed to another scope;");
			return;
		}

		if self
			.session
			.originated(origin_connection_id.as_deref(), origin_user_id.as_deref())
		{
			trace!("Dropping echo of our own change;");
			return;
		}

		if let (Some(incoming), Some(current)) = (&version, &self.store.read().version) {
			if incoming.is_dominated_by(current) {
				debug!(%current, "Dropping stale event;");
				return;
			}
		}

		match kind {
			RemoteEventKind::RangeChanged { range } => {
				self.store.replace(|state| {
					state.set_window(range);
					state.advance_version(version.as_ref());
				});
			}

			RemoteEventKind::Upsert {
				activities,
				resources,
			} => {
				for activity in &activities {
					self.observe_version(&activity.id, activity.row_version.as_ref());
				}

				let mut upserts = Vec::with_capacity(activities.len());
				for activity in activities {
					if self.is_blocked(&activity.id) {
						trace!(id = %activity.id, "Deferring remote upsert;");
						self.deferred.park(
							activity.id.clone(),
							DeferredChange::Upsert(activity),
							version.clone(),
						);
					} else {
						upserts.push(activity);
					}
				}

				self.merge(upserts, vec![], resources, version.as_ref());
			}

			RemoteEventKind::Delete { delete_ids } => {
				let mut deletes = Vec::with_capacity(delete_ids.len());
				for id in delete_ids {
					if self.is_blocked(&id) {
						trace!(%id, "Deferring remote delete;");
						self.deferred
							.park(id, DeferredChange::Delete, version.clone());
					} else {
						deletes.push(id);
					}
				}

				self.merge(vec![], deletes, vec![], version.as_ref());
			}
		}
	}

	/// Applies every deferred change whose id is no longer blocked, exactly once. Upserts carry
	/// the dominant of their own row version and the one we have since observed for the id.
	#[instrument(skip_all, fields(scope = %self.scope, deferred = self.deferred.len()))]
	pub(crate) fn drain_deferred(&mut self) {
		let (pending, in_flight) = (&self.pending, &self.in_flight);
		let ready = self
			.deferred
			.take_unblocked(|id| pending.contains(id) || in_flight.contains(id));

		if ready.is_empty() {
			return;
		}

		let mut upserts = vec![];
		let mut deletes = vec![];
		let mut version = None;

		for (id, DeferredMutation { change, version: deferred_version }) in ready {
			let known = self.known_versions.get(&id);

			version = dominant(version.as_ref(), deferred_version.as_ref()).cloned();

			match change {
				DeferredChange::Upsert(mut activity) => {
					activity.row_version = dominant_of([activity.row_version.as_ref(), known]).cloned();
					upserts.push(activity);
				}
				DeferredChange::Delete => deletes.push(id),
			}
		}

		debug!(
			upserts = upserts.len(),
			deletes = deletes.len(),
			"Applying deferred remote changes;"
		);

		self.merge(upserts, deletes, vec![], version.as_ref());
	}
}

#[cfg(test)]
mod tests {
	use rp_sync::{Entity, ScopeId, TimeWindow};

	use std::collections::BTreeSet;

	use crate::{
		api::BatchResponse,
		engine::{
			tests::{activity, at, engine, submitted},
			Effect,
		},
	};

	use super::*;

	fn scope() -> ScopeId {
		ScopeId::from("base")
	}

	fn token(s: &str) -> Option<VersionToken> {
		Some(VersionToken::from(s))
	}

	#[test]
	fn stale_event_is_discarded() {
		let mut engine = engine("base");
		engine.on_remote_event(RemoteEvent::upsert(
			scope(),
			vec![],
			token("2024-01-01T00:00:00.000Z"),
		));

		engine.on_remote_event(RemoteEvent::upsert(
			scope(),
			vec![activity("A1", "late")],
			token("2023-12-31T00:00:00.000Z"),
		));

		assert!(engine.state().activities.is_empty());
		assert_eq!(engine.state().version, token("2024-01-01T00:00:00.000Z"));
	}

	#[test]
	fn own_echo_is_discarded() {
		let mut engine = engine("base");

		engine.on_remote_event(
			RemoteEvent::upsert(scope(), vec![activity("A1", "echo")], token("v1"))
				.from_connection("conn-local"),
		);
		engine.on_remote_event(
			RemoteEvent::upsert(scope(), vec![activity("A2", "echo")], token("v1"))
				.from_user("planner-local"),
		);
		assert!(engine.state().activities.is_empty());

		engine.on_remote_event(
			RemoteEvent::upsert(scope(), vec![activity("A3", "colleague")], token("v2"))
				.from_connection("conn-other")
				.from_user("planner-local"),
		);
		assert!(engine.state().activities.contains_key("A3"));
	}

	#[test]
	fn blocked_id_is_deferred_then_applied_once_with_dominant_version() {
		let mut engine = engine("base");

		let effects = engine.enqueue(vec![activity("A1", "local")], vec![]);
		let batch = submitted(&effects)[0].clone();

		engine.on_remote_event(RemoteEvent::upsert(
			scope(),
			vec![activity("A1", "remote first")],
			token("v3"),
		));
		engine.on_remote_event(RemoteEvent::upsert(
			scope(),
			vec![activity("A1", "remote second")],
			token("v5"),
		));

		assert_eq!(engine.state().activities["A1"].attributes["note"], "local");
		assert_eq!(engine.deferred().len(), 1);
		assert_eq!(
			engine.deferred().get("A1").map(|entry| entry.version.clone()),
			Some(token("v5"))
		);

		let _ = engine.on_batch_settled(
			batch.correlation_id,
			Ok(BatchResponse {
				upserts: vec![],
				deleted_ids: vec![],
				version: token("v2"),
			}),
		);

		assert!(engine.deferred().is_empty());
		assert_eq!(
			engine.state().activities["A1"].attributes["note"],
			"remote second"
		);
		assert_eq!(engine.state().version, token("v5"));
	}

	#[test]
	fn deferred_delete_is_applied_once_after_our_commit() {
		let mut engine = engine("base");

		let effects = engine.enqueue(vec![activity("A1", "local")], vec![]);
		let batch = submitted(&effects)[0].clone();

		engine.on_remote_event(RemoteEvent::delete(
			scope(),
			vec!["A1".to_string()],
			token("v3"),
		));
		assert_eq!(engine.deferred().len(), 1);

		let _ = engine.on_batch_settled(
			batch.correlation_id,
			Ok(BatchResponse {
				upserts: vec![activity("A1", "local").with_row_version("v4")],
				deleted_ids: vec![],
				version: token("v4"),
			}),
		);

		assert!(engine.deferred().is_empty());
		assert!(!engine.state().activities.contains_key("A1"));
		assert_eq!(engine.state().version, token("v4"));

		// Nothing is left to replay once the id is edited and committed again
		let effects = engine.enqueue(vec![activity("A1", "recreated")], vec![]);
		let batch = submitted(&effects)[0].clone();
		let _ = engine.on_batch_settled(batch.correlation_id, Ok(BatchResponse::default()));

		assert_eq!(
			engine.state().activities["A1"].attributes["note"],
			"recreated"
		);
	}

	#[test]
	fn deferred_upsert_keeps_the_dominant_row_version() {
		let mut engine = engine("base");

		let effects = engine.enqueue(vec![activity("A1", "local")], vec![]);
		let batch = submitted(&effects)[0].clone();

		engine.on_remote_event(RemoteEvent::upsert(
			scope(),
			vec![activity("A1", "remote").with_row_version("v3")],
			token("v3"),
		));

		let _ = engine.on_batch_settled(
			batch.correlation_id,
			Ok(BatchResponse {
				upserts: vec![activity("A1", "local").with_row_version("v4")],
				deleted_ids: vec![],
				version: token("v4"),
			}),
		);

		let applied = &engine.state().activities["A1"];
		assert_eq!(applied.attributes["note"], "remote");
		assert_eq!(applied.row_version, token("v4"));
	}

	#[test]
	fn deferred_stays_while_id_is_queued_again() {
		let mut engine = engine("base");

		let effects = engine.enqueue(vec![activity("A1", "local")], vec![]);
		let batch = submitted(&effects)[0].clone();

		engine.on_remote_event(RemoteEvent::delete(
			scope(),
			vec!["A1".to_string()],
			token("v3"),
		));
		let _ = engine.enqueue(vec![activity("A1", "local again")], vec![]);

		let effects = engine.on_batch_settled(
			batch.correlation_id,
			Ok(BatchResponse::default()),
		);

		// Still blocked: the follow-up batch for A1 is now in flight
		assert_eq!(submitted(&effects).len(), 1);
		assert_eq!(engine.deferred().len(), 1);
		assert_eq!(
			engine.state().activities["A1"].attributes["note"],
			"local again"
		);
	}

	#[test]
	fn remote_upsert_outside_viewport() {
		let mut engine = engine("base");
		let outside = || Activity::new("A1", at(23), None);

		engine.on_remote_event(RemoteEvent::upsert(scope(), vec![outside()], token("v1")));
		assert!(!engine.state().activities.contains_key("A1"));

		engine.on_remote_event(RemoteEvent::upsert(
			scope(),
			vec![activity("A1", "visible")],
			token("v2"),
		));
		assert!(engine.state().activities.contains_key("A1"));

		// The cached copy is cleaned up once it moves away
		engine.on_remote_event(RemoteEvent::upsert(scope(), vec![outside()], token("v3")));
		assert!(!engine.state().activities.contains_key("A1"));
		assert_eq!(engine.state().version, token("v3"));
	}

	#[test]
	fn cached_id_moved_out_of_viewport_is_removed() {
		let mut engine = engine("base");
		let Effect::Refresh { generation, .. } = engine.set_viewport(
			TimeWindow::new(at(0), at(23)),
			Some(BTreeSet::from(["R1".to_string()])),
		) else {
			panic!("refresh effect expected");
		};

		let _ = engine.on_refresh_loaded(
			generation,
			Ok(vec![Entity::Activity(
				activity("A1", "mine").with_participant("R1"),
			)]),
		);
		assert!(engine.state().activities.contains_key("A1"));

		engine.on_remote_event(RemoteEvent::upsert(
			scope(),
			vec![activity("A1", "reassigned").with_participant("R2")],
			token("v1"),
		));
		assert!(!engine.state().activities.contains_key("A1"));
	}

	#[test]
	fn locally_edited_id_follows_remote_changes_anywhere() {
		let mut engine = engine("base");

		let effects = engine.enqueue(vec![activity("A1", "local")], vec![]);
		let batch = submitted(&effects)[0].clone();
		let _ = engine.on_batch_settled(batch.correlation_id, Ok(BatchResponse::default()));

		engine.on_remote_event(RemoteEvent::upsert(
			scope(),
			vec![Activity::new("A1", at(23), None)],
			token("v1"),
		));
		assert_eq!(engine.state().activities["A1"].start, at(23));
	}

	#[test]
	fn range_change_moves_window_without_filtering() {
		let mut engine = engine("base");

		engine.on_remote_event(RemoteEvent::range_changed(
			scope(),
			TimeWindow::new(at(12), at(6)),
			token("v1"),
		));

		let window = engine.state().window;
		assert_eq!(window.start(), at(12));
		assert!(window.end() > window.start());
		assert_eq!(engine.state().version, token("v1"));

		engine.on_remote_event(RemoteEvent::range_changed(
			scope(),
			TimeWindow::new(at(1), at(2)),
			token("v0"),
		));
		assert_eq!(engine.state().window.start(), at(12));
	}

	#[test]
	fn parked_entries_merge_versions() {
		let mut deferred = DeferredRemoteMutationSet::default();

		deferred.park("A1".to_string(), DeferredChange::Delete, token("v4"));
		deferred.park(
			"A1".to_string(),
			DeferredChange::Upsert(activity("A1", "newer payload")),
			token("v2"),
		);

		let entry = deferred.get("A1").expect("entry parked");
		assert_eq!(entry.version, token("v4"));
		assert!(matches!(entry.change, DeferredChange::Upsert(_)));

		let ready = deferred.take_unblocked(|id| id == "A1");
		assert!(ready.is_empty());
		assert_eq!(deferred.take_unblocked(|_| false).len(), 1);
		assert!(deferred.is_empty());
	}
}
