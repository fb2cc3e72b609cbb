#![allow(dead_code)]

pub mod mock_api;

use rp_stage_sync::{
	rp_sync::{Activity, ScopeId, TimeWindow},
	Manager, MutationApi, PushChannel, SessionIdentity, StageSnapshot, SyncConfig, SyncEvent,
	Viewport,
};

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tokio::{
	sync::{broadcast, watch},
	time::timeout,
};

use mock_api::MockServer;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn at(hour: u32) -> DateTime<Utc> {
	Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0)
		.single()
		.expect("valid test instant")
}

pub fn viewport() -> Viewport {
	Viewport::new(TimeWindow::new(at(0), at(23)))
}

pub fn activity(id: &str, note: &str) -> Activity {
	let mut activity = Activity::new(id, at(8), Some(at(9))).with_participant("R1");
	activity.attributes.insert("note".to_string(), json!(note));
	activity
}

pub fn manager(server: &Arc<MockServer>) -> (Manager, broadcast::Receiver<SyncEvent>) {
	Manager::new(
		Arc::clone(server) as Arc<dyn MutationApi>,
		Arc::clone(server) as Arc<dyn PushChannel>,
		SyncConfig::default(),
		SessionIdentity::new("conn-local", "planner-local"),
	)
}

pub async fn next_event(rx: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
	timeout(TIMEOUT, rx.recv())
		.await
		.expect("timed out waiting for a sync event")
		.expect("sync event channel closed")
}

/// Waits until the published stage satisfies `f`.
pub async fn published(
	rx: &mut watch::Receiver<StageSnapshot>,
	f: impl FnMut(&StageSnapshot) -> bool,
) {
	timeout(TIMEOUT, rx.wait_for(f))
		.await
		.expect("timed out waiting for the stage")
		.expect("stage publisher dropped");
}

pub fn scope(name: &str) -> ScopeId {
	ScopeId::from(name)
}
