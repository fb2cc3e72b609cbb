#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Optimistic, conflict-aware synchronization of planning stages.
//!
//! Local edits are applied to the in-memory stage immediately, collapsed per entity and sent to
//! the server in at most one batch per scope at a time. Push events from other sessions are
//! merged as long as they don't overwrite an entity we're still submitting; those are parked and
//! applied once our own change settled.

mod actor;
pub mod api;
mod config;
pub mod conflict;
mod engine;
mod error;
mod manager;
pub mod queue;
pub mod remote;
mod store;
pub mod viewport;

use rp_sync::{ScopeId, VersionToken};

pub use api::{
	BatchMutation, BatchResponse, ListQuery, MutationApi, PushChannel, ValidationIssue,
	ValidationResult,
};
pub use config::{SessionIdentity, SyncConfig};
pub use engine::{Effect, ScopeEngine, SyncPhase};
pub use error::{ApiError, ConfigIoError, Error, VersionConflict};
pub use manager::Manager;
pub use store::{StageSnapshot, StageState, StageStore};
pub use viewport::Viewport;

pub use rp_sync;

/// Outcomes broadcast to everyone subscribed through [`Manager::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
	/// A batch was accepted; the scope moved to `version` if the server reported one.
	Committed {
		scope: ScopeId,
		version: Option<VersionToken>,
	},
	/// A batch hit version conflicts and is being resubmitted.
	Retrying { scope: ScopeId, attempt: u8 },
	/// A batch failed for good. The scope is being re-read and `message` should reach the planner.
	ScopeError { scope: ScopeId, message: String },
}
