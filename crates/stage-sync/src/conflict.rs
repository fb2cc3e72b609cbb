//! Bounded resubmission of batches the server refused with version conflicts.

use rp_sync::{EntityId, VersionToken};

use std::collections::HashMap;

use tracing::debug;

use crate::VersionConflict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
	/// Hints were recorded, resubmit as attempt number `attempt`.
	Retry { attempt: u8 },
	/// Not recoverable by resubmitting.
	GiveUp,
}

#[derive(Debug)]
pub struct ConflictRetryController {
	max_attempts: u8,
	attempts: u8,
	hints: HashMap<EntityId, VersionToken>,
}

impl ConflictRetryController {
	#[must_use]
	pub fn new(max_attempts: u8) -> Self {
		Self {
			max_attempts,
			attempts: 0,
			hints: HashMap::new(),
		}
	}

	#[must_use]
	pub const fn attempts(&self) -> u8 {
		self.attempts
	}

	#[must_use]
	pub fn hint(&self, id: &str) -> Option<&VersionToken> {
		self.hints.get(id)
	}

	/// Retries only when every conflicting id reports the server's current version and the
	/// attempt budget isn't exhausted.
	pub fn evaluate(&mut self, conflicts: &[VersionConflict]) -> RetryDecision {
		if conflicts.is_empty()
			|| self.attempts >= self.max_attempts
			|| conflicts.iter().any(|conflict| conflict.current.is_none())
		{
			debug!(
				attempts = self.attempts,
				conflicts = conflicts.len(),
				"Version conflict is not retryable;"
			);
			return RetryDecision::GiveUp;
		}

		for VersionConflict { id, current, .. } in conflicts {
			if let Some(current) = current {
				self.hints.insert(id.clone(), current.clone());
			}
		}

		self.attempts += 1;

		RetryDecision::Retry {
			attempt: self.attempts,
		}
	}

	/// Forget attempts and hints; called after a batch settles for good.
	pub fn reset(&mut self) {
		self.attempts = 0;
		self.hints.clear();
	}
}
