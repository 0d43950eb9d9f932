//! Invariant checking over pre- and post-commit projected states

use nettx_core::error::ValidationError;
use nettx_core::{InvariantSet, NetError, NetworkState};

/// Judges a projected post-commit state against declared invariants
pub struct InvariantChecker {}

impl InvariantChecker {
    pub fn new() -> Self {
        Self {}
    }

    /// Check all declared invariants against the projected state.
    ///
    /// The pre-state is only used to sharpen the failure reason: a commit
    /// that breaks a previously-holding invariant reports what the
    /// transaction would have destroyed.
    pub fn check(
        &self,
        pre: &NetworkState,
        post: &NetworkState,
        invariants: &InvariantSet,
    ) -> Result<(), NetError> {
        for invariant in invariants.iter() {
            if invariant.holds(post) {
                continue;
            }

            let reason = if invariant.holds(pre) {
                format!(
                    "commit would break it: {}",
                    invariant.explain(post)
                )
            } else {
                invariant.explain(post)
            };

            log::warn!("invariant {} violated: {}", invariant.name(), reason);

            return Err(NetError::Validation(ValidationError::InvariantViolated {
                invariant: invariant.name(),
                reason,
            }));
        }

        Ok(())
    }
}

impl Default for InvariantChecker {
    fn default() -> Self {
        Self::new()
    }
}
