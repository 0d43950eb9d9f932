//! nettx validation
//!
//! Syntax, semantic and invariant validation for projected interface state

pub mod invariant;
pub mod semantic;
pub mod syntax;

pub use invariant::InvariantChecker;
pub use semantic::SemanticValidator;
pub use syntax::SyntaxValidator;

use nettx_core::error::ValidationError;
use nettx_core::{Interface, InvariantSet, NetError, NetworkState};

/// Comprehensive state validator
pub struct StateValidator {
    syntax_validator: SyntaxValidator,
    semantic_validator: SemanticValidator,
    invariant_checker: InvariantChecker,
}

impl StateValidator {
    pub fn new() -> Self {
        Self {
            syntax_validator: SyntaxValidator::new(),
            semantic_validator: SemanticValidator::new(),
            invariant_checker: InvariantChecker::new(),
        }
    }

    /// Validate a projected state: syntax first, semantics only if syntax holds
    pub fn validate_state(&self, state: &NetworkState) -> Result<(), NetError> {
        let mut errors = Vec::new();

        if let Err(e) = self.syntax_validator.validate_state(state) {
            errors.push(format!("syntax validation failed: {}", e));
        }

        if errors.is_empty() {
            if let Err(e) = self.semantic_validator.validate_state(state) {
                errors.push(format!("semantic validation failed: {}", e));
            }
        }

        if !errors.is_empty() {
            return Err(NetError::Validation(ValidationError::State {
                message: errors.join("; "),
            }));
        }

        log::debug!("state validation passed ({} interfaces)", state.len());
        Ok(())
    }

    /// Check declared invariants against pre- and post-commit states
    pub fn check_invariants(
        &self,
        pre: &NetworkState,
        post: &NetworkState,
        invariants: &InvariantSet,
    ) -> Result<(), NetError> {
        self.invariant_checker.check(pre, post, invariants)
    }

    /// Validate an individual interface
    pub fn validate_interface(&self, interface: &Interface) -> Result<(), NetError> {
        self.syntax_validator.validate_interface(interface)
    }
}

impl Default for StateValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nettx_core::{InterfaceConfig, InterfaceKind};

    #[test]
    fn test_empty_state_passes() {
        let validator = StateValidator::new();
        assert!(validator.validate_state(&NetworkState::new()).is_ok());
    }

    #[test]
    fn test_semantic_errors_surface_through_validator() {
        let validator = StateValidator::new();
        let mut state = NetworkState::new();
        state.insert(
            InterfaceConfig::new(
                "br0",
                InterfaceKind::Bridge {
                    ports: vec!["missing0".to_string()],
                },
            )
            .build(),
        );

        let err = validator.validate_state(&state).unwrap_err();
        assert!(err.to_string().contains("semantic validation failed"));
    }
}
