//! Fatal error kinds that stop a run before or instead of the loop.
//!
//! These travel through `anyhow` and are recovered with `downcast_ref` where
//! the exit code is chosen. Everything else that can go wrong during a run is
//! recorded and logged, not raised.

use thiserror::Error;

use crate::exit_codes;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Missing task source, bad iteration budget, or invalid config file.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Container runtime missing or its daemon unreachable.
    #[error("isolation unavailable: {0}")]
    IsolationUnavailable(String),

    /// The sandbox image could not be built.
    #[error("sandbox provisioning failed: {0}")]
    ProvisioningFailed(String),
}

impl SupervisorError {
    pub fn exit_code(&self) -> i32 {
        match self {
            SupervisorError::Configuration(_) => exit_codes::CONFIG,
            SupervisorError::IsolationUnavailable(_) | SupervisorError::ProvisioningFailed(_) => {
                exit_codes::ISOLATION
            }
        }
    }
}

/// Exit code for any error surfaced to `main`.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<SupervisorError>()
        .map_or(exit_codes::INVALID, SupervisorError::exit_code)
}

#[cfg(test)]
mod tests {
    use anyhow::{Context, anyhow};

    use super::*;

    #[test]
    fn typed_errors_survive_context() {
        let err = Err::<(), _>(SupervisorError::ProvisioningFailed("build".to_string()))
            .context("ensure isolation")
            .unwrap_err();
        assert_eq!(exit_code_for(&err), exit_codes::ISOLATION);
    }

    #[test]
    fn untyped_errors_are_invalid() {
        assert_eq!(exit_code_for(&anyhow!("boom")), exit_codes::INVALID);
    }
}
