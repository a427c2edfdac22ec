//! Credential references
//!
//! Checkpoints only ever hold a [`CredentialRef`]; the secret itself lives in
//! the process environment or in the in-memory [`CredentialVault`].

use crate::workflow::StepFailure;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Serializable pointer to a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialRef {
    /// Secret read from an environment variable at resolve time
    Env { var: String },
    /// Secret registered in the process-local vault
    Vault { handle: String },
}

impl CredentialRef {
    pub fn env(var: impl Into<String>) -> Self {
        CredentialRef::Env { var: var.into() }
    }
}

/// Process-local secret holder for credentials submitted over the API
#[derive(Debug, Default)]
pub struct CredentialVault {
    secrets: RwLock<HashMap<String, String>>,
}

impl CredentialVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secret and get back a reference safe to checkpoint
    pub fn store(&self, secret: impl Into<String>) -> CredentialRef {
        let handle = format!("cred_{}", Uuid::new_v4().simple());
        self.secrets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(handle.clone(), secret.into());
        CredentialRef::Vault { handle }
    }

    /// Drop a registered secret once its run has finished
    pub fn forget(&self, credential: &CredentialRef) {
        if let CredentialRef::Vault { handle } = credential {
            self.secrets
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(handle);
        }
    }

    /// Resolve a reference to its secret.
    ///
    /// An unresolvable reference is an auth failure: vault handles do not
    /// survive a process restart, so a resumed API run cannot recover its token.
    pub fn resolve(&self, credential: &CredentialRef) -> Result<String, StepFailure> {
        match credential {
            CredentialRef::Env { var } => match std::env::var(var) {
                Ok(secret) if !secret.trim().is_empty() => Ok(secret),
                _ => Err(StepFailure::auth(format!(
                    "credential environment variable {var} is not set"
                ))),
            },
            CredentialRef::Vault { handle } => self
                .secrets
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get(handle)
                .cloned()
                .ok_or_else(|| StepFailure::auth(format!("credential {handle} is no longer available"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::FailureKind;

    #[test]
    fn test_vault_round_trip_and_forget() {
        let vault = CredentialVault::new();
        let credential = vault.store("ghp_secret");
        assert_eq!(vault.resolve(&credential).unwrap(), "ghp_secret");

        vault.forget(&credential);
        let err = vault.resolve(&credential).unwrap_err();
        assert_eq!(err.kind, FailureKind::Auth);
    }

    #[test]
    fn test_missing_env_var_is_auth_failure() {
        let vault = CredentialVault::new();
        let err = vault
            .resolve(&CredentialRef::env("PATCHPILOT_TEST_SURELY_UNSET_VAR"))
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Auth);
    }

    #[test]
    fn test_reference_serializes_without_secret() {
        let vault = CredentialVault::new();
        let credential = vault.store("ghp_secret");
        let json = serde_json::to_string(&credential).unwrap();
        assert!(json.contains("\"kind\":\"vault\""));
        assert!(!json.contains("ghp_secret"));
    }
}
