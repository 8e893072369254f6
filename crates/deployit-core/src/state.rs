//! Deployment lifecycle: persisted service states, executor task statuses
//! and the operations that move a service between them.

use serde::{Deserialize, Serialize};

/// Persisted state of a deployed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceDeploymentState {
    Deploying,
    DeploySuccess,
    DeployFailed,
    Destroying,
    DestroySuccess,
    DestroyFailed,
    Modifying,
    ModificationSuccessful,
    ModificationFailed,
    RollingBack,
    RollbackFailed,
    ManualCleanupRequired,
}

/// States from which no further automatic transition occurs.
///
/// The orchestrator and the status poller both read this table.
pub const TERMINAL_STATES: [ServiceDeploymentState; 8] = [
    ServiceDeploymentState::DeployFailed,
    ServiceDeploymentState::DeploySuccess,
    ServiceDeploymentState::DestroyFailed,
    ServiceDeploymentState::DestroySuccess,
    ServiceDeploymentState::ModificationFailed,
    ServiceDeploymentState::ModificationSuccessful,
    ServiceDeploymentState::RollbackFailed,
    ServiceDeploymentState::ManualCleanupRequired,
];

impl ServiceDeploymentState {
    pub fn is_terminal(self) -> bool {
        TERMINAL_STATES.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceDeploymentState::Deploying => "DEPLOYING",
            ServiceDeploymentState::DeploySuccess => "DEPLOY_SUCCESS",
            ServiceDeploymentState::DeployFailed => "DEPLOY_FAILED",
            ServiceDeploymentState::Destroying => "DESTROYING",
            ServiceDeploymentState::DestroySuccess => "DESTROY_SUCCESS",
            ServiceDeploymentState::DestroyFailed => "DESTROY_FAILED",
            ServiceDeploymentState::Modifying => "MODIFYING",
            ServiceDeploymentState::ModificationSuccessful => "MODIFICATION_SUCCESSFUL",
            ServiceDeploymentState::ModificationFailed => "MODIFICATION_FAILED",
            ServiceDeploymentState::RollingBack => "ROLLING_BACK",
            ServiceDeploymentState::RollbackFailed => "ROLLBACK_FAILED",
            ServiceDeploymentState::ManualCleanupRequired => "MANUAL_CLEANUP_REQUIRED",
        }
    }
}

impl std::fmt::Display for ServiceDeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceDeploymentState {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let state = match s {
            "DEPLOYING" => ServiceDeploymentState::Deploying,
            "DEPLOY_SUCCESS" => ServiceDeploymentState::DeploySuccess,
            "DEPLOY_FAILED" => ServiceDeploymentState::DeployFailed,
            "DESTROYING" => ServiceDeploymentState::Destroying,
            "DESTROY_SUCCESS" => ServiceDeploymentState::DestroySuccess,
            "DESTROY_FAILED" => ServiceDeploymentState::DestroyFailed,
            "MODIFYING" => ServiceDeploymentState::Modifying,
            "MODIFICATION_SUCCESSFUL" => ServiceDeploymentState::ModificationSuccessful,
            "MODIFICATION_FAILED" => ServiceDeploymentState::ModificationFailed,
            "ROLLING_BACK" => ServiceDeploymentState::RollingBack,
            "ROLLBACK_FAILED" => ServiceDeploymentState::RollbackFailed,
            "MANUAL_CLEANUP_REQUIRED" => ServiceDeploymentState::ManualCleanupRequired,
            other => {
                return Err(crate::Error::InvalidInput(format!(
                    "unknown deployment state: {other}"
                )));
            }
        };
        Ok(state)
    }
}

/// Outcome reported by a deployer for one executor invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeployerTaskStatus {
    Init,
    DeploySuccess,
    DeployFailed,
    DestroySuccess,
    DestroyFailed,
}

impl DeployerTaskStatus {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            DeployerTaskStatus::DeploySuccess | DeployerTaskStatus::DestroySuccess
        )
    }

    /// Status for a finished deploy-path or destroy-path invocation.
    pub fn finished(destroy_path: bool, success: bool) -> Self {
        match (destroy_path, success) {
            (false, true) => DeployerTaskStatus::DeploySuccess,
            (false, false) => DeployerTaskStatus::DeployFailed,
            (true, true) => DeployerTaskStatus::DestroySuccess,
            (true, false) => DeployerTaskStatus::DestroyFailed,
        }
    }
}

impl std::fmt::Display for DeployerTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployerTaskStatus::Init => write!(f, "INIT"),
            DeployerTaskStatus::DeploySuccess => write!(f, "DEPLOY_SUCCESS"),
            DeployerTaskStatus::DeployFailed => write!(f, "DEPLOY_FAILED"),
            DeployerTaskStatus::DestroySuccess => write!(f, "DESTROY_SUCCESS"),
            DeployerTaskStatus::DestroyFailed => write!(f, "DESTROY_FAILED"),
        }
    }
}

/// A caller-initiated operation on a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Deploy,
    Retry,
    Modify,
    Destroy,
    Rollback,
    Purge,
}

impl Operation {
    /// State persisted when the operation starts.
    pub fn initial_state(self) -> ServiceDeploymentState {
        match self {
            Operation::Deploy | Operation::Retry => ServiceDeploymentState::Deploying,
            Operation::Modify => ServiceDeploymentState::Modifying,
            Operation::Destroy | Operation::Purge => ServiceDeploymentState::Destroying,
            Operation::Rollback => ServiceDeploymentState::RollingBack,
        }
    }

    /// Whether the operation runs the deployer's destroy path.
    pub fn uses_destroy_path(self) -> bool {
        matches!(
            self,
            Operation::Destroy | Operation::Rollback | Operation::Purge
        )
    }

    /// Generic state written first after execution. Only the path taken and
    /// the success flag matter here, so a deploy can never land in a destroy
    /// state and vice versa.
    pub fn generic_state(self, success: bool) -> ServiceDeploymentState {
        match (self.uses_destroy_path(), success) {
            (false, true) => ServiceDeploymentState::DeploySuccess,
            (false, false) => ServiceDeploymentState::DeployFailed,
            (true, true) => ServiceDeploymentState::DestroySuccess,
            (true, false) => ServiceDeploymentState::DestroyFailed,
        }
    }

    /// Rewrites a generic state into the operation-specific terminal state.
    pub fn settle(self, generic: ServiceDeploymentState) -> ServiceDeploymentState {
        use ServiceDeploymentState as S;
        match (self, generic) {
            (Operation::Modify, S::DeploySuccess) => S::ModificationSuccessful,
            (Operation::Modify, S::DeployFailed) => S::ModificationFailed,
            (Operation::Rollback, S::DestroySuccess) => S::DeployFailed,
            (Operation::Rollback, S::DestroyFailed) => S::RollbackFailed,
            (Operation::Purge, S::DestroyFailed) => S::ManualCleanupRequired,
            (_, other) => other,
        }
    }

    /// Whether the operation may start from the service's current state.
    /// `None` means the service has never been deployed.
    pub fn is_allowed_from(self, current: Option<ServiceDeploymentState>) -> bool {
        use ServiceDeploymentState as S;
        let Some(current) = current else {
            return self == Operation::Deploy;
        };
        match self {
            Operation::Deploy => current == S::DestroySuccess,
            Operation::Modify => matches!(
                current,
                S::DeploySuccess | S::ModificationSuccessful | S::ModificationFailed
            ),
            Operation::Destroy => matches!(
                current,
                S::DeploySuccess
                    | S::ModificationSuccessful
                    | S::ModificationFailed
                    | S::DestroyFailed
            ),
            Operation::Retry => matches!(current, S::DeployFailed | S::RollbackFailed),
            Operation::Rollback => current == S::DeployFailed,
            Operation::Purge => matches!(
                current,
                S::DestroySuccess
                    | S::DeployFailed
                    | S::RollbackFailed
                    | S::DestroyFailed
                    | S::ManualCleanupRequired
            ),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Deploy => write!(f, "deploy"),
            Operation::Retry => write!(f, "retry"),
            Operation::Modify => write!(f, "modify"),
            Operation::Destroy => write!(f, "destroy"),
            Operation::Rollback => write!(f, "rollback"),
            Operation::Purge => write!(f, "purge"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ServiceDeploymentState as S;

    #[test]
    fn test_terminal_set_has_eight_members() {
        assert_eq!(TERMINAL_STATES.len(), 8);
        let terminal: Vec<_> = [
            S::Deploying,
            S::DeploySuccess,
            S::DeployFailed,
            S::Destroying,
            S::DestroySuccess,
            S::DestroyFailed,
            S::Modifying,
            S::ModificationSuccessful,
            S::ModificationFailed,
            S::RollingBack,
            S::RollbackFailed,
            S::ManualCleanupRequired,
        ]
        .into_iter()
        .filter(|s| s.is_terminal())
        .collect();
        assert_eq!(terminal.len(), 8);
        assert!(!S::Deploying.is_terminal());
        assert!(!S::RollingBack.is_terminal());
    }

    #[test]
    fn test_initial_states() {
        assert_eq!(Operation::Deploy.initial_state(), S::Deploying);
        assert_eq!(Operation::Destroy.initial_state(), S::Destroying);
        assert_eq!(Operation::Modify.initial_state(), S::Modifying);
        assert_eq!(Operation::Rollback.initial_state(), S::RollingBack);
    }

    #[test]
    fn test_deploy_reaches_only_deploy_states() {
        assert_eq!(Operation::Deploy.generic_state(true), S::DeploySuccess);
        assert_eq!(Operation::Deploy.generic_state(false), S::DeployFailed);
        assert_eq!(Operation::Deploy.settle(S::DeployFailed), S::DeployFailed);
    }

    #[test]
    fn test_modify_failure_is_disambiguated() {
        let generic = Operation::Modify.generic_state(false);
        assert_eq!(generic, S::DeployFailed);
        assert_eq!(Operation::Modify.settle(generic), S::ModificationFailed);
        assert_eq!(
            Operation::Modify.settle(Operation::Modify.generic_state(true)),
            S::ModificationSuccessful
        );
    }

    #[test]
    fn test_rollback_and_purge_settle() {
        assert_eq!(Operation::Rollback.settle(S::DestroySuccess), S::DeployFailed);
        assert_eq!(Operation::Rollback.settle(S::DestroyFailed), S::RollbackFailed);
        assert_eq!(Operation::Purge.settle(S::DestroySuccess), S::DestroySuccess);
        assert_eq!(
            Operation::Purge.settle(S::DestroyFailed),
            S::ManualCleanupRequired
        );
    }

    #[test]
    fn test_allowed_operations() {
        assert!(Operation::Deploy.is_allowed_from(None));
        assert!(!Operation::Destroy.is_allowed_from(None));
        assert!(Operation::Modify.is_allowed_from(Some(S::DeploySuccess)));
        assert!(!Operation::Modify.is_allowed_from(Some(S::Deploying)));
        assert!(Operation::Rollback.is_allowed_from(Some(S::DeployFailed)));
        assert!(!Operation::Rollback.is_allowed_from(Some(S::DestroyFailed)));
        assert!(Operation::Purge.is_allowed_from(Some(S::RollbackFailed)));
        assert!(Operation::Retry.is_allowed_from(Some(S::RollbackFailed)));
    }

    #[test]
    fn test_state_string_roundtrip() {
        for state in TERMINAL_STATES {
            let parsed: ServiceDeploymentState = state.as_str().parse().unwrap();
            assert_eq!(parsed, state);
        }
        assert!("BOGUS".parse::<ServiceDeploymentState>().is_err());
    }
}
