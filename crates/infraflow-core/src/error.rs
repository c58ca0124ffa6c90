//! Engine error types

use infraflow_cloud::CloudError;
use thiserror::Error;

/// Failure of a single graph task
#[derive(Debug)]
pub struct TaskFailure {
    pub task: String,
    pub error: FlowError,
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.task, self.error)
    }
}

/// Engine errors
#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("State error: {0}")]
    State(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Persistence error: {0}")]
    Persist(String),

    #[error("Refusing to delete without authorization: {0}")]
    ProtectedDeletion(String),

    #[error("Task {task} exceeded its timeout of {timeout:?}")]
    TaskTimeout {
        task: String,
        timeout: std::time::Duration,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Flow {flow} failed: {}", format_failures(.failures))]
    Flow {
        flow: String,
        failures: Vec<TaskFailure>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl FlowError {
    /// Leaf errors, looking through aggregated flow failures
    pub fn causes(&self) -> Vec<&FlowError> {
        match self {
            FlowError::Flow { failures, .. } => {
                failures.iter().flat_map(|f| f.error.causes()).collect()
            }
            other => vec![other],
        }
    }

    pub fn is_protected_deletion(&self) -> bool {
        self.causes()
            .iter()
            .any(|e| matches!(e, FlowError::ProtectedDeletion(_)))
    }

    /// Whether a deadline expired, either a task timeout or a provider wait
    pub fn is_timeout(&self) -> bool {
        self.causes().iter().any(|e| match e {
            FlowError::TaskTimeout { .. } => true,
            FlowError::Cloud(c) => c.is_timeout(),
            _ => false,
        })
    }

    /// Whether running the whole pass again may succeed
    ///
    /// Configuration problems, refused deletions and ambiguous provider
    /// results need a human; timeouts and transient provider errors do not.
    pub fn is_retryable(&self) -> bool {
        let causes = self.causes();
        let terminal = causes.iter().any(|e| match e {
            FlowError::Config(_)
            | FlowError::ProtectedDeletion(_)
            | FlowError::State(_)
            | FlowError::Migration(_) => true,
            FlowError::Cloud(CloudError::Ambiguous(_) | CloudError::InvalidConfig(_)) => true,
            _ => false,
        });
        !terminal
            && causes.iter().any(|e| match e {
                FlowError::TaskTimeout { .. } | FlowError::Persist(_) | FlowError::Io(_) => true,
                FlowError::Cloud(c) => c.is_timeout() || c.is_retryable(),
                _ => false,
            })
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn flow(errors: Vec<FlowError>) -> FlowError {
        FlowError::Flow {
            flow: "reconcile".into(),
            failures: errors
                .into_iter()
                .enumerate()
                .map(|(i, error)| TaskFailure {
                    task: format!("task-{}", i),
                    error,
                })
                .collect(),
        }
    }

    #[test]
    fn test_classifiers_look_through_aggregates() {
        let err = flow(vec![
            FlowError::Cloud(CloudError::api("Throttling", "slow down")),
            FlowError::ProtectedDeletion("vsw-1".into()),
        ]);
        assert!(err.is_protected_deletion());
        assert!(!err.is_retryable());

        let err = flow(vec![FlowError::TaskTimeout {
            task: "ensure-vpc".into(),
            timeout: Duration::from_secs(120),
        }]);
        assert!(err.is_timeout());
        assert!(err.is_retryable());

        let err = flow(vec![FlowError::Cloud(CloudError::Timeout("eip".into()))]);
        assert!(err.is_timeout());
    }

    #[test]
    fn test_ambiguous_is_terminal() {
        let err = flow(vec![
            FlowError::Cloud(CloudError::Ambiguous("two NAT gateways".into())),
            FlowError::Cloud(CloudError::api("Throttling", "slow down")),
        ]);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_lists_failures() {
        let err = flow(vec![FlowError::Config("no zones".into())]);
        assert_eq!(
            err.to_string(),
            "Flow reconcile failed: task-0: Invalid configuration: no zones"
        );
    }
}
