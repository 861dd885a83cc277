//! Execution lifecycle status

use serde::{Deserialize, Serialize};

/// Status of a job execution. The lowercase strings are part of the wire
/// contract and the persisted representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn parse(token: &str) -> crate::Result<ExecutionStatus> {
        match token.trim().to_lowercase().as_str() {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(crate::Error::InvalidStatus(format!(
                "unknown execution status {other:?}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
        }
    }

    /// Terminal statuses are write-once.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Succeeded | ExecutionStatus::Failed)
    }

    /// Validate a status transition. The sequence of observed statuses for
    /// any execution must be a prefix of `pending, running, terminal`.
    pub fn can_transition_to(&self, to: ExecutionStatus) -> bool {
        use ExecutionStatus::*;

        matches!((self, to), (Pending, Running) | (Running, Succeeded | Failed))
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_strings() {
        for (status, s) in [
            (ExecutionStatus::Pending, "pending"),
            (ExecutionStatus::Running, "running"),
            (ExecutionStatus::Succeeded, "succeeded"),
            (ExecutionStatus::Failed, "failed"),
        ] {
            assert_eq!(status.as_str(), s);
            assert_eq!(ExecutionStatus::parse(s).unwrap(), status);
        }
        assert!(ExecutionStatus::parse("cancelled").is_err());
    }

    #[test]
    fn test_monotonic_transitions() {
        use ExecutionStatus::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal() {
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
    }
}
