//! Error types for the W&B infrastructure operator

use std::fmt;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors that can occur while reconciling infrastructure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorError {
    /// Kubernetes API error other than not-found
    KubeApi(String),
    /// Malformed parent spec (unparseable quantity, bad override)
    Configuration(String),
    /// Non-domain failure surfaced from a reconcile tick
    Reconciliation(String),
    /// Serialization error
    Serialization(String),
    /// Invalid resource state
    InvalidState(String),
}

impl OperatorError {
    /// Short machine-readable code used in log lines and events.
    pub fn code(&self) -> &'static str {
        match self {
            OperatorError::KubeApi(_) => "ApiError",
            OperatorError::Configuration(_) => "ConfigError",
            OperatorError::Reconciliation(_) => "CriticalError",
            OperatorError::Serialization(_) => "SerializationError",
            OperatorError::InvalidState(_) => "InvalidState",
        }
    }
}

impl fmt::Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorError::KubeApi(msg) => write!(f, "Kubernetes API error: {}", msg),
            OperatorError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            OperatorError::Reconciliation(msg) => write!(f, "Reconciliation error: {}", msg),
            OperatorError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            OperatorError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for OperatorError {}

impl From<kube::Error> for OperatorError {
    fn from(err: kube::Error) -> Self {
        OperatorError::KubeApi(err.to_string())
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::Serialization(err.to_string())
    }
}

/// True when a kube error is the API server's not-found response.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OperatorError::KubeApi("test error".to_string());
        assert!(err.to_string().contains("Kubernetes API error"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(OperatorError::KubeApi("x".into()).code(), "ApiError");
        assert_eq!(OperatorError::Configuration("x".into()).code(), "ConfigError");
        assert_eq!(OperatorError::Reconciliation("x".into()).code(), "CriticalError");
    }

    #[test]
    fn test_not_found_classification() {
        let not_found = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "secrets \"x\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert!(is_not_found(&not_found));

        let conflict = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "conflict".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        });
        assert!(!is_not_found(&conflict));
    }

    #[test]
    fn test_error_variants() {
        let errors = vec![
            OperatorError::KubeApi("api".to_string()),
            OperatorError::Configuration("config".to_string()),
            OperatorError::Reconciliation("reconcile".to_string()),
            OperatorError::Serialization("serde".to_string()),
            OperatorError::InvalidState("state".to_string()),
        ];

        for err in errors {
            let _ = format!("{}", err);
        }
    }
}
