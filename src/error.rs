//! Error types for the Strata operator
//!
//! Transient conditions inside the coordinator (unsatisfied dependencies,
//! saturated dispatch queues) are handled by its retry machinery and never
//! surface as errors; everything here degrades to "try again later" in the
//! reconcile loops.

use thiserror::Error;

/// Main error type for Strata operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for CRD specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Call against the managed database failed
    #[error("database operation error: {0}")]
    DatabaseOp(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a database operation error with the given message
    pub fn database_op(msg: impl Into<String>) -> Self {
        Self::DatabaseOp(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Propagation in Access Provisioning
    // ==========================================================================
    //
    // These tests demonstrate how errors flow through the system during
    // access-control provisioning. Each error type represents a different
    // failure category with specific handling requirements.

    /// Story: CRD validation catches misconfigurations before provisioning
    ///
    /// When a user creates an access object with invalid configuration,
    /// the validation layer catches it immediately with a clear error message.
    #[test]
    fn story_validation_prevents_invalid_access_objects() {
        // Scenario: Grant references no role
        let err = Error::validation("grant 'reporting-read' must reference a role");
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("must reference a role"));

        // Scenario: Object has neither clusterRef nor a derivable cluster name
        let err = Error::validation("cannot determine owning cluster for role 'admin'");
        assert!(err.to_string().contains("owning cluster"));

        match Error::validation("any message") {
            Error::Validation(msg) => assert_eq!(msg, "any message"),
            _ => panic!("Expected Validation variant"),
        }
    }

    /// Story: Database errors surface managed-database failures
    ///
    /// When a call into the managed database fails (connection refused,
    /// statement rejected), the error clearly indicates what failed. The
    /// coordinator retries these with a fixed delay and unbounded attempts.
    #[test]
    fn story_database_errors_during_provisioning() {
        // Scenario: Database not reachable yet
        let err = Error::database_op("CREATE ROLE failed: connection refused");
        assert!(err.to_string().contains("database operation error"));
        assert!(err.to_string().contains("connection refused"));

        // Scenario: Statement rejected
        let err = Error::database_op("GRANT failed: unknown privilege 'FLY'");
        assert!(err.to_string().contains("unknown privilege"));

        match Error::database_op("any database issue") {
            Error::DatabaseOp(msg) => assert_eq!(msg, "any database issue"),
            _ => panic!("Expected DatabaseOp variant"),
        }
    }

    /// Story: Errors are categorized for proper handling in controllers
    ///
    /// Different error types require different handling strategies in the
    /// reconciliation loop (retry, fail permanently, etc.).
    #[test]
    fn story_error_categorization_for_controller_handling() {
        fn categorize_error(err: &Error) -> &'static str {
            match err {
                Error::Validation(_) => "reject_and_fail", // User error, don't retry
                Error::DatabaseOp(_) => "retry_fixed_delay", // Database might recover
                Error::Serialization(_) => "reject_and_fail", // Code/config bug
                Error::Kube(_) => "retry_fixed_delay",     // K8s API might recover
            }
        }

        // Validation errors should fail permanently (user must fix config)
        assert_eq!(
            categorize_error(&Error::validation("bad config")),
            "reject_and_fail"
        );

        // Database errors might recover (retry)
        assert_eq!(
            categorize_error(&Error::database_op("timeout")),
            "retry_fixed_delay"
        );
    }

    /// Story: Error helper functions accept both String and &str
    #[test]
    fn story_error_construction_ergonomics() {
        let dynamic_msg = format!("role {} not found", "admin");
        let err = Error::validation(dynamic_msg);
        assert!(err.to_string().contains("admin"));

        let err = Error::database_op("static message");
        assert!(err.to_string().contains("static message"));
    }
}
