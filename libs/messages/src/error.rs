//! Error codes carried in failure replies.

use serde::{Deserialize, Serialize};

/// Stable error code strings.
pub mod codes {
    /// The requested strategy type has no registered factory.
    pub const STRATEGY_NOT_FOUND: &str = "strategy_not_found";
    /// The strategy found no host able to satisfy the demand.
    pub const NO_ELIGIBLE_HOST: &str = "no_eligible_host";
    /// The strategy dropped its completion without resolving it.
    pub const STRATEGY_ABANDONED: &str = "strategy_abandoned";
    /// The strategy did not complete within the configured deadline.
    pub const STRATEGY_TIMEOUT: &str = "strategy_timeout";
    /// Generic strategy-reported failure.
    pub const ALLOCATION_FAILED: &str = "allocation_failed";
    /// A capacity query named no hosts, clusters or zones.
    pub const MISSING_SCOPE: &str = "missing_scope";
    /// The ledger, topology or reservation source could not be read.
    pub const CAPACITY_UNAVAILABLE: &str = "capacity_unavailable";
    /// The allocator is not accepting requests (shutting down).
    pub const SERVICE_UNAVAILABLE: &str = "service_unavailable";
}

/// Error code and human readable message returned in a failure reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode {
    pub code: String,
    pub message: String,
}

impl ErrorCode {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
