//! Request and reply payloads.

use std::collections::BTreeMap;

use hostalloc_id::{ClusterId, HostId, ZoneId};
use serde::{Deserialize, Serialize};

use crate::ErrorCode;

// =============================================================================
// Shared Types
// =============================================================================

/// A host as seen by a strategy at selection time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    pub host_id: HostId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<ClusterId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<ZoneId>,
    pub total_cpu: i64,
    pub available_cpu: i64,
    pub total_memory: i64,
    pub available_memory: i64,
}

/// Optional placement constraints attached to an allocation request.
///
/// Empty lists mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConstraints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_ids: Vec<HostId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_ids: Vec<ClusterId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zone_ids: Vec<ZoneId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub avoid_host_ids: Vec<HostId>,
}

/// Aggregate capacity over a scope. Availability already nets out
/// reservations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuMemoryCapacity {
    pub total_cpu: i64,
    pub available_cpu: i64,
    pub total_memory: i64,
    pub available_memory: i64,
}

// =============================================================================
// Requests
// =============================================================================

/// Ask a strategy to pick a host (or, on dry run, list candidates).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateHost {
    pub cpu: i64,
    pub memory: i64,
    /// Resource dimensions beyond CPU and memory (e.g. `gpu`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_resources: BTreeMap<String, i64>,
    pub strategy_type: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub constraints: PlacementConstraints,
}

/// Periodic capacity snapshot sent by a host's monitoring agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportHostCapacity {
    pub host_id: HostId,
    pub total_cpu: i64,
    pub used_cpu: i64,
    pub total_memory: i64,
    pub used_memory: i64,
}

/// Give previously consumed capacity back to a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnHostCapacity {
    pub host_id: HostId,
    pub cpu: i64,
    pub memory: i64,
}

/// Scoped capacity query. Host ids win over cluster ids, which win over
/// zone ids; at least one list must be non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCpuMemoryCapacity {
    #[serde(default)]
    pub host_ids: Vec<HostId>,
    #[serde(default)]
    pub cluster_ids: Vec<ClusterId>,
    #[serde(default)]
    pub zone_ids: Vec<ZoneId>,
}

// =============================================================================
// Replies
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateHostReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
}

impl AllocateHostReply {
    pub fn success(host: HostDescriptor) -> Self {
        Self {
            host: Some(host),
            error: None,
        }
    }

    pub fn failure(error: ErrorCode) -> Self {
        Self {
            host: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<HostDescriptor, ErrorCode> {
        match (self.host, self.error) {
            (_, Some(error)) => Err(error),
            (Some(host), None) => Ok(host),
            (None, None) => Err(ErrorCode::new(
                crate::codes::ALLOCATION_FAILED,
                "reply carried neither a host nor an error",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateHostDryRunReply {
    #[serde(default)]
    pub hosts: Vec<HostDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
}

impl AllocateHostDryRunReply {
    pub fn success(hosts: Vec<HostDescriptor>) -> Self {
        Self { hosts, error: None }
    }

    pub fn failure(error: ErrorCode) -> Self {
        Self {
            hosts: Vec::new(),
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<Vec<HostDescriptor>, ErrorCode> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.hosts),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuMemoryCapacityReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<CpuMemoryCapacity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
}

impl CpuMemoryCapacityReply {
    pub fn success(capacity: CpuMemoryCapacity) -> Self {
        Self {
            capacity: Some(capacity),
            error: None,
        }
    }

    pub fn failure(error: ErrorCode) -> Self {
        Self {
            capacity: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<CpuMemoryCapacity, ErrorCode> {
        match (self.capacity, self.error) {
            (_, Some(error)) => Err(error),
            (Some(capacity), None) => Ok(capacity),
            (None, None) => Err(ErrorCode::new(
                crate::codes::CAPACITY_UNAVAILABLE,
                "reply carried neither a capacity nor an error",
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorStrategiesReply {
    pub strategies: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_host_defaults() {
        let json = serde_json::json!({
            "cpu": 2,
            "memory": 4096,
            "strategy_type": "ledger-fit"
        });
        let msg: AllocateHost = serde_json::from_value(json).unwrap();
        assert!(!msg.dry_run);
        assert!(msg.extra_resources.is_empty());
        assert_eq!(msg.constraints, PlacementConstraints::default());
    }

    #[test]
    fn test_failure_reply_omits_payload() {
        let reply = AllocateHostReply::failure(ErrorCode::new("no_eligible_host", "none"));
        let json = serde_json::to_value(&reply).unwrap();
        assert!(json.get("host").is_none());
        assert_eq!(json["error"]["code"], "no_eligible_host");
    }

    #[test]
    fn test_empty_allocate_reply_is_an_error() {
        let reply = AllocateHostReply {
            host: None,
            error: None,
        };
        assert!(reply.into_result().is_err());
    }

    #[test]
    fn test_dry_run_reply_with_no_candidates_is_success() {
        let reply = AllocateHostDryRunReply::success(Vec::new());
        assert_eq!(reply.into_result().unwrap(), Vec::new());
    }

    #[test]
    fn test_empty_capacity_reply_is_an_error() {
        let reply: CpuMemoryCapacityReply = serde_json::from_str("{}").unwrap();
        let error = reply.into_result().unwrap_err();
        assert_eq!(error.code, crate::codes::CAPACITY_UNAVAILABLE);

        let zero = CpuMemoryCapacityReply::success(CpuMemoryCapacity::default());
        assert_eq!(zero.into_result(), Ok(CpuMemoryCapacity::default()));
    }
}
