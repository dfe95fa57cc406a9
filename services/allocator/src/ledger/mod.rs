//! Capacity ledger.
//!
//! One row per host holding total and available CPU and memory. Rows are
//! created by the first capacity report for a host and updated by later
//! reports and by capacity returns. The ledger never deletes rows.
//!
//! Every mutation clamps availability into `0..=total`, so the invariant
//! holds no matter what a host agent reports or what a caller returns.

mod memory;

pub use memory::MemoryCapacityStore;

use std::sync::Arc;

use async_trait::async_trait;
use hostalloc_id::HostId;
use hostalloc_messages::{CpuMemoryCapacity, ReportHostCapacity};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::db::DbError;

/// Errors raised by the ledger's backing store.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("capacity store error: {0}")]
    Database(#[from] DbError),
}

/// Capacity row for a single host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostCapacity {
    pub host_id: HostId,
    pub total_cpu: i64,
    pub available_cpu: i64,
    pub total_memory: i64,
    pub available_memory: i64,
}

impl HostCapacity {
    /// Builds a row from a host's point-in-time usage report.
    pub fn from_report(
        host_id: HostId,
        total_cpu: i64,
        used_cpu: i64,
        total_memory: i64,
        used_memory: i64,
    ) -> Self {
        let total_cpu = total_cpu.max(0);
        let total_memory = total_memory.max(0);

        Self {
            host_id,
            total_cpu,
            available_cpu: clamp_available(total_cpu.saturating_sub(used_cpu), total_cpu),
            total_memory,
            available_memory: clamp_available(
                total_memory.saturating_sub(used_memory),
                total_memory,
            ),
        }
    }

    /// Adds returned capacity, never exceeding the totals.
    #[must_use]
    pub fn with_returned(self, cpu: i64, memory: i64) -> Self {
        Self {
            available_cpu: clamp_available(self.available_cpu.saturating_add(cpu), self.total_cpu),
            available_memory: clamp_available(
                self.available_memory.saturating_add(memory),
                self.total_memory,
            ),
            ..self
        }
    }
}

fn clamp_available(available: i64, total: i64) -> i64 {
    available.clamp(0, total.max(0))
}

/// Storage behind the ledger.
///
/// Implementations own the locking discipline: `return_capacity` must hold
/// an exclusive lock on the host's row across its read-modify-write and
/// commit on its own, independent of any caller transaction.
#[async_trait]
pub trait CapacityStore: Send + Sync {
    /// Inserts or replaces the row for `capacity.host_id`.
    async fn upsert(&self, capacity: HostCapacity) -> Result<(), LedgerError>;

    async fn get(&self, host_id: &HostId) -> Result<Option<HostCapacity>, LedgerError>;

    /// Applies [`HostCapacity::with_returned`] under the row lock.
    ///
    /// Returns `None` without creating a row when the host is unknown.
    async fn return_capacity(
        &self,
        host_id: &HostId,
        cpu: i64,
        memory: i64,
    ) -> Result<Option<HostCapacity>, LedgerError>;

    /// Sums totals and availability over the given hosts. Unknown hosts
    /// contribute nothing.
    async fn sum(&self, host_ids: &[HostId]) -> Result<CpuMemoryCapacity, LedgerError>;

    /// All rows, ordered by host id.
    async fn list(&self) -> Result<Vec<HostCapacity>, LedgerError>;
}

/// The capacity ledger. Cheap to clone.
#[derive(Clone)]
pub struct CapacityLedger {
    store: Arc<dyn CapacityStore>,
}

impl CapacityLedger {
    pub fn new(store: Arc<dyn CapacityStore>) -> Self {
        Self { store }
    }

    /// Records a host's capacity report (last write wins).
    #[instrument(skip(self, report), fields(host_id = %report.host_id))]
    pub async fn report_capacity(
        &self,
        report: &ReportHostCapacity,
    ) -> Result<HostCapacity, LedgerError> {
        let capacity = HostCapacity::from_report(
            report.host_id,
            report.total_cpu,
            report.used_cpu,
            report.total_memory,
            report.used_memory,
        );
        self.store.upsert(capacity).await?;

        debug!(
            available_cpu = capacity.available_cpu,
            available_memory = capacity.available_memory,
            "Recorded host capacity report"
        );
        Ok(capacity)
    }

    /// Returns CPU and memory to a host.
    ///
    /// A host without a ledger row is tolerated: it may have been removed
    /// after the capacity it held was committed elsewhere.
    #[instrument(skip(self))]
    pub async fn return_capacity(
        &self,
        host_id: &HostId,
        cpu: i64,
        memory: i64,
    ) -> Result<Option<HostCapacity>, LedgerError> {
        let updated = self.store.return_capacity(host_id, cpu, memory).await?;

        match &updated {
            Some(row) => debug!(
                available_cpu = row.available_cpu,
                available_memory = row.available_memory,
                "Returned capacity to host"
            ),
            None => warn!(
                "Unable to return cpu[{cpu}], memory[{memory}] to host[{host_id}], it may have been deleted"
            ),
        }

        Ok(updated)
    }

    pub async fn get(&self, host_id: &HostId) -> Result<Option<HostCapacity>, LedgerError> {
        self.store.get(host_id).await
    }

    /// Every row, ordered by host id.
    pub async fn snapshot(&self) -> Result<Vec<HostCapacity>, LedgerError> {
        self.store.list().await
    }

    pub async fn sum(&self, host_ids: &[HostId]) -> Result<CpuMemoryCapacity, LedgerError> {
        if host_ids.is_empty() {
            return Ok(CpuMemoryCapacity::default());
        }
        self.store.sum(host_ids).await
    }
}
