//! In-memory capacity store.
//!
//! Used in dev mode and by tests. Each host row sits behind its own mutex so
//! returns against one host serialize without blocking other hosts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use hostalloc_id::HostId;
use hostalloc_messages::CpuMemoryCapacity;
use tokio::sync::{Mutex, RwLock};

use super::{CapacityStore, HostCapacity, LedgerError};

type Row = Arc<Mutex<HostCapacity>>;

#[derive(Default)]
pub struct MemoryCapacityStore {
    rows: RwLock<HashMap<HostId, Row>>,
}

impl MemoryCapacityStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn row(&self, host_id: &HostId) -> Option<Row> {
        self.rows.read().await.get(host_id).cloned()
    }
}

#[async_trait]
impl CapacityStore for MemoryCapacityStore {
    async fn upsert(&self, capacity: HostCapacity) -> Result<(), LedgerError> {
        let row = {
            let mut rows = self.rows.write().await;
            rows.entry(capacity.host_id)
                .or_insert_with(|| Arc::new(Mutex::new(capacity)))
                .clone()
        };
        *row.lock().await = capacity;
        Ok(())
    }

    async fn get(&self, host_id: &HostId) -> Result<Option<HostCapacity>, LedgerError> {
        match self.row(host_id).await {
            Some(row) => Ok(Some(*row.lock().await)),
            None => Ok(None),
        }
    }

    async fn return_capacity(
        &self,
        host_id: &HostId,
        cpu: i64,
        memory: i64,
    ) -> Result<Option<HostCapacity>, LedgerError> {
        let Some(row) = self.row(host_id).await else {
            return Ok(None);
        };

        let mut guard = row.lock().await;
        *guard = guard.with_returned(cpu, memory);
        Ok(Some(*guard))
    }

    async fn sum(&self, host_ids: &[HostId]) -> Result<CpuMemoryCapacity, LedgerError> {
        let wanted: HashSet<&HostId> = host_ids.iter().collect();
        let rows: Vec<Row> = {
            let rows = self.rows.read().await;
            wanted.iter().filter_map(|id| rows.get(*id).cloned()).collect()
        };

        let mut sum = CpuMemoryCapacity::default();
        for row in rows {
            let row = *row.lock().await;
            sum.total_cpu = sum.total_cpu.saturating_add(row.total_cpu);
            sum.available_cpu = sum.available_cpu.saturating_add(row.available_cpu);
            sum.total_memory = sum.total_memory.saturating_add(row.total_memory);
            sum.available_memory = sum.available_memory.saturating_add(row.available_memory);
        }
        Ok(sum)
    }

    async fn list(&self) -> Result<Vec<HostCapacity>, LedgerError> {
        let rows: Vec<Row> = self.rows.read().await.values().cloned().collect();

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(*row.lock().await);
        }
        out.sort_by_key(|row| row.host_id);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(host_id: HostId, total: i64, available: i64) -> HostCapacity {
        HostCapacity {
            host_id,
            total_cpu: total,
            available_cpu: available,
            total_memory: total * 1024,
            available_memory: available * 1024,
        }
    }

    #[tokio::test]
    async fn test_concurrent_returns_do_not_lose_updates() {
        let store = Arc::new(MemoryCapacityStore::new());
        let host = HostId::new();
        store.upsert(row(host, 500, 0)).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..200 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.return_capacity(&host, 1, 1024).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let row = store.get(&host).await.unwrap().unwrap();
        assert_eq!(row.available_cpu, 200);
        assert_eq!(row.available_memory, 200 * 1024);
    }

    #[tokio::test]
    async fn test_concurrent_returns_clamp_at_total() {
        let store = Arc::new(MemoryCapacityStore::new());
        let host = HostId::new();
        store.upsert(row(host, 50, 0)).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..100 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.return_capacity(&host, 1, 1024).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let row = store.get(&host).await.unwrap().unwrap();
        assert_eq!(row.available_cpu, 50);
        assert_eq!(row.available_memory, 50 * 1024);
    }

    #[tokio::test]
    async fn test_sum_ignores_unknown_and_duplicate_hosts() {
        let store = MemoryCapacityStore::new();
        let a = HostId::new();
        let b = HostId::new();
        store.upsert(row(a, 8, 6)).await.unwrap();
        store.upsert(row(b, 4, 1)).await.unwrap();

        let sum = store.sum(&[a, a, b, HostId::new()]).await.unwrap();
        assert_eq!(sum.total_cpu, 12);
        assert_eq!(sum.available_cpu, 7);
        assert_eq!(sum.total_memory, 12 * 1024);
        assert_eq!(sum.available_memory, 7 * 1024);
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_host_id() {
        let store = MemoryCapacityStore::new();
        let mut ids: Vec<HostId> = (0..5).map(|_| HostId::new()).collect();
        for id in ids.iter().rev() {
            store.upsert(row(*id, 1, 1)).await.unwrap();
        }
        ids.sort();

        let listed: Vec<HostId> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.host_id)
            .collect();
        assert_eq!(listed, ids);
    }
}
