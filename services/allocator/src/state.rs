//! Application state shared across request handlers.

use std::sync::Arc;

use crate::db::Database;
use crate::dispatcher::AllocatorHandle;

/// Shared application state, passed to handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    allocator: AllocatorHandle,
    db: Option<Database>,
}

impl AppState {
    /// `db` is `None` when running against the in-memory ledger.
    pub fn new(allocator: AllocatorHandle, db: Option<Database>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { allocator, db }),
        }
    }

    pub fn allocator(&self) -> &AllocatorHandle {
        &self.inner.allocator
    }

    pub fn db(&self) -> Option<&Database> {
        self.inner.db.as_ref()
    }
}
