//! API v1 routes.

mod allocations;
mod capacity;

use axum::Router;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(allocations::routes())
        .merge(capacity::routes())
}
