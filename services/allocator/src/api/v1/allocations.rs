//! Allocation endpoints.
//!
//! - `POST /v1/allocations`: select a host, or list candidates when
//!   `dry_run` is set
//! - `GET /v1/allocator-strategies`: exposed strategy types

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hostalloc_messages::{AllocateHost, AllocatorStrategiesReply, HostDescriptor, Message, Reply};
use serde::Serialize;

use crate::api::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/allocations", post(allocate))
        .route("/allocator-strategies", get(list_strategies))
}

#[derive(Debug, Serialize)]
pub struct AllocationResponse {
    pub host: HostDescriptor,
}

#[derive(Debug, Serialize)]
pub struct DryRunResponse {
    pub hosts: Vec<HostDescriptor>,
}

async fn allocate(
    State(state): State<AppState>,
    Json(request): Json<AllocateHost>,
) -> Result<Response, ApiError> {
    let reply = state
        .allocator()
        .request(Message::AllocateHost(request))
        .await?;

    match reply {
        Reply::AllocateHost(reply) => {
            let host = reply.into_result()?;
            Ok(Json(AllocationResponse { host }).into_response())
        }
        Reply::AllocateHostDryRun(reply) => {
            let hosts = reply.into_result()?;
            Ok(Json(DryRunResponse { hosts }).into_response())
        }
        other => Err(unexpected_reply(&other)),
    }
}

async fn list_strategies(
    State(state): State<AppState>,
) -> Result<Json<AllocatorStrategiesReply>, ApiError> {
    match state
        .allocator()
        .request(Message::GetAllocatorStrategies)
        .await?
    {
        Reply::AllocatorStrategies(reply) => Ok(Json(reply)),
        other => Err(unexpected_reply(&other)),
    }
}

pub(super) fn unexpected_reply(reply: &Reply) -> ApiError {
    tracing::error!(?reply, "Allocator returned a reply of the wrong kind");
    ApiError::internal("internal_error", "unexpected allocator reply")
}
