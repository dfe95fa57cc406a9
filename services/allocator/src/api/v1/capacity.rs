//! Capacity endpoints.
//!
//! Host agents push usage reports and callers return released capacity.
//! Both are accepted asynchronously: the response only means the message
//! was queued.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use hostalloc_id::HostId;
use hostalloc_messages::{
    CpuMemoryCapacity, GetCpuMemoryCapacity, Message, ReportHostCapacity, Reply,
    ReturnHostCapacity,
};
use serde::Deserialize;

use super::allocations::unexpected_reply;
use crate::api::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/hosts/{host_id}/capacity", post(report_capacity))
        .route("/hosts/{host_id}/capacity/return", post(return_capacity))
        .route("/capacity/query", post(query_capacity))
}

#[derive(Debug, Deserialize)]
pub struct CapacityReportRequest {
    pub total_cpu: i64,
    pub used_cpu: i64,
    pub total_memory: i64,
    pub used_memory: i64,
}

#[derive(Debug, Deserialize)]
pub struct CapacityReturnRequest {
    pub cpu: i64,
    pub memory: i64,
}

fn parse_host_id(raw: &str) -> Result<HostId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::bad_request("invalid_host_id", format!("invalid host id: {e}")))
}

async fn report_capacity(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
    Json(request): Json<CapacityReportRequest>,
) -> Result<StatusCode, ApiError> {
    let host_id = parse_host_id(&host_id)?;
    state
        .allocator()
        .send(Message::ReportHostCapacity(ReportHostCapacity {
            host_id,
            total_cpu: request.total_cpu,
            used_cpu: request.used_cpu,
            total_memory: request.total_memory,
            used_memory: request.used_memory,
        }))
        .await?;
    Ok(StatusCode::ACCEPTED)
}

async fn return_capacity(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
    Json(request): Json<CapacityReturnRequest>,
) -> Result<StatusCode, ApiError> {
    let host_id = parse_host_id(&host_id)?;
    state
        .allocator()
        .send(Message::ReturnHostCapacity(ReturnHostCapacity {
            host_id,
            cpu: request.cpu,
            memory: request.memory,
        }))
        .await?;
    Ok(StatusCode::ACCEPTED)
}

async fn query_capacity(
    State(state): State<AppState>,
    Json(query): Json<GetCpuMemoryCapacity>,
) -> Result<Json<CpuMemoryCapacity>, ApiError> {
    match state
        .allocator()
        .request(Message::GetCpuMemoryCapacity(query))
        .await?
    {
        Reply::CpuMemoryCapacity(reply) => Ok(Json(reply.into_result()?)),
        other => Err(unexpected_reply(&other)),
    }
}
