//! Reservation query gateway.
//!
//! Reservations are capacity earmarked by another subsystem but not yet
//! reflected in host-reported usage. The allocator only consumes their
//! totals at query time; how they are created is not its concern.

use async_trait::async_trait;
use thiserror::Error;

use super::CapacityScope;
use crate::db::DbError;

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("reservation store error: {0}")]
    Database(#[from] DbError),

    #[error("reservation source unavailable: {0}")]
    Unavailable(String),
}

/// Reserved totals for one queried scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservedCapacity {
    pub reserved_cpu: i64,
    pub reserved_memory: i64,
}

#[async_trait]
pub trait ReservationGateway: Send + Sync {
    async fn reserved_capacity(
        &self,
        scope: &CapacityScope,
    ) -> Result<ReservedCapacity, ReservationError>;
}

/// Gateway for deployments without a reservation subsystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReservations;

#[async_trait]
impl ReservationGateway for NoReservations {
    async fn reserved_capacity(
        &self,
        _scope: &CapacityScope,
    ) -> Result<ReservedCapacity, ReservationError> {
        Ok(ReservedCapacity::default())
    }
}
