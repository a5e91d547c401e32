//! The storage collaborators the engine reads its snapshots from.
//!
//! The engine never calls these itself; [`crate::service::BookingService`]
//! fetches through them and hands plain data to the pure functions.

use async_trait::async_trait;
use thiserror::Error;

use crate::engine::{AvailabilityResult, EngineError};
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The conditional commit found the inventory taken.
    #[error("inventory no longer available: {}", .reasons.join("; "))]
    Conflict { reasons: Vec<String> },
    #[error("reservation cannot move from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error(transparent)]
    Invalid(#[from] EngineError),
}

impl RepositoryError {
    pub fn kind(&self) -> &'static str {
        match self {
            RepositoryError::NotFound(_) => "not_found",
            RepositoryError::AlreadyExists(_) => "already_exists",
            RepositoryError::Conflict { .. } => "conflict",
            RepositoryError::InvalidTransition { .. } => "invalid_transition",
            RepositoryError::Unavailable(_) => "repository_unavailable",
            RepositoryError::LimitExceeded(_) => "limit_exceeded",
            RepositoryError::Invalid(e) => e.kind(),
        }
    }

    pub(crate) fn conflict(result: &AvailabilityResult) -> Self {
        RepositoryError::Conflict {
            reasons: result.reasons_unavailable.clone(),
        }
    }
}

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Every non-terminal reservation of `inventory` on the dates `period` touches.
    /// Gap suggestions need the whole day, not only the conflicting bookings.
    async fn reservations_on_dates(
        &self,
        inventory: &InventoryKey,
        period: &Period,
    ) -> Result<Vec<Reservation>, RepositoryError>;

    async fn reservation(&self, id: ReservationId) -> Result<Reservation, RepositoryError>;

    /// All reservations of `inventory`, terminal ones included, ordered by start.
    async fn list_reservations(&self, inventory: &InventoryKey) -> Result<Vec<Reservation>, RepositoryError>;

    /// Conditional insert: re-checks availability against the live state under
    /// the inventory's write lock and persists only if it still holds.
    async fn insert_if_available(&self, reservation: Reservation) -> Result<Reservation, RepositoryError>;

    /// Conditional move of an existing reservation to a new period and size.
    async fn reschedule_if_available(
        &self,
        id: ReservationId,
        period: Period,
        guest_count: u32,
        rooms: u32,
    ) -> Result<Reservation, RepositoryError>;

    async fn set_status(&self, id: ReservationId, status: ReservationStatus) -> Result<Reservation, RepositoryError>;
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Rules whose scope covers `resource`, inactive ones included.
    async fn rules_for(&self, resource: &ResourceKey) -> Result<Vec<PricingRule>, RepositoryError>;

    async fn upsert_rule(&self, rule: PricingRule) -> Result<(), RepositoryError>;

    async fn remove_rule(&self, id: RuleId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn resource(&self, key: &ResourceKey) -> Result<BookableResource, RepositoryError>;

    async fn maintenance_windows(&self, inventory: &InventoryKey) -> Result<Vec<MaintenanceWindow>, RepositoryError>;

    async fn upsert_resource(&self, resource: BookableResource) -> Result<(), RepositoryError>;

    async fn add_maintenance(&self, window: MaintenanceWindow) -> Result<(), RepositoryError>;

    async fn remove_maintenance(&self, id: WindowId) -> Result<(), RepositoryError>;
}
