//! Async orchestration around the pure engine.
//!
//! Fetch snapshots through the repositories, decide with the engine, and for
//! bookings commit through the repository's conditional insert. The engine's
//! verdict is only provisional; the commit is authoritative.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{
    self, AvailabilityAndQuote, AvailabilityQuery, AvailabilityResult, BookingRequest, EngineError, Policy,
    PricingFault, Quote, QuoteRequest,
};
use crate::model::*;
use crate::repository::*;
use crate::store::Store;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("not available: {}", .0.reasons_unavailable.join("; "))]
    Unavailable(Box<AvailabilityResult>),
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Engine(e) => e.kind(),
            ServiceError::Repository(e) => e.kind(),
            ServiceError::Unavailable(_) => "unavailable",
        }
    }
}

/// A committed reservation with the price it was booked at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub reservation: Reservation,
    pub quote: Option<Quote>,
    pub pricing_error: Option<PricingFault>,
}

impl Booking {
    pub fn rounded(self, decimals: u32) -> Booking {
        Booking {
            quote: self.quote.map(|q| q.rounded(decimals)),
            ..self
        }
    }
}

pub struct BookingService {
    reservations: Arc<dyn ReservationRepository>,
    rules: Arc<dyn RuleRepository>,
    resources: Arc<dyn ResourceRepository>,
    policy: Policy,
}

impl BookingService {
    pub fn new(
        reservations: Arc<dyn ReservationRepository>,
        rules: Arc<dyn RuleRepository>,
        resources: Arc<dyn ResourceRepository>,
        policy: Policy,
    ) -> Self {
        Self {
            reservations,
            rules,
            resources,
            policy,
        }
    }

    /// All three repositories served by one property store.
    pub fn for_store(store: Arc<Store>) -> Self {
        let policy = store.policy().clone();
        Self::new(store.clone(), store.clone(), store, policy)
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    async fn snapshot(
        &self,
        key: &ResourceKey,
        period: &Period,
    ) -> Result<(BookableResource, Vec<Reservation>, Vec<MaintenanceWindow>), RepositoryError> {
        let resource = self.resources.resource(key).await?;
        let inventory = key.inventory_key();
        let reservations = self.reservations.reservations_on_dates(&inventory, period).await?;
        let maintenance = self.resources.maintenance_windows(&inventory).await?;
        Ok((resource, reservations, maintenance))
    }

    pub async fn check_availability(&self, query: &AvailabilityQuery) -> Result<AvailabilityResult, ServiceError> {
        let (resource, reservations, maintenance) = self.snapshot(&query.resource, &query.period).await?;
        Ok(engine::check_availability(
            &resource,
            query,
            &reservations,
            &maintenance,
            &self.policy,
        )?)
    }

    pub async fn quote_price(&self, request: &QuoteRequest) -> Result<Quote, ServiceError> {
        let resource = self.resources.resource(&request.resource).await?;
        let rules = self.rules.rules_for(&request.resource).await?;
        Ok(engine::quote_price(&resource, request, &rules, &self.policy)?)
    }

    /// Unreadable resources or reservations fail the call: availability
    /// cannot be decided. Unreadable rules only cost the quote.
    pub async fn check_availability_and_quote(
        &self,
        request: &BookingRequest,
    ) -> Result<AvailabilityAndQuote, ServiceError> {
        let (resource, reservations, maintenance) = self.snapshot(&request.resource, &request.period).await?;
        match self.rules.rules_for(&request.resource).await {
            Ok(rules) => Ok(engine::check_availability_and_quote(
                &resource,
                request,
                &reservations,
                &maintenance,
                &rules,
                &self.policy,
            )?),
            Err(err) => {
                warn!(resource = %request.resource, error = %err, "pricing rules unreadable");
                let verdict = engine::check_availability_and_quote(
                    &resource,
                    request,
                    &reservations,
                    &maintenance,
                    &[],
                    &self.policy,
                )?;
                if !verdict.availability.is_available {
                    return Ok(verdict);
                }
                Ok(engine::pricing_unavailable(verdict.availability, err.to_string()))
            }
        }
    }

    /// Provisional check, then the atomic conditional insert.
    pub async fn book(
        &self,
        mut request: BookingRequest,
        status: ReservationStatus,
        label: Option<String>,
    ) -> Result<Booking, ServiceError> {
        request.exclude_reservation_id = None;
        let decision = self.check_availability_and_quote(&request).await?;
        if !decision.availability.is_available {
            return Err(ServiceError::Unavailable(Box::new(decision.availability)));
        }

        let reservation = Reservation {
            id: Ulid::new(),
            resource: request.resource,
            period: request.period,
            status,
            guest_count: request.guests,
            rooms: request.rooms,
            layout_style: request.layout_style,
            label,
        };
        let reservation = self.reservations.insert_if_available(reservation).await?;
        debug!(id = %reservation.id, "booking committed");
        Ok(Booking {
            reservation,
            quote: decision.quote,
            pricing_error: decision.pricing_error,
        })
    }

    /// Move a reservation to a new period, re-checking with itself excluded.
    /// Omitted sizes keep their current value.
    pub async fn reschedule(
        &self,
        id: ReservationId,
        period: Period,
        guests: Option<u32>,
        rooms: Option<u32>,
    ) -> Result<Booking, ServiceError> {
        let current = self.reservations.reservation(id).await?;
        let request = BookingRequest {
            resource: current.resource.clone(),
            period,
            guests: guests.unwrap_or(current.guest_count),
            rooms: rooms.unwrap_or(current.rooms),
            layout_style: current.layout_style.clone(),
            exclude_reservation_id: Some(id),
            meals: Vec::new(),
            pricing: Default::default(),
        };
        let decision = self.check_availability_and_quote(&request).await?;
        if !decision.availability.is_available {
            return Err(ServiceError::Unavailable(Box::new(decision.availability)));
        }
        let reservation = self
            .reservations
            .reschedule_if_available(id, period, request.guests, request.rooms)
            .await?;
        Ok(Booking {
            reservation,
            quote: decision.quote,
            pricing_error: decision.pricing_error,
        })
    }

    pub async fn set_status(&self, id: ReservationId, status: ReservationStatus) -> Result<Reservation, ServiceError> {
        Ok(self.reservations.set_status(id, status).await?)
    }

    pub async fn list_reservations(&self, inventory: &InventoryKey) -> Result<Vec<Reservation>, ServiceError> {
        Ok(self.reservations.list_reservations(inventory).await?)
    }
}
