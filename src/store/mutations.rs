use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::engine::{self, AvailabilityQuery, invalid};
use crate::limits::*;
use crate::model::*;
use crate::observability::BOOKING_CONFLICTS_TOTAL;
use crate::repository::RepositoryError;

use super::{InventoryState, Store, WalCommand, wal_closed};

fn check_amount(name: &str, value: f64) -> Result<(), RepositoryError> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(format!("{name} must be a non-negative number")).into());
    }
    Ok(())
}

fn validate_resource(resource: &BookableResource) -> Result<(), RepositoryError> {
    if let Some(name) = &resource.name
        && name.len() > MAX_NAME_LEN
    {
        return Err(RepositoryError::LimitExceeded("resource name too long"));
    }
    if let Some(base) = resource.base_price {
        check_amount("base_price", base)?;
    }
    check_amount("extra_guest_charge", resource.extra_guest_charge)?;
    for price in resource.meal_prices.values() {
        check_amount("meal price", *price)?;
    }
    if resource.inventory == Some(0) {
        return Err(invalid("inventory must be positive when set").into());
    }
    if resource.capacity.keys().any(|style| style.len() > MAX_LAYOUT_STYLE_LEN) {
        return Err(RepositoryError::LimitExceeded("layout style too long"));
    }
    Ok(())
}

fn validate_rule(rule: &PricingRule) -> Result<(), RepositoryError> {
    if let Some(name) = &rule.name
        && name.len() > MAX_NAME_LEN
    {
        return Err(RepositoryError::LimitExceeded("rule name too long"));
    }
    if rule.values.values().chain(rule.default_value.iter()).any(|v| !v.is_finite()) {
        return Err(invalid("rule adjustment values must be finite").into());
    }
    if rule.values.is_empty() && rule.default_value.is_none() {
        return Err(invalid("rule defines no adjustment value").into());
    }
    if let Some(days) = &rule.condition.days_of_week
        && days.iter().any(|d| *d > 6)
    {
        return Err(invalid("days_of_week entries must be 0 (Sunday) to 6 (Saturday)").into());
    }
    if let (Some(start), Some(end)) = (rule.condition.start_date, rule.condition.end_date)
        && start > end
    {
        return Err(invalid("rule start_date is after end_date").into());
    }
    Ok(())
}

fn validate_reservation_text(reservation: &Reservation) -> Result<(), RepositoryError> {
    if let Some(label) = &reservation.label
        && label.len() > MAX_LABEL_LEN
    {
        return Err(RepositoryError::LimitExceeded("label too long"));
    }
    Ok(())
}

impl Store {
    pub async fn put_resource(&self, resource: BookableResource) -> Result<(), RepositoryError> {
        self.check_property(resource.key.property_id())?;
        validate_resource(&resource)?;

        let _catalog = self.catalog.read().await;
        let key = resource.key.inventory_key();
        if !self.inventories.contains_key(&key) && self.inventories.len() >= MAX_INVENTORIES_PER_PROPERTY {
            return Err(RepositoryError::LimitExceeded("too many inventories in property"));
        }
        let shared = self.inventory_or_create(&key);
        let mut guard = shared.write().await;

        let event = Event::ResourceUpserted { resource };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn put_maintenance(&self, window: MaintenanceWindow) -> Result<(), RepositoryError> {
        let property_id = match &window.resource {
            InventoryKey::RoomCategory { property_id, .. } | InventoryKey::Venue { property_id, .. } => property_id,
        };
        self.check_property(property_id)?;
        if window.start_date > window.end_date {
            return Err(invalid("maintenance start_date is after end_date").into());
        }
        if let Some(reason) = &window.reason
            && reason.len() > MAX_LABEL_LEN
        {
            return Err(RepositoryError::LimitExceeded("maintenance reason too long"));
        }
        if self.window_index.contains_key(&window.id) {
            return Err(RepositoryError::AlreadyExists(window.id.to_string()));
        }

        let shared = self
            .inventory(&window.resource)
            .ok_or_else(|| RepositoryError::NotFound(window.resource.to_string()))?;
        let mut guard = shared.write().await;
        if guard.maintenance.len() >= MAX_MAINTENANCE_WINDOWS_PER_INVENTORY {
            return Err(RepositoryError::LimitExceeded("too many maintenance windows"));
        }

        let event = Event::MaintenanceAdded { window };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn delete_maintenance(&self, id: WindowId) -> Result<(), RepositoryError> {
        let inventory = self
            .window_index
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        let shared = self
            .inventory(&inventory)
            .ok_or_else(|| RepositoryError::NotFound(inventory.to_string()))?;
        let mut guard = shared.write().await;

        let event = Event::MaintenanceRemoved { id, inventory };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn put_rule(&self, rule: PricingRule) -> Result<(), RepositoryError> {
        self.check_property(rule.scope.property_id())?;
        validate_rule(&rule)?;

        let mut rules = self.rules.write().await;
        if !rules.contains_key(&rule.id) && rules.len() >= MAX_RULES_PER_PROPERTY {
            return Err(RepositoryError::LimitExceeded("too many pricing rules"));
        }
        let event = Event::RuleUpserted { rule };
        self.wal_append(&event).await?;
        if let Event::RuleUpserted { rule } = event {
            rules.insert(rule.id, rule);
        }
        Ok(())
    }

    pub async fn delete_rule(&self, id: RuleId) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write().await;
        if !rules.contains_key(&id) {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        self.wal_append(&Event::RuleRemoved { id }).await?;
        rules.remove(&id);
        Ok(())
    }

    /// Re-run the full availability check against the live state while the
    /// caller holds the write lock.
    fn recheck(
        &self,
        guard: &InventoryState,
        reservation: &Reservation,
        exclude: Option<ReservationId>,
    ) -> Result<(), RepositoryError> {
        let resource = guard
            .resources
            .get(&reservation.resource)
            .ok_or_else(|| RepositoryError::NotFound(reservation.resource.to_string()))?;
        let query = AvailabilityQuery {
            resource: reservation.resource.clone(),
            period: reservation.period,
            guest_count: Some(reservation.guest_count),
            layout_style: reservation.layout_style.clone(),
            rooms: reservation.rooms,
            exclude_reservation_id: exclude,
        };
        let verdict = engine::check_availability(
            resource,
            &query,
            &guard.reservations,
            &guard.maintenance,
            self.policy(),
        )?;
        if !verdict.is_available {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            debug!(
                resource = %reservation.resource,
                reasons = ?verdict.reasons_unavailable,
                "conditional commit rejected"
            );
            return Err(RepositoryError::conflict(&verdict));
        }
        Ok(())
    }

    /// Atomic conditional insert.
    pub async fn place_reservation(&self, reservation: Reservation) -> Result<Reservation, RepositoryError> {
        self.check_property(reservation.resource.property_id())?;
        validate_reservation_text(&reservation)?;
        if reservation.status.is_terminal() {
            return Err(invalid("a new reservation must be pending or confirmed").into());
        }
        if self.reservation_index.contains_key(&reservation.id) {
            return Err(RepositoryError::AlreadyExists(reservation.id.to_string()));
        }

        let inventory = reservation.resource.inventory_key();
        let shared = self
            .inventory(&inventory)
            .ok_or_else(|| RepositoryError::NotFound(reservation.resource.to_string()))?;
        let mut guard = shared.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_INVENTORY {
            return Err(RepositoryError::LimitExceeded("too many reservations on inventory"));
        }
        self.recheck(&guard, &reservation, None)?;

        let event = Event::ReservationPlaced {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(id = %reservation.id, resource = %reservation.resource, "reservation placed");
        Ok(reservation)
    }

    /// Move a live reservation, re-checking with itself excluded.
    pub async fn reschedule_reservation(
        &self,
        id: ReservationId,
        period: Period,
        guest_count: u32,
        rooms: u32,
    ) -> Result<Reservation, RepositoryError> {
        let (inventory, shared) = self.locate(id)?;
        let mut guard = shared.write().await;
        let current = guard
            .reservation(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if current.status.is_terminal() {
            return Err(invalid(format!("cannot reschedule a {} reservation", current.status)).into());
        }

        let moved = Reservation {
            period,
            guest_count,
            rooms,
            ..current
        };
        self.recheck(&guard, &moved, Some(id))?;

        let event = Event::ReservationRescheduled {
            id,
            inventory,
            period,
            guest_count,
            rooms,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(moved)
    }

    pub async fn set_reservation_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<Reservation, RepositoryError> {
        let (inventory, shared) = self.locate(id)?;
        let mut guard = shared.write().await;
        let current = guard
            .reservation(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if !current.status.can_transition_to(status) {
            return Err(RepositoryError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let event = Event::ReservationStatusChanged { id, inventory, status };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%id, from = %current.status, to = %status, "reservation status changed");
        Ok(Reservation { status, ..current })
    }

    fn locate(&self, id: ReservationId) -> Result<(InventoryKey, super::SharedInventory), RepositoryError> {
        let inventory = self
            .reservation_index
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        let shared = self
            .inventory(&inventory)
            .ok_or_else(|| RepositoryError::NotFound(inventory.to_string()))?;
        Ok((inventory, shared))
    }

    /// Rewrite the WAL as the minimal event set for the current state.
    ///
    /// The catalog write lock, the rules lock and every inventory read lock are
    /// held until the writer has swapped the file, so no mutation can land in
    /// the old log after the snapshot was taken.
    pub async fn compact_wal(&self) -> Result<(), RepositoryError> {
        let _catalog = self.catalog.write().await;
        let mut keys: Vec<InventoryKey> = self.inventories.iter().map(|e| e.key().clone()).collect();
        keys.sort();

        let rules = self.rules.read().await;
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(shared) = self.inventory(key) {
                guards.push(shared.read_owned().await);
            }
        }

        let mut events: Vec<Event> = rules
            .values()
            .map(|rule| Event::RuleUpserted { rule: rule.clone() })
            .collect();
        for guard in &guards {
            guard.snapshot(&mut events);
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| wal_closed())?;
        rx.await
            .map_err(|_| RepositoryError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;

        info!(property = %self.property_id(), events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
