use crate::model::*;
use crate::repository::RepositoryError;

use super::Store;

impl Store {
    pub async fn get_resource(&self, key: &ResourceKey) -> Result<BookableResource, RepositoryError> {
        let not_found = || RepositoryError::NotFound(key.to_string());
        let shared = self.inventory(&key.inventory_key()).ok_or_else(not_found)?;
        let guard = shared.read().await;
        guard.resources.get(key).cloned().ok_or_else(not_found)
    }

    pub async fn list_resources(&self) -> Vec<BookableResource> {
        let shards: Vec<_> = self.inventories.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for shared in shards {
            out.extend(shared.read().await.resources.values().cloned());
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    pub async fn windows(&self, inventory: &InventoryKey) -> Vec<MaintenanceWindow> {
        match self.inventory(inventory) {
            Some(shared) => {
                let mut windows = shared.read().await.maintenance.clone();
                windows.sort_by_key(|w| (w.start_date, w.id));
                windows
            }
            None => Vec::new(),
        }
    }

    pub async fn reservations_on(&self, inventory: &InventoryKey, period: &Period) -> Vec<Reservation> {
        match self.inventory(inventory) {
            Some(shared) => shared.read().await.on_dates(period),
            None => Vec::new(),
        }
    }

    pub async fn all_reservations(&self, inventory: &InventoryKey) -> Vec<Reservation> {
        match self.inventory(inventory) {
            Some(shared) => shared.read().await.reservations.clone(),
            None => Vec::new(),
        }
    }

    pub async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, RepositoryError> {
        let not_found = || RepositoryError::NotFound(id.to_string());
        let inventory = self
            .reservation_index
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(not_found)?;
        let shared = self.inventory(&inventory).ok_or_else(not_found)?;
        let guard = shared.read().await;
        guard.reservation(id).cloned().ok_or_else(not_found)
    }

    /// Rules whose scope covers `resource`, ordered by id.
    pub async fn matching_rules(&self, resource: &ResourceKey) -> Vec<PricingRule> {
        self.rules
            .read()
            .await
            .values()
            .filter(|rule| rule.scope.matches(resource))
            .cloned()
            .collect()
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }
}
