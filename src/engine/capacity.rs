use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::*;

/// Layout used for venue capacity checks when the caller names none.
pub const DEFAULT_LAYOUT_STYLE: &str = "seated";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityInfo {
    pub layout_style: String,
    pub has_capacity: bool,
    pub available_capacity: u32,
    pub required_capacity: u32,
}

/// Check `guest_count` against the resource's limit for `layout_style`.
/// A layout with no configured capacity has capacity 0, so it always fails.
pub fn check_capacity(resource: &BookableResource, layout_style: &str, guest_count: u32) -> CapacityInfo {
    let available = resource.capacity.get(layout_style).copied().unwrap_or(0);
    CapacityInfo {
        layout_style: layout_style.to_string(),
        has_capacity: available >= guest_count,
        available_capacity: available,
        required_capacity: guest_count,
    }
}

/// True if `date` falls inside any active window for `inventory` (inclusive).
pub fn check_maintenance(windows: &[MaintenanceWindow], inventory: &InventoryKey, date: NaiveDate) -> bool {
    windows
        .iter()
        .any(|w| &w.resource == inventory && w.covers(date))
}

/// First date of `period` that is blacked out, if any.
pub fn first_maintenance_date(
    windows: &[MaintenanceWindow],
    inventory: &InventoryKey,
    period: &Period,
) -> Option<NaiveDate> {
    period
        .dates()
        .into_iter()
        .find(|date| check_maintenance(windows, inventory, *date))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn hall() -> BookableResource {
        let mut r = BookableResource::new(
            ResourceKey::Venue {
                property_id: "p1".into(),
                venue_id: "hall".into(),
            },
            Some(50_000.0),
        );
        r.capacity.insert("seated".into(), 120);
        r.capacity.insert("cocktail".into(), 200);
        r
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    #[test]
    fn capacity_within_limit() {
        let info = check_capacity(&hall(), "seated", 120);
        assert!(info.has_capacity);
        assert_eq!(info.available_capacity, 120);
        assert_eq!(info.required_capacity, 120);
    }

    #[test]
    fn capacity_exceeded() {
        let info = check_capacity(&hall(), "seated", 121);
        assert!(!info.has_capacity);
    }

    #[test]
    fn unknown_layout_fails_closed() {
        let info = check_capacity(&hall(), "theatre", 1);
        assert!(!info.has_capacity);
        assert_eq!(info.available_capacity, 0);
    }

    #[test]
    fn maintenance_only_applies_to_its_inventory() {
        let hall_key = hall().key.inventory_key();
        let other = InventoryKey::Venue {
            property_id: "p1".into(),
            venue_id: "lawn".into(),
        };
        let windows = vec![MaintenanceWindow {
            id: Ulid::new(),
            resource: hall_key.clone(),
            start_date: d(10),
            end_date: d(12),
            active: true,
            reason: Some("carpet".into()),
        }];
        assert!(check_maintenance(&windows, &hall_key, d(10)));
        assert!(check_maintenance(&windows, &hall_key, d(12)));
        assert!(!check_maintenance(&windows, &hall_key, d(13)));
        assert!(!check_maintenance(&windows, &other, d(11)));
    }

    #[test]
    fn first_blocked_night_of_a_stay() {
        let key = InventoryKey::RoomCategory {
            property_id: "p1".into(),
            category: "deluxe".into(),
        };
        let windows = vec![MaintenanceWindow {
            id: Ulid::new(),
            resource: key.clone(),
            start_date: d(7),
            end_date: d(8),
            active: true,
            reason: None,
        }];
        let blocked = Period::Stay(DateRange::new(d(5), d(9)));
        assert_eq!(first_maintenance_date(&windows, &key, &blocked), Some(d(7)));
        // Checkout on the first maintenance day does not occupy that night.
        let clear = Period::Stay(DateRange::new(d(4), d(7)));
        assert_eq!(first_maintenance_date(&windows, &key, &clear), None);
    }
}
