use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};

use crate::model::*;

/// Everything that draws on one physical inventory: a room category (every
/// plan/occupancy rate of it) or a single venue.
#[derive(Debug, Clone)]
pub struct InventoryState {
    pub key: InventoryKey,
    pub resources: BTreeMap<ResourceKey, BookableResource>,
    /// Sorted by `(period.start_key(), id)`. Terminal reservations stay for audit.
    pub reservations: Vec<Reservation>,
    pub maintenance: Vec<MaintenanceWindow>,
}

/// `[first, last)` calendar dates a period occupies.
fn date_span(period: &Period) -> (NaiveDate, NaiveDate) {
    match period {
        Period::Stay(range) => (range.from, range.to),
        Period::Event { date, .. } => (*date, date.checked_add_days(Days::new(1)).unwrap_or(*date)),
    }
}

impl InventoryState {
    pub fn new(key: InventoryKey) -> Self {
        Self {
            key,
            resources: BTreeMap::new(),
            reservations: Vec::new(),
            maintenance: Vec::new(),
        }
    }

    fn sort_key(r: &Reservation) -> (NaiveDate, Option<chrono::NaiveTime>, ReservationId) {
        let (date, time) = r.period.start_key();
        (date, time, r.id)
    }

    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let key = Self::sort_key(&reservation);
        let pos = self.reservations.partition_point(|r| Self::sort_key(r) < key);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: ReservationId) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Active reservations whose dates overlap the dates of `period`.
    pub fn on_dates(&self, period: &Period) -> Vec<Reservation> {
        let (from, to) = date_span(period);
        // Sorted by start date, so nothing past `to` can overlap.
        let end = self.reservations.partition_point(|r| r.period.start_key().0 < to);
        self.reservations[..end]
            .iter()
            .filter(|r| r.is_active())
            .filter(|r| {
                let (r_from, r_to) = date_span(&r.period);
                r_from < to && r_to > from
            })
            .cloned()
            .collect()
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::ResourceUpserted { resource } => {
                let mut resource = resource.clone();
                // Every rate of a category draws on one stock: a declared count
                // applies to all of them, an omitted one inherits it.
                match resource.inventory {
                    Some(count) => {
                        for other in self.resources.values_mut() {
                            other.inventory = Some(count);
                        }
                    }
                    None => {
                        resource.inventory = self
                            .resources
                            .iter()
                            .filter(|(key, _)| **key != resource.key)
                            .find_map(|(_, other)| other.inventory);
                    }
                }
                self.resources.insert(resource.key.clone(), resource);
            }
            Event::MaintenanceAdded { window } => {
                self.maintenance.retain(|w| w.id != window.id);
                self.maintenance.push(window.clone());
            }
            Event::MaintenanceRemoved { id, .. } => {
                self.maintenance.retain(|w| w.id != *id);
            }
            Event::ReservationPlaced { reservation } => {
                self.remove_reservation(reservation.id);
                self.insert_reservation(reservation.clone());
            }
            Event::ReservationRescheduled {
                id,
                period,
                guest_count,
                rooms,
                ..
            } => {
                if let Some(mut r) = self.remove_reservation(*id) {
                    r.period = *period;
                    r.guest_count = *guest_count;
                    r.rooms = *rooms;
                    self.insert_reservation(r);
                }
            }
            Event::ReservationStatusChanged { id, status, .. } => {
                if let Some(r) = self.reservations.iter_mut().find(|r| r.id == *id) {
                    r.status = *status;
                }
            }
            Event::RuleUpserted { .. } | Event::RuleRemoved { .. } => {}
        }
    }

    /// Minimal events that rebuild this inventory.
    pub fn snapshot(&self, out: &mut Vec<Event>) {
        out.extend(
            self.resources
                .values()
                .map(|resource| Event::ResourceUpserted { resource: resource.clone() }),
        );
        out.extend(
            self.maintenance
                .iter()
                .map(|window| Event::MaintenanceAdded { window: window.clone() }),
        );
        out.extend(
            self.reservations
                .iter()
                .map(|reservation| Event::ReservationPlaced { reservation: reservation.clone() }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use ulid::Ulid;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, day).unwrap()
    }

    fn key() -> ResourceKey {
        ResourceKey::Venue {
            property_id: "p1".into(),
            venue_id: "terrace".into(),
        }
    }

    fn at(day: u32, h: u32) -> Reservation {
        Reservation {
            id: Ulid::new(),
            resource: key(),
            period: Period::Event {
                date: d(day),
                slot: TimeSlot::new(
                    NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
                    NaiveTime::from_hms_opt(h + 1, 0, 0).unwrap(),
                ),
            },
            status: ReservationStatus::Confirmed,
            guest_count: 10,
            rooms: 1,
            layout_style: None,
            label: None,
        }
    }

    #[test]
    fn reservations_stay_sorted() {
        let mut state = InventoryState::new(key().inventory_key());
        for r in [at(3, 10), at(1, 15), at(1, 9), at(2, 12)] {
            state.insert_reservation(r);
        }
        let keys: Vec<_> = state.reservations.iter().map(|r| r.period.start_key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn on_dates_skips_terminal_and_other_days() {
        let mut state = InventoryState::new(key().inventory_key());
        let keep = at(2, 9);
        let mut cancelled = at(2, 11);
        cancelled.status = ReservationStatus::Cancelled;
        state.insert_reservation(keep.clone());
        state.insert_reservation(cancelled);
        state.insert_reservation(at(3, 9));
        let found = state.on_dates(&at(2, 15).period);
        assert_eq!(found, vec![keep]);
    }

    #[test]
    fn reschedule_resorts() {
        let mut state = InventoryState::new(key().inventory_key());
        let first = at(1, 9);
        let second = at(2, 9);
        state.insert_reservation(first.clone());
        state.insert_reservation(second.clone());
        state.apply(&Event::ReservationRescheduled {
            id: first.id,
            inventory: state.key.clone(),
            period: at(5, 9).period,
            guest_count: 12,
            rooms: 1,
        });
        assert_eq!(state.reservations[0].id, second.id);
        assert_eq!(state.reservations[1].id, first.id);
        assert_eq!(state.reservations[1].guest_count, 12);
    }

    #[test]
    fn rates_share_category_stock() {
        let rate = |plan| {
            let mut r = BookableResource::new(
                ResourceKey::Room {
                    property_id: "p1".into(),
                    category: "suite".into(),
                    plan,
                    occupancy: OccupancyCode::Double,
                },
                Some(900.0),
            );
            r.inventory = None;
            r
        };
        let mut ep = rate(PlanCode::Ep);
        ep.inventory = Some(5);
        let mut state = InventoryState::new(ep.key.inventory_key());
        state.apply(&Event::ResourceUpserted { resource: ep.clone() });
        state.apply(&Event::ResourceUpserted {
            resource: rate(PlanCode::Cp),
        });
        assert_eq!(state.resources[&rate(PlanCode::Cp).key].inventory, Some(5));

        // A new count on any rate resizes the whole category.
        let mut map = rate(PlanCode::Map);
        map.inventory = Some(2);
        state.apply(&Event::ResourceUpserted { resource: map });
        assert!(state.resources.values().all(|r| r.inventory == Some(2)));

        // A lone rate can still drop back to a single unit.
        let mut solo = InventoryState::new(ep.key.inventory_key());
        solo.apply(&Event::ResourceUpserted { resource: ep.clone() });
        solo.apply(&Event::ResourceUpserted {
            resource: BookableResource { inventory: None, ..ep.clone() },
        });
        assert_eq!(solo.resources[&ep.key].inventory, None);
    }

    #[test]
    fn snapshot_replays_to_same_state() {
        let mut state = InventoryState::new(key().inventory_key());
        state.apply(&Event::ResourceUpserted {
            resource: BookableResource::new(key(), Some(100.0)),
        });
        let r = at(4, 10);
        state.apply(&Event::ReservationPlaced { reservation: r.clone() });
        state.apply(&Event::ReservationStatusChanged {
            id: r.id,
            inventory: state.key.clone(),
            status: ReservationStatus::Cancelled,
        });

        let mut events = Vec::new();
        state.snapshot(&mut events);
        let mut rebuilt = InventoryState::new(key().inventory_key());
        for e in &events {
            rebuilt.apply(e);
        }
        assert_eq!(rebuilt.resources, state.resources);
        assert_eq!(rebuilt.reservations, state.reservations);
        assert_eq!(rebuilt.reservations[0].status, ReservationStatus::Cancelled);
    }
}
