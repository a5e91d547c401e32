use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

pub type ReservationId = Ulid;
pub type RuleId = Ulid;
pub type WindowId = Ulid;

/// Half-open calendar range `[from, to)`. `to` is the checkout date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        debug_assert!(from < to, "DateRange from must be before to");
        Self { from, to }
    }

    pub fn nights(&self) -> i64 {
        (self.to - self.from).num_days()
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        other.from < self.to && other.to > self.from
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.from <= date && date < self.to
    }

    /// Every night of the stay, i.e. each date in `[from, to)`.
    pub fn night_dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.from.iter_days().take_while(move |d| *d < self.to)
    }
}

/// Half-open time-of-day slot `[start, end)` on a single date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "TimeSlot start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Venue conflict test. The candidate (`self`) conflicts with `existing`
    /// when its start falls strictly inside the existing slot, its end falls
    /// strictly inside it, or it fully contains it. Slots that only touch at
    /// a boundary do not conflict.
    pub fn conflicts_with(&self, existing: &TimeSlot) -> bool {
        let start_inside = self.start > existing.start && self.start < existing.end;
        let end_inside = self.end > existing.start && self.end < existing.end;
        let contains = self.start <= existing.start && self.end >= existing.end;
        start_inside || end_inside || contains
    }
}

/// What a reservation occupies: a multi-night stay or a same-day event slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Stay(DateRange),
    Event { date: NaiveDate, slot: TimeSlot },
}

impl Period {
    /// Sort key: first date, then start time (stays sort before events on the same date).
    pub fn start_key(&self) -> (NaiveDate, Option<NaiveTime>) {
        match self {
            Period::Stay(range) => (range.from, None),
            Period::Event { date, slot } => (*date, Some(slot.start)),
        }
    }

    /// Whether a candidate period conflicts with an existing one.
    /// Stays and events never conflict with each other.
    pub fn conflicts_with(&self, existing: &Period) -> bool {
        match (self, existing) {
            (Period::Stay(candidate), Period::Stay(other)) => candidate.overlaps(other),
            (
                Period::Event { date, slot },
                Period::Event {
                    date: other_date,
                    slot: other_slot,
                },
            ) => date == other_date && slot.conflicts_with(other_slot),
            _ => false,
        }
    }

    /// Calendar dates this period occupies (nights for stays, the event date otherwise).
    pub fn dates(&self) -> Vec<NaiveDate> {
        match self {
            Period::Stay(range) => range.night_dates().collect(),
            Period::Event { date, .. } => vec![*date],
        }
    }

    pub fn is_stay(&self) -> bool {
        matches!(self, Period::Stay(_))
    }
}

/// Meal-inclusion tier of a room rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PlanCode {
    /// Room only.
    Ep,
    /// Room + breakfast.
    Cp,
    /// Room + breakfast + dinner.
    Map,
    /// All meals.
    Ap,
}

impl PlanCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanCode::Ep => "EP",
            PlanCode::Cp => "CP",
            PlanCode::Map => "MAP",
            PlanCode::Ap => "AP",
        }
    }
}

impl FromStr for PlanCode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EP" => Ok(PlanCode::Ep),
            "CP" => Ok(PlanCode::Cp),
            "MAP" => Ok(PlanCode::Map),
            "AP" => Ok(PlanCode::Ap),
            _ => Err(EngineError::UnknownPlanCode(s.to_string())),
        }
    }
}

impl TryFrom<String> for PlanCode {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PlanCode> for String {
    fn from(plan: PlanCode) -> Self {
        plan.as_str().to_string()
    }
}

impl fmt::Display for PlanCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guest-count tier a room rate is defined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyCode {
    Single,
    Double,
    Triple,
    Quad,
}

impl OccupancyCode {
    /// Guests per room included in the rate.
    pub fn included_guests(&self) -> u32 {
        match self {
            OccupancyCode::Single => 1,
            OccupancyCode::Double => 2,
            OccupancyCode::Triple => 3,
            OccupancyCode::Quad => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Meal {
    Breakfast,
    Lunch,
    Dinner,
}

impl fmt::Display for Meal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Meal::Breakfast => "breakfast",
            Meal::Lunch => "lunch",
            Meal::Dinner => "dinner",
        })
    }
}

/// Identity of a bookable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKey {
    Room {
        property_id: String,
        category: String,
        plan: PlanCode,
        occupancy: OccupancyCode,
    },
    Venue {
        property_id: String,
        venue_id: String,
    },
}

impl ResourceKey {
    pub fn property_id(&self) -> &str {
        match self {
            ResourceKey::Room { property_id, .. } | ResourceKey::Venue { property_id, .. } => {
                property_id
            }
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            ResourceKey::Room { category, .. } => Some(category),
            ResourceKey::Venue { .. } => None,
        }
    }

    pub fn plan(&self) -> Option<PlanCode> {
        match self {
            ResourceKey::Room { plan, .. } => Some(*plan),
            ResourceKey::Venue { .. } => None,
        }
    }

    pub fn is_venue(&self) -> bool {
        matches!(self, ResourceKey::Venue { .. })
    }

    /// The physical inventory this key draws from. Every plan/occupancy rate of
    /// one room category shares the same rooms.
    pub fn inventory_key(&self) -> InventoryKey {
        match self {
            ResourceKey::Room {
                property_id,
                category,
                ..
            } => InventoryKey::RoomCategory {
                property_id: property_id.clone(),
                category: category.clone(),
            },
            ResourceKey::Venue {
                property_id,
                venue_id,
            } => InventoryKey::Venue {
                property_id: property_id.clone(),
                venue_id: venue_id.clone(),
            },
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Room {
                property_id,
                category,
                plan,
                occupancy,
            } => write!(f, "{property_id}/room/{category}/{plan}/{occupancy:?}"),
            ResourceKey::Venue {
                property_id,
                venue_id,
            } => write!(f, "{property_id}/venue/{venue_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryKey {
    RoomCategory { property_id: String, category: String },
    Venue { property_id: String, venue_id: String },
}

impl fmt::Display for InventoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventoryKey::RoomCategory {
                property_id,
                category,
            } => write!(f, "{property_id}/room/{category}"),
            InventoryKey::Venue {
                property_id,
                venue_id,
            } => write!(f, "{property_id}/venue/{venue_id}"),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}

/// Price and capacity configuration of one bookable resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookableResource {
    pub key: ResourceKey,
    #[serde(default)]
    pub name: Option<String>,
    /// Per night for rooms, per event for venues. `None` is missing configuration.
    #[serde(default)]
    pub base_price: Option<f64>,
    /// Seating limit per layout style (`seated`, `theatre`, `cocktail`, ...).
    #[serde(default)]
    pub capacity: BTreeMap<String, u32>,
    /// Physical rooms in the category, shared by all of its rates. A rate that
    /// omits it inherits the category count; `None` throughout means a single unit.
    #[serde(default)]
    pub inventory: Option<u32>,
    /// Charge per extra guest per night.
    #[serde(default)]
    pub extra_guest_charge: f64,
    /// Guests included per room (rooms) or per event (venues).
    #[serde(default)]
    pub free_guest_limit: Option<u32>,
    /// Price per guest per night for each offered meal.
    #[serde(default)]
    pub meal_prices: BTreeMap<Meal, f64>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl BookableResource {
    pub fn new(key: ResourceKey, base_price: Option<f64>) -> Self {
        Self {
            key,
            name: None,
            base_price,
            capacity: BTreeMap::new(),
            inventory: None,
            extra_guest_charge: 0.0,
            free_guest_limit: None,
            meal_prices: BTreeMap::new(),
            active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    /// Terminal reservations are kept for audit but never block inventory.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Cancelled | ReservationStatus::Completed)
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Confirmed, Completed)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        })
    }
}

/// An existing commitment against a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub resource: ResourceKey,
    pub period: Period,
    pub status: ReservationStatus,
    pub guest_count: u32,
    #[serde(default = "default_one")]
    pub rooms: u32,
    #[serde(default)]
    pub layout_style: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Operations-owned blackout, inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub id: WindowId,
    pub resource: InventoryKey,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl MaintenanceWindow {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.active && self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Resource(ResourceKey),
    Category { property_id: String, category: String },
    Property { property_id: String },
}

impl RuleScope {
    /// Higher is more specific; the most specific matching level overrides the rest.
    pub fn specificity(&self) -> u8 {
        match self {
            RuleScope::Resource(_) => 2,
            RuleScope::Category { .. } => 1,
            RuleScope::Property { .. } => 0,
        }
    }

    pub fn matches(&self, key: &ResourceKey) -> bool {
        match self {
            RuleScope::Resource(scoped) => scoped == key,
            RuleScope::Category {
                property_id,
                category,
            } => key.property_id() == property_id && key.category() == Some(category.as_str()),
            RuleScope::Property { property_id } => key.property_id() == property_id,
        }
    }

    pub fn property_id(&self) -> &str {
        match self {
            RuleScope::Resource(key) => key.property_id(),
            RuleScope::Category { property_id, .. } | RuleScope::Property { property_id } => {
                property_id
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Weekend,
    Seasonal,
    LastMinute,
    PeakPeriod,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    Multiplier,
    Percentage,
    FixedAmount,
}

/// One rule's adjustment for a specific plan, as a closed tagged variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Adjustment {
    Multiplier(f64),
    Percentage(f64),
    FixedAmount(f64),
}

/// When a rule applies. Absent conditions match every date; when both are
/// present both must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleCondition {
    /// 0 = Sunday .. 6 = Saturday.
    #[serde(default)]
    pub days_of_week: Option<Vec<u8>>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl RuleCondition {
    pub fn matches(&self, date: NaiveDate) -> bool {
        if let Some(days) = &self.days_of_week {
            let dow = date.weekday().num_days_from_sunday() as u8;
            if !days.contains(&dow) {
                return false;
            }
        }
        if let Some(start) = self.start_date
            && date < start
        {
            return false;
        }
        if let Some(end) = self.end_date
            && date > end
        {
            return false;
        }
        true
    }
}

/// Manager-authored dynamic pricing rule. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRule {
    pub id: RuleId,
    #[serde(default)]
    pub name: Option<String>,
    pub scope: RuleScope,
    pub rule_type: RuleType,
    pub adjustment_type: AdjustmentType,
    /// Adjustment value per plan code.
    #[serde(default)]
    pub values: BTreeMap<PlanCode, f64>,
    /// Used for plans missing from `values`, and for venues.
    #[serde(default)]
    pub default_value: Option<f64>,
    #[serde(default)]
    pub condition: RuleCondition,
    #[serde(default)]
    pub priority: i32,
    /// Stackable winners combine with the best stackable rule of each other type.
    #[serde(default)]
    pub stackable: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl PricingRule {
    /// The adjustment this rule contributes for `plan`, if it defines one.
    pub fn adjustment_for(&self, plan: Option<PlanCode>) -> Option<Adjustment> {
        let value = plan
            .and_then(|p| self.values.get(&p).copied())
            .or(self.default_value)?;
        Some(match self.adjustment_type {
            AdjustmentType::Multiplier => Adjustment::Multiplier(value),
            AdjustmentType::Percentage => Adjustment::Percentage(value),
            AdjustmentType::FixedAmount => Adjustment::FixedAmount(value),
        })
    }
}

/// WAL record format. Flat, externally tagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ResourceUpserted {
        resource: BookableResource,
    },
    MaintenanceAdded {
        window: MaintenanceWindow,
    },
    MaintenanceRemoved {
        id: WindowId,
        inventory: InventoryKey,
    },
    RuleUpserted {
        rule: PricingRule,
    },
    RuleRemoved {
        id: RuleId,
    },
    ReservationPlaced {
        reservation: Reservation,
    },
    ReservationRescheduled {
        id: ReservationId,
        inventory: InventoryKey,
        period: Period,
        guest_count: u32,
        rooms: u32,
    },
    ReservationStatusChanged {
        id: ReservationId,
        inventory: InventoryKey,
        status: ReservationStatus,
    },
}

impl Event {
    /// Inventory an event mutates; `None` for property-level rule events.
    pub fn inventory_key(&self) -> Option<InventoryKey> {
        match self {
            Event::ResourceUpserted { resource } => Some(resource.key.inventory_key()),
            Event::MaintenanceAdded { window } => Some(window.resource.clone()),
            Event::ReservationPlaced { reservation } => Some(reservation.resource.inventory_key()),
            Event::MaintenanceRemoved { inventory, .. }
            | Event::ReservationRescheduled { inventory, .. }
            | Event::ReservationStatusChanged { inventory, .. } => Some(inventory.clone()),
            Event::RuleUpserted { .. } | Event::RuleRemoved { .. } => None,
        }
    }
}
