mod breakdown;
mod capacity;
mod conflict;
mod error;
mod pricing;
#[cfg(test)]
mod proptests;

pub use breakdown::{
    DEFAULT_SERVICE_FEE_RATE, DEFAULT_TAX_RATE, ItemizedTotal, MealLine, PriceComponents, compute_breakdown, round_to,
};
pub use capacity::{CapacityInfo, DEFAULT_LAYOUT_STYLE, check_capacity, check_maintenance, first_maintenance_date};
pub use conflict::{SuggestedSlot, find_conflicts, free_gaps, merge_overlapping, saturated_nights, suggest_slots};
pub use error::EngineError;
pub(crate) use error::invalid;
pub use pricing::{Resolution, effective_multiplier, mean_multiplier, resolve, resolve_dates};

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::limits::*;
use crate::model::*;

/// Property-wide knobs the pure functions need. Passed in, never global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Venue operating window used for gap suggestions.
    pub day_open: NaiveTime,
    pub day_close: NaiveTime,
    pub min_gap_minutes: i64,
    pub tax_rate: f64,
    pub service_fee_rate: f64,
    /// Minor-unit granularity for presentation rounding (0 = whole units).
    pub currency_decimals: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            day_open: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            day_close: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN),
            min_gap_minutes: 120,
            tax_rate: DEFAULT_TAX_RATE,
            service_fee_rate: DEFAULT_SERVICE_FEE_RATE,
            currency_decimals: 0,
        }
    }
}

fn default_rooms() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityQuery {
    pub resource: ResourceKey,
    pub period: Period,
    #[serde(default)]
    pub guest_count: Option<u32>,
    #[serde(default)]
    pub layout_style: Option<String>,
    #[serde(default = "default_rooms")]
    pub rooms: u32,
    /// Ignore this reservation, for re-checking an in-place edit.
    #[serde(default)]
    pub exclude_reservation_id: Option<ReservationId>,
}

/// Caller-supplied adjustments on top of the configured price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingOverrides {
    #[serde(default)]
    pub discount_percent: f64,
    #[serde(default)]
    pub explicit_taxes: Option<f64>,
    #[serde(default)]
    pub explicit_service_fee: Option<f64>,
    #[serde(default)]
    pub tax_rate: Option<f64>,
    #[serde(default)]
    pub service_fee_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub resource: ResourceKey,
    pub period: Period,
    pub guests: u32,
    #[serde(default = "default_rooms")]
    pub rooms: u32,
    #[serde(default)]
    pub meals: Vec<Meal>,
    #[serde(default)]
    pub pricing: PricingOverrides,
}

/// The combined "is it free, and what would it cost" request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub resource: ResourceKey,
    pub period: Period,
    pub guests: u32,
    #[serde(default = "default_rooms")]
    pub rooms: u32,
    #[serde(default)]
    pub layout_style: Option<String>,
    #[serde(default)]
    pub exclude_reservation_id: Option<ReservationId>,
    #[serde(default)]
    pub meals: Vec<Meal>,
    #[serde(default)]
    pub pricing: PricingOverrides,
}

impl BookingRequest {
    pub fn availability_query(&self) -> AvailabilityQuery {
        AvailabilityQuery {
            resource: self.resource.clone(),
            period: self.period,
            guest_count: Some(self.guests),
            layout_style: self.layout_style.clone(),
            rooms: self.rooms,
            exclude_reservation_id: self.exclude_reservation_id,
        }
    }

    pub fn quote_request(&self) -> QuoteRequest {
        QuoteRequest {
            resource: self.resource.clone(),
            period: self.period,
            guests: self.guests,
            rooms: self.rooms,
            meals: self.meals.clone(),
            pricing: self.pricing.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub is_available: bool,
    pub conflicting_reservations: Vec<Reservation>,
    pub capacity_info: Option<CapacityInfo>,
    pub suggested_slots: Vec<SuggestedSlot>,
    /// Every failing clause, in evaluation order.
    pub reasons_unavailable: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteFlag {
    /// No base price configured; the quote was computed from zero.
    MissingBasePrice,
    /// At least one night was decided by the recency tie-break.
    RuleTieBroken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub breakdown: ItemizedTotal,
    /// One resolution per priced date, for audit.
    pub nightly: Vec<Resolution>,
    pub flags: Vec<QuoteFlag>,
}

impl Quote {
    pub fn rounded(&self, decimals: u32) -> Quote {
        Quote {
            breakdown: self.breakdown.rounded(decimals),
            ..self.clone()
        }
    }
}

/// Why pricing failed while availability was still decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingFault {
    pub kind: String,
    pub message: String,
}

impl From<&EngineError> for PricingFault {
    fn from(err: &EngineError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityAndQuote {
    pub availability: AvailabilityResult,
    /// `None` when unavailable or when pricing failed.
    pub quote: Option<Quote>,
    pub pricing_error: Option<PricingFault>,
}

// ── Validation ───────────────────────────────────────────

fn validate_target(resource: &BookableResource, key: &ResourceKey, period: &Period) -> Result<(), EngineError> {
    if &resource.key != key {
        return Err(invalid(format!(
            "resource record {} does not match requested {}",
            resource.key, key
        )));
    }
    match (key.is_venue(), period) {
        (true, Period::Stay(_)) => return Err(invalid("venues are booked by event date and time slot")),
        (false, Period::Event { .. }) => return Err(invalid("rooms are booked by date range")),
        _ => {}
    }
    match period {
        Period::Stay(range) => {
            if range.from >= range.to {
                return Err(invalid("date_to must be after date_from"));
            }
            if range.nights() > MAX_STAY_NIGHTS {
                return Err(EngineError::LimitExceeded("stay too long"));
            }
        }
        Period::Event { slot, .. } => {
            if slot.start >= slot.end {
                return Err(invalid("end_time must be after start_time"));
            }
        }
    }
    Ok(())
}

fn validate_counts(guests: Option<u32>, rooms: u32) -> Result<(), EngineError> {
    if let Some(guests) = guests {
        if guests == 0 {
            return Err(invalid("guest count must be positive"));
        }
        if guests > MAX_GUESTS {
            return Err(EngineError::LimitExceeded("too many guests"));
        }
    }
    if rooms == 0 {
        return Err(invalid("room count must be positive"));
    }
    if rooms > MAX_ROOMS_PER_REQUEST {
        return Err(EngineError::LimitExceeded("too many rooms"));
    }
    Ok(())
}

fn validate_rate(name: &str, value: Option<f64>) -> Result<(), EngineError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(invalid(format!("{name} must be a non-negative number"))),
        _ => Ok(()),
    }
}

fn validate_quote(resource: &BookableResource, request: &QuoteRequest) -> Result<(), EngineError> {
    validate_target(resource, &request.resource, &request.period)?;
    validate_counts(Some(request.guests), request.rooms)?;
    let p = &request.pricing;
    if !p.discount_percent.is_finite() || !(0.0..=100.0).contains(&p.discount_percent) {
        return Err(invalid("discount_percent must be between 0 and 100"));
    }
    validate_rate("tax_rate", p.tax_rate)?;
    validate_rate("service_fee_rate", p.service_fee_rate)?;
    validate_rate("explicit_taxes", p.explicit_taxes)?;
    validate_rate("explicit_service_fee", p.explicit_service_fee)?;
    Ok(())
}

// ── Operations ───────────────────────────────────────────

fn join_dates(dates: &[NaiveDate]) -> String {
    dates.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
}

/// Decide whether `query` can be satisfied.
///
/// `reservations` may hold every reservation of the resource's inventory,
/// terminal ones included; they are filtered here. The verdict is provisional:
/// callers must commit through a conditional insert.
pub fn check_availability(
    resource: &BookableResource,
    query: &AvailabilityQuery,
    reservations: &[Reservation],
    maintenance: &[MaintenanceWindow],
    policy: &Policy,
) -> Result<AvailabilityResult, EngineError> {
    validate_target(resource, &query.resource, &query.period)?;
    validate_counts(query.guest_count, query.rooms)?;
    if let Some(style) = &query.layout_style
        && style.len() > MAX_LAYOUT_STYLE_LEN
    {
        return Err(EngineError::LimitExceeded("layout style too long"));
    }

    let inventory = resource.key.inventory_key();
    let same_inventory: Vec<Reservation> = reservations
        .iter()
        .filter(|r| r.resource.inventory_key() == inventory)
        .cloned()
        .collect();

    let mut reasons = Vec::new();
    if !resource.active {
        reasons.push("resource is inactive".to_string());
    }

    let overlapping = find_conflicts(&query.period, &same_inventory, query.exclude_reservation_id);
    let mut conflicting = Vec::new();
    match &query.period {
        Period::Stay(range) => {
            let units = resource.inventory.unwrap_or(1);
            if query.rooms > units {
                reasons.push(format!("requested {} rooms but only {} exist", query.rooms, units));
            } else {
                let full = saturated_nights(&overlapping, range, units, query.rooms);
                if !full.is_empty() {
                    reasons.push(format!("no rooms left on {}", join_dates(&full)));
                    conflicting = overlapping;
                }
            }
        }
        Period::Event { .. } => {
            if !overlapping.is_empty() {
                reasons.push(format!(
                    "time conflict with {} existing reservation(s)",
                    overlapping.len()
                ));
                conflicting = overlapping;
            }
        }
    }

    let capacity_info = query.guest_count.and_then(|guests| {
        let style = query
            .layout_style
            .as_deref()
            .or(resource.key.is_venue().then_some(DEFAULT_LAYOUT_STYLE))?;
        Some(check_capacity(resource, style, guests))
    });
    if let Some(info) = &capacity_info
        && !info.has_capacity
    {
        reasons.push(format!(
            "{} guests exceed the {} capacity of {}",
            info.required_capacity, info.layout_style, info.available_capacity
        ));
    }

    if let Some(date) = first_maintenance_date(maintenance, &inventory, &query.period) {
        reasons.push(format!("under maintenance on {date}"));
    }

    let suggested_slots = match query.period {
        Period::Event { date, .. } if !conflicting.is_empty() => suggest_slots(
            date,
            &same_inventory,
            query.exclude_reservation_id,
            policy.day_open,
            policy.day_close,
            policy.min_gap_minutes,
        ),
        _ => Vec::new(),
    };

    let is_available = reasons.is_empty();
    debug!(
        resource = %resource.key,
        is_available,
        conflicts = conflicting.len(),
        "availability checked"
    );

    Ok(AvailabilityResult {
        is_available,
        conflicting_reservations: conflicting,
        capacity_info,
        suggested_slots,
        reasons_unavailable: reasons,
    })
}

/// Price `request` against `resource` and the already-fetched `rules`.
///
/// Rooms resolve rules once per night and apply the mean multiplier; venues
/// resolve once for the event date and are priced as a single unit.
pub fn quote_price(
    resource: &BookableResource,
    request: &QuoteRequest,
    rules: &[PricingRule],
    policy: &Policy,
) -> Result<Quote, EngineError> {
    validate_quote(resource, request)?;

    let mut flags = Vec::new();
    let base_price = match resource.base_price {
        Some(p) if p.is_finite() && p >= 0.0 => p,
        Some(p) => {
            return Err(EngineError::MissingConfiguration(format!(
                "base price {p} of {} is not a valid amount",
                resource.key
            )));
        }
        None => {
            warn!(resource = %resource.key, "no base price configured, quoting from zero");
            flags.push(QuoteFlag::MissingBasePrice);
            0.0
        }
    };

    let (nights, rooms, dates) = match &request.period {
        Period::Stay(range) => (range.nights() as u32, request.rooms, range.night_dates().collect::<Vec<_>>()),
        Period::Event { date, .. } => (1, 1, vec![*date]),
    };

    let nightly = resolve_dates(rules, &resource.key, &dates, base_price)?;
    if nightly.iter().any(|r| r.tie_broken) {
        flags.push(QuoteFlag::RuleTieBroken);
    }

    let free_guest_limit = match &resource.key {
        ResourceKey::Room { occupancy, .. } => resource
            .free_guest_limit
            .unwrap_or(occupancy.included_guests())
            .saturating_mul(rooms),
        ResourceKey::Venue { .. } => resource.free_guest_limit.unwrap_or(request.guests),
    };

    let mut meal_addons = BTreeMap::new();
    for meal in &request.meals {
        let price = resource.meal_prices.get(meal).copied().ok_or_else(|| {
            EngineError::MissingConfiguration(format!("{meal} is not offered for {}", resource.key))
        })?;
        meal_addons.insert(*meal, price);
    }

    let pricing = &request.pricing;
    let components = PriceComponents {
        base_price,
        nights,
        rooms,
        guests: request.guests,
        extra_guest_charge: resource.extra_guest_charge,
        free_guest_limit,
        meal_addons,
        dynamic_multiplier: mean_multiplier(&nightly),
        discount_percent: pricing.discount_percent,
        tax_rate: Some(pricing.tax_rate.unwrap_or(policy.tax_rate)),
        service_fee_rate: Some(pricing.service_fee_rate.unwrap_or(policy.service_fee_rate)),
        explicit_taxes: pricing.explicit_taxes,
        explicit_service_fee: pricing.explicit_service_fee,
    };

    Ok(Quote {
        breakdown: compute_breakdown(&components),
        nightly,
        flags,
    })
}

/// Availability first; pricing only when available.
///
/// Malformed requests fail the whole call before anything is evaluated. A
/// pricing fault after that leaves the availability verdict intact and is
/// reported in `pricing_error`.
pub fn check_availability_and_quote(
    resource: &BookableResource,
    request: &BookingRequest,
    reservations: &[Reservation],
    maintenance: &[MaintenanceWindow],
    rules: &[PricingRule],
    policy: &Policy,
) -> Result<AvailabilityAndQuote, EngineError> {
    let quote_request = request.quote_request();
    validate_quote(resource, &quote_request)?;

    let availability = check_availability(
        resource,
        &request.availability_query(),
        reservations,
        maintenance,
        policy,
    )?;
    if !availability.is_available {
        return Ok(AvailabilityAndQuote {
            availability,
            quote: None,
            pricing_error: None,
        });
    }

    match quote_price(resource, &quote_request, rules, policy) {
        Ok(quote) => Ok(AvailabilityAndQuote {
            availability,
            quote: Some(quote),
            pricing_error: None,
        }),
        Err(err) => {
            warn!(resource = %resource.key, error = %err, "pricing failed for available resource");
            Ok(AvailabilityAndQuote {
                availability,
                quote: None,
                pricing_error: Some(PricingFault::from(&err)),
            })
        }
    }
}

/// Annotate an availability verdict when the rules could not be fetched.
pub fn pricing_unavailable(availability: AvailabilityResult, message: impl Into<String>) -> AvailabilityAndQuote {
    AvailabilityAndQuote {
        availability,
        quote: None,
        pricing_error: Some(PricingFault {
            kind: "repository_unavailable".to_string(),
            message: message.into(),
        }),
    }
}
