use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::Meal;

pub const DEFAULT_TAX_RATE: f64 = 0.12;
pub const DEFAULT_SERVICE_FEE_RATE: f64 = 0.05;

/// Everything the calculator needs. Built fresh per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceComponents {
    pub base_price: f64,
    pub nights: u32,
    pub rooms: u32,
    pub guests: u32,
    pub extra_guest_charge: f64,
    pub free_guest_limit: u32,
    /// Meal → price per guest per night.
    pub meal_addons: BTreeMap<Meal, f64>,
    pub dynamic_multiplier: f64,
    pub discount_percent: f64,
    /// `None` falls back to [`DEFAULT_TAX_RATE`].
    pub tax_rate: Option<f64>,
    /// `None` falls back to [`DEFAULT_SERVICE_FEE_RATE`].
    pub service_fee_rate: Option<f64>,
    /// Replaces the computed tax amount when set.
    pub explicit_taxes: Option<f64>,
    /// Replaces the computed service fee when set.
    pub explicit_service_fee: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealLine {
    pub meal: Meal,
    pub unit_price: f64,
    pub amount: f64,
}

/// Every line of a price computation, at full precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemizedTotal {
    pub base_price: f64,
    pub nights: u32,
    pub rooms: u32,
    pub guests: u32,
    pub room_subtotal: f64,
    pub extra_guests: u32,
    pub extra_guest_total: f64,
    pub meal_lines: Vec<MealLine>,
    pub meal_total: f64,
    pub subtotal: f64,
    pub dynamic_multiplier: f64,
    pub dynamic_adjustment: f64,
    pub subtotal_after_dynamic: f64,
    pub discount_percent: f64,
    pub discount: f64,
    pub tax_rate: f64,
    pub taxes: f64,
    pub service_fee_rate: f64,
    pub service_fee: f64,
    pub total: f64,
}

/// Compose the itemized total. The order of operations is fixed:
///
/// 1. room subtotal = base × nights × rooms
/// 2. extra guests = max(0, guests − free limit), charged per night
/// 3. meals = Σ price × guests × nights
/// 4. subtotal = 1 + 2 + 3
/// 5. dynamic adjustment = subtotal × (multiplier − 1)
/// 6. discount on the adjusted subtotal
/// 7. taxes and 8. service fee on (adjusted subtotal − discount)
/// 9. total
pub fn compute_breakdown(c: &PriceComponents) -> ItemizedTotal {
    let nights = c.nights as f64;
    let guests = c.guests as f64;

    let room_subtotal = c.base_price * nights * c.rooms as f64;

    let extra_guests = c.guests.saturating_sub(c.free_guest_limit);
    let extra_guest_total = extra_guests as f64 * c.extra_guest_charge * nights;

    let meal_lines: Vec<MealLine> = c
        .meal_addons
        .iter()
        .map(|(meal, price)| MealLine {
            meal: *meal,
            unit_price: *price,
            amount: price * guests * nights,
        })
        .collect();
    let meal_total: f64 = meal_lines.iter().map(|l| l.amount).sum();

    let subtotal = room_subtotal + extra_guest_total + meal_total;

    let dynamic_adjustment = subtotal * (c.dynamic_multiplier - 1.0);
    let subtotal_after_dynamic = subtotal + dynamic_adjustment;

    let discount = subtotal_after_dynamic * c.discount_percent / 100.0;
    let taxable = subtotal_after_dynamic - discount;

    let tax_rate = c.tax_rate.unwrap_or(DEFAULT_TAX_RATE);
    let taxes = c.explicit_taxes.unwrap_or(taxable * tax_rate);

    let service_fee_rate = c.service_fee_rate.unwrap_or(DEFAULT_SERVICE_FEE_RATE);
    let service_fee = c.explicit_service_fee.unwrap_or(taxable * service_fee_rate);

    let total = subtotal_after_dynamic - discount + taxes + service_fee;

    ItemizedTotal {
        base_price: c.base_price,
        nights: c.nights,
        rooms: c.rooms,
        guests: c.guests,
        room_subtotal,
        extra_guests,
        extra_guest_total,
        meal_lines,
        meal_total,
        subtotal,
        dynamic_multiplier: c.dynamic_multiplier,
        dynamic_adjustment,
        subtotal_after_dynamic,
        discount_percent: c.discount_percent,
        discount,
        tax_rate,
        taxes,
        service_fee_rate,
        service_fee,
        total,
    }
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

impl ItemizedTotal {
    /// Copy with every currency amount rounded for presentation.
    /// Rates and the multiplier are left at full precision.
    pub fn rounded(&self, decimals: u32) -> ItemizedTotal {
        let r = |v: f64| round_to(v, decimals);
        ItemizedTotal {
            base_price: r(self.base_price),
            room_subtotal: r(self.room_subtotal),
            extra_guest_total: r(self.extra_guest_total),
            meal_lines: self
                .meal_lines
                .iter()
                .map(|l| MealLine {
                    meal: l.meal,
                    unit_price: r(l.unit_price),
                    amount: r(l.amount),
                })
                .collect(),
            meal_total: r(self.meal_total),
            subtotal: r(self.subtotal),
            dynamic_adjustment: r(self.dynamic_adjustment),
            subtotal_after_dynamic: r(self.subtotal_after_dynamic),
            discount: r(self.discount),
            taxes: r(self.taxes),
            service_fee: r(self.service_fee),
            total: r(self.total),
            ..self.clone()
        }
    }
}
