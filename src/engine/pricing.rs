use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::*;

use super::EngineError;

/// Outcome of resolving the dynamic pricing rules for one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub date: NaiveDate,
    /// Effective multiplier equivalent of every applied adjustment.
    pub multiplier: f64,
    pub applied_rule_id: Option<RuleId>,
    /// Stackable rules of other types combined with the winner.
    pub stacked_rule_ids: Vec<RuleId>,
    /// Another matching rule shared the winner's priority and lost on recency.
    pub tie_broken: bool,
}

impl Resolution {
    fn identity(date: NaiveDate) -> Self {
        Self {
            date,
            multiplier: 1.0,
            applied_rule_id: None,
            stacked_rule_ids: Vec::new(),
            tie_broken: false,
        }
    }
}

/// Convert one adjustment into the multiplier that has the same effect on `base_price`:
///
/// - multiplier: `value`
/// - percentage: `1 + value / 100`
/// - fixed amount: `(base_price + value) / base_price`
pub fn effective_multiplier(adjustment: Adjustment, base_price: f64, rule_id: RuleId) -> Result<f64, EngineError> {
    let not_applicable = |reason: &str| EngineError::RuleNotApplicable {
        rule_id,
        reason: reason.to_string(),
    };
    let m = match adjustment {
        Adjustment::Multiplier(v) => {
            if !v.is_finite() || v < 0.0 {
                return Err(not_applicable("multiplier must be a non-negative number"));
            }
            v
        }
        Adjustment::Percentage(v) => {
            if !v.is_finite() {
                return Err(not_applicable("percentage must be a finite number"));
            }
            1.0 + v / 100.0
        }
        Adjustment::FixedAmount(v) => {
            if !v.is_finite() {
                return Err(not_applicable("fixed amount must be a finite number"));
            }
            if base_price <= 0.0 {
                return Err(not_applicable("fixed amount needs a positive base price"));
            }
            (base_price + v) / base_price
        }
    };
    Ok(m.max(0.0))
}

/// Higher priority wins; ties go to the most recently created rule, then the larger id.
fn rank(a: &PricingRule, b: &PricingRule) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// Resolve the dynamic adjustment for `resource` on `date`.
///
/// Only active rules whose scope covers the resource, whose condition holds on
/// `date`, and which define a value for the resource's plan are considered.
/// The most specific scope level present overrides the broader ones; within
/// it the best-ranked rule wins. A stackable winner additionally multiplies in
/// the best stackable rule of each other rule type. No match yields `1.0`.
pub fn resolve(
    rules: &[PricingRule],
    resource: &ResourceKey,
    date: NaiveDate,
    base_price: f64,
) -> Result<Resolution, EngineError> {
    let plan = resource.plan();
    let matching: Vec<(&PricingRule, Adjustment)> = rules
        .iter()
        .filter(|r| r.is_active && r.scope.matches(resource) && r.condition.matches(date))
        .filter_map(|r| r.adjustment_for(plan).map(|a| (r, a)))
        .collect();

    let Some(top) = matching.iter().map(|(r, _)| r.scope.specificity()).max() else {
        return Ok(Resolution::identity(date));
    };
    let candidates: Vec<(&PricingRule, Adjustment)> = matching
        .into_iter()
        .filter(|(r, _)| r.scope.specificity() == top)
        .collect();

    let Some(&(winner, adjustment)) = candidates.iter().max_by(|a, b| rank(a.0, b.0)) else {
        return Ok(Resolution::identity(date));
    };

    let tie_broken = candidates
        .iter()
        .filter(|(r, _)| r.priority == winner.priority)
        .count()
        > 1;
    if tie_broken {
        debug!(
            rule_id = %winner.id,
            priority = winner.priority,
            %resource,
            %date,
            "pricing rule tie resolved by recency"
        );
    }

    let mut multiplier = effective_multiplier(adjustment, base_price, winner.id)?;
    let mut stacked_rule_ids = Vec::new();

    if winner.stackable {
        let mut best_per_type: BTreeMap<RuleType, (&PricingRule, Adjustment)> = BTreeMap::new();
        for &(rule, adj) in candidates
            .iter()
            .filter(|(r, _)| r.stackable && r.rule_type != winner.rule_type)
        {
            best_per_type
                .entry(rule.rule_type)
                .and_modify(|best| {
                    if rank(rule, best.0) == Ordering::Greater {
                        *best = (rule, adj);
                    }
                })
                .or_insert((rule, adj));
        }
        for (rule, adj) in best_per_type.into_values() {
            multiplier *= effective_multiplier(adj, base_price, rule.id)?;
            stacked_rule_ids.push(rule.id);
        }
    }

    Ok(Resolution {
        date,
        multiplier,
        applied_rule_id: Some(winner.id),
        stacked_rule_ids,
        tie_broken,
    })
}

/// Resolve each date independently.
pub fn resolve_dates(
    rules: &[PricingRule],
    resource: &ResourceKey,
    dates: &[NaiveDate],
    base_price: f64,
) -> Result<Vec<Resolution>, EngineError> {
    dates
        .iter()
        .map(|date| resolve(rules, resource, *date, base_price))
        .collect()
}

/// Mean multiplier across nights. Exact for the calculator because every
/// night carries the same pre-adjustment subtotal.
pub fn mean_multiplier(resolutions: &[Resolution]) -> f64 {
    if resolutions.is_empty() {
        return 1.0;
    }
    resolutions.iter().map(|r| r.multiplier).sum::<f64>() / resolutions.len() as f64
}
