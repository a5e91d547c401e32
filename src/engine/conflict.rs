use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::model::*;

/// A free window on a venue's day, offered when the requested slot is taken.
/// Advisory only: capacity and maintenance are not re-checked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub duration_minutes: i64,
}

/// Active reservations that conflict with `candidate`, ordered by start.
///
/// Cancelled and completed reservations never conflict. `exclude_id` lets an
/// in-place edit re-check without colliding with itself.
pub fn find_conflicts(
    candidate: &Period,
    existing: &[Reservation],
    exclude_id: Option<ReservationId>,
) -> Vec<Reservation> {
    let mut conflicts: Vec<Reservation> = existing
        .iter()
        .filter(|r| r.is_active() && exclude_id != Some(r.id))
        .filter(|r| candidate.conflicts_with(&r.period))
        .cloned()
        .collect();
    conflicts.sort_by_key(|r| (r.period.start_key(), r.id));
    conflicts
}

/// Nights of `range` on which `requested` extra rooms would exceed `inventory`.
///
/// Weighted sweep line: each overlapping stay adds its room count on check-in
/// and releases it on checkout. Releases sort before check-ins on the same
/// date, so a same-day turnover never saturates.
pub fn saturated_nights(
    stays: &[Reservation],
    range: &DateRange,
    inventory: u32,
    requested: u32,
) -> Vec<NaiveDate> {
    if requested > inventory {
        return range.night_dates().collect();
    }

    let mut events: Vec<(NaiveDate, i64)> = Vec::with_capacity(stays.len() * 2);
    for r in stays {
        if let Period::Stay(stay) = r.period {
            events.push((stay.from, r.rooms as i64));
            events.push((stay.to, -(r.rooms as i64)));
        }
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let limit = (inventory - requested) as i64;
    let mut booked: i64 = 0;
    let mut next = 0;
    let mut saturated = Vec::new();
    for night in range.night_dates() {
        while next < events.len() && events[next].0 <= night {
            booked += events[next].1;
            next += 1;
        }
        if booked > limit {
            saturated.push(night);
        }
    }
    saturated
}

/// Free gaps on a venue's `date` inside the operating window `[open, close)`.
///
/// Same-day active bookings are clamped to the window, sorted and merged; the
/// leading gap (window open to first booking), the gaps between consecutive
/// bookings and the trailing gap (last booking to window close) are emitted
/// when they last at least `min_gap_minutes`.
pub fn suggest_slots(
    date: NaiveDate,
    same_day: &[Reservation],
    exclude_id: Option<ReservationId>,
    open: NaiveTime,
    close: NaiveTime,
    min_gap_minutes: i64,
) -> Vec<SuggestedSlot> {
    if open >= close {
        return Vec::new();
    }

    let mut booked: Vec<TimeSlot> = same_day
        .iter()
        .filter(|r| r.is_active() && exclude_id != Some(r.id))
        .filter_map(|r| match r.period {
            Period::Event { date: d, slot } if d == date => Some(slot),
            _ => None,
        })
        .filter(|slot| slot.end > open && slot.start < close)
        .map(|slot| TimeSlot::new(slot.start.max(open), slot.end.min(close)))
        .collect();
    booked.sort_by_key(|s| s.start);
    let booked = merge_overlapping(&booked);

    free_gaps(TimeSlot::new(open, close), &booked)
        .into_iter()
        .filter(|gap| gap.duration_minutes() >= min_gap_minutes)
        .map(|gap| SuggestedSlot {
            start: gap.start,
            end: gap.end,
            duration_minutes: gap.duration_minutes(),
        })
        .collect()
}

/// Merge sorted overlapping/adjacent slots into disjoint slots.
pub fn merge_overlapping(sorted: &[TimeSlot]) -> Vec<TimeSlot> {
    let mut merged: Vec<TimeSlot> = Vec::new();
    for &slot in sorted {
        if let Some(last) = merged.last_mut()
            && slot.start <= last.end
        {
            last.end = last.end.max(slot.end);
            continue;
        }
        merged.push(slot);
    }
    merged
}

/// Free stretches of `window` not covered by `busy`, which must be sorted,
/// disjoint and clamped to the window.
pub fn free_gaps(window: TimeSlot, busy: &[TimeSlot]) -> Vec<TimeSlot> {
    let mut gaps = Vec::with_capacity(busy.len() + 1);
    let mut cursor = window.start;
    for slot in busy {
        if slot.start > cursor {
            gaps.push(TimeSlot::new(cursor, slot.start));
        }
        cursor = cursor.max(slot.end);
    }
    if cursor < window.end {
        gaps.push(TimeSlot::new(cursor, window.end));
    }
    gaps
}
