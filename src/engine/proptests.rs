use chrono::{Duration, NaiveDate, NaiveTime};
use proptest::prelude::*;

use crate::model::*;

fn date_range() -> impl Strategy<Value = DateRange> {
    (0i64..400, 1i64..30).prop_map(|(offset, nights)| {
        let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let from = base + Duration::days(offset);
        DateRange::new(from, from + Duration::days(nights))
    })
}

fn time_slot() -> impl Strategy<Value = TimeSlot> {
    // Quarter-hour grid so touching boundaries come up often.
    (0u32..95, 1u32..40).prop_map(|(start, len)| {
        let end = (start + len).min(96);
        let at = |q: u32| {
            if q >= 96 {
                NaiveTime::from_hms_opt(23, 59, 59).unwrap()
            } else {
                NaiveTime::from_hms_opt(q / 4, (q % 4) * 15, 0).unwrap()
            }
        };
        TimeSlot::new(at(start), at(end))
    })
}

proptest! {
    #[test]
    fn stay_overlap_is_symmetric(a in date_range(), b in date_range()) {
        prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
    }

    #[test]
    fn stay_overlap_means_a_shared_night(a in date_range(), b in date_range()) {
        let shared = a.night_dates().any(|n| b.contains_date(n));
        prop_assert_eq!(a.overlaps(&b), shared);
    }

    #[test]
    fn three_clause_slot_test_is_half_open_overlap(a in time_slot(), b in time_slot()) {
        let half_open = a.start < b.end && b.start < a.end;
        prop_assert_eq!(a.conflicts_with(&b), half_open);
        prop_assert_eq!(a.conflicts_with(&b), b.conflicts_with(&a));
    }
}
