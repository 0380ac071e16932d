//! Parking fee computation

use chrono::{DateTime, Local};
use parkgate_api::{Amount, RatePolicy};

/// Fee for a stay from `entry_time` to `exit_time` under `policy`.
///
/// Only whole hours count. Each full day costs `max_daily_rate`. Leftover
/// hours cost `first_hour_rate` for the first and `next_hour_rate` for each
/// one after, and once leftover hours are added the running total is capped at
/// `max_daily_rate`, day charges included. A stay under one hour is free.
///
/// Pure and deterministic. Returns zero when `exit_time <= entry_time`.
pub fn compute_fee(
    entry_time: DateTime<Local>,
    exit_time: DateTime<Local>,
    policy: &RatePolicy,
) -> Amount {
    let total_hours = (exit_time - entry_time).num_hours();
    if total_hours <= 0 {
        return Amount::ZERO;
    }

    let total_hours = total_hours as u64;
    let days = total_hours / 24;
    let remaining_hours = total_hours % 24;

    let mut fee = policy.max_daily_rate.saturating_mul(days);

    if remaining_hours > 0 {
        fee = fee.saturating_add(policy.first_hour_rate);
        if remaining_hours > 1 {
            fee = fee.saturating_add(policy.next_hour_rate.saturating_mul(remaining_hours - 1));
        }
        if fee > policy.max_daily_rate {
            fee = policy.max_daily_rate;
        }
    }

    fee
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use parkgate_util::VehicleTypeId;

    fn policy() -> RatePolicy {
        RatePolicy {
            vehicle_type_id: VehicleTypeId(1),
            first_hour_rate: Amount(5000),
            next_hour_rate: Amount(3000),
            max_daily_rate: Amount(40000),
        }
    }

    fn at(day: u32, hour: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, day, hour, min, 0).unwrap()
    }

    #[test]
    fn under_an_hour_is_free() {
        assert_eq!(compute_fee(at(1, 10, 0), at(1, 10, 45), &policy()), Amount(0));
    }

    #[test]
    fn partial_hours_round_down() {
        // 2h30m counts as 2 hours
        assert_eq!(compute_fee(at(1, 9, 0), at(1, 11, 30), &policy()), Amount(8000));
    }

    #[test]
    fn exactly_one_hour() {
        assert_eq!(compute_fee(at(1, 9, 0), at(1, 10, 0), &policy()), Amount(5000));
    }

    #[test]
    fn whole_days_charge_daily_max() {
        assert_eq!(compute_fee(at(1, 9, 0), at(3, 9, 0), &policy()), Amount(80000));
    }

    #[test]
    fn same_day_capped_at_daily_max() {
        // 5000 + 3000 * 20 = 65000 > 40000
        assert_eq!(compute_fee(at(1, 0, 0), at(1, 21, 0), &policy()), Amount(40000));
    }

    #[test]
    fn cap_applies_to_running_total_with_days() {
        // 1 day + 1 hour: 40000 + 5000 exceeds the cap and is reset to it
        assert_eq!(compute_fee(at(1, 9, 0), at(2, 10, 0), &policy()), Amount(40000));
    }

    #[test]
    fn day_charge_kept_without_leftover_hours() {
        // 2 days + 40 minutes: no leftover whole hour, so no cap
        assert_eq!(compute_fee(at(1, 9, 0), at(3, 9, 40), &policy()), Amount(80000));
    }

    #[test]
    fn non_positive_interval_is_zero() {
        assert_eq!(compute_fee(at(1, 9, 0), at(1, 9, 0), &policy()), Amount(0));
        assert_eq!(compute_fee(at(1, 9, 0), at(1, 8, 0), &policy()), Amount(0));
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        let huge = RatePolicy {
            vehicle_type_id: VehicleTypeId(1),
            first_hour_rate: Amount(u64::MAX),
            next_hour_rate: Amount(u64::MAX),
            max_daily_rate: Amount(u64::MAX),
        };
        let entry = at(1, 0, 0);
        let exit = entry + Duration::days(400) + Duration::hours(5);
        assert_eq!(compute_fee(entry, exit, &huge), Amount(u64::MAX));
    }

    #[test]
    fn deterministic() {
        let (entry, exit) = (at(1, 7, 13), at(2, 19, 59));
        let first = compute_fee(entry, exit, &policy());
        for _ in 0..10 {
            assert_eq!(compute_fee(entry, exit, &policy()), first);
        }
    }
}
