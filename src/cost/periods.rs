use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use crate::models::{AggregatePeriod, BudgetPeriod};

/// Truncate a timestamp to the start of its aggregate period (UTC)
pub fn truncate(period: AggregatePeriod, ts: DateTime<Utc>) -> DateTime<Utc> {
    match period {
        AggregatePeriod::Hourly => Utc
            .with_ymd_and_hms(ts.year(), ts.month(), ts.day(), ts.hour(), 0, 0)
            .unwrap(),
        AggregatePeriod::Daily => Utc
            .with_ymd_and_hms(ts.year(), ts.month(), ts.day(), 0, 0, 0)
            .unwrap(),
        AggregatePeriod::Monthly => Utc
            .with_ymd_and_hms(ts.year(), ts.month(), 1, 0, 0, 0)
            .unwrap(),
    }
}

/// Start of the budget window containing `now`. Anchored to UTC:
/// weeks start Monday, quarters at Jan/Apr/Jul/Oct 1.
pub fn budget_period_start(period: BudgetPeriod, now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .unwrap();

    match period {
        BudgetPeriod::Daily => midnight,
        BudgetPeriod::Weekly => {
            midnight - Duration::days(now.weekday().num_days_from_monday() as i64)
        }
        BudgetPeriod::Monthly => Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .unwrap(),
        BudgetPeriod::Quarterly => {
            let quarter_month = 1 + 3 * ((now.month() - 1) / 3);
            Utc.with_ymd_and_hms(now.year(), quarter_month, 1, 0, 0, 0)
                .unwrap()
        }
        BudgetPeriod::Yearly => Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0).unwrap(),
    }
}

/// Exclusive end of the budget window beginning at `start`
pub fn budget_period_end(period: BudgetPeriod, start: DateTime<Utc>) -> DateTime<Utc> {
    match period {
        BudgetPeriod::Daily => start + Duration::days(1),
        BudgetPeriod::Weekly => start + Duration::days(7),
        BudgetPeriod::Monthly => add_months(start, 1),
        BudgetPeriod::Quarterly => add_months(start, 3),
        BudgetPeriod::Yearly => Utc
            .with_ymd_and_hms(start.year() + 1, 1, 1, 0, 0, 0)
            .unwrap(),
    }
}

fn add_months(start: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let total = start.month0() + months;
    let year = start.year() + (total / 12) as i32;
    let month = total % 12 + 1;
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()
}
