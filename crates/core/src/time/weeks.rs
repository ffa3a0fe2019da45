use crate::domain::recommendation::WeekLevelSale;
use chrono::{Duration, NaiveDate};

/// Contiguous 7-day windows `[today + 7i, today + 7i + 6]` covering `today..=oos_date`.
/// The last window is cut off at `oos_date`.
pub fn week_windows(today: NaiveDate, oos_date: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    if oos_date < today {
        return Vec::new();
    }

    let weeks = (oos_date - today).num_days() / 7 + 1;
    (0..weeks)
        .map(|i| {
            let start = today + Duration::days(i * 7);
            let end = if i == weeks - 1 {
                oos_date
            } else {
                start + Duration::days(6)
            };
            (start, end)
        })
        .collect()
}

/// Maps per-week unit predictions onto calendar windows. The final entry always ends at
/// `oos_date`, whatever the number of predicted weeks.
pub fn week_level_sales(today: NaiveDate, oos_date: NaiveDate, units: &[f64]) -> Vec<WeekLevelSale> {
    let n = units.len();
    units
        .iter()
        .enumerate()
        .map(|(i, &u)| {
            let start = today + Duration::days(i as i64 * 7);
            let end = if i + 1 == n {
                oos_date
            } else {
                start + Duration::days(6)
            };
            WeekLevelSale {
                start_date: start,
                end_date: end,
                expected_sale_units: u,
            }
        })
        .collect()
}
