use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};

const DEFAULT_UTC_OFFSET_HOURS: i32 = 0;

/// Resolves the business date ("today") the pipeline runs against.
///
/// An explicit `YYYY-MM-DD` argument wins; otherwise `now_utc` is shifted into the business
/// calendar configured by `BUSINESS_UTC_OFFSET_HOURS`.
pub fn resolve_business_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    resolve_with_offset(as_of_date_arg, now_utc, configured_offset_hours())
}

fn resolve_with_offset(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
    offset_hours: i32,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid business date '{s}' (expected YYYY-MM-DD)"));
    }

    let offset = chrono::FixedOffset::east_opt(offset_hours * 3600)
        .with_context(|| format!("invalid business UTC offset: {offset_hours}h"))?;
    Ok(now_utc.with_timezone(&offset).date_naive())
}

fn configured_offset_hours() -> i32 {
    std::env::var("BUSINESS_UTC_OFFSET_HOURS")
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok())
        .unwrap_or(DEFAULT_UTC_OFFSET_HOURS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn explicit_date_wins() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        let d = resolve_with_offset(Some("2026-02-01"), now, -6).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
    }

    #[test]
    fn negative_offset_rolls_back_before_local_midnight() {
        // 2026-01-05 03:00 UTC = 2026-01-04 21:00 at UTC-6.
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 3, 0, 0).unwrap();
        let d = resolve_with_offset(None, now, -6).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 1, 4).unwrap());
    }

    #[test]
    fn zero_offset_uses_utc_date() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 3, 0, 0).unwrap();
        let d = resolve_with_offset(None, now, 0).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
    }

    #[test]
    fn rejects_malformed_argument() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 3, 0, 0).unwrap();
        assert!(resolve_with_offset(Some("05/01/2026"), now, 0).is_err());
    }
}
