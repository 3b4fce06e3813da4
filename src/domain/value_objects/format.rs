//! Human-readable formatting helpers shared by the CLI and logging layers.

use chrono::{NaiveDateTime, TimeDelta};

/// The distinguished rendering for "no next run", kept visually distinct
/// from any ordinary (however distant) timestamp.
const NEVER: &str = "--------/----";

/// Renders a timestamp `YYYYMMDD/HHMM`. `None` renders as [`NEVER`] rather
/// than a calendar date, so a template with no further occurrences is never
/// confused with one merely scheduled far in the future.
pub fn format_time(dt: Option<NaiveDateTime>) -> String {
    match dt {
        Some(dt) => dt.format("%Y%m%d/%H%M").to_string(),
        None => NEVER.to_string(),
    }
}

/// Renders a duration as `NdNhNmNs` with each component independently
/// suppressed when zero (no cascading from a nonzero higher unit), and a
/// floor of `0s` when the whole duration is zero.
pub fn format_duration(delta: TimeDelta) -> String {
    let total_seconds = delta.num_seconds().max(0);
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}d"));
    }
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 || out.is_empty() {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn formats_known_timestamp() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(format_time(Some(dt)), "20240301/1230");
    }

    #[test]
    fn formats_none_as_the_infinity_sentinel() {
        assert_eq!(format_time(None), "--------/----");
    }

    #[test]
    fn formats_duration_components_without_cascading() {
        assert_eq!(format_duration(TimeDelta::seconds(0)), "0s");
        assert_eq!(format_duration(TimeDelta::weeks(1)), "7d");
        assert_eq!(
            format_duration(TimeDelta::weeks(1) + TimeDelta::seconds(1)),
            "7d1s"
        );
        assert_eq!(
            format_duration(
                TimeDelta::weeks(1)
                    + TimeDelta::days(2)
                    + TimeDelta::hours(3)
                    + TimeDelta::minutes(4)
                    + TimeDelta::seconds(5)
            ),
            "9d3h4m5s"
        );
    }
}
