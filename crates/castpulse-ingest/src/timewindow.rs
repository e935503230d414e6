use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use castpulse_core::types::TimeWindow;

const LIVE_PADDING_MINUTES: i64 = 15;
const LIVE_DURATION_HOURS: i64 = 3;
/// West-coast broadcasts trail the east coast by three hours; the
/// shifted air time stands in for a Pacific feed.
const PACIFIC_OFFSET_HOURS: i64 = 3;

fn pacific_offset() -> Duration {
    Duration::hours(PACIFIC_OFFSET_HOURS)
}

/// Assign a temporal window relative to the episode air time.
///
/// LIVE covers `[air − 15m, air + 3h]`, checked against the configured
/// primary zone's air time and — when that zone is Eastern — against
/// the Pacific-shifted air time. DAY_OF covers the two calendar days
/// from local midnight of the air date, again in both zones. Anything
/// later is AFTER; no air time means no window.
pub fn determine_time_window(
    comment_utc: DateTime<Utc>,
    air_time_utc: Option<DateTime<Utc>>,
    timezone: &str,
) -> Option<TimeWindow> {
    let air_time_utc = air_time_utc?;
    let primary_zone = resolve_zone(timezone);
    let check_pacific = is_eastern(timezone);

    if is_live(comment_utc, air_time_utc)
        || (check_pacific && is_live(comment_utc, air_time_utc + pacific_offset()))
    {
        return Some(TimeWindow::Live);
    }

    if is_day_of(comment_utc, air_time_utc, primary_zone)
        || (check_pacific
            && is_day_of(
                comment_utc,
                air_time_utc + pacific_offset(),
                chrono_tz::America::Los_Angeles,
            ))
    {
        return Some(TimeWindow::DayOf);
    }

    Some(TimeWindow::After)
}

fn resolve_zone(timezone: &str) -> Tz {
    timezone
        .parse::<Tz>()
        .unwrap_or(chrono_tz::America::New_York)
}

fn is_eastern(timezone: &str) -> bool {
    matches!(timezone, "US/Eastern" | "America/New_York")
}

fn is_live(comment_utc: DateTime<Utc>, air_time_utc: DateTime<Utc>) -> bool {
    let window_start = air_time_utc - Duration::minutes(LIVE_PADDING_MINUTES);
    let window_end = air_time_utc + Duration::hours(LIVE_DURATION_HOURS);
    window_start <= comment_utc && comment_utc <= window_end
}

fn is_day_of(comment_utc: DateTime<Utc>, air_time_utc: DateTime<Utc>, zone: Tz) -> bool {
    let local_air = air_time_utc.with_timezone(&zone);
    let Some(day_start_local) = local_air
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| naive.and_local_timezone(zone).earliest())
    else {
        return false;
    };
    let day_start = day_start_local.with_timezone(&Utc);
    let day_end = day_start + Duration::days(2);
    day_start <= comment_utc && comment_utc < day_end
}
