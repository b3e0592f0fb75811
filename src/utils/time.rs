//! Timezone helpers for channel display times

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Check whether a string names a valid IANA timezone.
pub fn validate_timezone(tz_str: &str) -> bool {
    tz_str.parse::<Tz>().is_ok()
}

/// All IANA timezone names, for the channel-form dropdown.
pub fn available_timezones() -> Vec<&'static str> {
    chrono_tz::TZ_VARIANTS.iter().map(|tz| tz.name()).collect()
}

/// Render a UTC instant in the given timezone as `YYYY-MM-DD HH:MM`.
/// Falls back to UTC when the timezone name does not parse.
pub fn format_in_timezone(dt: DateTime<Utc>, tz_str: &str) -> String {
    match tz_str.parse::<Tz>() {
        Ok(tz) => dt.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string(),
        Err(_) => dt.format("%Y-%m-%d %H:%M").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_validate_timezone() {
        assert!(validate_timezone("UTC"));
        assert!(validate_timezone("Asia/Tokyo"));
        assert!(validate_timezone("America/New_York"));
        assert!(!validate_timezone("Mars/Olympus_Mons"));
        assert!(!validate_timezone(""));
    }

    #[test]
    fn test_format_in_timezone() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        assert_eq!(format_in_timezone(dt, "Asia/Tokyo"), "2024-03-01 18:00");
        assert_eq!(format_in_timezone(dt, "UTC"), "2024-03-01 09:00");
        // Unknown timezone falls back to UTC rendering
        assert_eq!(format_in_timezone(dt, "bogus"), "2024-03-01 09:00");
    }

    #[test]
    fn test_available_timezones_contains_common_names() {
        let names = available_timezones();
        assert!(names.contains(&"UTC"));
        assert!(names.contains(&"Europe/London"));
    }
}
