//! Hour-granularity join key shared by both providers.
//!
//! Every provider timestamp is reduced to a `TimeKey` before it reaches the
//! merge engine. Parsing never fails loudly: a timestamp that does not match
//! the provider's format yields `None` and the caller drops that point.
//!
//! # Zones
//! The naive timestamp is interpreted in the supplied `ParseZone` and then
//! converted to UTC. Both providers must be parsed in a consistent zone or
//! their hours will not line up; the configured default is UTC for both.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use std::fmt;

// ---------------------------------------------------------------------------
// Timestamp formats
// ---------------------------------------------------------------------------

/// Open-Meteo hourly time array format, e.g. `2025-03-18T14:00`.
pub const OPEN_METEO_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// WeatherAPI hour bucket format, e.g. `2025-03-18 14:00`.
pub const WEATHER_API_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Format of the `Time` column in the exported feature table.
///
/// Output is not zero padded (`2025-3-8 4:00`); chrono accepts both padded
/// and unpadded numerals when parsing.
pub const EXPORT_FORMAT: &str = "%Y-%m-%d %H:%M";

// ---------------------------------------------------------------------------
// Parse zone
// ---------------------------------------------------------------------------

/// Zone a provider's naive timestamps are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseZone {
    #[default]
    Utc,
    /// Fixed offset east of UTC, in seconds.
    Offset(i32),
}

impl ParseZone {
    /// Builds a zone from a whole-hour offset. Zero maps to `Utc`.
    pub fn from_hours(hours: i32) -> Self {
        if hours == 0 {
            ParseZone::Utc
        } else {
            ParseZone::Offset(hours * 3600)
        }
    }

    pub fn offset_seconds(self) -> i32 {
        match self {
            ParseZone::Utc => 0,
            ParseZone::Offset(secs) => secs,
        }
    }

    fn to_utc(self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            ParseZone::Utc => Some(Utc.from_utc_datetime(&naive)),
            ParseZone::Offset(secs) => FixedOffset::east_opt(secs)?
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

// ---------------------------------------------------------------------------
// TimeKey
// ---------------------------------------------------------------------------

/// Canonical UTC hour used to align records across sources.
///
/// Field order matters: the derived ordering compares year, then month,
/// then day, then hour, which is chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl TimeKey {
    /// Builds a key from explicit fields, rejecting impossible dates/hours.
    pub fn new(year: i32, month: u32, day: u32, hour: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day)?;
        if hour > 23 {
            return None;
        }
        Some(TimeKey { year, month, day, hour })
    }

    /// Parses `value` with a chrono `format` string, interpreting it in `zone`.
    ///
    /// Returns `None` on any mismatch; minutes and seconds are truncated.
    pub fn parse(value: &str, format: &str, zone: ParseZone) -> Option<Self> {
        let naive = NaiveDateTime::parse_from_str(value.trim(), format).ok()?;
        zone.to_utc(naive).map(Self::from_datetime)
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        TimeKey {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
        }
    }

    /// Calendar day this hour falls on (UTC).
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }

    pub fn is_on(&self, date: NaiveDate) -> bool {
        self.date() == Some(date)
    }

    /// Label used in the `Time` column of the exports.
    pub fn export_label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{} {}:00", self.year, self.month, self.day, self.hour)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn key(year: i32, month: u32, day: u32, hour: u32) -> TimeKey {
        TimeKey::new(year, month, day, hour).unwrap()
    }

    #[test]
    fn test_parse_open_meteo_timestamp() {
        let parsed = TimeKey::parse("2025-03-18T14:00", OPEN_METEO_FORMAT, ParseZone::Utc);
        assert_eq!(parsed, Some(key(2025, 3, 18, 14)));
    }

    #[test]
    fn test_parse_weather_api_timestamp() {
        let parsed = TimeKey::parse("2025-03-18 00:00", WEATHER_API_FORMAT, ParseZone::Utc);
        assert_eq!(parsed, Some(key(2025, 3, 18, 0)));
    }

    #[test]
    fn test_parse_failure_yields_none() {
        assert_eq!(TimeKey::parse("not a date", OPEN_METEO_FORMAT, ParseZone::Utc), None);
        assert_eq!(TimeKey::parse("", WEATHER_API_FORMAT, ParseZone::Utc), None);
        // Right digits, wrong separator for the format.
        assert_eq!(
            TimeKey::parse("2025-03-18 14:00", OPEN_METEO_FORMAT, ParseZone::Utc),
            None
        );
    }

    #[test]
    fn test_parse_is_deterministic() {
        let a = TimeKey::parse("2024-12-31T23:00", OPEN_METEO_FORMAT, ParseZone::Utc);
        let b = TimeKey::parse("2024-12-31T23:00", OPEN_METEO_FORMAT, ParseZone::Utc);
        assert_eq!(a, b);
    }

    #[test]
    fn test_offset_zone_shifts_to_utc() {
        // 01:00 at UTC+2 is 23:00 UTC on the previous day.
        let parsed = TimeKey::parse(
            "2024-01-02 01:00",
            WEATHER_API_FORMAT,
            ParseZone::from_hours(2),
        );
        assert_eq!(parsed, Some(key(2024, 1, 1, 23)));
    }

    #[test]
    fn test_ordering_is_chronological_across_day_boundary() {
        let late = key(2024, 1, 1, 23);
        let early_next = key(2024, 1, 2, 0);
        assert!(late < early_next);
        assert!(key(2023, 12, 31, 23) < late);
        assert!(key(2024, 2, 1, 0) > key(2024, 1, 31, 23));
    }

    #[test]
    fn test_ordering_is_transitive() {
        let a = key(2024, 1, 1, 5);
        let b = key(2024, 1, 1, 6);
        let c = key(2024, 1, 3, 0);
        assert!(a < b && b < c && a < c);
    }

    #[test]
    fn test_display_matches_export_label() {
        assert_eq!(key(2025, 3, 8, 4).to_string(), "2025-3-8 4:00");
        assert_eq!(key(2025, 12, 18, 14).export_label(), "2025-12-18 14:00");
    }

    #[test]
    fn test_export_label_parses_back() {
        let original = key(2025, 3, 8, 4);
        let parsed = TimeKey::parse(&original.export_label(), EXPORT_FORMAT, ParseZone::Utc);
        assert_eq!(parsed, Some(original));
    }

    #[test]
    fn test_new_rejects_impossible_values() {
        assert!(TimeKey::new(2024, 2, 30, 0).is_none());
        assert!(TimeKey::new(2024, 1, 1, 24).is_none());
        assert!(TimeKey::new(2024, 2, 29, 23).is_some());
    }

    #[test]
    fn test_is_on_date() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 19).unwrap();
        assert!(key(2025, 3, 19, 0).is_on(date));
        assert!(!key(2025, 3, 18, 23).is_on(date));
    }
}
