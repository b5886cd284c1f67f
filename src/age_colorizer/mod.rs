//! AgeColorizer - Pin Age to Color Bucket
//!
//! ## Responsibilities
//!
//! - Normalize heterogeneous pin timestamps to one instant
//! - Map elapsed minutes to a discrete color tier
//! - Relative "time ago" text and the legend shown next to the map
//!
//! Pure functions only. The periodic re-evaluation lives in `color_refresh`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

/// Age bucket color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeColor {
    BrightRed,
    OrangeRed,
    DarkOrange,
    Gold,
    YellowGreen,
    DarkTurquoise,
    Blue,
}

impl AgeColor {
    /// Hex color used for the marker fill
    pub fn hex(&self) -> &'static str {
        match self {
            AgeColor::BrightRed => "#FF0000",
            AgeColor::OrangeRed => "#FF4500",
            AgeColor::DarkOrange => "#FF8C00",
            AgeColor::Gold => "#FFD700",
            AgeColor::YellowGreen => "#9ACD32",
            AgeColor::DarkTurquoise => "#00CED1",
            AgeColor::Blue => "#0000FF",
        }
    }
}

/// Inclusive upper bounds in minutes, ascending; anything older is blue
const AGE_BUCKETS: [(i64, AgeColor, &str); 6] = [
    (5, AgeColor::BrightRed, "0-5 min"),
    (10, AgeColor::OrangeRed, "5-10 min"),
    (20, AgeColor::DarkOrange, "10-20 min"),
    (40, AgeColor::Gold, "20-40 min"),
    (60, AgeColor::YellowGreen, "40-60 min"),
    (120, AgeColor::DarkTurquoise, "1-2 hours"),
];

/// Pin creation time as delivered by a store or client
///
/// Stores hand back their own timestamp objects, clients send epoch numbers
/// or ISO strings, and a freshly written record may have no timestamp yet.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PinTimestamp {
    /// Store-native `{seconds, nanoseconds}` object
    StoreNative { seconds: i64, nanoseconds: u32 },
    /// Unix epoch seconds
    EpochSeconds(i64),
    /// Unix epoch milliseconds
    EpochMillis(i64),
    /// ISO-8601 / RFC 3339 text
    Iso(String),
    /// Not assigned yet
    #[default]
    Absent,
    /// Any other JSON shape
    Unrecognized(Value),
}

impl PinTimestamp {
    /// Wrap an instant as the store-native representation
    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        PinTimestamp::StoreNative {
            seconds: instant.timestamp(),
            nanoseconds: instant.timestamp_subsec_nanos(),
        }
    }

    /// Classify a raw JSON value
    ///
    /// Numbers are read as epoch milliseconds. Epoch seconds only arrive
    /// inside a `{seconds, nanoseconds}` object or by explicit construction.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => PinTimestamp::Absent,
            Value::Number(n) => match n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)) {
                Some(ms) => PinTimestamp::EpochMillis(ms),
                None => PinTimestamp::Unrecognized(value.clone()),
            },
            Value::String(s) => PinTimestamp::Iso(s.clone()),
            Value::Object(map) => {
                let seconds = map
                    .get("seconds")
                    .or_else(|| map.get("_seconds"))
                    .and_then(Value::as_i64);
                let nanoseconds = map
                    .get("nanoseconds")
                    .or_else(|| map.get("_nanoseconds"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                match seconds {
                    Some(seconds) => PinTimestamp::StoreNative {
                        seconds,
                        nanoseconds: nanoseconds.min(999_999_999) as u32,
                    },
                    None => PinTimestamp::Unrecognized(value.clone()),
                }
            }
            _ => PinTimestamp::Unrecognized(value.clone()),
        }
    }

    /// Canonical instant, `None` when absent or unparseable
    pub fn to_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            PinTimestamp::StoreNative {
                seconds,
                nanoseconds,
            } => Utc.timestamp_opt(*seconds, *nanoseconds).single(),
            PinTimestamp::EpochSeconds(s) => Utc.timestamp_opt(*s, 0).single(),
            PinTimestamp::EpochMillis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            PinTimestamp::Iso(s) => parse_iso(s),
            PinTimestamp::Absent => None,
            PinTimestamp::Unrecognized(v) => {
                tracing::warn!(timestamp = %v, "Unknown timestamp format");
                None
            }
        }
    }
}

fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

impl Serialize for PinTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = match self {
            PinTimestamp::Absent => Value::Null,
            PinTimestamp::Unrecognized(v) => v.clone(),
            other => match other.to_instant() {
                Some(instant) => json!({
                    "seconds": instant.timestamp(),
                    "nanoseconds": instant.timestamp_subsec_nanos(),
                }),
                None => Value::Null,
            },
        };
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PinTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(PinTimestamp::from_value(&value))
    }
}

/// Whole minutes since creation, never negative
///
/// Absent or unparseable timestamps count as just created.
pub fn age_minutes(timestamp: &PinTimestamp, now: DateTime<Utc>) -> i64 {
    let instant = timestamp.to_instant().unwrap_or(now);
    let elapsed_ms = (now - instant).num_milliseconds();
    if elapsed_ms <= 0 {
        0
    } else {
        elapsed_ms / 60_000
    }
}

/// Color tier for a pin created at `timestamp`
pub fn color_for_age(timestamp: &PinTimestamp, now: DateTime<Utc>) -> AgeColor {
    color_for_minutes(age_minutes(timestamp, now))
}

/// Color tier for an already computed age
pub fn color_for_minutes(age: i64) -> AgeColor {
    AGE_BUCKETS
        .iter()
        .find(|(limit, _, _)| age <= *limit)
        .map(|(_, color, _)| *color)
        .unwrap_or(AgeColor::Blue)
}

/// Legend entry
#[derive(Debug, Clone, Serialize)]
pub struct LegendEntry {
    pub color: AgeColor,
    pub hex: &'static str,
    pub label: &'static str,
}

/// Legend rows, youngest first
pub fn legend() -> Vec<LegendEntry> {
    AGE_BUCKETS
        .iter()
        .map(|(_, color, label)| (*color, *label))
        .chain(std::iter::once((AgeColor::Blue, "2+ hours")))
        .map(|(color, label)| LegendEntry {
            color,
            hex: color.hex(),
            label,
        })
        .collect()
}

/// Relative time text ("12 minutes ago")
pub fn format_time_ago(instant: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - instant).num_seconds() as f64;

    const UNITS: [(f64, &str); 5] = [
        (31_536_000.0, "years"),
        (2_592_000.0, "months"),
        (86_400.0, "days"),
        (3_600.0, "hours"),
        (60.0, "minutes"),
    ];

    for (unit, name) in UNITS {
        let interval = seconds / unit;
        if interval > 1.0 {
            return format!("{} {} ago", interval.floor() as i64, name);
        }
    }
    format!("{} seconds ago", seconds.floor() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn minutes_ago(m: i64) -> PinTimestamp {
        PinTimestamp::from_instant(now() - Duration::minutes(m))
    }

    #[test]
    fn test_bucket_boundaries_map_to_lower_bucket() {
        let cases = [
            (0, AgeColor::BrightRed),
            (5, AgeColor::BrightRed),
            (6, AgeColor::OrangeRed),
            (10, AgeColor::OrangeRed),
            (20, AgeColor::DarkOrange),
            (21, AgeColor::Gold),
            (40, AgeColor::Gold),
            (60, AgeColor::YellowGreen),
            (61, AgeColor::DarkTurquoise),
            (120, AgeColor::DarkTurquoise),
            (121, AgeColor::Blue),
            (10_000, AgeColor::Blue),
        ];
        for (age, expected) in cases {
            assert_eq!(color_for_age(&minutes_ago(age), now()), expected, "age {age}");
        }
    }

    #[test]
    fn test_partial_minutes_floor() {
        let ts = PinTimestamp::from_instant(now() - Duration::seconds(5 * 60 + 59));
        assert_eq!(age_minutes(&ts, now()), 5);
        assert_eq!(color_for_age(&ts, now()), AgeColor::BrightRed);
    }

    #[test]
    fn test_future_timestamp_clamps_to_zero() {
        let future = PinTimestamp::from_instant(now() + Duration::hours(3));
        assert_eq!(age_minutes(&future, now()), 0);
        assert_eq!(
            color_for_age(&future, now()),
            color_for_age(&minutes_ago(0), now())
        );
    }

    #[test]
    fn test_absent_and_garbage_count_as_new() {
        assert_eq!(color_for_age(&PinTimestamp::Absent, now()), AgeColor::BrightRed);
        assert_eq!(
            color_for_age(&PinTimestamp::Iso("not a date".into()), now()),
            AgeColor::BrightRed
        );
        assert_eq!(
            color_for_age(&PinTimestamp::Unrecognized(json!([1, 2])), now()),
            AgeColor::BrightRed
        );
    }

    #[test]
    fn test_representations_agree() {
        let instant = now() - Duration::minutes(45);
        let forms = [
            PinTimestamp::from_instant(instant),
            PinTimestamp::EpochSeconds(instant.timestamp()),
            PinTimestamp::EpochMillis(instant.timestamp_millis()),
            PinTimestamp::Iso(instant.to_rfc3339()),
        ];
        for form in forms {
            assert_eq!(color_for_age(&form, now()), AgeColor::YellowGreen);
        }
    }

    #[test]
    fn test_from_value_shapes() {
        assert_eq!(PinTimestamp::from_value(&Value::Null), PinTimestamp::Absent);
        assert_eq!(
            PinTimestamp::from_value(&json!(1_700_000_000_000_i64)),
            PinTimestamp::EpochMillis(1_700_000_000_000)
        );
        assert_eq!(
            PinTimestamp::from_value(&json!({"seconds": 10, "nanoseconds": 5})),
            PinTimestamp::StoreNative {
                seconds: 10,
                nanoseconds: 5
            }
        );
        assert!(matches!(
            PinTimestamp::from_value(&json!({"foo": 1})),
            PinTimestamp::Unrecognized(_)
        ));
    }

    #[test]
    fn test_legend_has_seven_rows() {
        let rows = legend();
        assert_eq!(rows.len(), 7);
        assert_eq!(rows[0].hex, "#FF0000");
        assert_eq!(rows[6].label, "2+ hours");
    }

    #[test]
    fn test_format_time_ago() {
        assert_eq!(format_time_ago(now() - Duration::seconds(30), now()), "30 seconds ago");
        assert_eq!(format_time_ago(now() - Duration::minutes(12), now()), "12 minutes ago");
        assert_eq!(format_time_ago(now() - Duration::hours(3), now()), "3 hours ago");
        assert_eq!(format_time_ago(now() - Duration::days(40), now()), "1 months ago");
    }
}
