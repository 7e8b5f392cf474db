//! Field values as seen by the numbering engine.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

/// Key segment used for null scope values.
pub const NULL_SEGMENT: &str = "~";

/// Calendar-day format used when dates participate in a scope key.
const DAY_FORMAT: &str = "%Y%m%d";

/// Current value of one entity field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Boolean(bool),
    Uuid(Uuid),
    Date(NaiveDate),
    /// Timestamp without zone
    Timestamp(NaiveDateTime),
    /// Timestamp carrying its own offset
    TimestampTz(DateTime<FixedOffset>),
}

impl FieldValue {
    /// A numbered field counts as empty when it is null or blank text.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// String form used inside scope keys.
    ///
    /// Dates and timestamps collapse to their calendar day (`yyyyMMdd`) so that
    /// a per-day scope groups every entity of that day under one counter.
    /// Offset-carrying timestamps use the day in their own offset.
    pub fn normalized(&self) -> Cow<'_, str> {
        match self {
            Self::Null => Cow::Borrowed(NULL_SEGMENT),
            Self::Text(s) => Cow::Borrowed(s),
            Self::Integer(i) => Cow::Owned(i.to_string()),
            Self::Boolean(b) => Cow::Owned(b.to_string()),
            Self::Uuid(u) => Cow::Owned(u.hyphenated().to_string()),
            Self::Date(d) => Cow::Owned(d.format(DAY_FORMAT).to_string()),
            Self::Timestamp(ts) => Cow::Owned(ts.format(DAY_FORMAT).to_string()),
            Self::TimestampTz(ts) => Cow::Owned(ts.format(DAY_FORMAT).to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Date(d) => write!(f, "{d}"),
            Self::Timestamp(ts) => write!(f, "{ts}"),
            Self::TimestampTz(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for FieldValue {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Uuid> for FieldValue {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(ts: NaiveDateTime) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<DateTime<FixedOffset>> for FieldValue {
    fn from(ts: DateTime<FixedOffset>) -> Self {
        Self::TimestampTz(ts)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::TimestampTz(ts.fixed_offset())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn test_empty_means_null_or_blank_text() {
        assert!(FieldValue::Null.is_empty());
        assert!(FieldValue::from("").is_empty());
        assert!(!FieldValue::from("INV-1").is_empty());
        assert!(!FieldValue::Integer(0).is_empty());
    }

    #[test]
    fn test_timestamps_normalize_to_calendar_day() {
        let morning = NaiveDate::from_ymd_opt(2021, 9, 26)
            .unwrap()
            .and_hms_opt(1, 2, 3)
            .unwrap();
        let evening = NaiveDate::from_ymd_opt(2021, 9, 26)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();

        assert_eq!(FieldValue::from(morning).normalized(), "20210926");
        assert_eq!(FieldValue::from(evening).normalized(), "20210926");
        assert_eq!(
            FieldValue::from(NaiveDate::from_ymd_opt(2021, 1, 5).unwrap()).normalized(),
            "20210105"
        );
    }

    #[test]
    fn test_offset_timestamp_uses_its_own_day() {
        let offset = FixedOffset::east_opt(5 * 3600).unwrap();
        let ts = offset.with_ymd_and_hms(2021, 9, 27, 2, 0, 0).unwrap();
        // 2021-09-26T21:00Z in UTC, but the entity recorded the 27th
        assert_eq!(FieldValue::from(ts).normalized(), "20210927");
    }

    #[test]
    fn test_null_and_scalars_normalize_to_natural_form() {
        assert_eq!(FieldValue::Null.normalized(), NULL_SEGMENT);
        assert_eq!(FieldValue::from(42i64).normalized(), "42");
        assert_eq!(FieldValue::from(true).normalized(), "true");
        assert_eq!(FieldValue::from(None::<String>), FieldValue::Null);
    }

    proptest! {
        #[test]
        fn test_same_day_always_shares_a_segment(
            secs_a in 0u32..86_400,
            secs_b in 0u32..86_400,
            day in 0i64..20_000,
        ) {
            let date = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap() + chrono::Duration::days(day);
            let a = date.and_hms_opt(secs_a / 3600, (secs_a / 60) % 60, secs_a % 60).unwrap();
            let b = date.and_hms_opt(secs_b / 3600, (secs_b / 60) % 60, secs_b % 60).unwrap();
            let (fa, fb) = (FieldValue::from(a), FieldValue::from(b));
            prop_assert_eq!(fa.normalized(), fb.normalized());
        }
    }
}
