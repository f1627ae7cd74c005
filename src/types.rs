use derive_more::{Display, From, FromStr, Into};
use serde::{Deserialize, Serialize};
use time::Date;
use time::macros::format_description;

use crate::error::Error;

/// Consumer-defined session identifier (opaque string).
///
/// One credential, and at most one in-flight refresh, exists per session.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[serde(transparent)]
pub struct SessionId(pub String);

/// Verified sending domain, without the `domains/` resource prefix.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct DomainName(pub String);

impl DomainName {
    const RESOURCE_PREFIX: &'static str = "domains/";

    /// Build from an upstream resource name such as `domains/example.com`.
    #[must_use]
    pub fn from_resource_name(name: &str) -> Self {
        Self(
            name.strip_prefix(Self::RESOURCE_PREFIX)
                .unwrap_or(name)
                .to_string(),
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DomainName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Parse a `YYYY-MM-DD` calendar date.
///
/// # Errors
///
/// Returns [`Error::InvalidDate`] if the input is not a valid ISO date.
pub fn parse_date(s: &str) -> Result<Date, Error> {
    Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|e| Error::InvalidDate(format!("{s}: {e}")))
}

/// Inclusive calendar-day range, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    start: Date,
    end: Date,
}

impl DateRange {
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `end` precedes `start`.
    pub fn new(start: Date, end: Date) -> Result<Self, Error> {
        if end < start {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse both bounds from `YYYY-MM-DD` strings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDate`] for malformed input, or
    /// [`Error::InvalidRange`] if `end` precedes `start`.
    pub fn parse(start: &str, end: &str) -> Result<Self, Error> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    #[must_use]
    pub fn start(&self) -> Date {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> Date {
        self.end
    }

    /// Number of calendar days, both ends included.
    #[must_use]
    pub fn day_count(&self) -> usize {
        usize::try_from((self.end - self.start).whole_days()).unwrap_or(0) + 1
    }

    /// Every day from `start` to `end`, ascending.
    pub fn days(&self) -> impl Iterator<Item = Date> + use<> {
        let end = self.end;
        std::iter::successors(Some(self.start), |d| d.next_day()).take_while(move |d| *d <= end)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn domain_strips_resource_prefix() {
        assert_eq!(
            DomainName::from_resource_name("domains/example.com").as_str(),
            "example.com"
        );
        assert_eq!(
            DomainName::from_resource_name("example.com").as_str(),
            "example.com"
        );
    }

    #[test]
    fn session_id_from_string() {
        let id = SessionId::from("sess-abc".to_string());
        assert_eq!(id.to_string(), "sess-abc");
    }

    #[test]
    fn range_rejects_reversed_bounds() {
        let err = DateRange::new(date!(2024 - 01 - 03), date!(2024 - 01 - 01)).unwrap_err();
        assert!(matches!(err, Error::InvalidRange { .. }));
    }

    #[test]
    fn range_enumerates_inclusive_days() {
        let range = DateRange::new(date!(2024 - 02 - 27), date!(2024 - 03 - 01)).unwrap();
        let days: Vec<_> = range.days().collect();
        assert_eq!(
            days,
            vec![
                date!(2024 - 02 - 27),
                date!(2024 - 02 - 28),
                date!(2024 - 02 - 29),
                date!(2024 - 03 - 01),
            ]
        );
        assert_eq!(range.day_count(), 4);
    }

    #[test]
    fn single_day_range() {
        let range = DateRange::parse("2024-01-01", "2024-01-01").unwrap();
        assert_eq!(range.day_count(), 1);
        assert_eq!(range.days().count(), 1);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            DateRange::parse("2024-13-01", "2024-01-01"),
            Err(Error::InvalidDate(_))
        ));
        assert!(matches!(parse_date("yesterday"), Err(Error::InvalidDate(_))));
    }
}
