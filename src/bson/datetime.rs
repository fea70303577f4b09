//! UTC datetime support.

use std::{fmt, time::SystemTime};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::{Error, Result};

/// A BSON datetime: a signed 64-bit count of UTC milliseconds since the Unix epoch.
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone)]
pub struct DateTime(i64);

impl DateTime {
    /// The latest representable datetime.
    pub const MAX: Self = Self::from_millis(i64::MAX);

    /// The earliest representable datetime.
    pub const MIN: Self = Self::from_millis(i64::MIN);

    /// The current time.
    pub fn now() -> DateTime {
        Self::from_system_time(SystemTime::now())
    }

    /// Makes a new `DateTime` from the number of non-leap milliseconds since the Unix epoch.
    pub const fn from_millis(date: i64) -> Self {
        Self(date)
    }

    /// Returns the number of non-leap milliseconds since the Unix epoch.
    pub const fn timestamp_millis(self) -> i64 {
        self.0
    }

    /// Convert the given [`std::time::SystemTime`], saturating at the representable range.
    pub fn from_system_time(st: SystemTime) -> Self {
        match st.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(d) => match i64::try_from(d.as_millis()) {
                Ok(millis) => Self::from_millis(millis),
                Err(_) => Self::MAX,
            },
            // Before the epoch.
            Err(e) => match i64::try_from(e.duration().as_millis()) {
                Ok(millis) => Self::from_millis(-millis),
                Err(_) => Self::MIN,
            },
        }
    }

    /// Convert to a [`time::OffsetDateTime`], saturating at `time`'s representable range.
    pub fn to_time(self) -> OffsetDateTime {
        self.checked_to_time().unwrap_or(if self.0 < 0 {
            time::PrimitiveDateTime::MIN.assume_utc()
        } else {
            time::PrimitiveDateTime::MAX.assume_utc()
        })
    }

    fn checked_to_time(self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.0) * 1_000_000).ok()
    }

    /// Convert from a [`time::OffsetDateTime`].
    pub fn from_time(dt: OffsetDateTime) -> Self {
        let millis = dt.unix_timestamp_nanos() / 1_000_000;
        match i64::try_from(millis) {
            Ok(ts) => Self::from_millis(ts),
            Err(_) if millis < 0 => Self::MIN,
            Err(_) => Self::MAX,
        }
    }

    /// Convert this to an RFC 3339 formatted string. Fails for dates outside the year range
    /// 0..=9999.
    pub fn try_to_rfc3339_string(self) -> Result<String> {
        self.checked_to_time()
            .ok_or_else(|| {
                Error::invalid_argument("DateTime out of range for RFC 3339 formatting")
            })?
            .format(&Rfc3339)
            .map_err(|e| Error::invalid_argument(format!("failed to format DateTime: {}", e)))
    }

    /// Convert the given RFC 3339 formatted string to a `DateTime`.
    pub fn parse_rfc3339_str(s: impl AsRef<str>) -> Result<Self> {
        let odt = OffsetDateTime::parse(s.as_ref(), &Rfc3339)
            .map_err(|e| Error::invalid_argument(format!("invalid RFC 3339 datetime: {}", e)))?;
        Ok(Self::from_time(odt))
    }
}

impl fmt::Debug for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut tup = f.debug_tuple("DateTime");
        match self.checked_to_time() {
            Some(dt) => tup.field(&format!("{}", dt)),
            None => tup.field(&self.0),
        };
        tup.finish()
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.checked_to_time() {
            Some(dt) => write!(f, "{}", dt),
            None => write!(f, "{} ms", self.0),
        }
    }
}

impl From<SystemTime> for DateTime {
    fn from(st: SystemTime) -> Self {
        Self::from_system_time(st)
    }
}

impl Serialize for DateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("$date", &DateTimeBody::from_millis(self.0))?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<DateTime, D::Error> {
        #[derive(Deserialize)]
        struct DateTimeHelper {
            #[serde(rename = "$date")]
            body: DateTimeBody,
        }
        let helper = DateTimeHelper::deserialize(deserializer)?;
        let millis = helper
            .body
            .number_long
            .parse::<i64>()
            .map_err(|_| D::Error::custom("$numberLong must be an integer string"))?;
        Ok(DateTime::from_millis(millis))
    }
}

#[derive(Serialize, Deserialize)]
struct DateTimeBody {
    #[serde(rename = "$numberLong")]
    number_long: String,
}

impl DateTimeBody {
    fn from_millis(m: i64) -> Self {
        DateTimeBody {
            number_long: m.to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::DateTime;

    #[test]
    fn rfc3339_round_trip() {
        let dt = DateTime::from_millis(1_706_543_999_123);
        let s = dt.try_to_rfc3339_string().unwrap();
        assert_eq!(DateTime::parse_rfc3339_str(&s).unwrap(), dt);
    }

    #[test]
    fn out_of_range_formatting_fails() {
        assert!(DateTime::MAX.try_to_rfc3339_string().is_err());
        assert!(DateTime::MIN.try_to_rfc3339_string().is_err());
    }
}
