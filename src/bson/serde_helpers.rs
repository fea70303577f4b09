//! Collection of helper functions for serializing to and deserializing from BSON using serde.
//!
//! Each submodule is usable with `#[serde(with = "…")]` and selects an alternate wire
//! representation for a field. The chosen strategy only affects how values move between the
//! BSON layer and application types; it never rewrites data already stored.

use std::result::Result;

use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use super::{Binary, BinarySubtype, DateTime};

/// Contains functions to serialize a [`DateTime`] as an i64 count of milliseconds since the
/// epoch and deserialize it back.
pub mod bson_datetime_as_i64_millis {
    use super::*;

    /// Serializes a [`DateTime`] as an i64 count of milliseconds since the epoch.
    pub fn serialize<S: Serializer>(val: &DateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(val.timestamp_millis())
    }

    /// Deserializes a [`DateTime`] from an i64 count of milliseconds since the epoch.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime, D::Error> {
        Ok(DateTime::from_millis(i64::deserialize(deserializer)?))
    }
}

/// Contains functions to serialize a [`DateTime`] as an i64 count of seconds since the epoch
/// and deserialize it back. Sub-second precision is dropped on write.
pub mod bson_datetime_as_i64_seconds {
    use super::*;

    /// Serializes a [`DateTime`] as an i64 count of seconds since the epoch.
    pub fn serialize<S: Serializer>(val: &DateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(val.timestamp_millis() / 1000)
    }

    /// Deserializes a [`DateTime`] from an i64 count of seconds since the epoch.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        secs.checked_mul(1000)
            .map(DateTime::from_millis)
            .ok_or_else(|| D::Error::custom("seconds value out of range for a BSON datetime"))
    }
}

/// Contains functions to serialize a [`DateTime`] as an f64 count of milliseconds since the
/// epoch and deserialize it back.
pub mod bson_datetime_as_f64_millis {
    use super::*;

    /// Serializes a [`DateTime`] as an f64 count of milliseconds since the epoch.
    pub fn serialize<S: Serializer>(val: &DateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(val.timestamp_millis() as f64)
    }

    /// Deserializes a [`DateTime`] from an f64 count of milliseconds since the epoch.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        if !millis.is_finite() {
            return Err(D::Error::custom("millisecond value must be finite"));
        }
        Ok(DateTime::from_millis(millis as i64))
    }
}

/// Contains functions to serialize a [`DateTime`] as an f64 count of seconds since the epoch
/// (with fractional milliseconds) and deserialize it back.
pub mod bson_datetime_as_f64_seconds {
    use super::*;

    /// Serializes a [`DateTime`] as an f64 count of seconds since the epoch.
    pub fn serialize<S: Serializer>(val: &DateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(val.timestamp_millis() as f64 / 1000.0)
    }

    /// Deserializes a [`DateTime`] from an f64 count of seconds since the epoch.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() {
            return Err(D::Error::custom("seconds value must be finite"));
        }
        Ok(DateTime::from_millis((secs * 1000.0) as i64))
    }
}

/// Contains functions to serialize a [`DateTime`] as an RFC 3339 (ISO 8601) formatted string
/// and deserialize it back.
pub mod bson_datetime_as_rfc3339_string {
    use super::*;

    /// Serializes a [`DateTime`] as an RFC 3339 formatted string.
    pub fn serialize<S: Serializer>(val: &DateTime, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = val
            .try_to_rfc3339_string()
            .map_err(|e| S::Error::custom(format!("cannot format DateTime: {}", e)))?;
        serializer.serialize_str(&formatted)
    }

    /// Deserializes a [`DateTime`] from an RFC 3339 formatted string.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_rfc3339_str(&s).map_err(|e| D::Error::custom(e.to_string()))
    }
}

/// Contains functions to serialize a [`time::OffsetDateTime`] as a BSON datetime and
/// deserialize it back. This is the wire-native strategy for applications using the `time`
/// crate's types.
pub mod time_as_bson_datetime {
    use super::*;
    use time::OffsetDateTime;

    /// Serializes an [`OffsetDateTime`] as a BSON datetime.
    pub fn serialize<S: Serializer>(
        val: &OffsetDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        DateTime::from_time(*val).serialize(serializer)
    }

    /// Deserializes an [`OffsetDateTime`] from a BSON datetime.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<OffsetDateTime, D::Error> {
        Ok(DateTime::deserialize(deserializer)?.to_time())
    }
}

/// Contains functions to serialize a [`uuid::Uuid`] as a binary value with subtype 4 and
/// deserialize it back.
pub mod uuid_as_binary {
    use super::*;

    /// Serializes a [`uuid::Uuid`] as a binary value with subtype 4.
    pub fn serialize<S: Serializer>(val: &uuid::Uuid, serializer: S) -> Result<S::Ok, S::Error> {
        Binary::from_uuid(*val).serialize(serializer)
    }

    /// Deserializes a [`uuid::Uuid`] from a binary value with subtype 4.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<uuid::Uuid, D::Error> {
        let binary = Binary::deserialize(deserializer)?;
        binary.to_uuid().map_err(|e| D::Error::custom(e.to_string()))
    }
}

/// Contains functions to serialize a [`uuid::Uuid`] as a binary value with the legacy subtype
/// 3 and deserialize it back.
pub mod uuid_as_legacy_binary {
    use super::*;

    /// Serializes a [`uuid::Uuid`] as a binary value with subtype 3.
    pub fn serialize<S: Serializer>(val: &uuid::Uuid, serializer: S) -> Result<S::Ok, S::Error> {
        Binary {
            subtype: BinarySubtype::UuidOld,
            bytes: val.as_bytes().to_vec(),
        }
        .serialize(serializer)
    }

    /// Deserializes a [`uuid::Uuid`] from a binary value with subtype 3.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<uuid::Uuid, D::Error> {
        let binary = Binary::deserialize(deserializer)?;
        if binary.subtype != BinarySubtype::UuidOld {
            return Err(D::Error::custom("expected binary subtype 3"));
        }
        uuid::Uuid::from_slice(&binary.bytes)
            .map_err(|_| D::Error::custom("legacy UUID binary value must be 16 bytes"))
    }
}

/// Contains functions to serialize a [`uuid::Uuid`] as its 36-character hyphenated string form
/// and deserialize it back.
pub mod uuid_as_string {
    use super::*;

    /// Serializes a [`uuid::Uuid`] as a hyphenated string.
    pub fn serialize<S: Serializer>(val: &uuid::Uuid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&val.to_string())
    }

    /// Deserializes a [`uuid::Uuid`] from a hyphenated string.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<uuid::Uuid, D::Error> {
        let s = String::deserialize(deserializer)?;
        uuid::Uuid::parse_str(&s).map_err(|_| D::Error::custom("invalid UUID string"))
    }
}

/// Contains functions to serialize a `Vec<u8>` as a generic (subtype 0) binary value and
/// deserialize it back. Without this helper, serde writes byte vectors as integer arrays.
pub mod bytes_as_binary {
    use super::*;

    /// Serializes a `Vec<u8>` as a generic binary value.
    pub fn serialize<S: Serializer>(val: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        Binary {
            subtype: BinarySubtype::Generic,
            bytes: val.to_vec(),
        }
        .serialize(serializer)
    }

    /// Deserializes a `Vec<u8>` from a binary value.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        Ok(Binary::deserialize(deserializer)?.bytes)
    }
}

/// Contains functions to serialize a `Vec<u8>` as a base64-encoded string and deserialize it
/// back.
pub mod bytes_as_base64_string {
    use super::*;

    /// Serializes a `Vec<u8>` as a base64-encoded string.
    pub fn serialize<S: Serializer>(val: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(val))
    }

    /// Deserializes a `Vec<u8>` from a base64-encoded string.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::decode(&s).map_err(|_| D::Error::custom("invalid base64 string"))
    }
}

/// Serializes a `u32` as an `i32`, erroring if the value is out of range.
pub fn serialize_u32_as_i32<S: Serializer>(val: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    match i32::try_from(*val) {
        Ok(val) => serializer.serialize_i32(val),
        Err(_) => Err(S::Error::custom(format!("{} is out of range for an i32", val))),
    }
}

/// Serializes a `u64` as an `i64`, erroring if the value is out of range.
pub fn serialize_u64_as_i64<S: Serializer>(val: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    match i64::try_from(*val) {
        Ok(val) => serializer.serialize_i64(val),
        Err(_) => Err(S::Error::custom(format!("{} is out of range for an i64", val))),
    }
}
