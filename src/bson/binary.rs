//! Binary value support.

use std::fmt;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use super::spec::BinarySubtype;
use crate::error::{Error, Result};

/// Represents a BSON binary value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binary {
    /// The subtype of the bytes.
    pub subtype: BinarySubtype,

    /// The binary bytes.
    pub bytes: Vec<u8>,
}

impl Binary {
    /// Creates a `Binary` from a base64 string and optional numeric subtype.
    pub fn from_base64(input: impl AsRef<str>, subtype: impl Into<Option<BinarySubtype>>) -> Result<Self> {
        let bytes = base64::decode(input.as_ref())
            .map_err(|_| Error::invalid_argument("binary value is not valid base64"))?;
        let subtype = subtype.into().unwrap_or(BinarySubtype::Generic);
        Ok(Binary { subtype, bytes })
    }

    /// Creates a `Binary` holding the bytes of a UUID, using binary subtype 4.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Binary {
            subtype: BinarySubtype::Uuid,
            bytes: uuid.as_bytes().to_vec(),
        }
    }

    /// Interprets this binary value as a UUID. Fails unless the subtype is 4 and the payload is
    /// 16 bytes.
    pub fn to_uuid(&self) -> Result<uuid::Uuid> {
        if self.subtype != BinarySubtype::Uuid {
            return Err(Error::invalid_argument(format!(
                "expected UUID binary subtype, got {:?}",
                self.subtype
            )));
        }
        uuid::Uuid::from_slice(&self.bytes)
            .map_err(|_| Error::invalid_argument("UUID binary value must be 16 bytes"))
    }
}

impl fmt::Display for Binary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Binary({:#x}, {})",
            u8::from(self.subtype),
            base64::encode(&self.bytes)
        )
    }
}

impl Serialize for Binary {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(
            "$binary",
            &BinaryBody {
                base64: base64::encode(&self.bytes),
                subtype: hex::encode([u8::from(self.subtype)]),
            },
        )?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Binary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Binary, D::Error> {
        #[derive(Deserialize)]
        struct BinaryHelper {
            #[serde(rename = "$binary")]
            body: BinaryBody,
        }
        let helper = BinaryHelper::deserialize(deserializer)?;
        let bytes = base64::decode(&helper.body.base64)
            .map_err(|_| D::Error::custom("$binary base64 field is not valid base64"))?;
        let subtype = hex::decode(&helper.body.subtype)
            .ok()
            .filter(|b| b.len() == 1)
            .map(|b| BinarySubtype::from(b[0]))
            .ok_or_else(|| D::Error::custom("$binary subType must be a one-byte hex string"))?;
        Ok(Binary { subtype, bytes })
    }
}

#[derive(Serialize, Deserialize)]
struct BinaryBody {
    base64: String,
    #[serde(rename = "subType")]
    subtype: String,
}
