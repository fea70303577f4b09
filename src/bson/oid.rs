//! ObjectId support.

use std::{
    convert::TryInto,
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU32, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use lazy_static::lazy_static;
use rand::{thread_rng, Rng};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

lazy_static! {
    // A random value generated once per process, shared by every id the process produces.
    static ref PROCESS_UNIQUE: [u8; 5] = thread_rng().gen();

    static ref OID_COUNTER: AtomicU32 = AtomicU32::new(thread_rng().gen_range(0..=0xFF_FF_FF));
}

/// A 12-byte (96 bit) ObjectId: a 4-byte timestamp, followed by 5 bytes of per-process random
/// data, followed by a 3-byte incrementing counter, all big-endian.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct ObjectId {
    id: [u8; 12],
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectId {
    /// Generates a new ObjectId.
    pub fn new() -> Self {
        let timestamp = ObjectId::gen_timestamp();
        let process_unique = *PROCESS_UNIQUE;
        let counter = ObjectId::gen_count();

        let mut buf: [u8; 12] = [0; 12];
        buf[0..4].copy_from_slice(&timestamp);
        buf[4..9].copy_from_slice(&process_unique);
        buf[9..12].copy_from_slice(&counter);

        Self::from_bytes(buf)
    }

    /// Constructs a new ObjectId wrapper around the raw byte representation.
    pub const fn from_bytes(bytes: [u8; 12]) -> ObjectId {
        ObjectId { id: bytes }
    }

    /// Creates an ObjectId using a 12-byte (24-char) hexadecimal string.
    pub fn parse_str(s: impl AsRef<str>) -> Result<ObjectId> {
        let s = s.as_ref();
        let bytes: Vec<u8> = hex::decode(s.as_bytes())
            .map_err(|_| Error::invalid_argument(format!("invalid ObjectId hex string: {}", s)))?;
        if bytes.len() != 12 {
            Err(Error::invalid_argument(format!(
                "invalid ObjectId hex string length: {}",
                s
            )))
        } else {
            Ok(ObjectId::from_bytes(bytes.try_into().unwrap()))
        }
    }

    /// Returns the raw byte representation of an ObjectId.
    pub const fn bytes(&self) -> [u8; 12] {
        self.id
    }

    /// The number of seconds since epoch embedded in this id.
    pub fn timestamp_secs(&self) -> u32 {
        u32::from_be_bytes(self.id[0..4].try_into().unwrap())
    }

    /// Converts this ObjectId to a 24-character hexadecimal string.
    pub fn to_hex(self) -> String {
        hex::encode(self.id)
    }

    fn gen_timestamp() -> [u8; 4] {
        let timestamp: u32 = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before 1970")
            .as_secs()
            .try_into()
            .unwrap_or(u32::MAX);
        timestamp.to_be_bytes()
    }

    fn gen_count() -> [u8; 3] {
        let u_counter = OID_COUNTER.fetch_add(1, Ordering::SeqCst);

        // Only keep the low 24 bits; the counter wraps rather than overflowing into the
        // process-unique bytes.
        let u_int = u_counter % 0x0100_0000;
        let buf = u_int.to_be_bytes();
        [buf[1], buf[2], buf[3]]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("ObjectId").field(&self.to_hex()).finish()
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("$oid", &self.to_hex())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<ObjectId, D::Error> {
        #[derive(Deserialize)]
        struct ObjectIdHelper {
            #[serde(rename = "$oid")]
            oid: String,
        }
        let helper = ObjectIdHelper::deserialize(deserializer)?;
        ObjectId::parse_str(&helper.oid).map_err(|e| D::Error::custom(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::ObjectId;

    #[test]
    fn count_is_big_endian_and_monotonic() {
        let a = ObjectId::new();
        let b = ObjectId::new();

        assert_eq!(a.bytes()[4..9], b.bytes()[4..9]);

        let count_of = |oid: &ObjectId| {
            let bytes = oid.bytes();
            u32::from_be_bytes([0, bytes[9], bytes[10], bytes[11]])
        };
        assert_eq!(count_of(&b), (count_of(&a) + 1) % 0x0100_0000);
    }

    #[test]
    fn hex_round_trip() {
        let id = ObjectId::new();
        assert_eq!(ObjectId::parse_str(id.to_hex()).unwrap(), id);
        assert!(ObjectId::parse_str("not-hex").is_err());
        assert!(ObjectId::parse_str("abcdef").is_err());
    }
}
