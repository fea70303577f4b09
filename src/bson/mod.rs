//! BSON, the data format the wire protocol speaks.
//!
//! This module contains the value model ([`Bson`], [`Document`] and friends), a bit-exact
//! encoder and decoder for the binary format, a serde bridge for mapping application types to
//! and from BSON, canonical extended JSON conversions, and the `doc!`/`bson!` construction
//! macros.

pub mod binary;
pub mod datetime;
mod de;
pub mod decimal128;
pub mod document;
mod extjson;
#[macro_use]
mod macros;
pub mod oid;
mod ser;
pub mod serde_helpers;
pub mod spec;
#[cfg(test)]
mod test;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use self::{
    binary::Binary,
    datetime::DateTime,
    de::{from_bson, from_document, from_slice},
    decimal128::Decimal128,
    document::Document,
    extjson::json_to_bson,
    oid::ObjectId,
    ser::{to_bson, to_document, to_vec},
    spec::{BinarySubtype, ElementType},
};

/// A BSON array.
pub type Array = Vec<Bson>;

/// Possible BSON value types.
#[derive(Clone, Default, PartialEq)]
pub enum Bson {
    /// 64-bit binary floating point
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Array
    Array(Array),
    /// Embedded document
    Document(Document),
    /// Boolean value
    Boolean(bool),
    /// Null value
    #[default]
    Null,
    /// Regular expression
    RegularExpression(Regex),
    /// JavaScript code
    JavaScriptCode(String),
    /// JavaScript code with scope
    JavaScriptCodeWithScope(JavaScriptCodeWithScope),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// Timestamp
    Timestamp(Timestamp),
    /// Binary data
    Binary(Binary),
    /// [ObjectId](http://dochub.mongodb.org/core/objectids)
    ObjectId(ObjectId),
    /// UTC datetime
    DateTime(DateTime),
    /// Symbol (deprecated)
    Symbol(String),
    /// [128-bit decimal floating point](https://github.com/mongodb/specifications/blob/master/source/bson-decimal128/decimal128.md)
    Decimal128(Decimal128),
    /// Undefined value (deprecated)
    Undefined,
    /// Max key
    MaxKey,
    /// Min key
    MinKey,
    /// DBPointer (deprecated)
    DbPointer(DbPointer),
}

impl Bson {
    /// The `ElementType` of this value.
    pub fn element_type(&self) -> ElementType {
        match *self {
            Bson::Double(..) => ElementType::Double,
            Bson::String(..) => ElementType::String,
            Bson::Array(..) => ElementType::Array,
            Bson::Document(..) => ElementType::EmbeddedDocument,
            Bson::Boolean(..) => ElementType::Boolean,
            Bson::Null => ElementType::Null,
            Bson::RegularExpression(..) => ElementType::RegularExpression,
            Bson::JavaScriptCode(..) => ElementType::JavaScriptCode,
            Bson::JavaScriptCodeWithScope(..) => ElementType::JavaScriptCodeWithScope,
            Bson::Int32(..) => ElementType::Int32,
            Bson::Int64(..) => ElementType::Int64,
            Bson::Timestamp(..) => ElementType::Timestamp,
            Bson::Binary(..) => ElementType::Binary,
            Bson::ObjectId(..) => ElementType::ObjectId,
            Bson::DateTime(..) => ElementType::DateTime,
            Bson::Symbol(..) => ElementType::Symbol,
            Bson::Decimal128(..) => ElementType::Decimal128,
            Bson::Undefined => ElementType::Undefined,
            Bson::MaxKey => ElementType::MaxKey,
            Bson::MinKey => ElementType::MinKey,
            Bson::DbPointer(..) => ElementType::DbPointer,
        }
    }

    /// If this value is a `Bson::String`, returns the associated `&str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bson::String(s) => Some(s),
            _ => None,
        }
    }

    /// If this value is a `Bson::Int32`, returns the associated `i32`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Bson::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// If this value is a `Bson::Int64`, returns the associated `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Bson::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// If this value is a `Bson::Double`, returns the associated `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Bson::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// If this value is a `Bson::Boolean`, returns the associated `bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Bson::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// If this value is a `Bson::Document`, returns the associated [`Document`].
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Bson::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// If this value is a `Bson::Array`, returns the associated [`Array`].
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Bson::Array(array) => Some(array),
            _ => None,
        }
    }

    /// If this value is a `Bson::ObjectId`, returns the associated [`ObjectId`].
    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Bson::ObjectId(v) => Some(*v),
            _ => None,
        }
    }

    /// If this value is a `Bson::DateTime`, returns the associated [`DateTime`].
    pub fn as_datetime(&self) -> Option<&DateTime> {
        match self {
            Bson::DateTime(v) => Some(v),
            _ => None,
        }
    }

    /// If this value is a `Bson::Timestamp`, returns the associated [`Timestamp`].
    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Bson::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether this value is a `Bson::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Bson::Null)
    }
}

impl fmt::Debug for Bson {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Bson::Double(v) => write!(fmt, "Double({:?})", v),
            Bson::String(v) => write!(fmt, "String({:?})", v),
            Bson::Array(v) => {
                write!(fmt, "Array(")?;
                fmt::Debug::fmt(v, fmt)?;
                write!(fmt, ")")
            }
            Bson::Document(v) => fmt::Debug::fmt(v, fmt),
            Bson::Boolean(v) => write!(fmt, "Boolean({:?})", v),
            Bson::Null => write!(fmt, "Null"),
            Bson::RegularExpression(regex) => fmt::Debug::fmt(regex, fmt),
            Bson::JavaScriptCode(code) => write!(fmt, "JavaScriptCode({:?})", code),
            Bson::JavaScriptCodeWithScope(code) => fmt::Debug::fmt(code, fmt),
            Bson::Int32(v) => write!(fmt, "Int32({:?})", v),
            Bson::Int64(v) => write!(fmt, "Int64({:?})", v),
            Bson::Timestamp(t) => fmt::Debug::fmt(t, fmt),
            Bson::Binary(b) => fmt::Debug::fmt(b, fmt),
            Bson::ObjectId(id) => fmt::Debug::fmt(id, fmt),
            Bson::DateTime(dt) => fmt::Debug::fmt(dt, fmt),
            Bson::Symbol(s) => write!(fmt, "Symbol({:?})", s),
            Bson::Decimal128(d) => fmt::Debug::fmt(d, fmt),
            Bson::Undefined => write!(fmt, "Undefined"),
            Bson::MinKey => write!(fmt, "MinKey"),
            Bson::MaxKey => write!(fmt, "MaxKey"),
            Bson::DbPointer(p) => fmt::Debug::fmt(p, fmt),
        }
    }
}

impl fmt::Display for Bson {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Bson::Double(f) if f.fract() == 0.0 && f.is_finite() => write!(fmt, "{}.0", f),
            Bson::Double(f) => write!(fmt, "{}", f),
            Bson::String(s) => write!(fmt, "\"{}\"", s),
            Bson::Array(vec) => {
                fmt.write_str("[")?;
                let mut first = true;
                for bson in vec {
                    if !first {
                        fmt.write_str(", ")?;
                    }
                    write!(fmt, "{}", bson)?;
                    first = false;
                }
                fmt.write_str("]")
            }
            Bson::Document(doc) => write!(fmt, "{}", doc),
            Bson::Boolean(b) => write!(fmt, "{}", b),
            Bson::Null => write!(fmt, "null"),
            Bson::RegularExpression(regex) => write!(fmt, "/{}/{}", regex.pattern, regex.options),
            Bson::JavaScriptCode(code) | Bson::Symbol(code) => write!(fmt, "{}", code),
            Bson::JavaScriptCodeWithScope(code) => write!(fmt, "{}", code.code),
            Bson::Int32(i) => write!(fmt, "{}", i),
            Bson::Int64(i) => write!(fmt, "{}", i),
            Bson::Timestamp(t) => write!(fmt, "Timestamp({}, {})", t.time, t.increment),
            Bson::Binary(b) => write!(fmt, "{}", b),
            Bson::ObjectId(id) => write!(fmt, "ObjectId(\"{}\")", id),
            Bson::DateTime(dt) => write!(fmt, "DateTime(\"{}\")", dt),
            Bson::Decimal128(d) => write!(fmt, "{}", d),
            Bson::Undefined => write!(fmt, "undefined"),
            Bson::MinKey => write!(fmt, "MinKey"),
            Bson::MaxKey => write!(fmt, "MaxKey"),
            Bson::DbPointer(p) => write!(fmt, "DbPointer({}, {})", p.namespace, p.id),
        }
    }
}

impl From<f32> for Bson {
    fn from(a: f32) -> Bson {
        Bson::Double(a.into())
    }
}

impl From<f64> for Bson {
    fn from(a: f64) -> Bson {
        Bson::Double(a)
    }
}

impl From<&str> for Bson {
    fn from(s: &str) -> Bson {
        Bson::String(s.to_string())
    }
}

impl From<String> for Bson {
    fn from(a: String) -> Bson {
        Bson::String(a)
    }
}

impl From<bool> for Bson {
    fn from(a: bool) -> Bson {
        Bson::Boolean(a)
    }
}

impl From<i32> for Bson {
    fn from(a: i32) -> Bson {
        Bson::Int32(a)
    }
}

impl From<i64> for Bson {
    fn from(a: i64) -> Bson {
        Bson::Int64(a)
    }
}

impl From<u16> for Bson {
    fn from(a: u16) -> Bson {
        Bson::Int32(a.into())
    }
}

impl From<u32> for Bson {
    fn from(a: u32) -> Bson {
        match i32::try_from(a) {
            Ok(i) => Bson::Int32(i),
            Err(_) => Bson::Int64(a.into()),
        }
    }
}

impl From<Regex> for Bson {
    fn from(a: Regex) -> Bson {
        Bson::RegularExpression(a)
    }
}

impl From<JavaScriptCodeWithScope> for Bson {
    fn from(a: JavaScriptCodeWithScope) -> Bson {
        Bson::JavaScriptCodeWithScope(a)
    }
}

impl From<Timestamp> for Bson {
    fn from(a: Timestamp) -> Bson {
        Bson::Timestamp(a)
    }
}

impl From<Binary> for Bson {
    fn from(a: Binary) -> Bson {
        Bson::Binary(a)
    }
}

impl From<ObjectId> for Bson {
    fn from(a: ObjectId) -> Bson {
        Bson::ObjectId(a)
    }
}

impl From<DateTime> for Bson {
    fn from(a: DateTime) -> Bson {
        Bson::DateTime(a)
    }
}

impl From<Decimal128> for Bson {
    fn from(a: Decimal128) -> Bson {
        Bson::Decimal128(a)
    }
}

impl From<DbPointer> for Bson {
    fn from(a: DbPointer) -> Bson {
        Bson::DbPointer(a)
    }
}

impl From<Document> for Bson {
    fn from(a: Document) -> Bson {
        Bson::Document(a)
    }
}

impl From<uuid::Uuid> for Bson {
    fn from(a: uuid::Uuid) -> Bson {
        Bson::Binary(Binary::from_uuid(a))
    }
}

impl<T: Into<Bson>> From<Vec<T>> for Bson {
    fn from(v: Vec<T>) -> Bson {
        Bson::Array(v.into_iter().map(|val| val.into()).collect())
    }
}

impl<T: Into<Bson>> From<Option<T>> for Bson {
    fn from(a: Option<T>) -> Bson {
        match a {
            None => Bson::Null,
            Some(t) => t.into(),
        }
    }
}

impl Serialize for Bson {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Bson::Double(v) => serializer.serialize_f64(*v),
            Bson::String(v) => serializer.serialize_str(v),
            Bson::Array(v) => v.serialize(serializer),
            Bson::Document(v) => v.serialize(serializer),
            Bson::Boolean(v) => serializer.serialize_bool(*v),
            Bson::Null => serializer.serialize_unit(),
            Bson::Int32(v) => serializer.serialize_i32(*v),
            Bson::Int64(v) => serializer.serialize_i64(*v),
            Bson::ObjectId(oid) => oid.serialize(serializer),
            Bson::DateTime(dt) => dt.serialize(serializer),
            Bson::Binary(b) => b.serialize(serializer),
            Bson::Timestamp(ts) => ts.serialize(serializer),
            Bson::RegularExpression(re) => re.serialize(serializer),
            Bson::JavaScriptCode(code) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$code", code)?;
                map.end()
            }
            Bson::JavaScriptCodeWithScope(code_w_scope) => code_w_scope.serialize(serializer),
            Bson::Symbol(s) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$symbol", s)?;
                map.end()
            }
            Bson::Decimal128(d) => d.serialize(serializer),
            Bson::Undefined => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$undefined", &true)?;
                map.end()
            }
            Bson::MinKey => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$minKey", &1i32)?;
                map.end()
            }
            Bson::MaxKey => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$maxKey", &1i32)?;
                map.end()
            }
            Bson::DbPointer(p) => p.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Bson {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Bson, D::Error> {
        use serde::de::{MapAccess, SeqAccess, Visitor};

        struct BsonVisitor;

        impl<'de> Visitor<'de> for BsonVisitor {
            type Value = Bson;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a BSON value")
            }

            fn visit_bool<E>(self, v: bool) -> std::result::Result<Bson, E> {
                Ok(Bson::Boolean(v))
            }

            fn visit_i8<E>(self, v: i8) -> std::result::Result<Bson, E> {
                Ok(Bson::Int32(v.into()))
            }

            fn visit_i16<E>(self, v: i16) -> std::result::Result<Bson, E> {
                Ok(Bson::Int32(v.into()))
            }

            fn visit_i32<E>(self, v: i32) -> std::result::Result<Bson, E> {
                Ok(Bson::Int32(v))
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<Bson, E> {
                Ok(Bson::Int64(v))
            }

            fn visit_u8<E>(self, v: u8) -> std::result::Result<Bson, E> {
                Ok(Bson::Int32(v.into()))
            }

            fn visit_u16<E>(self, v: u16) -> std::result::Result<Bson, E> {
                Ok(Bson::Int32(v.into()))
            }

            fn visit_u32<E: serde::de::Error>(self, v: u32) -> std::result::Result<Bson, E> {
                match i32::try_from(v) {
                    Ok(i) => Ok(Bson::Int32(i)),
                    Err(_) => Ok(Bson::Int64(v.into())),
                }
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<Bson, E> {
                i64::try_from(v)
                    .map(Bson::Int64)
                    .map_err(|_| E::custom(format!("integer value {} does not fit in an i64", v)))
            }

            fn visit_f64<E>(self, v: f64) -> std::result::Result<Bson, E> {
                Ok(Bson::Double(v))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<Bson, E> {
                Ok(Bson::String(v.to_string()))
            }

            fn visit_string<E>(self, v: String) -> std::result::Result<Bson, E> {
                Ok(Bson::String(v))
            }

            fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<Bson, E> {
                Ok(Bson::Binary(Binary {
                    subtype: BinarySubtype::Generic,
                    bytes: v.to_vec(),
                }))
            }

            fn visit_none<E>(self) -> std::result::Result<Bson, E> {
                Ok(Bson::Null)
            }

            fn visit_some<D: Deserializer<'de>>(
                self,
                deserializer: D,
            ) -> std::result::Result<Bson, D::Error> {
                deserializer.deserialize_any(self)
            }

            fn visit_unit<E>(self) -> std::result::Result<Bson, E> {
                Ok(Bson::Null)
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<Bson, A::Error> {
                let mut values = Vec::new();
                while let Some(value) = seq.next_element()? {
                    values.push(value);
                }
                Ok(Bson::Array(values))
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Bson, A::Error> {
                use serde::de::Error;
                let mut doc = Document::new();
                while let Some((key, value)) = map.next_entry::<String, Bson>()? {
                    doc.append(key, value);
                }
                extjson::from_extended_document(doc).map_err(A::Error::custom)
            }
        }

        deserializer.deserialize_any(BsonVisitor)
    }
}

/// Represents a BSON timestamp value: an opaque, monotonically increasing value used internally
/// by the deployment (notably for `$clusterTime` and `operationTime`).
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Hash, Default)]
pub struct Timestamp {
    /// The number of seconds since the Unix epoch.
    pub time: u32,

    /// An incrementing value to order events with a duplicate seconds value.
    pub increment: u32,
}

impl Timestamp {
    pub(crate) fn to_u64(self) -> u64 {
        (u64::from(self.time) << 32) | u64::from(self.increment)
    }

    pub(crate) fn from_u64(val: u64) -> Self {
        Timestamp {
            time: (val >> 32) as u32,
            increment: (val & 0xFFFF_FFFF) as u32,
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        #[derive(Serialize)]
        struct Body {
            t: u32,
            i: u32,
        }
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(
            "$timestamp",
            &Body {
                t: self.time,
                i: self.increment,
            },
        )?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Timestamp, D::Error> {
        #[derive(Deserialize)]
        struct Body {
            t: u32,
            i: u32,
        }
        #[derive(Deserialize)]
        struct Helper {
            #[serde(rename = "$timestamp")]
            body: Body,
        }
        let helper = Helper::deserialize(deserializer)?;
        Ok(Timestamp {
            time: helper.body.t,
            increment: helper.body.i,
        })
    }
}

/// Represents a BSON regular expression value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Regex {
    /// The regex pattern to match.
    pub pattern: String,

    /// The options for the regex.
    pub options: String,
}

impl Serialize for Regex {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        #[derive(Serialize)]
        struct Body<'a> {
            pattern: &'a str,
            options: &'a str,
        }
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(
            "$regularExpression",
            &Body {
                pattern: &self.pattern,
                options: &self.options,
            },
        )?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Regex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Regex, D::Error> {
        #[derive(Deserialize)]
        struct Body {
            pattern: String,
            options: String,
        }
        #[derive(Deserialize)]
        struct Helper {
            #[serde(rename = "$regularExpression")]
            body: Body,
        }
        let helper = Helper::deserialize(deserializer)?;
        Ok(Regex {
            pattern: helper.body.pattern,
            options: helper.body.options,
        })
    }
}

/// Represents a BSON code with scope value.
#[derive(Debug, Clone, PartialEq)]
pub struct JavaScriptCodeWithScope {
    /// The JavaScript code.
    pub code: String,

    /// The scope document containing variable bindings.
    pub scope: Document,
}

impl Serialize for JavaScriptCodeWithScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("$code", &self.code)?;
        map.serialize_entry("$scope", &self.scope)?;
        map.end()
    }
}

/// Represents a DBPointer (deprecated).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbPointer {
    /// The namespace being pointed to.
    pub namespace: String,

    /// The id of the document being pointed to.
    pub id: ObjectId,
}

impl Serialize for DbPointer {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        #[derive(Serialize)]
        struct Body<'a> {
            #[serde(rename = "$ref")]
            namespace: &'a str,
            #[serde(rename = "$id")]
            id: &'a ObjectId,
        }
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(
            "$dbPointer",
            &Body {
                namespace: &self.namespace,
                id: &self.id,
            },
        )?;
        map.end()
    }
}
