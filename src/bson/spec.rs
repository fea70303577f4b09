//! Constants derived from the BSON specification: element type tags and binary subtypes.

/// All available BSON element types.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ElementType {
    /// 64-bit binary floating point
    Double = 0x01,
    /// UTF-8 string
    String = 0x02,
    /// Embedded document
    EmbeddedDocument = 0x03,
    /// Array
    Array = 0x04,
    /// Binary data
    Binary = 0x05,
    /// Deprecated. Undefined (value)
    Undefined = 0x06,
    /// [ObjectId](http://dochub.mongodb.org/core/objectids)
    ObjectId = 0x07,
    /// Boolean value
    Boolean = 0x08,
    /// UTC datetime
    DateTime = 0x09,
    /// Null value
    Null = 0x0A,
    /// Regular expression
    RegularExpression = 0x0B,
    /// Deprecated. DBPointer
    DbPointer = 0x0C,
    /// JavaScript code
    JavaScriptCode = 0x0D,
    /// Deprecated. Symbol
    Symbol = 0x0E,
    /// JavaScript code with scope
    JavaScriptCodeWithScope = 0x0F,
    /// 32-bit integer
    Int32 = 0x10,
    /// Timestamp
    Timestamp = 0x11,
    /// 64-bit integer
    Int64 = 0x12,
    /// [128-bit decimal floating point](https://github.com/mongodb/specifications/blob/master/source/bson-decimal128/decimal128.md)
    Decimal128 = 0x13,
    /// Min key
    MinKey = 0xFF,
    /// Max key
    MaxKey = 0x7F,
}

impl ElementType {
    /// Attempt to convert from a `u8`.
    pub fn from(tag: u8) -> Option<ElementType> {
        use self::ElementType::*;
        Some(match tag {
            0x01 => Double,
            0x02 => String,
            0x03 => EmbeddedDocument,
            0x04 => Array,
            0x05 => Binary,
            0x06 => Undefined,
            0x07 => ObjectId,
            0x08 => Boolean,
            0x09 => DateTime,
            0x0A => Null,
            0x0B => RegularExpression,
            0x0C => DbPointer,
            0x0D => JavaScriptCode,
            0x0E => Symbol,
            0x0F => JavaScriptCodeWithScope,
            0x10 => Int32,
            0x11 => Timestamp,
            0x12 => Int64,
            0x13 => Decimal128,
            0xFF => MinKey,
            0x7F => MaxKey,
            _ => return None,
        })
    }
}

/// The available binary subtypes, plus a user-defined slot.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum BinarySubtype {
    /// Generic binary subtype
    Generic,
    /// A function
    Function,
    /// Binary (old)
    BinaryOld,
    /// UUID (old)
    UuidOld,
    /// UUID
    Uuid,
    /// MD5
    Md5,
    /// Encrypted BSON value
    Encrypted,
    /// Compressed BSON column
    Column,
    /// Sensitive
    Sensitive,
    /// Vector
    Vector,
    /// User defined
    UserDefined(u8),
    /// Reserved
    Reserved(u8),
}

impl From<u8> for BinarySubtype {
    #[inline]
    fn from(t: u8) -> BinarySubtype {
        match t {
            0x00 => BinarySubtype::Generic,
            0x01 => BinarySubtype::Function,
            0x02 => BinarySubtype::BinaryOld,
            0x03 => BinarySubtype::UuidOld,
            0x04 => BinarySubtype::Uuid,
            0x05 => BinarySubtype::Md5,
            0x06 => BinarySubtype::Encrypted,
            0x07 => BinarySubtype::Column,
            0x08 => BinarySubtype::Sensitive,
            0x09 => BinarySubtype::Vector,
            0x80..=0xFF => BinarySubtype::UserDefined(t),
            _ => BinarySubtype::Reserved(t),
        }
    }
}

impl From<BinarySubtype> for u8 {
    #[inline]
    fn from(t: BinarySubtype) -> u8 {
        match t {
            BinarySubtype::Generic => 0x00,
            BinarySubtype::Function => 0x01,
            BinarySubtype::BinaryOld => 0x02,
            BinarySubtype::UuidOld => 0x03,
            BinarySubtype::Uuid => 0x04,
            BinarySubtype::Md5 => 0x05,
            BinarySubtype::Encrypted => 0x06,
            BinarySubtype::Column => 0x07,
            BinarySubtype::Sensitive => 0x08,
            BinarySubtype::Vector => 0x09,
            BinarySubtype::UserDefined(t) => t,
            BinarySubtype::Reserved(t) => t,
        }
    }
}
