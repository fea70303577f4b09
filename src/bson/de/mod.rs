//! Deserialization of BSON bytes and serde-driven mapping of BSON into Rust types.

mod serde;

use std::io::Read;

use ::serde::de::DeserializeOwned;

use super::{
    oid::ObjectId,
    spec::{BinarySubtype, ElementType},
    Binary,
    Bson,
    DbPointer,
    Decimal128,
    Document,
    JavaScriptCodeWithScope,
    Regex,
    Timestamp,
};
use crate::error::{Error, Result};

pub(crate) use self::serde::Deserializer;

pub(crate) const MIN_BSON_DOCUMENT_SIZE: i32 = 5;

/// Decode a `T` from a [`Bson`] value.
pub fn from_bson<T: DeserializeOwned>(bson: Bson) -> Result<T> {
    T::deserialize(Deserializer::new(bson))
}

/// Decode a `T` from a [`Document`].
pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    from_bson(Bson::Document(doc))
}

/// Decode a `T` from BSON document bytes.
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    from_document(Document::from_slice(bytes)?)
}

/// Decode a full document from the slice, rejecting trailing bytes.
pub(crate) fn read_document_exact(bytes: &[u8]) -> Result<Document> {
    let mut reader = SliceReader::new(bytes);
    let doc = parse_document(&mut reader)?;
    if !reader.is_empty() {
        return Err(Error::invalid_bson(format!(
            "{} trailing bytes after document",
            reader.remaining()
        )));
    }
    Ok(doc)
}

/// Read a length-prefixed document out of a byte stream.
pub(crate) fn read_document_from_reader<R: Read>(mut reader: R) -> Result<Document> {
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| Error::invalid_bson(format!("failed to read document length: {}", e)))?;
    let length = i32::from_le_bytes(len_bytes);
    if length < MIN_BSON_DOCUMENT_SIZE {
        return Err(Error::invalid_bson(format!(
            "document length {} too small",
            length
        )));
    }

    let mut bytes = Vec::with_capacity(length as usize);
    bytes.extend_from_slice(&len_bytes);
    reader
        .by_ref()
        .take(length as u64 - 4)
        .read_to_end(&mut bytes)
        .map_err(|e| Error::invalid_bson(format!("failed to read document body: {}", e)))?;
    if bytes.len() != length as usize {
        return Err(Error::invalid_bson(
            "stream ended before declared document length",
        ));
    }

    read_document_exact(&bytes)
}

struct SliceReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::invalid_bson(format!(
                "declared length overruns the buffer: need {} bytes, have {}",
                n,
                self.remaining()
            )));
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }

    fn read_cstring(&mut self) -> Result<&'a str> {
        let rest = &self.bytes[self.pos..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Error::invalid_bson("cstring missing NUL terminator"))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| Error::invalid_bson("cstring is not valid UTF-8"))?;
        self.pos += nul + 1;
        Ok(s)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        if len < 1 {
            return Err(Error::invalid_bson(format!(
                "string length {} must include the NUL terminator",
                len
            )));
        }
        let bytes = self.read_bytes(len as usize)?;
        if bytes[len as usize - 1] != 0 {
            return Err(Error::invalid_bson("string missing NUL terminator"));
        }
        std::str::from_utf8(&bytes[..len as usize - 1])
            .map(String::from)
            .map_err(|_| Error::invalid_bson("string is not valid UTF-8"))
    }
}

fn parse_document(reader: &mut SliceReader<'_>) -> Result<Document> {
    let mut doc = Document::new();
    parse_body(reader, |reader, tag, key| {
        doc.append(key, parse_element(reader, tag)?);
        Ok(())
    })?;
    Ok(doc)
}

fn parse_array(reader: &mut SliceReader<'_>) -> Result<Vec<Bson>> {
    let mut array = Vec::new();
    parse_body(reader, |reader, tag, key| {
        // Array keys must be the decimal indices "0", "1", … in order.
        if key != array.len().to_string() {
            return Err(Error::invalid_bson(format!(
                "array key {:?} is not the expected index {}",
                key,
                array.len()
            )));
        }
        array.push(parse_element(reader, tag)?);
        Ok(())
    })?;
    Ok(array)
}

fn parse_body(
    reader: &mut SliceReader<'_>,
    mut on_element: impl FnMut(&mut SliceReader<'_>, ElementType, &str) -> Result<()>,
) -> Result<()> {
    let length = reader.read_i32()?;
    if length < MIN_BSON_DOCUMENT_SIZE {
        return Err(Error::invalid_bson(format!(
            "document length {} too small",
            length
        )));
    }
    let body_len = length as usize - 4;
    if reader.remaining() < body_len {
        return Err(Error::invalid_bson(format!(
            "document length {} overruns the buffer",
            length
        )));
    }
    let end = reader.pos + body_len;

    loop {
        if reader.pos >= end {
            return Err(Error::invalid_bson(
                "document content overran its declared length",
            ));
        }
        let tag = reader.read_u8()?;
        if tag == 0 {
            break;
        }
        let element_type = ElementType::from(tag)
            .ok_or_else(|| Error::invalid_bson(format!("unknown element type {:#x}", tag)))?;
        let key = reader.read_cstring()?;
        if reader.pos > end {
            return Err(Error::invalid_bson(
                "document content overran its declared length",
            ));
        }
        on_element(reader, element_type, key)?;
    }

    if reader.pos != end {
        return Err(Error::invalid_bson(format!(
            "document content did not end at its declared length of {}",
            length
        )));
    }
    Ok(())
}

fn parse_element(reader: &mut SliceReader<'_>, tag: ElementType) -> Result<Bson> {
    Ok(match tag {
        ElementType::Double => Bson::Double(reader.read_f64()?),
        ElementType::String => Bson::String(reader.read_string()?),
        ElementType::EmbeddedDocument => Bson::Document(parse_document(reader)?),
        ElementType::Array => Bson::Array(parse_array(reader)?),
        ElementType::Binary => {
            let len = reader.read_i32()?;
            if len < 0 {
                return Err(Error::invalid_bson(format!("negative binary length {}", len)));
            }
            let subtype = BinarySubtype::from(reader.read_u8()?);
            let bytes = if subtype == BinarySubtype::BinaryOld {
                if len < 4 {
                    return Err(Error::invalid_bson(
                        "binary subtype 2 requires an inner length prefix",
                    ));
                }
                let inner = reader.read_i32()?;
                if inner != len - 4 {
                    return Err(Error::invalid_bson(format!(
                        "binary subtype 2 inner length {} does not match outer length {}",
                        inner, len
                    )));
                }
                reader.read_bytes(inner as usize)?
            } else {
                reader.read_bytes(len as usize)?
            };
            Bson::Binary(Binary {
                subtype,
                bytes: bytes.to_vec(),
            })
        }
        ElementType::Undefined => Bson::Undefined,
        ElementType::ObjectId => {
            let bytes: [u8; 12] = reader.read_bytes(12)?.try_into().unwrap();
            Bson::ObjectId(ObjectId::from_bytes(bytes))
        }
        ElementType::Boolean => match reader.read_u8()? {
            0 => Bson::Boolean(false),
            1 => Bson::Boolean(true),
            other => {
                return Err(Error::invalid_bson(format!(
                    "invalid boolean value {:#x}",
                    other
                )))
            }
        },
        ElementType::DateTime => Bson::DateTime(super::DateTime::from_millis(reader.read_i64()?)),
        ElementType::Null => Bson::Null,
        ElementType::RegularExpression => {
            let pattern = reader.read_cstring()?.to_string();
            let options = reader.read_cstring()?.to_string();
            Bson::RegularExpression(Regex { pattern, options })
        }
        ElementType::DbPointer => {
            let namespace = reader.read_string()?;
            let bytes: [u8; 12] = reader.read_bytes(12)?.try_into().unwrap();
            Bson::DbPointer(DbPointer {
                namespace,
                id: ObjectId::from_bytes(bytes),
            })
        }
        ElementType::JavaScriptCode => Bson::JavaScriptCode(reader.read_string()?),
        ElementType::Symbol => Bson::Symbol(reader.read_string()?),
        ElementType::JavaScriptCodeWithScope => {
            let start = reader.pos;
            let total = reader.read_i32()?;
            if total < MIN_BSON_DOCUMENT_SIZE {
                return Err(Error::invalid_bson(format!(
                    "code-with-scope length {} too small",
                    total
                )));
            }
            let code = reader.read_string()?;
            let scope = parse_document(reader)?;
            if reader.pos - start != total as usize {
                return Err(Error::invalid_bson(
                    "code-with-scope length does not match its content",
                ));
            }
            Bson::JavaScriptCodeWithScope(JavaScriptCodeWithScope { code, scope })
        }
        ElementType::Int32 => Bson::Int32(reader.read_i32()?),
        ElementType::Timestamp => Bson::Timestamp(Timestamp::from_u64(reader.read_u64()?)),
        ElementType::Int64 => Bson::Int64(reader.read_i64()?),
        ElementType::Decimal128 => {
            let bytes: [u8; 16] = reader.read_bytes(16)?.try_into().unwrap();
            Bson::Decimal128(Decimal128::from_bytes(bytes))
        }
        ElementType::MinKey => Bson::MinKey,
        ElementType::MaxKey => Bson::MaxKey,
    })
}
