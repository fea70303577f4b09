//! Serialization of BSON values and serde-driven mapping of Rust types into them.

mod serde;

use std::io::Write;

use ::serde::Serialize;

use super::{Binary, BinarySubtype, Bson, Document};
use crate::error::{Error, Result};

pub(crate) use self::serde::Serializer;

/// Encode a `Document` into its binary form and write it to the writer.
pub(crate) fn write_document<W: Write>(mut writer: W, doc: &Document) -> Result<()> {
    let mut buf = Vec::new();
    encode_document(&mut buf, doc)?;
    writer.write_all(&buf)?;
    Ok(())
}

fn encode_document(buf: &mut Vec<u8>, doc: &Document) -> Result<()> {
    let start = buf.len();
    buf.extend_from_slice(&[0u8; 4]);

    for (key, value) in doc.iter() {
        buf.push(value.element_type() as u8);
        write_cstring(buf, key)?;
        encode_bson(buf, value)?;
    }

    buf.push(0x00);
    backpatch_length(buf, start)
}

fn encode_array(buf: &mut Vec<u8>, array: &[Bson]) -> Result<()> {
    let start = buf.len();
    buf.extend_from_slice(&[0u8; 4]);

    let mut index_buf = itoa_buffer();
    for (index, value) in array.iter().enumerate() {
        buf.push(value.element_type() as u8);
        write_cstring(buf, index_key(&mut index_buf, index))?;
        encode_bson(buf, value)?;
    }

    buf.push(0x00);
    backpatch_length(buf, start)
}

fn encode_bson(buf: &mut Vec<u8>, value: &Bson) -> Result<()> {
    match value {
        Bson::Double(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Bson::String(s) => write_string(buf, s)?,
        Bson::Array(a) => encode_array(buf, a)?,
        Bson::Document(d) => encode_document(buf, d)?,
        Bson::Boolean(b) => buf.push(u8::from(*b)),
        Bson::Null | Bson::Undefined | Bson::MinKey | Bson::MaxKey => {}
        Bson::RegularExpression(regex) => {
            write_cstring(buf, &regex.pattern)?;
            write_cstring(buf, &regex.options)?;
        }
        Bson::JavaScriptCode(code) => write_string(buf, code)?,
        Bson::JavaScriptCodeWithScope(code_w_scope) => {
            let start = buf.len();
            buf.extend_from_slice(&[0u8; 4]);
            write_string(buf, &code_w_scope.code)?;
            encode_document(buf, &code_w_scope.scope)?;
            backpatch_length(buf, start)?;
        }
        Bson::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Bson::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Bson::Timestamp(ts) => buf.extend_from_slice(&ts.to_u64().to_le_bytes()),
        Bson::Binary(Binary { subtype, bytes }) => {
            // Subtype 2 carries a legacy inner length prefix counted by the outer length.
            let inner_prefix = if *subtype == BinarySubtype::BinaryOld {
                4
            } else {
                0
            };
            let len = i32::try_from(bytes.len() + inner_prefix)
                .map_err(|_| Error::invalid_bson("binary value too large to encode"))?;
            buf.extend_from_slice(&len.to_le_bytes());
            buf.push(u8::from(*subtype));
            if inner_prefix != 0 {
                buf.extend_from_slice(&(len - 4).to_le_bytes());
            }
            buf.extend_from_slice(bytes);
        }
        Bson::ObjectId(oid) => buf.extend_from_slice(&oid.bytes()),
        Bson::DateTime(dt) => buf.extend_from_slice(&dt.timestamp_millis().to_le_bytes()),
        Bson::Symbol(s) => write_string(buf, s)?,
        Bson::Decimal128(d) => buf.extend_from_slice(&d.bytes()),
        Bson::DbPointer(p) => {
            write_string(buf, &p.namespace)?;
            buf.extend_from_slice(&p.id.bytes());
        }
    }
    Ok(())
}

fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = i32::try_from(s.len() + 1)
        .map_err(|_| Error::invalid_bson("string too large to encode"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    buf.push(0x00);
    Ok(())
}

fn write_cstring(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(Error::invalid_bson(format!(
            "cstring cannot contain a NUL byte: {:?}",
            s
        )));
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0x00);
    Ok(())
}

fn backpatch_length(buf: &mut [u8], start: usize) -> Result<()> {
    let len = i32::try_from(buf.len() - start)
        .map_err(|_| Error::invalid_bson("document too large to encode"))?;
    buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

fn itoa_buffer() -> [u8; 20] {
    [0u8; 20]
}

/// Formats an array index as a decimal string without allocating per element.
fn index_key(buf: &mut [u8; 20], mut index: usize) -> &str {
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (index % 10) as u8;
        index /= 10;
        if index == 0 {
            break;
        }
    }
    std::str::from_utf8(&buf[pos..]).expect("decimal digits are valid UTF-8")
}

/// Encode a `T` into a [`Bson`] value.
///
/// The [`Serialize`] implementation of `T` determines the shape; helper modules in
/// [`serde_helpers`](crate::bson::serde_helpers) select alternate representations for dates,
/// UUIDs and byte buffers.
pub fn to_bson<T: Serialize + ?Sized>(value: &T) -> Result<Bson> {
    value.serialize(Serializer::new())
}

/// Encode a `T` into a [`Document`], failing if the value does not serialize to a document.
pub fn to_document<T: Serialize + ?Sized>(value: &T) -> Result<Document> {
    match to_bson(value)? {
        Bson::Document(doc) => Ok(doc),
        bson => Err(Error::invalid_bson(format!(
            "value did not serialize to a document: {:?}",
            bson
        ))),
    }
}

/// Encode a `T` into its BSON document byte representation.
pub fn to_vec<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    to_document(value)?.to_vec()
}
