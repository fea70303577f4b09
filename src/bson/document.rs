//! An ordered BSON document.

use std::{
    fmt,
    io::{Read, Write},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{de, oid::ObjectId, ser, Array, Binary, Bson, DateTime, Timestamp};
use crate::error::Result;

/// A BSON document: an ordered sequence of key/value pairs.
///
/// Duplicate keys are representable — the wire format permits them — and are preserved through
/// a decode/encode round trip. Keyed lookups resolve to the first occurrence.
#[derive(Clone, PartialEq, Default)]
pub struct Document {
    entries: Vec<(String, Bson)>,
}

impl Document {
    /// Creates a new empty Document.
    pub fn new() -> Document {
        Document {
            entries: Vec::new(),
        }
    }

    /// The number of entries in the document, counting duplicate keys individually.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document contains no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the value corresponding to the first occurrence of `key`.
    pub fn get(&self, key: impl AsRef<str>) -> Option<&Bson> {
        let key = key.as_ref();
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns a mutable reference to the value corresponding to the first occurrence of `key`.
    pub fn get_mut(&mut self, key: impl AsRef<str>) -> Option<&mut Bson> {
        let key = key.as_ref();
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Whether the document contains the given key.
    pub fn contains_key(&self, key: impl AsRef<str>) -> bool {
        self.get(key).is_some()
    }

    /// Sets the value for `key`. If the key is already present, its first occurrence is
    /// replaced in place and the previous value returned; otherwise the entry is appended.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bson>) -> Option<Bson> {
        let key = key.into();
        let value = value.into();
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Appends an entry without checking for an existing key, preserving wire-level duplicate
    /// keys on decode.
    pub(crate) fn append(&mut self, key: impl Into<String>, value: impl Into<Bson>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Removes the first occurrence of `key`, returning its value.
    pub fn remove(&mut self, key: impl AsRef<str>) -> Option<Bson> {
        let key = key.as_ref();
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// An iterator over the keys of the document, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// An iterator over the values of the document, in order.
    pub fn values(&self) -> impl Iterator<Item = &Bson> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// An iterator over the `(key, value)` pairs of the document, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Bson)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// If the first occurrence of `key` is a string, returns it.
    pub fn get_str(&self, key: impl AsRef<str>) -> Option<&str> {
        self.get(key).and_then(Bson::as_str)
    }

    /// If the first occurrence of `key` is an `Int32`, returns it.
    pub fn get_i32(&self, key: impl AsRef<str>) -> Option<i32> {
        self.get(key).and_then(Bson::as_i32)
    }

    /// If the first occurrence of `key` is an `Int64`, returns it.
    pub fn get_i64(&self, key: impl AsRef<str>) -> Option<i64> {
        self.get(key).and_then(Bson::as_i64)
    }

    /// If the first occurrence of `key` is a `Double`, returns it.
    pub fn get_f64(&self, key: impl AsRef<str>) -> Option<f64> {
        self.get(key).and_then(Bson::as_f64)
    }

    /// If the first occurrence of `key` is a boolean, returns it.
    pub fn get_bool(&self, key: impl AsRef<str>) -> Option<bool> {
        self.get(key).and_then(Bson::as_bool)
    }

    /// If the first occurrence of `key` is a document, returns it.
    pub fn get_document(&self, key: impl AsRef<str>) -> Option<&Document> {
        self.get(key).and_then(Bson::as_document)
    }

    /// If the first occurrence of `key` is an array, returns it.
    pub fn get_array(&self, key: impl AsRef<str>) -> Option<&Array> {
        self.get(key).and_then(Bson::as_array)
    }

    /// If the first occurrence of `key` is an ObjectId, returns it.
    pub fn get_object_id(&self, key: impl AsRef<str>) -> Option<ObjectId> {
        self.get(key).and_then(Bson::as_object_id)
    }

    /// If the first occurrence of `key` is a datetime, returns it.
    pub fn get_datetime(&self, key: impl AsRef<str>) -> Option<&DateTime> {
        self.get(key).and_then(Bson::as_datetime)
    }

    /// If the first occurrence of `key` is a timestamp, returns it.
    pub fn get_timestamp(&self, key: impl AsRef<str>) -> Option<Timestamp> {
        self.get(key).and_then(Bson::as_timestamp)
    }

    /// If the first occurrence of `key` is a binary value, returns it.
    pub fn get_binary(&self, key: impl AsRef<str>) -> Option<&Binary> {
        self.get(key).and_then(|b| match b {
            Bson::Binary(bin) => Some(bin),
            _ => None,
        })
    }

    /// Attempts to serialize the `Document` into its binary form and write it to the writer.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        ser::write_document(writer, self)
    }

    /// Serializes the `Document` into its binary form.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.to_writer(&mut out)?;
        Ok(out)
    }

    /// Attempts to deserialize a `Document` from a byte stream.
    pub fn from_reader<R: Read>(reader: R) -> Result<Document> {
        de::read_document_from_reader(reader)
    }

    /// Attempts to deserialize a `Document` that is encoded in full in the provided slice,
    /// rejecting any trailing bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Document> {
        de::read_document_exact(bytes)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str("{")?;
        let mut first = true;
        for (k, v) in self.iter() {
            if !first {
                fmt.write_str(",")?;
            }
            write!(fmt, " \"{}\": {}", k, v)?;
            first = false;
        }
        write!(fmt, "{}}}", if first { "" } else { " " })
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str("Document(")?;
        fmt.debug_map().entries(self.iter()).finish()?;
        fmt.write_str(")")
    }
}

impl IntoIterator for Document {
    type Item = (String, Bson);
    type IntoIter = std::vec::IntoIter<(String, Bson)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Bson);
    type IntoIter = Box<dyn Iterator<Item = (&'a String, &'a Bson)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.entries.iter().map(|(k, v)| (k, v)))
    }
}

impl<K: Into<String>, V: Into<Bson>> FromIterator<(K, V)> for Document {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl<K: Into<String>, V: Into<Bson>> Extend<(K, V)> for Document {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (k, v) in self.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Document, D::Error> {
        use serde::de::{MapAccess, Visitor};

        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = Document;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a BSON document")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Document, A::Error> {
                let mut doc = Document::new();
                while let Some((key, value)) = map.next_entry::<String, Bson>()? {
                    doc.append(key, value);
                }
                Ok(doc)
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}
