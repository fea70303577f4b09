use serde::ser::{self, Serialize, SerializeMap, SerializeSeq};

use crate::{
    bson::{extjson, Array, Binary, BinarySubtype, Bson, Document},
    error::{Error, Result},
};

/// A serde `Serializer` producing [`Bson`] values.
///
/// Map and struct output is folded through the extended JSON detector so that the special
/// value types ([`ObjectId`](crate::bson::oid::ObjectId), [`DateTime`](crate::bson::DateTime),
/// [`Binary`], …) round-trip into their native variants rather than plain documents.
#[derive(Default)]
pub(crate) struct Serializer {
    _priv: (),
}

impl Serializer {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl ser::Serializer for Serializer {
    type Ok = Bson;
    type Error = Error;

    type SerializeSeq = ArraySerializer;
    type SerializeTuple = ArraySerializer;
    type SerializeTupleStruct = ArraySerializer;
    type SerializeTupleVariant = TupleVariantSerializer;
    type SerializeMap = DocumentSerializer;
    type SerializeStruct = DocumentSerializer;
    type SerializeStructVariant = StructVariantSerializer;

    fn serialize_bool(self, v: bool) -> Result<Bson> {
        Ok(Bson::Boolean(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Bson> {
        Ok(Bson::Int32(v.into()))
    }

    fn serialize_i16(self, v: i16) -> Result<Bson> {
        Ok(Bson::Int32(v.into()))
    }

    fn serialize_i32(self, v: i32) -> Result<Bson> {
        Ok(Bson::Int32(v))
    }

    fn serialize_i64(self, v: i64) -> Result<Bson> {
        Ok(Bson::Int64(v))
    }

    fn serialize_u8(self, v: u8) -> Result<Bson> {
        Ok(Bson::Int32(v.into()))
    }

    fn serialize_u16(self, v: u16) -> Result<Bson> {
        Ok(Bson::Int32(v.into()))
    }

    fn serialize_u32(self, v: u32) -> Result<Bson> {
        match i32::try_from(v) {
            Ok(i) => Ok(Bson::Int32(i)),
            Err(_) => Ok(Bson::Int64(v.into())),
        }
    }

    fn serialize_u64(self, v: u64) -> Result<Bson> {
        // Unsigned values are stored in the smallest signed type that holds them losslessly.
        i64::try_from(v).map(Bson::Int64).map_err(|_| {
            Error::invalid_bson(format!("unsigned integer {} cannot be stored losslessly", v))
        })
    }

    fn serialize_f32(self, v: f32) -> Result<Bson> {
        Ok(Bson::Double(v.into()))
    }

    fn serialize_f64(self, v: f64) -> Result<Bson> {
        Ok(Bson::Double(v))
    }

    fn serialize_char(self, v: char) -> Result<Bson> {
        Ok(Bson::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Bson> {
        Ok(Bson::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Bson> {
        Ok(Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: v.to_vec(),
        }))
    }

    fn serialize_none(self) -> Result<Bson> {
        Ok(Bson::Null)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Bson> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Bson> {
        Ok(Bson::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Bson> {
        Ok(Bson::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Bson> {
        Ok(Bson::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Bson> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Bson> {
        let mut doc = Document::new();
        doc.insert(variant, value.serialize(Serializer::new())?);
        Ok(Bson::Document(doc))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq> {
        Ok(ArraySerializer {
            inner: Array::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Ok(TupleVariantSerializer {
            inner: Array::with_capacity(len),
            name: variant,
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        Ok(DocumentSerializer {
            inner: Document::new(),
            next_key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct> {
        self.serialize_map(None)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Ok(StructVariantSerializer {
            inner: Document::new(),
            name: variant,
        })
    }
}

pub(crate) struct ArraySerializer {
    inner: Array,
}

impl SerializeSeq for ArraySerializer {
    type Ok = Bson;
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.inner.push(value.serialize(Serializer::new())?);
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        Ok(Bson::Array(self.inner))
    }
}

impl ser::SerializeTuple for ArraySerializer {
    type Ok = Bson;
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Bson> {
        SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for ArraySerializer {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Bson> {
        SerializeSeq::end(self)
    }
}

pub(crate) struct TupleVariantSerializer {
    inner: Array,
    name: &'static str,
}

impl ser::SerializeTupleVariant for TupleVariantSerializer {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.inner.push(value.serialize(Serializer::new())?);
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        let mut doc = Document::new();
        doc.insert(self.name, Bson::Array(self.inner));
        Ok(Bson::Document(doc))
    }
}

pub(crate) struct DocumentSerializer {
    inner: Document,
    next_key: Option<String>,
}

impl SerializeMap for DocumentSerializer {
    type Ok = Bson;
    type Error = Error;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<()> {
        match key.serialize(Serializer::new())? {
            Bson::String(s) => {
                self.next_key = Some(s);
                Ok(())
            }
            other => Err(Error::invalid_bson(format!(
                "document keys must be strings, got {:?}",
                other
            ))),
        }
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let key = self
            .next_key
            .take()
            .ok_or_else(|| Error::invalid_bson("serialize_value called before serialize_key"))?;
        self.inner.append(key, value.serialize(Serializer::new())?);
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        extjson::from_extended_document(self.inner)
    }
}

impl ser::SerializeStruct for DocumentSerializer {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        self.inner
            .append(key, value.serialize(Serializer::new())?);
        Ok(())
    }

    fn skip_field(&mut self, _key: &'static str) -> Result<()> {
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        extjson::from_extended_document(self.inner)
    }
}

pub(crate) struct StructVariantSerializer {
    inner: Document,
    name: &'static str,
}

impl ser::SerializeStructVariant for StructVariantSerializer {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        self.inner
            .append(key, value.serialize(Serializer::new())?);
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        let mut doc = Document::new();
        doc.insert(self.name, Bson::Document(self.inner));
        Ok(Bson::Document(doc))
    }
}
