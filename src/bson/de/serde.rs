use serde::de::{
    self,
    value::StringDeserializer,
    DeserializeSeed,
    EnumAccess,
    IntoDeserializer,
    MapAccess,
    SeqAccess,
    VariantAccess,
    Visitor,
};

use crate::{
    bson::{extjson, Bson, Document},
    error::{Error, Result},
};

/// A serde `Deserializer` reading out of a [`Bson`] value.
///
/// Numeric requests are satisfied only when the stored value converts losslessly; narrowing
/// that would lose value is an error rather than a silent truncation.
pub(crate) struct Deserializer {
    value: Bson,
}

impl Deserializer {
    pub(crate) fn new(value: Bson) -> Self {
        Self { value }
    }

    fn lossless_i64(&self) -> Result<i64> {
        match &self.value {
            Bson::Int32(i) => Ok(i64::from(*i)),
            Bson::Int64(i) => Ok(*i),
            Bson::Double(f) if *f == f.trunc() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 => {
                Ok(*f as i64)
            }
            other => Err(Error::invalid_bson(format!(
                "cannot losslessly convert {:?} to an integer",
                other
            ))),
        }
    }

    fn lossless_f64(&self) -> Result<f64> {
        match &self.value {
            Bson::Double(f) => Ok(*f),
            // 2^53 bounds the range of integers representable exactly in an f64.
            Bson::Int32(i) => Ok(f64::from(*i)),
            Bson::Int64(i) if i.abs() <= (1i64 << 53) => Ok(*i as f64),
            other => Err(Error::invalid_bson(format!(
                "cannot losslessly convert {:?} to a double",
                other
            ))),
        }
    }
}

macro_rules! deserialize_lossless_int {
    ($method:ident, $visit:ident, $ty:ty) => {
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
            let wide = self.lossless_i64()?;
            let narrow: $ty = wide.try_into().map_err(|_| {
                Error::invalid_bson(format!(
                    "integer {} does not fit in a {}",
                    wide,
                    stringify!($ty)
                ))
            })?;
            visitor.$visit(narrow)
        }
    };
}

impl<'de> de::Deserializer<'de> for Deserializer {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Double(v) => visitor.visit_f64(v),
            Bson::String(v) => visitor.visit_string(v),
            Bson::Array(v) => visitor.visit_seq(SeqDeserializer {
                iter: v.into_iter(),
            }),
            Bson::Document(v) => visitor.visit_map(MapDeserializer::new(v)),
            Bson::Boolean(v) => visitor.visit_bool(v),
            Bson::Null => visitor.visit_unit(),
            Bson::Int32(v) => visitor.visit_i32(v),
            Bson::Int64(v) => visitor.visit_i64(v),
            // The remaining variants surface as their extended JSON documents so that both
            // the typed wrappers and plain serde containers can consume them.
            other => visitor.visit_map(MapDeserializer::new(extjson::into_extended_document(
                other,
            ))),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Boolean(b) => visitor.visit_bool(b),
            other => Err(Error::invalid_bson(format!("expected boolean, got {:?}", other))),
        }
    }

    deserialize_lossless_int!(deserialize_i8, visit_i8, i8);
    deserialize_lossless_int!(deserialize_i16, visit_i16, i16);
    deserialize_lossless_int!(deserialize_i32, visit_i32, i32);
    deserialize_lossless_int!(deserialize_u8, visit_u8, u8);
    deserialize_lossless_int!(deserialize_u16, visit_u16, u16);
    deserialize_lossless_int!(deserialize_u32, visit_u32, u32);

    fn deserialize_i64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_i64(self.lossless_i64()?)
    }

    fn deserialize_u64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let wide = self.lossless_i64()?;
        let narrow: u64 = wide
            .try_into()
            .map_err(|_| Error::invalid_bson(format!("integer {} does not fit in a u64", wide)))?;
        visitor.visit_u64(narrow)
    }

    fn deserialize_i128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_i128(self.lossless_i64()?.into())
    }

    fn deserialize_u128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let wide = self.lossless_i64()?;
        let narrow: u128 = wide
            .try_into()
            .map_err(|_| Error::invalid_bson(format!("integer {} does not fit in a u128", wide)))?;
        visitor.visit_u128(narrow)
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let wide = self.lossless_f64()?;
        let narrow = wide as f32;
        if f64::from(narrow) != wide && !wide.is_nan() {
            return Err(Error::invalid_bson(format!(
                "double {} does not fit losslessly in an f32",
                wide
            )));
        }
        visitor.visit_f32(narrow)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_f64(self.lossless_f64()?)
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::String(s) => visitor.visit_string(s),
            Bson::Symbol(s) => visitor.visit_string(s),
            Bson::JavaScriptCode(s) => visitor.visit_string(s),
            other => Err(Error::invalid_bson(format!("expected string, got {:?}", other))),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Binary(b) => visitor.visit_byte_buf(b.bytes),
            other => Err(Error::invalid_bson(format!("expected binary, got {:?}", other))),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Null => visitor.visit_unit(),
            other => Err(Error::invalid_bson(format!("expected null, got {:?}", other))),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Array(v) => visitor.visit_seq(SeqDeserializer {
                iter: v.into_iter(),
            }),
            other => Err(Error::invalid_bson(format!("expected array, got {:?}", other))),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_any(visitor)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_any(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self.value {
            Bson::String(s) => visitor.visit_enum(EnumDeserializer {
                variant: s,
                value: None,
            }),
            Bson::Document(doc) => {
                let mut iter = doc.into_iter();
                let (variant, value) = match (iter.next(), iter.next()) {
                    (Some(entry), None) => entry,
                    _ => {
                        return Err(Error::invalid_bson(
                            "enum documents must have exactly one key",
                        ))
                    }
                };
                visitor.visit_enum(EnumDeserializer {
                    variant,
                    value: Some(value),
                })
            }
            other => Err(Error::invalid_bson(format!("expected enum, got {:?}", other))),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_unit()
    }
}

struct SeqDeserializer {
    iter: std::vec::IntoIter<Bson>,
}

impl<'de> SeqAccess<'de> for SeqDeserializer {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        match self.iter.next() {
            Some(value) => seed.deserialize(Deserializer::new(value)).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapDeserializer {
    iter: std::vec::IntoIter<(String, Bson)>,
    value: Option<Bson>,
}

impl MapDeserializer {
    fn new(doc: Document) -> Self {
        Self {
            iter: doc.into_iter().collect::<Vec<_>>().into_iter(),
            value: None,
        }
    }
}

impl<'de> MapAccess<'de> for MapDeserializer {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                let key_de: StringDeserializer<Error> = key.into_deserializer();
                seed.deserialize(key_de).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        let value = self
            .value
            .take()
            .ok_or_else(|| Error::invalid_bson("next_value_seed called before next_key_seed"))?;
        seed.deserialize(Deserializer::new(value))
    }
}

struct EnumDeserializer {
    variant: String,
    value: Option<Bson>,
}

impl<'de> EnumAccess<'de> for EnumDeserializer {
    type Error = Error;
    type Variant = VariantDeserializer;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, Self::Variant)> {
        let key_de: StringDeserializer<Error> = self.variant.into_deserializer();
        let variant = seed.deserialize(key_de)?;
        Ok((variant, VariantDeserializer { value: self.value }))
    }
}

struct VariantDeserializer {
    value: Option<Bson>,
}

impl<'de> VariantAccess<'de> for VariantDeserializer {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        match self.value {
            None | Some(Bson::Null) => Ok(()),
            Some(other) => Err(Error::invalid_bson(format!(
                "unit enum variants carry no value, got {:?}",
                other
            ))),
        }
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value> {
        let value = self
            .value
            .ok_or_else(|| Error::invalid_bson("newtype enum variant requires a value"))?;
        seed.deserialize(Deserializer::new(value))
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        let value = self
            .value
            .ok_or_else(|| Error::invalid_bson("tuple enum variant requires a value"))?;
        de::Deserializer::deserialize_seq(Deserializer::new(value), visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        let value = self
            .value
            .ok_or_else(|| Error::invalid_bson("struct enum variant requires a value"))?;
        de::Deserializer::deserialize_map(Deserializer::new(value), visitor)
    }
}
