//! Conversions between BSON values and their canonical extended JSON representation.

use std::str::FromStr;

use serde_json::{json, Value};

use super::{
    oid::ObjectId,
    Binary,
    Bson,
    DateTime,
    DbPointer,
    Decimal128,
    Document,
    JavaScriptCodeWithScope,
    Regex,
    Timestamp,
};
use crate::error::{Error, Result};

/// Converts a JSON value (canonical or relaxed extended JSON) into a [`Bson`] value.
pub fn json_to_bson(json: Value) -> Result<Bson> {
    serde_json::from_value(json)
        .map_err(|e| Error::invalid_bson(format!("invalid extended JSON: {}", e)))
}

impl Bson {
    /// Converts this value into its canonical extended JSON representation.
    pub fn into_canonical_extjson(self) -> Value {
        match self {
            Bson::Double(d) if d.is_nan() => json!({ "$numberDouble": "NaN" }),
            Bson::Double(d) if d == f64::INFINITY => json!({ "$numberDouble": "Infinity" }),
            Bson::Double(d) if d == f64::NEG_INFINITY => json!({ "$numberDouble": "-Infinity" }),
            Bson::Double(d) if d.fract() == 0.0 => {
                json!({ "$numberDouble": format!("{:.1}", d) })
            }
            Bson::Double(d) => json!({ "$numberDouble": d.to_string() }),
            Bson::String(s) => json!(s),
            Bson::Array(arr) => {
                Value::Array(arr.into_iter().map(Bson::into_canonical_extjson).collect())
            }
            Bson::Document(doc) => Value::Object(
                doc.into_iter()
                    .map(|(k, v)| (k, v.into_canonical_extjson()))
                    .collect(),
            ),
            Bson::Boolean(b) => json!(b),
            Bson::Null => Value::Null,
            Bson::RegularExpression(Regex { pattern, options }) => {
                json!({ "$regularExpression": { "pattern": pattern, "options": options } })
            }
            Bson::JavaScriptCode(code) => json!({ "$code": code }),
            Bson::JavaScriptCodeWithScope(JavaScriptCodeWithScope { code, scope }) => {
                json!({ "$code": code, "$scope": Bson::Document(scope).into_canonical_extjson() })
            }
            Bson::Int32(i) => json!({ "$numberInt": i.to_string() }),
            Bson::Int64(i) => json!({ "$numberLong": i.to_string() }),
            Bson::Timestamp(Timestamp { time, increment }) => {
                json!({ "$timestamp": { "t": time, "i": increment } })
            }
            Bson::Binary(Binary { subtype, bytes }) => json!({
                "$binary": {
                    "base64": base64::encode(bytes),
                    "subType": hex::encode([u8::from(subtype)]),
                }
            }),
            Bson::ObjectId(oid) => json!({ "$oid": oid.to_hex() }),
            Bson::DateTime(dt) => json!({
                "$date": { "$numberLong": dt.timestamp_millis().to_string() }
            }),
            Bson::Symbol(s) => json!({ "$symbol": s }),
            Bson::Decimal128(d) => json!({ "$numberDecimal": d.to_string() }),
            Bson::Undefined => json!({ "$undefined": true }),
            Bson::MinKey => json!({ "$minKey": 1 }),
            Bson::MaxKey => json!({ "$maxKey": 1 }),
            Bson::DbPointer(DbPointer { namespace, id }) => json!({
                "$dbPointer": { "$ref": namespace, "$id": { "$oid": id.to_hex() } }
            }),
        }
    }
}

/// The extended document form of a non-primitive [`Bson`] variant, as presented to serde
/// consumers by the deserializer.
pub(crate) fn into_extended_document(bson: Bson) -> Document {
    let mut doc = Document::new();
    match bson {
        Bson::ObjectId(oid) => {
            doc.insert("$oid", oid.to_hex());
        }
        Bson::DateTime(dt) => {
            let mut body = Document::new();
            body.insert("$numberLong", dt.timestamp_millis().to_string());
            doc.insert("$date", body);
        }
        Bson::Binary(Binary { subtype, bytes }) => {
            let mut body = Document::new();
            body.insert("base64", base64::encode(bytes));
            body.insert("subType", hex::encode([u8::from(subtype)]));
            doc.insert("$binary", body);
        }
        Bson::Timestamp(Timestamp { time, increment }) => {
            let mut body = Document::new();
            body.insert("t", Bson::Int64(time.into()));
            body.insert("i", Bson::Int64(increment.into()));
            doc.insert("$timestamp", body);
        }
        Bson::RegularExpression(Regex { pattern, options }) => {
            let mut body = Document::new();
            body.insert("pattern", pattern);
            body.insert("options", options);
            doc.insert("$regularExpression", body);
        }
        Bson::JavaScriptCode(code) => {
            doc.insert("$code", code);
        }
        Bson::JavaScriptCodeWithScope(JavaScriptCodeWithScope { code, scope }) => {
            doc.insert("$code", code);
            doc.insert("$scope", scope);
        }
        Bson::Symbol(s) => {
            doc.insert("$symbol", s);
        }
        Bson::Decimal128(d) => {
            doc.insert("$numberDecimal", d.to_string());
        }
        Bson::Undefined => {
            doc.insert("$undefined", true);
        }
        Bson::MinKey => {
            doc.insert("$minKey", Bson::Int32(1));
        }
        Bson::MaxKey => {
            doc.insert("$maxKey", Bson::Int32(1));
        }
        Bson::DbPointer(DbPointer { namespace, id }) => {
            let mut body = Document::new();
            body.insert("$ref", namespace);
            body.insert("$id", Bson::ObjectId(id));
            doc.insert("$dbPointer", body);
        }
        // Primitive variants deserialize directly and never take this path.
        other => unreachable!("not an extended document form: {:?}", other),
    }
    doc
}

fn int_value(bson: &Bson) -> Option<i64> {
    match bson {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        Bson::Double(d) if d.fract() == 0.0 => Some(*d as i64),
        _ => None,
    }
}

fn u32_value(bson: &Bson) -> Option<u32> {
    int_value(bson).and_then(|i| u32::try_from(i).ok())
}

/// Recognizes the extended JSON forms of the special value types and folds a document back
/// into the corresponding [`Bson`] variant. Documents that are not a recognized form — e.g.
/// query operators like `{"$set": …}` — pass through untouched; a recognized key with a
/// malformed body is an error.
pub(crate) fn from_extended_document(doc: Document) -> Result<Bson> {
    let keys: Vec<&str> = doc.keys().collect();

    match keys.as_slice() {
        ["$oid"] => {
            let hex = doc
                .get_str("$oid")
                .ok_or_else(|| Error::invalid_bson("$oid value must be a hex string"))?;
            Ok(Bson::ObjectId(ObjectId::parse_str(hex)?))
        }
        ["$symbol"] => Ok(Bson::Symbol(
            doc.get_str("$symbol")
                .ok_or_else(|| Error::invalid_bson("$symbol value must be a string"))?
                .to_string(),
        )),
        ["$numberInt"] => doc
            .get_str("$numberInt")
            .and_then(|s| s.parse::<i32>().ok())
            .map(Bson::Int32)
            .ok_or_else(|| Error::invalid_bson("$numberInt value must be an i32 string")),
        ["$numberLong"] => doc
            .get_str("$numberLong")
            .and_then(|s| s.parse::<i64>().ok())
            .map(Bson::Int64)
            .ok_or_else(|| Error::invalid_bson("$numberLong value must be an i64 string")),
        ["$numberDouble"] => {
            let s = doc
                .get_str("$numberDouble")
                .ok_or_else(|| Error::invalid_bson("$numberDouble value must be a string"))?;
            let d = match s {
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                "NaN" => f64::NAN,
                other => other
                    .parse::<f64>()
                    .map_err(|_| Error::invalid_bson("$numberDouble value must be a double"))?,
            };
            Ok(Bson::Double(d))
        }
        ["$numberDecimal"] => {
            let s = doc
                .get_str("$numberDecimal")
                .ok_or_else(|| Error::invalid_bson("$numberDecimal value must be a string"))?;
            Ok(Bson::Decimal128(Decimal128::from_str(s)?))
        }
        ["$binary"] => {
            let body = doc
                .get_document("$binary")
                .ok_or_else(|| Error::invalid_bson("$binary value must be a document"))?;
            let base64_str = body
                .get_str("base64")
                .ok_or_else(|| Error::invalid_bson("$binary base64 field must be a string"))?;
            let subtype_hex = body
                .get_str("subType")
                .ok_or_else(|| Error::invalid_bson("$binary subType field must be a string"))?;
            let bytes = base64::decode(base64_str)
                .map_err(|_| Error::invalid_bson("$binary base64 field is not valid base64"))?;
            let subtype = hex::decode(subtype_hex)
                .ok()
                .filter(|b| b.len() == 1)
                .map(|b| super::BinarySubtype::from(b[0]))
                .ok_or_else(|| {
                    Error::invalid_bson("$binary subType must be a one-byte hex string")
                })?;
            Ok(Bson::Binary(Binary { subtype, bytes }))
        }
        ["$uuid"] => {
            let s = doc
                .get_str("$uuid")
                .ok_or_else(|| Error::invalid_bson("$uuid value must be a string"))?;
            let uuid = uuid::Uuid::parse_str(s)
                .map_err(|_| Error::invalid_bson("$uuid value must be a UUID string"))?;
            Ok(Bson::Binary(Binary::from_uuid(uuid)))
        }
        ["$code"] => Ok(Bson::JavaScriptCode(
            doc.get_str("$code")
                .ok_or_else(|| Error::invalid_bson("$code value must be a string"))?
                .to_string(),
        )),
        ["$code", "$scope"] | ["$scope", "$code"] => {
            let code = doc
                .get_str("$code")
                .ok_or_else(|| Error::invalid_bson("$code value must be a string"))?;
            let scope = doc
                .get_document("$scope")
                .ok_or_else(|| Error::invalid_bson("$scope value must be a document"))?;
            Ok(Bson::JavaScriptCodeWithScope(JavaScriptCodeWithScope {
                code: code.to_string(),
                scope: scope.clone(),
            }))
        }
        ["$timestamp"] => {
            let body = doc
                .get_document("$timestamp")
                .ok_or_else(|| Error::invalid_bson("$timestamp value must be a document"))?;
            let time = body
                .get("t")
                .and_then(u32_value)
                .ok_or_else(|| Error::invalid_bson("$timestamp t field must be a u32"))?;
            let increment = body
                .get("i")
                .and_then(u32_value)
                .ok_or_else(|| Error::invalid_bson("$timestamp i field must be a u32"))?;
            Ok(Bson::Timestamp(Timestamp { time, increment }))
        }
        ["$regularExpression"] => {
            let body = doc
                .get_document("$regularExpression")
                .ok_or_else(|| Error::invalid_bson("$regularExpression value must be a document"))?;
            let pattern = body.get_str("pattern").ok_or_else(|| {
                Error::invalid_bson("$regularExpression pattern field must be a string")
            })?;
            let options = body.get_str("options").ok_or_else(|| {
                Error::invalid_bson("$regularExpression options field must be a string")
            })?;
            Ok(Bson::RegularExpression(Regex {
                pattern: pattern.to_string(),
                options: options.to_string(),
            }))
        }
        ["$dbPointer"] => {
            let body = doc
                .get_document("$dbPointer")
                .ok_or_else(|| Error::invalid_bson("$dbPointer value must be a document"))?;
            let namespace = body
                .get_str("$ref")
                .ok_or_else(|| Error::invalid_bson("$dbPointer $ref field must be a string"))?;
            let id = match body.get("$id") {
                Some(Bson::ObjectId(oid)) => *oid,
                Some(Bson::Document(inner)) => {
                    let hex = inner.get_str("$oid").ok_or_else(|| {
                        Error::invalid_bson("$dbPointer $id field must be an ObjectId")
                    })?;
                    ObjectId::parse_str(hex)?
                }
                _ => {
                    return Err(Error::invalid_bson(
                        "$dbPointer $id field must be an ObjectId",
                    ))
                }
            };
            Ok(Bson::DbPointer(DbPointer {
                namespace: namespace.to_string(),
                id,
            }))
        }
        ["$date"] => match doc.get("$date") {
            Some(Bson::Int64(millis)) => Ok(Bson::DateTime(DateTime::from_millis(*millis))),
            Some(Bson::String(s)) => Ok(Bson::DateTime(DateTime::parse_rfc3339_str(s)?)),
            Some(Bson::Document(body)) => {
                let millis = body
                    .get_str("$numberLong")
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| {
                        Error::invalid_bson("$date value must contain a $numberLong string")
                    })?;
                Ok(Bson::DateTime(DateTime::from_millis(millis)))
            }
            _ => Err(Error::invalid_bson(
                "$date value must be an integer, string, or document",
            )),
        },
        ["$minKey"] => match doc.get("$minKey").and_then(int_value) {
            Some(1) => Ok(Bson::MinKey),
            _ => Err(Error::invalid_bson("$minKey value must be 1")),
        },
        ["$maxKey"] => match doc.get("$maxKey").and_then(int_value) {
            Some(1) => Ok(Bson::MaxKey),
            _ => Err(Error::invalid_bson("$maxKey value must be 1")),
        },
        ["$undefined"] => match doc.get("$undefined") {
            Some(Bson::Boolean(true)) => Ok(Bson::Undefined),
            _ => Err(Error::invalid_bson("$undefined value must be true")),
        },
        _ => Ok(Bson::Document(doc)),
    }
}
