use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

use super::{
    from_bson,
    from_document,
    from_slice,
    oid::ObjectId,
    serde_helpers,
    spec::BinarySubtype,
    to_bson,
    to_document,
    to_vec,
    Binary,
    Bson,
    DateTime,
    Document,
    JavaScriptCodeWithScope,
    Regex,
    Timestamp,
};
use crate::{doc, error::ErrorKind};

fn assert_invalid_bson<T: std::fmt::Debug>(result: crate::error::Result<T>) {
    match result {
        Err(e) => assert!(
            matches!(e.kind.as_ref(), ErrorKind::InvalidBson { .. }),
            "expected InvalidBson, got {:?}",
            e
        ),
        Ok(v) => panic!("expected InvalidBson error, got {:?}", v),
    }
}

#[test]
fn literal_document_layout() {
    let doc = doc! { "x": 42, "a": ["s", true, null] };

    let bytes = doc.to_vec().unwrap();
    assert_eq!(bytes.len(), 0x24);
    assert_eq!(bytes[0..4], 0x24i32.to_le_bytes());

    let decoded = Document::from_slice(&bytes).unwrap();
    assert_eq!(decoded, doc);

    // Corrupting the trailing terminator must fail decoding.
    let mut corrupted = bytes.clone();
    *corrupted.last_mut().unwrap() = 0x01;
    assert_invalid_bson(Document::from_slice(&corrupted));
}

#[test]
fn round_trips_every_type() {
    let doc = doc! {
        "double": 3.14,
        "neg_zero": -0.0,
        "string": "value",
        "doc": { "nested": { "deep": 1i64 } },
        "array": [1, [2, "three"], { "four": 4 }],
        "binary": Binary { subtype: BinarySubtype::Generic, bytes: vec![1, 2, 3] },
        "legacy_binary": Binary { subtype: BinarySubtype::BinaryOld, bytes: vec![9, 8] },
        "undefined": Bson::Undefined,
        "oid": ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap(),
        "bool": false,
        "date": DateTime::from_millis(1_356_351_330_501),
        "null": null,
        "regex": Regex { pattern: "^a.*b$".to_string(), options: "im".to_string() },
        "code": Bson::JavaScriptCode("function() {}".to_string()),
        "code_w_scope": JavaScriptCodeWithScope {
            code: "function(x) { return x; }".to_string(),
            scope: doc! { "x": 1 },
        },
        "symbol": Bson::Symbol("sym".to_string()),
        "int32": i32::MIN,
        "timestamp": Timestamp { time: 1_565_545_664, increment: 3 },
        "int64": i64::MAX,
        "min_key": Bson::MinKey,
        "max_key": Bson::MaxKey,
    };

    let bytes = doc.to_vec().unwrap();
    let decoded = Document::from_slice(&bytes).unwrap();
    assert_eq!(decoded, doc);

    // Canonical bytes re-encode byte-identically.
    assert_eq!(decoded.to_vec().unwrap(), bytes);
}

#[test]
fn legacy_binary_preserves_inner_length_prefix() {
    let doc = doc! {
        "b": Binary { subtype: BinarySubtype::BinaryOld, bytes: vec![0xAA, 0xBB, 0xCC] }
    };
    let bytes = doc.to_vec().unwrap();

    // element: tag, "b", NUL, outer length (3 + 4), subtype 0x02, inner length 3, payload
    assert_eq!(bytes[4], 0x05);
    assert_eq!(bytes[7..11], 7i32.to_le_bytes());
    assert_eq!(bytes[11], 0x02);
    assert_eq!(bytes[12..16], 3i32.to_le_bytes());

    assert_eq!(Document::from_slice(&bytes).unwrap(), doc);
    assert_eq!(Document::from_slice(&bytes).unwrap().to_vec().unwrap(), bytes);
}

#[test]
fn duplicate_keys_first_wins_and_round_trip() {
    let bytes = {
        // Hand-assemble { "k": 1, "k": 2 } with duplicate keys.
        let mut buf = vec![0u8; 4];
        for val in [1i32, 2] {
            buf.push(0x10);
            buf.extend_from_slice(b"k\0");
            buf.extend_from_slice(&val.to_le_bytes());
        }
        buf.push(0);
        let len = buf.len() as i32;
        buf[0..4].copy_from_slice(&len.to_le_bytes());
        buf
    };

    let doc = Document::from_slice(&bytes).unwrap();
    assert_eq!(doc.len(), 2);
    assert_eq!(doc.get_i32("k"), Some(1));
    assert_eq!(doc.to_vec().unwrap(), bytes);
}

#[test]
fn rejects_structural_violations() {
    let valid = doc! { "a": ["s"] }.to_vec().unwrap();

    // Non-canonical array key: rewrite the inner "0" index to "1".
    let mut bad_key = valid.clone();
    let idx = bad_key
        .iter()
        .position(|b| *b == b'0')
        .expect("array index key present");
    bad_key[idx] = b'1';
    assert_invalid_bson(Document::from_slice(&bad_key));

    // Declared length longer than the buffer.
    let mut bad_len = valid.clone();
    bad_len[0] += 1;
    assert_invalid_bson(Document::from_slice(&bad_len));

    // Unknown element type.
    let mut bad_tag = valid.clone();
    bad_tag[4] = 0x7E;
    assert_invalid_bson(Document::from_slice(&bad_tag));

    // Invalid UTF-8 in a string body.
    let mut bad_utf8 = doc! { "s": "ab" }.to_vec().unwrap();
    let len = bad_utf8.len();
    bad_utf8[len - 3] = 0xFF;
    assert_invalid_bson(Document::from_slice(&bad_utf8));

    // Truncated buffer.
    assert_invalid_bson(Document::from_slice(&valid[..valid.len() - 2]));
}

#[test]
fn serde_round_trip_with_strategies() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Subscription {
        id: ObjectId,
        #[serde(with = "serde_helpers::uuid_as_binary")]
        device: uuid::Uuid,
        #[serde(with = "serde_helpers::bson_datetime_as_i64_millis")]
        renewed_at: DateTime,
        #[serde(with = "serde_helpers::bytes_as_base64_string")]
        token: Vec<u8>,
        name: String,
        count: i32,
    }

    let value = Subscription {
        id: ObjectId::new(),
        device: uuid::Uuid::new_v4(),
        renewed_at: DateTime::from_millis(1_700_000_000_000),
        token: vec![0, 1, 2, 254],
        name: "metrics".to_string(),
        count: 7,
    };

    let doc = to_document(&value).unwrap();
    assert_eq!(doc.get_binary("device").unwrap().subtype, BinarySubtype::Uuid);
    assert_eq!(doc.get_i64("renewed_at"), Some(1_700_000_000_000));
    assert!(doc.get_str("token").is_some());

    let back: Subscription = from_document(doc).unwrap();
    assert_eq!(back, value);

    // And through the full byte codec.
    let bytes = to_vec(&value).unwrap();
    let back: Subscription = from_slice(&bytes).unwrap();
    assert_eq!(back, value);
}

#[test]
fn serde_preserves_special_types() {
    let original = doc! {
        "oid": ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap(),
        "date": DateTime::from_millis(42),
        "ts": Timestamp { time: 4, increment: 2 },
        "bin": Binary { subtype: BinarySubtype::Generic, bytes: vec![1] },
        "update": { "$set": { "a": 1 } },
    };

    let bson = to_bson(&original).unwrap();
    assert_eq!(bson, Bson::Document(original.clone()));

    let back: Document = from_bson(bson).unwrap();
    assert_eq!(back, original);
}

#[test]
fn lossless_only_narrowing() {
    #[derive(Debug, Deserialize)]
    struct Narrow {
        #[allow(dead_code)]
        x: i32,
    }

    // Lossless widening-then-narrowing is fine.
    let ok: Narrow = from_document(doc! { "x": Bson::Int64(7) }).unwrap();
    assert_eq!(ok.x, 7);
    let ok: Narrow = from_document(doc! { "x": 7.0 }).unwrap();
    assert_eq!(ok.x, 7);

    // Value-losing conversions are rejected.
    assert_invalid_bson(from_document::<Narrow>(doc! { "x": Bson::Int64(1i64 << 40) }));
    assert_invalid_bson(from_document::<Narrow>(doc! { "x": 7.5 }));
}

#[test]
fn canonical_extended_json_round_trip() {
    let doc = doc! {
        "int": 42,
        "long": 42i64,
        "double": 42.0,
        "oid": ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap(),
        "date": DateTime::from_millis(1_356_351_330_501),
        "ts": Timestamp { time: 1, increment: 2 },
        "bin": Binary { subtype: BinarySubtype::Uuid, bytes: vec![0u8; 16] },
        "regex": Regex { pattern: "abc".to_string(), options: "i".to_string() },
        "min": Bson::MinKey,
    };

    let json = Bson::Document(doc.clone()).into_canonical_extjson();
    assert_eq!(json["int"], serde_json::json!({ "$numberInt": "42" }));
    assert_eq!(json["double"], serde_json::json!({ "$numberDouble": "42.0" }));
    assert_eq!(
        json["oid"],
        serde_json::json!({ "$oid": "507f1f77bcf86cd799439011" })
    );

    let back = super::json_to_bson(json).unwrap();
    assert_eq!(back, Bson::Document(doc));
}
