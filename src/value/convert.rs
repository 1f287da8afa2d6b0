//! Interop with `serde_json` values.
//!
//! Decoding bytes is an external collaborator's job; the conversions here
//! exist because serde_json is the decode path everything else in the
//! stack already uses.

use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use super::types::Value;

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::Str(Arc::from(s)),
            serde_json::Value::Array(items) => {
                Value::Array(Arc::new(items.into_iter().map(Value::from).collect()))
            }
            serde_json::Value::Object(map) => Value::Object(Arc::new(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            )),
        }
    }
}

impl Value {
    /// Export as a `serde_json::Value`.
    ///
    /// Dates render as RFC 3339 strings; a non-finite float has no JSON
    /// form and exports as null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::Number((*n).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Date(d) => serde_json::Value::String(d.to_rfc3339()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map.iter() {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            Value::Date(d) => serializer.serialize_str(&d.to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip_shapes() {
        let decoded = Value::from(json!({
            "name": "Alice",
            "age": 30,
            "score": 9.5,
            "tags": ["a", "b"],
            "active": true,
            "extra": null
        }));

        let map = decoded.as_object().unwrap();
        assert_eq!(map.get("name").unwrap().as_str(), Some("Alice"));
        assert_eq!(map.get("age").unwrap().as_int(), Some(30));
        assert_eq!(map.get("score").unwrap().as_number(), Some(9.5));
        assert_eq!(map.get("tags").unwrap().as_array().unwrap().len(), 2);
        assert!(map.get("extra").unwrap().is_null());

        assert_eq!(
            decoded.to_json(),
            json!({
                "name": "Alice",
                "age": 30,
                "score": 9.5,
                "tags": ["a", "b"],
                "active": true,
                "extra": null
            })
        );
    }

    #[test]
    fn test_huge_u64_falls_back_to_float() {
        let v = Value::from(json!(u64::MAX));
        assert!(matches!(v, Value::Float(_)));
    }

    #[test]
    fn test_date_exports_rfc3339() {
        let d = chrono::DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert_eq!(Value::Date(d).to_json(), json!("2024-05-01T12:00:00+00:00"));
    }
}
