//! Conversions between `serde_json::Value` and the protobuf well-known
//! `Struct`/`Value` types used for opaque structured payloads.
//!
//! Protobuf has a single number kind (double), so integers come back as
//! floats after a round trip.

use prost_types::value::Kind;
use prost_types::{ListValue, Struct, Value};
use serde_json::{Map, Number};

/// Converts a JSON value into a protobuf `Value`.
pub fn json_to_prost_value(value: serde_json::Value) -> Value {
    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(b),
        serde_json::Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
        serde_json::Value::String(s) => Kind::StringValue(s),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_prost_value).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(map_to_struct(map)),
    };
    Value { kind: Some(kind) }
}

/// Converts a protobuf `Value` into JSON. A value with no kind maps to null.
pub fn prost_value_to_json(value: &Value) -> serde_json::Value {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(*b),
        Some(Kind::NumberValue(n)) => Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.iter().map(prost_value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => struct_to_json(s),
    }
}

/// Converts a JSON value into a protobuf `Struct`.
///
/// Objects map field by field; anything else is wrapped as `{"value": ...}`
/// because a `Struct` must be an object.
pub fn json_to_struct(value: serde_json::Value) -> Struct {
    match value {
        serde_json::Value::Object(map) => map_to_struct(map),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map_to_struct(map)
        }
    }
}

/// Converts a protobuf `Struct` into a JSON object.
pub fn struct_to_json(s: &Struct) -> serde_json::Value {
    serde_json::Value::Object(
        s.fields
            .iter()
            .map(|(k, v)| (k.clone(), prost_value_to_json(v)))
            .collect(),
    )
}

fn map_to_struct(map: Map<String, serde_json::Value>) -> Struct {
    Struct {
        fields: map
            .into_iter()
            .map(|(k, v)| (k, json_to_prost_value(v)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_conversion() {
        assert_eq!(prost_value_to_json(&json_to_prost_value(json!(null))), json!(null));
        assert_eq!(prost_value_to_json(&json_to_prost_value(json!(true))), json!(true));
        assert_eq!(prost_value_to_json(&json_to_prost_value(json!("hi"))), json!("hi"));
        assert_eq!(prost_value_to_json(&json_to_prost_value(json!(2.5))), json!(2.5));
    }

    #[test]
    fn test_integers_become_floats() {
        let back = prost_value_to_json(&json_to_prost_value(json!(7)));
        assert_eq!(back, json!(7.0));
    }

    #[test]
    fn test_nested_structure() {
        let original = json!({
            "name": "search",
            "arguments": {"query": "weather", "tags": ["a", "b"], "strict": false}
        });
        let s = json_to_struct(original.clone());
        assert_eq!(struct_to_json(&s), original);
    }

    #[test]
    fn test_non_object_is_wrapped() {
        let s = json_to_struct(json!("plain"));
        assert_eq!(struct_to_json(&s), json!({"value": "plain"}));
    }

    #[test]
    fn test_empty_value_is_null() {
        assert_eq!(prost_value_to_json(&Value { kind: None }), json!(null));
    }
}
