//! Small helpers for decoding venue JSON.
//!
//! Binance encodes most numerics as strings (`"price": "16500.50"`) but a
//! few as bare numbers; these helpers accept either representation.

use serde_json::Value;

/// Interpret a value as `f64`, accepting both string and number encodings.
pub(crate) fn f64_value(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Read a field as `f64`, accepting both string and number encodings.
pub(crate) fn f64_field(v: &Value, key: &str) -> Option<f64> {
    f64_value(v.get(key)?)
}

/// Read a field as `u64`, accepting both string and number encodings.
pub(crate) fn u64_field(v: &Value, key: &str) -> Option<u64> {
    match v.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Read a field as `&str`.
pub(crate) fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key)?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_string_and_number_encodings() {
        let v: Value = serde_json::from_str(r#"{"a":"1.5","b":2.5,"c":"7","d":9}"#).unwrap();
        assert_eq!(f64_field(&v, "a"), Some(1.5));
        assert_eq!(f64_field(&v, "b"), Some(2.5));
        assert_eq!(u64_field(&v, "c"), Some(7));
        assert_eq!(u64_field(&v, "d"), Some(9));
        assert_eq!(f64_field(&v, "missing"), None);
    }
}
