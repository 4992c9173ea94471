use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Scalar measurement value carried by a [`Drop`].
///
/// Payloads on the wire are always JSON scalars (number, string, or boolean) —
/// never objects or arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Integer reading (e.g. a CO2 ppm count).
    Integer(i64),

    /// Floating-point reading (e.g. a temperature).
    Float(f64),

    /// Text reading.
    Text(String),

    /// Boolean reading.
    Boolean(bool),
}

impl Value {
    /// Convert a JSON scalar into a [`Value`].
    ///
    /// Returns `None` for objects, arrays, and nulls — vendor responses carry
    /// those for structure, not as measurements.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::Integer(i))
                } else {
                    n.as_f64().map(Value::Float)
                }
            }
            serde_json::Value::String(s) => Some(Value::Text(s.clone())),
            serde_json::Value::Bool(b) => Some(Value::Boolean(*b)),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

/// One immutable measurement, ready for publication.
///
/// A drop carries the logical source instance it was measured on (e.g. a named
/// sensor), the metric name, and the scalar value. It carries no transport or
/// timing state: drops are created fresh on every poll cycle, published
/// immediately, and never retained.
#[derive(Debug, Clone, PartialEq)]
pub struct Drop {
    source: String,
    metric: String,
    value: Value,
}

impl Drop {
    /// Create a new drop. Pure value construction, no failure modes.
    pub fn new(
        source: impl Into<String>,
        metric: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            source: source.into(),
            metric: metric.into(),
            value: value.into(),
        }
    }

    /// Logical source instance this measurement belongs to.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Name of the specific measurement.
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// The measured value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Topic suffix for this drop: `[source, metric]`.
    ///
    /// The sink prefixes its own name and the source kind; they never appear
    /// here.
    pub fn path(&self) -> [&str; 2] {
        [&self.source, &self.metric]
    }

    /// Serialize the value as a compact JSON scalar.
    ///
    /// The encoding is deterministic across platforms. Non-finite floats
    /// cannot be represented in JSON and surface as an error.
    pub fn payload(&self) -> Result<String> {
        if let Value::Float(f) = self.value {
            if !f.is_finite() {
                return Err(crate::error::Error::Payload(format!(
                    "non-finite value for {}/{}",
                    self.source, self.metric
                )));
            }
        }
        Ok(serde_json::to_string(&self.value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_and_payload() {
        let drop = Drop::new("kitchen", "temperature", 21.5);

        assert_eq!(drop.path(), ["kitchen", "temperature"]);
        assert_eq!(drop.payload().unwrap(), "21.5");
    }

    #[test]
    fn test_scalar_payloads() {
        assert_eq!(Drop::new("a", "b", 42i64).payload().unwrap(), "42");
        assert_eq!(Drop::new("a", "b", true).payload().unwrap(), "true");
        assert_eq!(Drop::new("a", "b", "ok").payload().unwrap(), "\"ok\"");
    }

    #[test]
    fn test_non_finite_float_is_an_error() {
        assert!(Drop::new("a", "b", f64::NAN).payload().is_err());
        assert!(Drop::new("a", "b", f64::INFINITY).payload().is_err());
    }

    #[test]
    fn test_from_json_scalars() {
        use serde_json::json;

        assert_eq!(Value::from_json(&json!(7)), Some(Value::Integer(7)));
        assert_eq!(Value::from_json(&json!(2.25)), Some(Value::Float(2.25)));
        assert_eq!(
            Value::from_json(&json!("dry")),
            Some(Value::Text("dry".to_string()))
        );
        assert_eq!(Value::from_json(&json!(false)), Some(Value::Boolean(false)));
        assert_eq!(Value::from_json(&json!(null)), None);
        assert_eq!(Value::from_json(&json!({"a": 1})), None);
        assert_eq!(Value::from_json(&json!([1, 2])), None);
    }
}
