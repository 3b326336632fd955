//! Reply envelope validation.
//!
//! Models the device's free-form JSON reply as a tagged [`Envelope`] rather
//! than re-inspecting a raw `serde_json::Value` at every call site (spec §9:
//! "Dynamic type-dispatched validation → tagged variants").

use crate::error::{Address, ConnectionError};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// One entry of the reply's `STATUS` array.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRecord {
    #[serde(rename = "STATUS", default = "default_status_ok")]
    pub status: String,
    #[serde(rename = "Code")]
    pub code: i64,
    #[serde(rename = "Msg", default)]
    pub msg: String,
}

/// Default for `StatusRecord::status` when the device omits the `STATUS`
/// key on a status entry (legal per spec.md §8 scenario 3, whose literal
/// example reply carries only `Code`).
fn default_status_ok() -> String {
    "S".to_string()
}

/// A decoded device reply: `STATUS`, `id`, and whatever other list-valued
/// fields the command produced (`VERSION`, `SESSION`, `POOLS`, ...).
#[derive(Debug, Clone)]
pub struct Envelope {
    pub status: Vec<StatusRecord>,
    pub id: i64,
    pub fields: BTreeMap<String, Value>,
    raw: Value,
}

impl Envelope {
    /// Parse a raw JSON object into an [`Envelope`], asserting that `STATUS`
    /// and `id` are present (spec: "their absence is always an error").
    pub fn parse(address: &Address, raw: Value) -> Result<Self, ConnectionError> {
        let obj = raw.as_object().ok_or_else(|| ConnectionError::MessageMalformed {
            address: address.clone(),
            reason: "reply is not a JSON object".to_string(),
            reply: raw.clone(),
        })?;

        let status_value = obj.get("STATUS").ok_or_else(|| ConnectionError::MessageMalformed {
            address: address.clone(),
            reason: "missing STATUS".to_string(),
            reply: raw.clone(),
        })?;
        let status: Vec<StatusRecord> =
            serde_json::from_value(status_value.clone()).map_err(|e| {
                ConnectionError::MessageMalformed {
                    address: address.clone(),
                    reason: format!("STATUS is not a list of status records: {e}"),
                    reply: raw.clone(),
                }
            })?;

        let id = obj
            .get("id")
            .ok_or_else(|| ConnectionError::MessageMalformed {
                address: address.clone(),
                reason: "missing id".to_string(),
                reply: raw.clone(),
            })?
            .as_i64()
            .ok_or_else(|| ConnectionError::MessageMalformed {
                address: address.clone(),
                reason: "id is not an integer".to_string(),
                reply: raw.clone(),
            })?;

        let fields = obj
            .iter()
            .filter(|(k, _)| k.as_str() != "STATUS" && k.as_str() != "id")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            status,
            id,
            fields,
            raw,
        })
    }

    /// Basic validation: `STATUS`/`id` present (already enforced by
    /// [`Envelope::parse`]) and the command did not fail at the device.
    pub fn validate(&self, address: &Address) -> Result<(), ConnectionError> {
        if let Some(first) = self.status.first() {
            if first.status == "E" {
                return Err(ConnectionError::MessageError {
                    address: address.clone(),
                    reason: first.msg.clone(),
                    reply: self.raw.clone(),
                });
            }
        }
        Ok(())
    }

    /// Validate and extract a list-valued field with cardinality `[min,
    /// max]`. When `(min, max) == (1, 1)` and exactly one element is
    /// present, returns that single element rather than a one-element list
    /// (spec: a pinned behavioral quirk downstream callers rely on).
    ///
    /// `min > max` is a programmer bug, not a device error, and panics.
    pub fn validate_field(
        &self,
        address: &Address,
        field: &str,
        min: usize,
        max: usize,
    ) -> Result<Option<Value>, ConnectionError> {
        assert!(min <= max, "validate_field: min ({min}) > max ({max})");

        self.validate(address)?;

        let value = match self.fields.get(field) {
            None if min == 0 => return Ok(None),
            None => {
                return Err(ConnectionError::MessageInvalid {
                    address: address.clone(),
                    field: field.to_string(),
                    min,
                    max,
                    actual: 0,
                    reply: self.raw.clone(),
                })
            }
            Some(v) => v,
        };

        let list = value.as_array().ok_or_else(|| ConnectionError::MessageMalformed {
            address: address.clone(),
            reason: format!("field {field} is not a list"),
            reply: self.raw.clone(),
        })?;

        let actual = list.len();
        if actual < min || actual > max {
            return Err(ConnectionError::MessageInvalid {
                address: address.clone(),
                field: field.to_string(),
                min,
                max,
                actual,
                reply: self.raw.clone(),
            });
        }

        if min == 1 && max == 1 {
            return Ok(Some(list[0].clone()));
        }
        Ok(Some(Value::Array(list.clone())))
    }

    /// Convenience: like [`Envelope::validate_field`] but without a field —
    /// just asserts the envelope is well-formed and the device accepted the
    /// command (used for commands with no list-valued reply field).
    pub fn validate_only(&self, address: &Address) -> Result<(), ConnectionError> {
        self.validate(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn addr() -> Address {
        ("127.0.0.1".to_string(), 4028)
    }

    #[test]
    fn missing_status_is_malformed() {
        let raw = json!({"id": 1});
        let err = Envelope::parse(&addr(), raw).unwrap_err();
        assert!(matches!(err, ConnectionError::MessageMalformed { .. }));
    }

    #[test]
    fn missing_id_is_malformed() {
        let raw = json!({"STATUS": [{"STATUS": "S", "Code": 22}]});
        let err = Envelope::parse(&addr(), raw).unwrap_err();
        assert!(matches!(err, ConnectionError::MessageMalformed { .. }));
    }

    #[test]
    fn status_e_is_message_error() {
        let raw = json!({"STATUS": [{"STATUS": "E", "Code": 1, "Msg": "bad command"}], "id": 1});
        let env = Envelope::parse(&addr(), raw).unwrap();
        let err = env.validate(&addr()).unwrap_err();
        assert!(matches!(err, ConnectionError::MessageError { .. }));
    }

    #[test]
    fn absent_field_with_min_zero_returns_none() {
        let raw = json!({"STATUS": [{"STATUS": "S", "Code": 22}], "id": 1});
        let env = Envelope::parse(&addr(), raw).unwrap();
        assert_eq!(env.validate_field(&addr(), "POOLS", 0, 10).unwrap(), None);
    }

    #[test]
    fn absent_field_with_min_positive_is_invalid() {
        let raw = json!({"STATUS": [{"STATUS": "S", "Code": 22}], "id": 1});
        let env = Envelope::parse(&addr(), raw).unwrap();
        let err = env.validate_field(&addr(), "VERSION", 1, 1).unwrap_err();
        assert!(matches!(err, ConnectionError::MessageInvalid { .. }));
    }

    #[test]
    fn non_list_field_is_malformed() {
        let raw = json!({"STATUS": [{"STATUS": "S", "Code": 22}], "id": 1, "VERSION": "not a list"});
        let env = Envelope::parse(&addr(), raw).unwrap();
        let err = env.validate_field(&addr(), "VERSION", 1, 1).unwrap_err();
        assert!(matches!(err, ConnectionError::MessageMalformed { .. }));
    }

    #[test]
    fn cardinality_one_one_unwraps_the_element() {
        let raw = json!({
            "STATUS": [{"STATUS": "S", "Code": 22}],
            "id": 1,
            "VERSION": [{"API": "3.7"}],
        });
        let env = Envelope::parse(&addr(), raw).unwrap();
        let got = env.validate_field(&addr(), "VERSION", 1, 1).unwrap().unwrap();
        assert_eq!(got, json!({"API": "3.7"}));
    }

    #[test]
    fn cardinality_out_of_bounds_is_invalid() {
        let raw = json!({
            "STATUS": [{"STATUS": "S", "Code": 22}],
            "id": 1,
            "DEVS": [{"ASC": 0}, {"ASC": 1}, {"ASC": 2}],
        });
        let env = Envelope::parse(&addr(), raw).unwrap();
        let err = env.validate_field(&addr(), "DEVS", 0, 2).unwrap_err();
        match err {
            ConnectionError::MessageInvalid { actual, min, max, .. } => {
                assert_eq!((actual, min, max), (3, 0, 2));
            }
            _ => panic!("wrong error variant"),
        }
    }

    #[test]
    #[should_panic(expected = "min")]
    fn min_greater_than_max_panics() {
        let raw = json!({"STATUS": [{"STATUS": "S", "Code": 22}], "id": 1});
        let env = Envelope::parse(&addr(), raw).unwrap();
        let _ = env.validate_field(&addr(), "VERSION", 2, 1);
    }
}
