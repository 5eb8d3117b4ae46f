use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EtlError;

/// Two-digit FIPS code of one state or territory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RegionCode(String);

impl RegionCode {
    pub(crate) fn new_unchecked(value: &str) -> Self {
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RegionCode {
    type Err = EtlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = normalized.len() == 2 && normalized.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(EtlError::InvalidRegionCode(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl<'de> Deserialize<'de> for RegionCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Census tract identifier. Opaque: never reordered, padded or renumbered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TractId(String);

impl TractId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Textual form of an attribute value for the tract lists. Values the
    /// lenient coercion retains are rendered as their JSON text.
    pub fn from_attribute(value: &Value) -> Self {
        match Coercion::from_value(value) {
            Coercion::Coerced(id) => id,
            Coercion::Retained(raw) => Self(raw.to_string()),
        }
    }
}

impl fmt::Display for TractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of coercing an identifier attribute to its string form.
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    Coerced(TractId),
    /// The value has no faithful textual form and is kept as-is.
    Retained(Value),
}

impl Coercion {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(text) => Coercion::Coerced(TractId(text.clone())),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Coercion::Coerced(TractId(int.to_string()))
                } else if let Some(int) = number.as_u64() {
                    Coercion::Coerced(TractId(int.to_string()))
                } else {
                    match number.as_f64() {
                        Some(float) if float.is_finite() && float.fract() == 0.0 => {
                            Coercion::Coerced(TractId(format!("{float:.0}")))
                        }
                        _ => Coercion::Retained(value.clone()),
                    }
                }
            }
            // A logical attribute is never a tract identifier.
            Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
                Coercion::Retained(value.clone())
            }
        }
    }
}

/// The file kinds the census pipeline keeps per region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoFileType {
    Shp,
    GeoJson,
    Csv,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_region_code_valid() {
        let code: RegionCode = " 06 ".parse().unwrap();
        assert_eq!(code.as_str(), "06");
    }

    #[test]
    fn parse_region_code_invalid() {
        let err = "6".parse::<RegionCode>().unwrap_err();
        assert_matches!(err, EtlError::InvalidRegionCode(_));
        let err = "CA".parse::<RegionCode>().unwrap_err();
        assert_matches!(err, EtlError::InvalidRegionCode(_));
    }

    #[test]
    fn coercion_keeps_strings_verbatim() {
        let coerced = Coercion::from_value(&json!("01001020100"));
        assert_eq!(coerced, Coercion::Coerced(TractId::new("01001020100")));
    }

    #[test]
    fn coercion_formats_integral_numbers() {
        assert_eq!(
            Coercion::from_value(&json!(6001400100_i64)),
            Coercion::Coerced(TractId::new("6001400100"))
        );
        assert_eq!(
            Coercion::from_value(&json!(6001400100.0)),
            Coercion::Coerced(TractId::new("6001400100"))
        );
    }

    #[test]
    fn coercion_retains_values_without_text_form() {
        assert_matches!(Coercion::from_value(&Value::Null), Coercion::Retained(Value::Null));
        assert_matches!(Coercion::from_value(&json!(1.5)), Coercion::Retained(_));
        assert_matches!(Coercion::from_value(&json!([1, 2])), Coercion::Retained(_));
        assert_eq!(TractId::from_attribute(&Value::Null).as_str(), "null");
    }

    #[test]
    fn logical_identifiers_are_retained() {
        assert_eq!(Coercion::from_value(&json!(true)), Coercion::Retained(json!(true)));
        assert_matches!(Coercion::from_value(&json!(false)), Coercion::Retained(Value::Bool(false)));
        assert_eq!(TractId::from_attribute(&json!(true)).as_str(), "true");
    }
}
