//! Typed FHIR primitive and complex values.
//!
//! FHIR serializes choice elements (`value[x]`, `answer[x]`) as a single key whose
//! suffix names the type, e.g. `{"valueCoding": {...}}`. [`FhirValue`] is the tagged
//! form of that union; [`FhirValue::from_prefixed`] and [`FhirValue::prefixed_key`]
//! are the only two places that know about the JSON key convention.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Value as JsonValue};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            code: Some(code.into()),
            ..Default::default()
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Quantity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Quantity {
    /// Units are considered equal when their UCUM codes match, or, lacking codes,
    /// their human-readable units do.
    pub fn same_unit(&self, other: &Quantity) -> bool {
        match (&self.code, &other.code) {
            (Some(a), Some(b)) => a == b && self.system == other.system,
            _ => self.unit == other.unit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FhirValue {
    Boolean(bool),
    Decimal(f64),
    Integer(i64),
    Date(String),
    DateTime(String),
    Time(String),
    String(String),
    Uri(String),
    Coding(Coding),
    Quantity(Quantity),
    Reference(JsonValue),
    Attachment(JsonValue),
}

impl FhirValue {
    /// Type suffix used after `value` / `answer` in the JSON key.
    pub fn type_suffix(&self) -> &'static str {
        match self {
            FhirValue::Boolean(_) => "Boolean",
            FhirValue::Decimal(_) => "Decimal",
            FhirValue::Integer(_) => "Integer",
            FhirValue::Date(_) => "Date",
            FhirValue::DateTime(_) => "DateTime",
            FhirValue::Time(_) => "Time",
            FhirValue::String(_) => "String",
            FhirValue::Uri(_) => "Uri",
            FhirValue::Coding(_) => "Coding",
            FhirValue::Quantity(_) => "Quantity",
            FhirValue::Reference(_) => "Reference",
            FhirValue::Attachment(_) => "Attachment",
        }
    }

    pub fn prefixed_key(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.type_suffix())
    }

    /// Builds a value from a type suffix and its raw JSON. Returns `None` when the
    /// suffix is unknown or the JSON does not have the expected shape.
    pub fn from_suffix(suffix: &str, raw: &JsonValue) -> Option<Self> {
        let value = match suffix {
            "Boolean" => FhirValue::Boolean(raw.as_bool()?),
            "Decimal" => FhirValue::Decimal(raw.as_f64()?),
            "Integer" => FhirValue::Integer(raw.as_i64()?),
            "Date" => FhirValue::Date(raw.as_str()?.to_string()),
            "DateTime" => FhirValue::DateTime(raw.as_str()?.to_string()),
            "Time" => FhirValue::Time(raw.as_str()?.to_string()),
            "String" => FhirValue::String(raw.as_str()?.to_string()),
            "Uri" => FhirValue::Uri(raw.as_str()?.to_string()),
            "Coding" => FhirValue::Coding(serde_json::from_value(raw.clone()).ok()?),
            "Quantity" => FhirValue::Quantity(serde_json::from_value(raw.clone()).ok()?),
            "Reference" if raw.is_object() => FhirValue::Reference(raw.clone()),
            "Attachment" if raw.is_object() => FhirValue::Attachment(raw.clone()),
            _ => return None,
        };
        Some(value)
    }

    /// Finds the first `<prefix><Type>` key in `map` and decodes it.
    pub fn from_prefixed(prefix: &str, map: &JsonMap<String, JsonValue>) -> Option<Self> {
        map.iter().find_map(|(key, raw)| {
            key.strip_prefix(prefix)
                .filter(|suffix| suffix.starts_with(|c: char| c.is_ascii_uppercase()))
                .and_then(|suffix| Self::from_suffix(suffix, raw))
        })
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            FhirValue::Boolean(b) => JsonValue::Bool(*b),
            FhirValue::Decimal(d) => serde_json::Number::from_f64(*d)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            FhirValue::Integer(i) => JsonValue::from(*i),
            FhirValue::Date(s)
            | FhirValue::DateTime(s)
            | FhirValue::Time(s)
            | FhirValue::String(s)
            | FhirValue::Uri(s) => JsonValue::String(s.clone()),
            FhirValue::Coding(coding) => serde_json::to_value(coding).unwrap_or(JsonValue::Null),
            FhirValue::Quantity(quantity) => {
                serde_json::to_value(quantity).unwrap_or(JsonValue::Null)
            }
            FhirValue::Reference(raw) | FhirValue::Attachment(raw) => raw.clone(),
        }
    }

    pub fn as_coding(&self) -> Option<&Coding> {
        match self {
            FhirValue::Coding(coding) => Some(coding),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FhirValue::Date(s)
            | FhirValue::DateTime(s)
            | FhirValue::Time(s)
            | FhirValue::String(s)
            | FhirValue::Uri(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FhirValue::Decimal(d) => Some(*d),
            FhirValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

/// Standalone values serialize in the answer shape, e.g. `{"valueDecimal": 29.1}`.
impl Serialize for FhirValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.prefixed_key("value"), &self.to_json())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for FhirValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = JsonMap::<String, JsonValue>::deserialize(deserializer)?;
        FhirValue::from_prefixed("value", &map)
            .ok_or_else(|| D::Error::custom("expected a single value[x] entry"))
    }
}
