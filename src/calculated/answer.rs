//! Conversion of evaluator results into typed answers for a given item.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::model::ItemTypeInfo;
use crate::types::{Coding, FhirValue, ItemType, Quantity};

/// `YYYY`, `YYYY-MM`, `YYYY-MM-DD` or a full dateTime with optional seconds,
/// fraction and offset.
static DATE_TIME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\d{4}(-(0[1-9]|1[0-2])(-(0[1-9]|[12]\d|3[01])(T([01]\d|2[0-3]):[0-5]\d(:([0-5]\d|60)(\.\d+)?)?(Z|[+-]((0\d|1[0-3]):[0-5]\d|14:00))?)?)?)?$",
    )
    .expect("date-time pattern is valid")
});

static TIME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?$")
        .expect("time pattern is valid")
});

pub fn is_date_time(value: &str) -> bool {
    DATE_TIME_PATTERN.is_match(value)
}

pub fn is_time(value: &str) -> bool {
    TIME_PATTERN.is_match(value)
}

pub fn round_to_precision(value: f64, places: Option<u32>) -> f64 {
    match places {
        Some(places) => {
            let factor = 10f64.powi(places.min(15) as i32);
            (value * factor).round() / factor
        }
        None => value,
    }
}

/// Converts a calculated value into an answer for `item`.
///
/// Declared answer options win over the raw shape. Returns `None` when the
/// value does not fit the item type.
pub fn value_to_answer(item: &ItemTypeInfo, value: &JsonValue) -> Option<FhirValue> {
    if let Some(option) = match_answer_option(item, value) {
        return Some(option);
    }

    match item.item_type {
        ItemType::Boolean => value.as_bool().map(FhirValue::Boolean),
        ItemType::Decimal => value
            .as_f64()
            .map(|v| FhirValue::Decimal(round_to_precision(v, item.max_decimal_places))),
        ItemType::Integer => as_integer(value).map(FhirValue::Integer),
        ItemType::Date => value
            .as_str()
            .filter(|v| is_date_time(v))
            .map(|v| FhirValue::Date(v.to_string())),
        ItemType::DateTime => value
            .as_str()
            .filter(|v| is_date_time(v))
            .map(|v| FhirValue::DateTime(v.to_string())),
        ItemType::Time => value
            .as_str()
            .filter(|v| is_time(v))
            .map(|v| FhirValue::Time(v.to_string())),
        ItemType::String | ItemType::Text => match value {
            JsonValue::String(s) => Some(FhirValue::String(s.clone())),
            JsonValue::Number(n) => Some(FhirValue::String(n.to_string())),
            JsonValue::Bool(b) => Some(FhirValue::String(b.to_string())),
            _ => None,
        },
        ItemType::Url => value.as_str().map(|v| FhirValue::Uri(v.to_string())),
        ItemType::Choice | ItemType::OpenChoice => match value {
            JsonValue::Object(_) => as_coding(value).map(FhirValue::Coding),
            JsonValue::String(s) => Some(FhirValue::String(s.clone())),
            _ => None,
        },
        ItemType::Quantity => as_quantity(item, value).map(FhirValue::Quantity),
        ItemType::Reference => value
            .is_object()
            .then(|| FhirValue::Reference(value.clone())),
        ItemType::Attachment => value
            .is_object()
            .then(|| FhirValue::Attachment(value.clone())),
        ItemType::Group | ItemType::Unknown => infer_from_shape(value),
        ItemType::Display => None,
    }
}

fn match_answer_option(item: &ItemTypeInfo, value: &JsonValue) -> Option<FhirValue> {
    item.answer_option
        .iter()
        .map(|option| &option.value)
        .find(|option| match (option, value) {
            (FhirValue::Coding(coding), JsonValue::Object(map)) => {
                map.get("code").and_then(JsonValue::as_str).is_some()
                    && map.get("code").and_then(JsonValue::as_str) == coding.code.as_deref()
            }
            (FhirValue::Coding(coding), JsonValue::String(s)) => {
                coding.code.as_deref() == Some(s) || coding.display.as_deref() == Some(s)
            }
            (FhirValue::String(option), JsonValue::String(s)) => option == s,
            (FhirValue::Integer(option), JsonValue::Number(n)) => n.as_i64() == Some(*option),
            _ => false,
        })
        .cloned()
}

fn as_integer(value: &JsonValue) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|v| v.fract() == 0.0 && v.abs() < i64::MAX as f64)
            .map(|v| v as i64)
    })
}

fn as_coding(value: &JsonValue) -> Option<Coding> {
    serde_json::from_value::<Coding>(value.clone())
        .ok()
        .filter(|coding| coding.code.is_some() || coding.display.is_some())
}

fn as_quantity(item: &ItemTypeInfo, value: &JsonValue) -> Option<Quantity> {
    let mut quantity = match value {
        JsonValue::Number(n) => {
            let unit = item.unit_options.first();
            Quantity {
                value: n.as_f64(),
                unit: unit.and_then(|u| u.display.clone().or_else(|| u.code.clone())),
                system: unit.and_then(|u| u.system.clone()),
                code: unit.and_then(|u| u.code.clone()),
                comparator: None,
            }
        }
        JsonValue::Object(_) => serde_json::from_value::<Quantity>(value.clone()).ok()?,
        _ => return None,
    };

    quantity.value = Some(round_to_precision(quantity.value?, item.max_decimal_places));
    Some(quantity)
}

fn infer_from_shape(value: &JsonValue) -> Option<FhirValue> {
    match value {
        JsonValue::Bool(b) => Some(FhirValue::Boolean(*b)),
        JsonValue::Number(n) => n
            .as_i64()
            .map(FhirValue::Integer)
            .or_else(|| n.as_f64().map(FhirValue::Decimal)),
        JsonValue::String(s) => Some(FhirValue::String(s.clone())),
        JsonValue::Object(_) => as_coding(value).map(FhirValue::Coding),
        _ => None,
    }
}
