use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::value::FhirValue;

pub const QUESTIONNAIRE_RESPONSE_TYPE: &str = "QuestionnaireResponse";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireResponse {
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questionnaire: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<ResponseItem>,
}

fn default_resource_type() -> String {
    QUESTIONNAIRE_RESPONSE_TYPE.to_string()
}

fn default_status() -> String {
    "in-progress".to_string()
}

impl Default for QuestionnaireResponse {
    fn default() -> Self {
        Self {
            resource_type: default_resource_type(),
            id: None,
            questionnaire: None,
            status: default_status(),
            item: Vec::new(),
        }
    }
}

impl QuestionnaireResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, item: ResponseItem) -> Self {
        self.item.push(item);
        self
    }

    /// The canonical empty document: no id, no questionnaire reference, no items.
    pub fn is_empty_document(&self) -> bool {
        self.id.is_none() && self.questionnaire.is_none() && self.item.is_empty()
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseItem {
    pub link_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answer: Vec<ResponseAnswer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<ResponseItem>,
}

impl ResponseItem {
    pub fn new(link_id: impl Into<String>) -> Self {
        Self {
            link_id: link_id.into(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_answer(mut self, value: FhirValue) -> Self {
        self.answer.push(ResponseAnswer::new(value));
        self
    }

    pub fn with_item(mut self, item: ResponseItem) -> Self {
        self.item.push(item);
        self
    }

    pub fn has_answer(&self) -> bool {
        self.answer.iter().any(|answer| answer.value.is_some())
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// One `QuestionnaireResponse.item.answer` entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseAnswer {
    pub value: Option<FhirValue>,
    pub item: Vec<ResponseItem>,
}

impl ResponseAnswer {
    pub fn new(value: FhirValue) -> Self {
        Self {
            value: Some(value),
            item: Vec::new(),
        }
    }
}

impl Serialize for ResponseAnswer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(value) = &self.value {
            map.serialize_entry(&value.prefixed_key("value"), &value.to_json())?;
        }
        if !self.item.is_empty() {
            map.serialize_entry("item", &self.item)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ResponseAnswer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = JsonMap::<String, JsonValue>::deserialize(deserializer)?;
        let item = match map.get("item") {
            Some(raw) => serde_json::from_value(raw.clone()).map_err(D::Error::custom)?,
            None => Vec::new(),
        };
        Ok(Self {
            value: FhirValue::from_prefixed("value", &map),
            item,
        })
    }
}
