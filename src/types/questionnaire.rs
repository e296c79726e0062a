use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::extension::{
    Element, Extension, MAX_DECIMAL_PLACES_URL, UNIT_OPTION_URL, filter_extensions,
    find_extension,
};
use super::value::{Coding, FhirValue};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Questionnaire {
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<QuestionnaireItem>,
}

fn default_resource_type() -> String {
    "Questionnaire".to_string()
}

impl Questionnaire {
    pub fn new() -> Self {
        Self {
            resource_type: default_resource_type(),
            ..Default::default()
        }
    }

    pub fn with_item(mut self, item: QuestionnaireItem) -> Self {
        self.item.push(item);
        self
    }

    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.extension.push(extension);
        self
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    /// Depth-first search for the definition of `link_id`.
    pub fn find_item(&self, link_id: &str) -> Option<&QuestionnaireItem> {
        fn search<'a>(items: &'a [QuestionnaireItem], link_id: &str) -> Option<&'a QuestionnaireItem> {
            items.iter().find_map(|item| {
                if item.link_id == link_id {
                    Some(item)
                } else {
                    search(&item.item, link_id)
                }
            })
        }
        search(&self.item, link_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemType {
    Group,
    Display,
    Boolean,
    Decimal,
    Integer,
    Date,
    DateTime,
    Time,
    #[default]
    String,
    Text,
    Url,
    Choice,
    #[serde(rename = "open-choice")]
    OpenChoice,
    Attachment,
    Reference,
    Quantity,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnableBehavior {
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnableWhenOperator {
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
}

/// A declarative `Questionnaire.item.enableWhen` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct EnableWhen {
    pub question: String,
    pub operator: EnableWhenOperator,
    pub answer: FhirValue,
}

impl EnableWhen {
    pub fn new(question: impl Into<String>, operator: EnableWhenOperator, answer: FhirValue) -> Self {
        Self {
            question: question.into(),
            operator,
            answer,
        }
    }
}

impl Serialize for EnableWhen {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("question", &self.question)?;
        map.serialize_entry("operator", &self.operator)?;
        map.serialize_entry(&self.answer.prefixed_key("answer"), &self.answer.to_json())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for EnableWhen {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = JsonMap::<String, JsonValue>::deserialize(deserializer)?;
        let question = map
            .get("question")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| D::Error::missing_field("question"))?
            .to_string();
        let operator = map
            .get("operator")
            .cloned()
            .ok_or_else(|| D::Error::missing_field("operator"))
            .and_then(|raw| serde_json::from_value(raw).map_err(D::Error::custom))?;
        let answer = FhirValue::from_prefixed("answer", &map)
            .ok_or_else(|| D::Error::custom("enableWhen requires an answer[x] value"))?;
        Ok(Self {
            question,
            operator,
            answer,
        })
    }
}

/// A `Questionnaire.item.answerOption` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOption {
    pub value: FhirValue,
    pub initial_selected: bool,
    pub extension: Vec<Extension>,
}

impl AnswerOption {
    pub fn new(value: FhirValue) -> Self {
        Self {
            value,
            initial_selected: false,
            extension: Vec::new(),
        }
    }
}

impl Serialize for AnswerOption {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(&self.value.prefixed_key("value"), &self.value.to_json())?;
        if self.initial_selected {
            map.serialize_entry("initialSelected", &true)?;
        }
        if !self.extension.is_empty() {
            map.serialize_entry("extension", &self.extension)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AnswerOption {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = JsonMap::<String, JsonValue>::deserialize(deserializer)?;
        let value = FhirValue::from_prefixed("value", &map)
            .ok_or_else(|| D::Error::custom("answerOption requires a value[x]"))?;
        let extension = match map.get("extension") {
            Some(raw) => serde_json::from_value(raw.clone()).map_err(D::Error::custom)?,
            None => Vec::new(),
        };
        Ok(Self {
            value,
            initial_selected: map
                .get("initialSelected")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false),
            extension,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireItem {
    pub link_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "_text", default, skip_serializing_if = "Option::is_none")]
    pub text_element: Option<Element>,
    #[serde(rename = "type", default)]
    pub item_type: ItemType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub repeats: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enable_when: Vec<EnableWhen>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_behavior: Option<EnableBehavior>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answer_option: Vec<AnswerOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_value_set: Option<String>,
    #[serde(
        rename = "_answerValueSet",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub answer_value_set_element: Option<Element>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<QuestionnaireItem>,
}

impl QuestionnaireItem {
    pub fn new(link_id: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            link_id: link_id.into(),
            item_type,
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn repeating(mut self) -> Self {
        self.repeats = true;
        self
    }

    pub fn with_item(mut self, item: QuestionnaireItem) -> Self {
        self.item.push(item);
        self
    }

    pub fn with_enable_when(mut self, enable_when: EnableWhen) -> Self {
        self.enable_when.push(enable_when);
        self
    }

    pub fn with_enable_behavior(mut self, behavior: EnableBehavior) -> Self {
        self.enable_behavior = Some(behavior);
        self
    }

    pub fn with_answer_option(mut self, value: FhirValue) -> Self {
        self.answer_option.push(AnswerOption::new(value));
        self
    }

    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.extension.push(extension);
        self
    }

    pub fn is_repeating_group(&self) -> bool {
        self.item_type == ItemType::Group && self.repeats
    }

    pub fn max_decimal_places(&self) -> Option<u32> {
        find_extension(&self.extension, MAX_DECIMAL_PLACES_URL)
            .and_then(|ext| ext.value_integer)
            .and_then(|places| u32::try_from(places).ok())
    }

    pub fn unit_options(&self) -> Vec<&Coding> {
        filter_extensions(&self.extension, UNIT_OPTION_URL)
            .filter_map(|ext| ext.value_coding.as_ref())
            .collect()
    }
}
