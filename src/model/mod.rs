//! Declarations extracted from a questionnaire at load time.
//!
//! [`QuestionnaireModel`] holds every state record the engines mutate. It is
//! built once per questionnaire and replaced wholesale when a new one loads.

mod extract;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::answer_options_toggle::AnswerOptionsToggleExpressions;
use crate::calculated::CalculatedExpressions;
use crate::dynamic_value_set::ProcessedValueSets;
use crate::enable_when::{EnableWhenExpressions, EnableWhenItems};
use crate::target_constraint::TargetConstraints;
use crate::types::{AnswerOption, Coding, Expression, ItemType, Questionnaire, QuestionnaireItem};

/// Key under which document-scope variables are stored.
pub const QUESTIONNAIRE_LEVEL: &str = "QuestionnaireLevel";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XFhirQueryVariable {
    pub value_expression: Expression,
    /// Query result supplied by the caller, if fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
}

impl XFhirQueryVariable {
    pub fn new(value_expression: Expression) -> Self {
        Self {
            value_expression,
            result: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variables {
    /// FHIRPath variables per linkId, plus [`QUESTIONNAIRE_LEVEL`].
    pub fhir_path_variables: IndexMap<String, Vec<Expression>>,
    /// x-fhir-query variables by name.
    pub x_fhir_query_variables: IndexMap<String, XFhirQueryVariable>,
}

impl Variables {
    pub fn is_empty(&self) -> bool {
        self.fhir_path_variables.is_empty() && self.x_fhir_query_variables.is_empty()
    }
}

/// What answer conversion needs to know about an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTypeInfo {
    pub item_type: ItemType,
    pub repeats: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answer_option: Vec<AnswerOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_decimal_places: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unit_options: Vec<Coding>,
}

impl From<&QuestionnaireItem> for ItemTypeInfo {
    fn from(item: &QuestionnaireItem) -> Self {
        Self {
            item_type: item.item_type,
            repeats: item.repeats,
            text: item.text.clone(),
            answer_option: item.answer_option.clone(),
            max_decimal_places: item.max_decimal_places(),
            unit_options: item.unit_options().into_iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireModel {
    pub variables: Variables,
    pub enable_when_items: EnableWhenItems,
    pub enable_when_expressions: EnableWhenExpressions,
    pub calculated_expressions: CalculatedExpressions,
    pub target_constraints: TargetConstraints,
    pub answer_options_toggle_expressions: AnswerOptionsToggleExpressions,
    pub processed_value_sets: ProcessedValueSets,
    pub item_types: IndexMap<String, ItemTypeInfo>,
}

impl QuestionnaireModel {
    pub fn from_questionnaire(questionnaire: &Questionnaire) -> Self {
        let model = extract::extract(questionnaire);
        tracing::debug!(
            items = model.item_types.len(),
            enable_when_items = model.enable_when_items.single_items.len()
                + model.enable_when_items.repeat_items.len(),
            calculated = model.calculated_expressions.len(),
            constraints = model.target_constraints.len(),
            value_sets = model.processed_value_sets.len(),
            "Questionnaire declarations extracted"
        );
        model
    }

    /// Whether any engine besides calculated values has work registered.
    pub fn has_other_expressions(&self) -> bool {
        !self.target_constraints.is_empty()
            || !self.enable_when_expressions.is_empty()
            || !self.answer_options_toggle_expressions.is_empty()
            || self.processed_value_sets.values().any(|vs| vs.is_dynamic)
    }
}
