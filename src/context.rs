//! Evaluation context assembly.
//!
//! The context is rebuilt from scratch on every response change, layered on top
//! of the previous context so values supplied by the caller (launch context,
//! x-fhir-query results) survive across passes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::evaluator::ExpressionRuntime;
use crate::model::{QUESTIONNAIRE_LEVEL, Variables};
use crate::storage::{ExpressionCache, ResponseItemIndex};
use crate::types::QuestionnaireResponse;

pub const RESOURCE_VARIABLE: &str = "resource";
pub const ROOT_RESOURCE_VARIABLE: &str = "rootResource";

const RESPONSE_BASE: &str = "QuestionnaireResponse";
const RESPONSE_ITEM_BASE: &str = "QuestionnaireResponse.item";

/// Variable name to value, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationContext {
    variables: IndexMap<String, JsonValue>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: JsonValue) {
        self.variables.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn resource(&self) -> Option<&JsonValue> {
        self.get(RESOURCE_VARIABLE)
    }

    pub fn root_resource(&self) -> Option<&JsonValue> {
        self.get(ROOT_RESOURCE_VARIABLE)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.variables.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Rebuilds the context for `response`.
///
/// Steps run in a fixed order: response seeding, x-fhir-query placeholders,
/// questionnaire-level variables, then item-level variables once per instance.
/// A variable whose expression fails is logged and left out.
pub async fn build_context(
    response: &QuestionnaireResponse,
    index: &ResponseItemIndex,
    variables: &Variables,
    prior: &EvaluationContext,
    cache: &mut ExpressionCache,
    runtime: &ExpressionRuntime,
) -> EvaluationContext {
    let response_json = response.to_json();

    let mut context = prior.clone();
    context.insert(RESOURCE_VARIABLE, response_json.clone());
    context.insert(ROOT_RESOURCE_VARIABLE, response_json.clone());

    for (name, variable) in &variables.x_fhir_query_variables {
        if !context.contains(name) {
            let placeholder = variable.result.clone().unwrap_or_else(|| json!([]));
            context.insert(name.clone(), placeholder);
        }
    }

    if let Some(document_variables) = variables.fhir_path_variables.get(QUESTIONNAIRE_LEVEL) {
        for variable in document_variables {
            let (Some(name), Some(expression)) = (&variable.name, &variable.expression) else {
                continue;
            };

            match runtime
                .evaluate_reusing_cached(cache, &response_json, expression, &context, Some(RESPONSE_BASE))
                .await
            {
                Ok(result) => context.insert(name.clone(), JsonValue::Array(result)),
                Err(e) => {
                    tracing::warn!(
                        expression = %expression,
                        error = %e,
                        "Failed to evaluate questionnaire-level variable"
                    );
                }
            }
        }
    }

    for (link_id, item_variables) in &variables.fhir_path_variables {
        if link_id == QUESTIONNAIRE_LEVEL || item_variables.is_empty() {
            continue;
        }

        let instances: Vec<JsonValue> = match index.get(link_id) {
            [] => vec![json!({ "linkId": link_id })],
            items => items.iter().map(|item| item.to_json()).collect(),
        };

        for instance in &instances {
            for variable in item_variables {
                let (Some(name), Some(expression)) = (&variable.name, &variable.expression) else {
                    continue;
                };

                match runtime
                    .evaluate_reusing_cached(cache, instance, expression, &context, Some(RESPONSE_ITEM_BASE))
                    .await
                {
                    Ok(result) => context.insert(name.clone(), JsonValue::Array(result)),
                    Err(e) => {
                        tracing::warn!(
                            link_id = %link_id,
                            expression = %expression,
                            error = %e,
                            "Failed to evaluate item variable"
                        );
                    }
                }
            }
        }
    }

    tracing::debug!(variables = context.len(), "Evaluation context rebuilt");
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EngineConfig;
    use crate::evaluator::{EvaluationOptions, EvaluatorError, EvaluatorResult, ExpressionEvaluator};
    use crate::model::XFhirQueryVariable;
    use crate::types::{Expression, FhirValue, ResponseItem};
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Returns the root's `linkId` for `linkId`, the prior value of `%counter`
    /// plus one for `counter`, and fails on `boom`.
    struct EchoEvaluator;

    #[async_trait]
    impl ExpressionEvaluator for EchoEvaluator {
        async fn evaluate(
            &self,
            root: &JsonValue,
            expression: &str,
            context: &EvaluationContext,
            _options: &EvaluationOptions,
        ) -> EvaluatorResult<Vec<JsonValue>> {
            match expression {
                "linkId" => Ok(root.get("linkId").cloned().into_iter().collect()),
                "answer.value" => Ok(root["answer"]
                    .as_array()
                    .map(|answers| answers.iter().filter_map(|a| a.get("valueDecimal").cloned()).collect())
                    .unwrap_or_default()),
                "%document.count()" => Ok(vec![json!(
                    context.get("document").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0)
                )]),
                "item.count()" => Ok(vec![json!(root["item"].as_array().map(|a| a.len()).unwrap_or(0))]),
                "boom" => Err(EvaluatorError::Syntax("unexpected token".to_string())),
                other => Err(EvaluatorError::Internal(format!("unscripted: {other}"))),
            }
        }
    }

    fn runtime() -> ExpressionRuntime {
        ExpressionRuntime::new(Arc::new(EchoEvaluator), &EngineConfig::default())
    }

    fn variable(name: &str, expression: &str) -> Expression {
        Expression::fhirpath(expression).with_name(name)
    }

    #[tokio::test]
    async fn test_seeds_resource_and_keeps_prior_variables() {
        let response = QuestionnaireResponse::new().with_item(ResponseItem::new("a"));
        let prior = EvaluationContext::new().with_variable("patient", json!({"id": "p1"}));

        let context = build_context(
            &response,
            &ResponseItemIndex::build(&response),
            &Variables::default(),
            &prior,
            &mut ExpressionCache::default(),
            &runtime(),
        )
        .await;

        assert_eq!(context.resource(), Some(&response.to_json()));
        assert_eq!(context.root_resource(), Some(&response.to_json()));
        assert_eq!(context.get("patient"), Some(&json!({"id": "p1"})));
    }

    #[tokio::test]
    async fn test_x_fhir_query_placeholder_does_not_override() {
        let mut variables = Variables::default();
        variables.x_fhir_query_variables.insert(
            "conditions".to_string(),
            XFhirQueryVariable::new(Expression::x_fhir_query("Condition?patient={{%patient.id}}")),
        );
        variables.x_fhir_query_variables.insert(
            "observations".to_string(),
            XFhirQueryVariable::new(Expression::x_fhir_query("Observation?code=29463-7")),
        );
        let prior = EvaluationContext::new().with_variable("conditions", json!({"resourceType": "Bundle"}));
        let response = QuestionnaireResponse::new();

        let context = build_context(
            &response,
            &ResponseItemIndex::build(&response),
            &variables,
            &prior,
            &mut ExpressionCache::default(),
            &runtime(),
        )
        .await;

        assert_eq!(context.get("conditions"), Some(&json!({"resourceType": "Bundle"})));
        assert_eq!(context.get("observations"), Some(&json!([])));
    }

    #[tokio::test]
    async fn test_document_then_item_variables() {
        let response = QuestionnaireResponse::new()
            .with_item(ResponseItem::new("weight").with_answer(FhirValue::Decimal(77.3)));
        let mut variables = Variables::default();
        variables.fhir_path_variables.insert(
            QUESTIONNAIRE_LEVEL.to_string(),
            vec![variable("document", "item.count()")],
        );
        variables.fhir_path_variables.insert(
            "weight".to_string(),
            vec![
                variable("weightValue", "answer.value"),
                variable("documentCount", "%document.count()"),
            ],
        );

        let context = build_context(
            &response,
            &ResponseItemIndex::build(&response),
            &variables,
            &EvaluationContext::new(),
            &mut ExpressionCache::default(),
            &runtime(),
        )
        .await;

        assert_eq!(context.get("document"), Some(&json!([1])));
        assert_eq!(context.get("weightValue"), Some(&json!([77.3])));
        assert_eq!(context.get("documentCount"), Some(&json!([1])));
    }

    #[tokio::test]
    async fn test_absent_item_still_evaluates_once() {
        let response = QuestionnaireResponse::new();
        let mut variables = Variables::default();
        variables
            .fhir_path_variables
            .insert("height".to_string(), vec![variable("heightLinkId", "linkId")]);

        let context = build_context(
            &response,
            &ResponseItemIndex::build(&response),
            &variables,
            &EvaluationContext::new(),
            &mut ExpressionCache::default(),
            &runtime(),
        )
        .await;

        assert_eq!(context.get("heightLinkId"), Some(&json!(["height"])));
    }

    #[tokio::test]
    async fn test_failing_variable_does_not_abort_others() {
        let response = QuestionnaireResponse::new().with_item(ResponseItem::new("a"));
        let mut variables = Variables::default();
        variables.fhir_path_variables.insert(
            "a".to_string(),
            vec![variable("broken", "boom"), variable("aLinkId", "linkId")],
        );

        let context = build_context(
            &response,
            &ResponseItemIndex::build(&response),
            &variables,
            &EvaluationContext::new(),
            &mut ExpressionCache::default(),
            &runtime(),
        )
        .await;

        assert!(!context.contains("broken"));
        assert_eq!(context.get("aLinkId"), Some(&json!(["a"])));
    }
}
