//! Form-level validation rules from the `targetConstraint` extension.
//!
//! A constraint expression evaluates to `true` when the form satisfies it, so
//! `is_invalid` holds the negated result.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::context::EvaluationContext;
use crate::evaluator::{CachedEvaluation, ExpressionRuntime};
use crate::storage::ExpressionCache;
use crate::types::Questionnaire;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintSeverity {
    #[default]
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConstraint {
    pub key: String,
    pub severity: ConstraintSeverity,
    pub expression: Option<String>,
    pub human: String,
    /// FHIRPath over the questionnaire selecting the item to report on.
    pub location: Option<String>,
    /// Resolved from `location`.
    pub link_id: Option<String>,
    pub is_invalid: bool,
}

impl TargetConstraint {
    pub fn new(key: impl Into<String>, expression: impl Into<String>, human: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            severity: ConstraintSeverity::Error,
            expression: Some(expression.into()),
            human: human.into(),
            location: None,
            link_id: None,
            is_invalid: false,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Constraints keyed by constraint key.
pub type TargetConstraints = IndexMap<String, TargetConstraint>;

/// Re-evaluates every constraint and returns whether any `is_invalid` changed.
///
/// A boolean result sets `is_invalid` to its negation. An empty result marks
/// the constraint valid. Other results leave it unchanged.
pub async fn evaluate_target_constraints(
    constraints: &mut TargetConstraints,
    context: &EvaluationContext,
    cache: &mut ExpressionCache,
    runtime: &ExpressionRuntime,
) -> bool {
    let root = json!({});
    let mut is_updated = false;

    for (key, constraint) in constraints.iter_mut() {
        let Some(expression) = constraint.expression.as_deref() else {
            continue;
        };

        let result = match runtime
            .evaluate_or_skip_cached(cache, &root, expression, context)
            .await
        {
            Ok(CachedEvaluation::Evaluated(result)) => result,
            Ok(CachedEvaluation::Skipped) => continue,
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    expression = %expression,
                    error = %e,
                    "Failed to evaluate target constraint"
                );
                continue;
            }
        };

        let is_invalid = match result.first() {
            Some(JsonValue::Bool(satisfied)) => !satisfied,
            None => false,
            Some(_) => continue,
        };

        if constraint.is_invalid != is_invalid {
            constraint.is_invalid = is_invalid;
            is_updated = true;
        }
    }

    is_updated
}

/// Resolves each constraint's `location` against the static questionnaire and
/// returns linkId to constraint keys. Locations that do not select an item
/// with a string `linkId` are ignored.
pub async fn read_target_constraint_location_link_ids(
    questionnaire: &Questionnaire,
    constraints: &mut TargetConstraints,
    runtime: &ExpressionRuntime,
) -> IndexMap<String, Vec<String>> {
    let root = questionnaire.to_json();
    let context = EvaluationContext::new();
    let mut link_ids: IndexMap<String, Vec<String>> = IndexMap::new();

    for (key, constraint) in constraints.iter_mut() {
        let Some(location) = constraint.location.as_deref() else {
            continue;
        };

        let result = match runtime.evaluate_static(&root, location, &context).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    location = %location,
                    error = %e,
                    "Failed to resolve target constraint location"
                );
                continue;
            }
        };

        let Some(link_id) = result
            .first()
            .and_then(|found| found.get("linkId"))
            .and_then(JsonValue::as_str)
        else {
            continue;
        };

        link_ids
            .entry(link_id.to_string())
            .or_default()
            .push(key.clone());
        constraint.link_id = Some(link_id.to_string());
    }

    link_ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EngineConfig;
    use crate::evaluator::{EvaluationOptions, EvaluatorError, EvaluatorResult, ExpressionEvaluator};
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Interprets a tiny fixed vocabulary of expressions.
    struct FixedEvaluator;

    #[async_trait]
    impl ExpressionEvaluator for FixedEvaluator {
        async fn evaluate(
            &self,
            root: &JsonValue,
            expression: &str,
            _context: &EvaluationContext,
            _options: &EvaluationOptions,
        ) -> EvaluatorResult<Vec<JsonValue>> {
            match expression {
                "true" => Ok(vec![json!(true)]),
                "false" => Ok(vec![json!(false)]),
                "{}" => Ok(vec![]),
                "'text'" => Ok(vec![json!("text")]),
                "item[0]" => Ok(root["item"].get(0).cloned().into_iter().collect()),
                "item[0].linkId" => Ok(vec![json!("weight")]),
                _ => Err(EvaluatorError::Syntax(expression.to_string())),
            }
        }
    }

    fn runtime() -> ExpressionRuntime {
        ExpressionRuntime::new(Arc::new(FixedEvaluator), &EngineConfig::default())
    }

    fn constraints(entries: &[(&str, &str)]) -> TargetConstraints {
        entries
            .iter()
            .map(|(key, expression)| {
                (
                    key.to_string(),
                    TargetConstraint::new(*key, *expression, "Check the form"),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_result_is_inverted() {
        let mut constraints = constraints(&[("violated", "false"), ("satisfied", "true")]);
        constraints["satisfied"].is_invalid = true;

        let updated = evaluate_target_constraints(
            &mut constraints,
            &EvaluationContext::new(),
            &mut ExpressionCache::default(),
            &runtime(),
        )
        .await;

        assert!(updated);
        assert!(constraints["violated"].is_invalid);
        assert!(!constraints["satisfied"].is_invalid);
    }

    #[tokio::test]
    async fn test_empty_result_is_valid_and_other_results_ignored() {
        let mut constraints = constraints(&[("empty", "{}"), ("text", "'text'"), ("broken", "(")]);
        constraints["empty"].is_invalid = true;
        constraints["text"].is_invalid = true;
        constraints["broken"].is_invalid = true;

        evaluate_target_constraints(
            &mut constraints,
            &EvaluationContext::new(),
            &mut ExpressionCache::default(),
            &runtime(),
        )
        .await;

        assert!(!constraints["empty"].is_invalid);
        assert!(constraints["text"].is_invalid);
        assert!(constraints["broken"].is_invalid);
    }

    #[tokio::test]
    async fn test_unchanged_result_reports_no_update() {
        let mut constraints = constraints(&[("violated", "false")]);
        let mut cache = ExpressionCache::default();
        let context = EvaluationContext::new();

        assert!(evaluate_target_constraints(&mut constraints, &context, &mut cache, &runtime()).await);
        assert!(!evaluate_target_constraints(&mut constraints, &context, &mut cache, &runtime()).await);
    }

    #[tokio::test]
    async fn test_location_link_ids() {
        let questionnaire: Questionnaire = serde_json::from_value(json!({
            "resourceType": "Questionnaire",
            "item": [{"linkId": "weight", "type": "decimal"}]
        }))
        .unwrap();

        let mut constraints = TargetConstraints::new();
        constraints.insert(
            "a".to_string(),
            TargetConstraint::new("a", "true", "A").with_location("item[0]"),
        );
        constraints.insert(
            "b".to_string(),
            TargetConstraint::new("b", "true", "B").with_location("item[0]"),
        );
        constraints.insert(
            "c".to_string(),
            TargetConstraint::new("c", "true", "C").with_location("item[0].linkId"),
        );

        let link_ids =
            read_target_constraint_location_link_ids(&questionnaire, &mut constraints, &runtime())
                .await;

        assert_eq!(link_ids["weight"], vec!["a".to_string(), "b".to_string()]);
        assert_eq!(constraints["a"].link_id.as_deref(), Some("weight"));
        assert!(constraints["c"].link_id.is_none());
    }
}
