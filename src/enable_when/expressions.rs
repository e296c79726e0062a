use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::context::EvaluationContext;
use crate::evaluator::{CachedEvaluation, ExpressionRuntime};
use crate::storage::{ExpressionCache, ResponseItemIndex};

const LINK_ID_FILTER: &str = ".where(linkId";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableWhenSingleExpression {
    pub expression: String,
    pub is_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableWhenRepeatExpression {
    pub expression: String,
    pub parent_link_id: String,
    pub enabled_indexes: Vec<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableWhenExpressions {
    pub single_expressions: IndexMap<String, EnableWhenSingleExpression>,
    pub repeat_expressions: IndexMap<String, EnableWhenRepeatExpression>,
}

impl EnableWhenExpressions {
    pub fn is_empty(&self) -> bool {
        self.single_expressions.is_empty() && self.repeat_expressions.is_empty()
    }
}

/// Specialises an expression to one parent repeat instance by indexing the
/// collection selected right before the last `.where(linkId` filter.
/// Expressions without such a filter are returned unchanged.
pub fn insert_repeat_index(expression: &str, instance: usize) -> String {
    match expression.rfind(LINK_ID_FILTER) {
        Some(position) => format!(
            "{}[{instance}]{}",
            &expression[..position],
            &expression[position..]
        ),
        None => expression.to_string(),
    }
}

/// New flag for a boolean-valued expression result: a boolean replaces the
/// flag, an empty result disables, anything else leaves it as is.
fn next_enabled(current: bool, result: &[JsonValue]) -> bool {
    match result.first() {
        None => false,
        Some(JsonValue::Bool(enabled)) => *enabled,
        Some(_) => current,
    }
}

/// Evaluates every enableWhen expression against `context` and returns whether
/// any flag changed.
pub async fn evaluate_enable_when_expressions(
    expressions: &mut EnableWhenExpressions,
    context: &EvaluationContext,
    index: &ResponseItemIndex,
    cache: &mut ExpressionCache,
    runtime: &ExpressionRuntime,
) -> bool {
    let root = json!({});
    let mut is_updated = false;

    for (link_id, single) in expressions.single_expressions.iter_mut() {
        match runtime
            .evaluate_or_skip_cached(cache, &root, &single.expression, context)
            .await
        {
            Ok(CachedEvaluation::Skipped) => {}
            Ok(CachedEvaluation::Evaluated(result)) => {
                let enabled = next_enabled(single.is_enabled, &result);
                if single.is_enabled != enabled {
                    single.is_enabled = enabled;
                    is_updated = true;
                }
            }
            Err(e) => {
                tracing::warn!(
                    link_id = %link_id,
                    expression = %single.expression,
                    error = %e,
                    "Failed to evaluate enableWhen expression"
                );
            }
        }
    }

    for (link_id, repeat) in expressions.repeat_expressions.iter_mut() {
        let instance_count = index.instance_count(&repeat.parent_link_id);
        if repeat.enabled_indexes.len() != instance_count {
            repeat.enabled_indexes.resize(instance_count, false);
            is_updated = true;
        }

        for instance in 0..instance_count {
            let expression = insert_repeat_index(&repeat.expression, instance);
            match runtime
                .evaluate_or_skip_cached(cache, &root, &expression, context)
                .await
            {
                Ok(CachedEvaluation::Skipped) => {}
                Ok(CachedEvaluation::Evaluated(result)) => {
                    let current = repeat.enabled_indexes[instance];
                    let enabled = next_enabled(current, &result);
                    if current != enabled {
                        repeat.enabled_indexes[instance] = enabled;
                        is_updated = true;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        link_id = %link_id,
                        expression = %expression,
                        error = %e,
                        "Failed to evaluate repeat enableWhen expression"
                    );
                }
            }
        }
    }

    is_updated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_repeat_index_before_last_filter() {
        let expression = "%resource.item.where(linkId='meds').item.where(linkId='dose').answer.value > 2";
        assert_eq!(
            insert_repeat_index(expression, 1),
            "%resource.item.where(linkId='meds').item[1].where(linkId='dose').answer.value > 2"
        );
    }

    #[test]
    fn test_insert_repeat_index_without_filter() {
        assert_eq!(insert_repeat_index("%age > 18", 3), "%age > 18");
    }

    #[test]
    fn test_next_enabled() {
        assert!(next_enabled(false, &[json!(true)]));
        assert!(!next_enabled(true, &[]));
        assert!(next_enabled(true, &[json!("not a boolean")]));
    }
}
