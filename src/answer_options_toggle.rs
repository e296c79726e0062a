use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::computed_updates::ComputedItemUpdates;
use crate::context::EvaluationContext;
use crate::evaluator::{CachedEvaluation, ExpressionRuntime};
use crate::storage::ExpressionCache;
use crate::types::{AnswerOption, FhirValue};

/// A set of answer options whose availability follows one expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOptionsToggleExpression {
    pub options: Vec<FhirValue>,
    pub expression: String,
    pub is_enabled: bool,
}

impl AnswerOptionsToggleExpression {
    pub fn new(options: Vec<FhirValue>, expression: impl Into<String>) -> Self {
        Self {
            options,
            expression: expression.into(),
            is_enabled: false,
        }
    }
}

/// Toggle expressions per linkId.
pub type AnswerOptionsToggleExpressions = IndexMap<String, Vec<AnswerOptionsToggleExpression>>;

/// Options no toggle mentions stay selectable. An option named by a toggle is
/// selectable only while one of its toggles is enabled.
pub fn is_option_enabled(toggles: &[AnswerOptionsToggleExpression], option: &FhirValue) -> bool {
    let mut governing = toggles
        .iter()
        .filter(|toggle| toggle.options.contains(option))
        .peekable();
    if governing.peek().is_none() {
        return true;
    }
    governing.any(|toggle| toggle.is_enabled)
}

pub fn enabled_answer_options<'a>(
    options: &'a [AnswerOption],
    toggles: &[AnswerOptionsToggleExpression],
) -> Vec<&'a AnswerOption> {
    options
        .iter()
        .filter(|option| is_option_enabled(toggles, &option.value))
        .collect()
}

/// Re-evaluates every toggle. A flip in either direction clears the item's
/// answers, since the selection may no longer be on offer.
pub async fn evaluate_answer_options_toggle_expressions(
    toggles: &mut AnswerOptionsToggleExpressions,
    context: &EvaluationContext,
    cache: &mut ExpressionCache,
    runtime: &ExpressionRuntime,
) -> (bool, ComputedItemUpdates) {
    let root = json!({});
    let mut is_updated = false;
    let mut computed_new_answers = ComputedItemUpdates::new();

    for (link_id, item_toggles) in toggles.iter_mut() {
        for toggle in item_toggles.iter_mut() {
            let result = match runtime
                .evaluate_or_skip_cached(cache, &root, &toggle.expression, context)
                .await
            {
                Ok(CachedEvaluation::Evaluated(result)) => result,
                Ok(CachedEvaluation::Skipped) => continue,
                Err(e) => {
                    tracing::warn!(
                        link_id = %link_id,
                        expression = %toggle.expression,
                        error = %e,
                        "Failed to evaluate answer options toggle expression"
                    );
                    continue;
                }
            };

            let enabled = match result.first() {
                Some(JsonValue::Bool(enabled)) => *enabled,
                None => false,
                Some(_) => continue,
            };

            if toggle.is_enabled != enabled {
                toggle.is_enabled = enabled;
                is_updated = true;
                computed_new_answers.insert(link_id.clone(), None);
            }
        }
    }

    (is_updated, computed_new_answers)
}
