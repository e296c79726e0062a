//! Calculated item values (`sdc-questionnaire-calculatedExpression`).

pub mod answer;
pub mod apply;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::computed_updates::ComputedItemUpdates;
use crate::context::{EvaluationContext, build_context};
use crate::evaluator::{CachedEvaluation, ExpressionRuntime};
use crate::model::{ItemTypeInfo, Variables};
use crate::storage::{ExpressionCache, ResponseItemIndex};
use crate::types::{Questionnaire, QuestionnaireResponse};

pub use answer::{is_date_time, is_time, round_to_precision, value_to_answer};
pub use apply::{apply_calculated_expression_values_to_response, mark_calculated_values_applied};

/// Which part of the item a calculated expression computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalculatedSource {
    #[serde(rename = "item")]
    Item,
    #[serde(rename = "item._text")]
    ItemText,
    #[serde(rename = "item._answerValueSet")]
    ItemAnswerValueSet,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "value")]
pub enum CalculatedValue {
    #[default]
    NotEvaluated,
    Empty,
    Value(JsonValue),
}

impl CalculatedValue {
    pub fn as_value(&self) -> Option<&JsonValue> {
        match self {
            CalculatedValue::Value(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatedExpression {
    pub expression: String,
    pub from: CalculatedSource,
    #[serde(default)]
    pub value: CalculatedValue,
    /// Value most recently written into the response for `item` sources.
    #[serde(default)]
    pub last_applied: CalculatedValue,
}

impl CalculatedExpression {
    pub fn new(expression: impl Into<String>, from: CalculatedSource) -> Self {
        Self {
            expression: expression.into(),
            from,
            value: CalculatedValue::NotEvaluated,
            last_applied: CalculatedValue::NotEvaluated,
        }
    }
}

/// Calculated expressions per linkId; an item may carry one per source.
pub type CalculatedExpressions = IndexMap<String, Vec<CalculatedExpression>>;

/// Result of the chained recalculation.
#[derive(Debug, Clone)]
pub struct CalculationOutcome {
    pub response: QuestionnaireResponse,
    pub context: EvaluationContext,
    pub is_updated: bool,
    pub computed_new_answers: ComputedItemUpdates,
    pub iterations: usize,
    pub converged: bool,
}

/// First evaluation after load. Every value moves out of `NotEvaluated` so the
/// first real change observed by callers is `Empty` to a value.
pub async fn evaluate_initial_calculated_expressions(
    response: &QuestionnaireResponse,
    expressions: &mut CalculatedExpressions,
    context: &EvaluationContext,
    cache: &mut ExpressionCache,
    runtime: &ExpressionRuntime,
) -> bool {
    if response.is_empty_document() || expressions.is_empty() {
        return false;
    }

    for calculated in expressions.values_mut().flatten() {
        if calculated.value == CalculatedValue::NotEvaluated {
            calculated.value = CalculatedValue::Empty;
        }
    }

    let root = response.to_json();
    let mut is_updated = false;
    for (link_id, item_expressions) in expressions.iter_mut() {
        for calculated in item_expressions.iter_mut() {
            match runtime
                .evaluate_or_skip_cached(cache, &root, &calculated.expression, context)
                .await
            {
                Ok(CachedEvaluation::Evaluated(result)) => {
                    if let Some(first) = result.into_iter().next() {
                        let value = CalculatedValue::Value(first);
                        if calculated.value != value {
                            calculated.value = value;
                            is_updated = true;
                        }
                    }
                }
                Ok(CachedEvaluation::Skipped) => {}
                Err(e) => {
                    tracing::warn!(
                        link_id = %link_id,
                        expression = %calculated.expression,
                        error = %e,
                        "Failed to evaluate initial calculated expression"
                    );
                }
            }
        }
    }

    is_updated
}

/// Re-evaluates every calculated expression against a freshly built context.
///
/// A result that turns empty resets the value to `Empty`. Items whose answer
/// value set is computed get their answers cleared whenever it changes.
pub async fn evaluate_calculated_expressions(
    response: &QuestionnaireResponse,
    expressions: &mut CalculatedExpressions,
    context: &EvaluationContext,
    cache: &mut ExpressionCache,
    runtime: &ExpressionRuntime,
) -> (bool, ComputedItemUpdates) {
    let root = response.to_json();
    let mut is_updated = false;
    let mut computed_new_answers = ComputedItemUpdates::new();

    for (link_id, item_expressions) in expressions.iter_mut() {
        for calculated in item_expressions.iter_mut() {
            let result = match runtime
                .evaluate_or_skip_cached(cache, &root, &calculated.expression, context)
                .await
            {
                Ok(CachedEvaluation::Evaluated(result)) => result,
                Ok(CachedEvaluation::Skipped) => continue,
                Err(e) => {
                    tracing::warn!(
                        link_id = %link_id,
                        expression = %calculated.expression,
                        error = %e,
                        "Failed to evaluate calculated expression"
                    );
                    continue;
                }
            };

            let value = match result.into_iter().next() {
                Some(first) => CalculatedValue::Value(first),
                None if calculated.value.as_value().is_some() => CalculatedValue::Empty,
                None => continue,
            };

            if calculated.value != value {
                calculated.value = value;
                is_updated = true;
                if calculated.from == CalculatedSource::ItemAnswerValueSet {
                    computed_new_answers.insert(link_id.clone(), None);
                }
            }
        }
    }

    (is_updated, computed_new_answers)
}

/// Recomputes chained calculated values until nothing changes or the pass
/// limit is hit. Each pass rebuilds the index and context from the response
/// produced by the previous pass.
#[allow(clippy::too_many_arguments)]
pub async fn process_calculated_expressions(
    questionnaire: &Questionnaire,
    item_types: &IndexMap<String, ItemTypeInfo>,
    response: QuestionnaireResponse,
    expressions: &mut CalculatedExpressions,
    variables: &Variables,
    prior_context: &EvaluationContext,
    cache: &mut ExpressionCache,
    runtime: &ExpressionRuntime,
    max_iterations: usize,
) -> CalculationOutcome {
    let mut response = response;
    let mut context = prior_context.clone();
    let mut is_updated = false;
    let mut computed_new_answers = ComputedItemUpdates::new();
    let mut iterations = 0;
    let mut converged = expressions.is_empty();

    while !converged && iterations < max_iterations {
        iterations += 1;

        let index = ResponseItemIndex::build(&response);
        context = build_context(&response, &index, variables, &context, cache, runtime).await;

        let (changed, cleared) =
            evaluate_calculated_expressions(&response, expressions, &context, cache, runtime).await;
        if !changed {
            converged = true;
            break;
        }

        is_updated = true;
        computed_new_answers.extend(cleared);
        response = apply_calculated_expression_values_to_response(
            questionnaire,
            item_types,
            &response,
            expressions,
        );
        mark_calculated_values_applied(expressions);
    }

    if !converged {
        tracing::warn!(
            iterations,
            "Calculated expressions did not settle within the iteration limit, possible circular dependency"
        );
    } else {
        tracing::debug!(iterations, is_updated, "Calculated expressions settled");
    }

    CalculationOutcome {
        response,
        context,
        is_updated,
        computed_new_answers,
        iterations,
        converged,
    }
}
