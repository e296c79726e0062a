//! Sequencing of the non-calculated engines after a response change.

use serde::Serialize;

use crate::answer_options_toggle::evaluate_answer_options_toggle_expressions;
use crate::computed_updates::ComputedItemUpdates;
use crate::context::{EvaluationContext, build_context};
use crate::dynamic_value_set::evaluate_dynamic_value_sets;
use crate::enable_when::evaluate_enable_when_expressions;
use crate::evaluator::ExpressionRuntime;
use crate::model::QuestionnaireModel;
use crate::storage::{ExpressionCache, ResponseItemIndex};
use crate::target_constraint::evaluate_target_constraints;
use crate::types::QuestionnaireResponse;

/// Per-engine change flags from one pass, plus the merged answer-clearing
/// instructions. Later engines win when two name the same linkId.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtherExpressionsOutcome {
    #[serde(skip)]
    pub context: EvaluationContext,
    pub target_constraints_updated: bool,
    pub enable_when_expressions_updated: bool,
    pub answer_options_toggles_updated: bool,
    pub value_sets_updated: bool,
    pub computed_new_answers: ComputedItemUpdates,
}

impl OtherExpressionsOutcome {
    pub fn is_updated(&self) -> bool {
        self.target_constraints_updated
            || self.enable_when_expressions_updated
            || self.answer_options_toggles_updated
            || self.value_sets_updated
    }
}

/// Runs target constraints, enableWhen expressions, answer option toggles and
/// dynamic value sets against one freshly built context.
///
/// Returns the prior context untouched when none of those engines has anything
/// registered.
pub async fn evaluate_other_expressions(
    response: &QuestionnaireResponse,
    model: &mut QuestionnaireModel,
    prior_context: &EvaluationContext,
    cache: &mut ExpressionCache,
    runtime: &ExpressionRuntime,
) -> OtherExpressionsOutcome {
    if !model.has_other_expressions() {
        return OtherExpressionsOutcome {
            context: prior_context.clone(),
            ..Default::default()
        };
    }

    let index = ResponseItemIndex::build(response);
    let context = build_context(
        response,
        &index,
        &model.variables,
        prior_context,
        cache,
        runtime,
    )
    .await;

    let target_constraints_updated =
        evaluate_target_constraints(&mut model.target_constraints, &context, cache, runtime).await;

    let enable_when_expressions_updated = evaluate_enable_when_expressions(
        &mut model.enable_when_expressions,
        &context,
        &index,
        cache,
        runtime,
    )
    .await;

    let (answer_options_toggles_updated, toggle_updates) = evaluate_answer_options_toggle_expressions(
        &mut model.answer_options_toggle_expressions,
        &context,
        cache,
        runtime,
    )
    .await;

    let (value_sets_updated, value_set_updates) =
        evaluate_dynamic_value_sets(&mut model.processed_value_sets, &context, cache, runtime).await;

    let mut computed_new_answers = toggle_updates;
    computed_new_answers.extend(value_set_updates);

    tracing::debug!(
        target_constraints_updated,
        enable_when_expressions_updated,
        answer_options_toggles_updated,
        value_sets_updated,
        cleared = computed_new_answers.len(),
        "Evaluated other expressions"
    );

    OtherExpressionsOutcome {
        context,
        target_constraints_updated,
        enable_when_expressions_updated,
        answer_options_toggles_updated,
        value_sets_updated,
        computed_new_answers,
    }
}
