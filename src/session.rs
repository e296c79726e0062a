//! [`FormSession`] ties the engines together for one loaded questionnaire.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::calculated::{
    apply_calculated_expression_values_to_response, evaluate_initial_calculated_expressions,
    mark_calculated_values_applied, process_calculated_expressions,
};
use crate::computed_updates::{ComputedItemUpdates, apply_computed_updates};
use crate::context::{EvaluationContext, build_context};
use crate::core::EngineConfig;
use crate::enable_when::{
    LinkedQuestionsMap, RepeatMutation, assign_populated_answers, mutate_repeat_instances,
    update_answer,
};
use crate::error::Result;
use crate::evaluator::{ExpressionEvaluator, ExpressionRuntime};
use crate::model::QuestionnaireModel;
use crate::orchestrator::{OtherExpressionsOutcome, evaluate_other_expressions};
use crate::storage::{ExpressionCache, ResponseItemIndex};
use crate::target_constraint::read_target_constraint_location_link_ids;
use crate::types::{FhirValue, Questionnaire, QuestionnaireResponse};

/// What changed during [`FormSession::initialise`] or
/// [`FormSession::update_response`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    pub calculated_updated: bool,
    pub calculation_converged: bool,
    pub enable_when_items_updated: bool,
    #[serde(flatten)]
    pub other: OtherExpressionsOutcome,
}

impl SessionUpdate {
    pub fn is_updated(&self) -> bool {
        self.calculated_updated || self.enable_when_items_updated || self.other.is_updated()
    }
}

/// Owns the evaluation state of one questionnaire. Loading another
/// questionnaire means creating a new session.
#[derive(Debug)]
pub struct FormSession {
    questionnaire: Questionnaire,
    model: QuestionnaireModel,
    runtime: ExpressionRuntime,
    config: EngineConfig,
    context: EvaluationContext,
    cache: ExpressionCache,
    linked_questions: LinkedQuestionsMap,
    constraint_link_ids: IndexMap<String, Vec<String>>,
    response: QuestionnaireResponse,
}

impl FormSession {
    pub fn new(
        questionnaire: Questionnaire,
        evaluator: Arc<dyn ExpressionEvaluator>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let model = QuestionnaireModel::from_questionnaire(&questionnaire);
        let runtime = ExpressionRuntime::new(evaluator, &config);
        let cache = ExpressionCache::new(&config.cache_config);

        Ok(Self {
            questionnaire,
            model,
            runtime,
            config,
            context: EvaluationContext::new(),
            cache,
            linked_questions: LinkedQuestionsMap::new(),
            constraint_link_ids: IndexMap::new(),
            response: QuestionnaireResponse::new(),
        })
    }

    /// Adds a launch-context variable such as `patient` or `user`.
    pub fn with_launch_context(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.context.insert(name, value);
        self
    }

    /// Stores a fetched x-fhir-query result so it replaces the empty
    /// placeholder from the next pass on.
    pub fn set_query_result(&mut self, name: &str, result: JsonValue) {
        if let Some(variable) = self.model.variables.x_fhir_query_variables.get_mut(name) {
            variable.result = Some(result.clone());
        } else {
            tracing::debug!(variable = %name, "Query result for an undeclared variable");
        }
        self.context.insert(name, result);
    }

    /// Seeds every engine from a (possibly pre-populated) response.
    pub async fn initialise(&mut self, response: QuestionnaireResponse) -> SessionUpdate {
        let before = self.model.enable_when_items.clone();
        self.linked_questions =
            assign_populated_answers(&mut self.model.enable_when_items, &response);
        let enable_when_items_updated = before != self.model.enable_when_items;

        let index = ResponseItemIndex::build(&response);
        self.context = build_context(
            &response,
            &index,
            &self.model.variables,
            &self.context,
            &mut self.cache,
            &self.runtime,
        )
        .await;

        let calculated_updated = evaluate_initial_calculated_expressions(
            &response,
            &mut self.model.calculated_expressions,
            &self.context,
            &mut self.cache,
            &self.runtime,
        )
        .await;
        let response = if calculated_updated {
            apply_calculated_expression_values_to_response(
                &self.questionnaire,
                &self.model.item_types,
                &response,
                &self.model.calculated_expressions,
            )
        } else {
            response
        };
        mark_calculated_values_applied(&mut self.model.calculated_expressions);

        self.constraint_link_ids = read_target_constraint_location_link_ids(
            &self.questionnaire,
            &mut self.model.target_constraints,
            &self.runtime,
        )
        .await;

        let mut other = evaluate_other_expressions(
            &response,
            &mut self.model,
            &self.context,
            &mut self.cache,
            &self.runtime,
        )
        .await;
        // Pre-populated answers survive the first binding of toggles and value sets.
        other.computed_new_answers.clear();
        self.context = other.context.clone();
        self.response = response;

        SessionUpdate {
            calculated_updated,
            calculation_converged: true,
            enable_when_items_updated,
            other,
        }
    }

    /// Runs the calculated chain to a fixpoint, then every other engine, and
    /// splices the resulting answer updates into the stored response.
    pub async fn update_response(&mut self, response: QuestionnaireResponse) -> SessionUpdate {
        let calculation = process_calculated_expressions(
            &self.questionnaire,
            &self.model.item_types,
            response,
            &mut self.model.calculated_expressions,
            &self.model.variables,
            &self.context,
            &mut self.cache,
            &self.runtime,
            self.config.max_calculation_iterations,
        )
        .await;

        let mut other = evaluate_other_expressions(
            &calculation.response,
            &mut self.model,
            &calculation.context,
            &mut self.cache,
            &self.runtime,
        )
        .await;

        let mut updates: ComputedItemUpdates = calculation.computed_new_answers;
        updates.extend(std::mem::take(&mut other.computed_new_answers));
        let response = apply_computed_updates(&calculation.response, &updates);

        let before = self.model.enable_when_items.clone();
        self.linked_questions =
            assign_populated_answers(&mut self.model.enable_when_items, &response);
        let enable_when_items_updated = before != self.model.enable_when_items;

        self.context = other.context.clone();
        self.response = response;
        other.computed_new_answers = updates;

        SessionUpdate {
            calculated_updated: calculation.is_updated,
            calculation_converged: calculation.converged,
            enable_when_items_updated,
            other,
        }
    }

    /// Routes one answer change to the conditional items that depend on it.
    pub fn enable_when_answer_changed(
        &mut self,
        question_id: &str,
        answers: &[FhirValue],
        repeat_index: Option<usize>,
    ) -> bool {
        let Some(dependents) = self.linked_questions.get(question_id) else {
            return false;
        };
        update_answer(
            &mut self.model.enable_when_items,
            dependents,
            question_id,
            answers,
            repeat_index,
        )
    }

    pub fn add_repeat_instance(&mut self, parent_link_id: &str, index: usize) -> bool {
        mutate_repeat_instances(
            &mut self.model.enable_when_items,
            parent_link_id,
            index,
            RepeatMutation::Add,
        )
    }

    pub fn remove_repeat_instance(&mut self, parent_link_id: &str, index: usize) -> bool {
        mutate_repeat_instances(
            &mut self.model.enable_when_items,
            parent_link_id,
            index,
            RepeatMutation::Remove,
        )
    }

    /// Combined enabled state from declarative conditions and the
    /// enableWhen expression, if the item has either.
    pub fn is_enabled(&self, link_id: &str, repeat_index: Option<usize>) -> bool {
        let declared = self.model.enable_when_items.is_enabled(link_id, repeat_index);
        let expressions = &self.model.enable_when_expressions;

        let by_expression = if let Some(single) = expressions.single_expressions.get(link_id) {
            single.is_enabled
        } else if let Some(repeat) = expressions.repeat_expressions.get(link_id) {
            repeat_index
                .and_then(|instance| repeat.enabled_indexes.get(instance).copied())
                .unwrap_or(false)
        } else {
            true
        };

        declared && by_expression
    }

    /// Keys of the constraints currently violated at `link_id`.
    pub fn invalid_constraints(&self, link_id: &str) -> Vec<&str> {
        self.model
            .target_constraints
            .values()
            .filter(|constraint| constraint.is_invalid)
            .filter(|constraint| constraint.link_id.as_deref() == Some(link_id))
            .map(|constraint| constraint.key.as_str())
            .collect()
    }

    /// Expansion URL for the value set bound to `link_id`, with parameters.
    pub fn value_set_url(&self, link_id: &str) -> Option<&str> {
        self.model
            .processed_value_sets
            .values()
            .find(|value_set| value_set.link_ids.iter().any(|id| id == link_id))
            .map(|value_set| value_set.updatable_value_set_url.as_str())
    }

    pub fn questionnaire(&self) -> &Questionnaire {
        &self.questionnaire
    }

    pub fn model(&self) -> &QuestionnaireModel {
        &self.model
    }

    pub fn response(&self) -> &QuestionnaireResponse {
        &self.response
    }

    pub fn context(&self) -> &EvaluationContext {
        &self.context
    }

    pub fn constraint_link_ids(&self) -> &IndexMap<String, Vec<String>> {
        &self.constraint_link_ids
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> JsonValue {
        self.cache.stats()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}
