//! Value sets whose expansion URL carries parameters bound to other answers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::computed_updates::ComputedItemUpdates;
use crate::context::EvaluationContext;
use crate::evaluator::{CachedEvaluation, ExpressionRuntime};
use crate::storage::ExpressionCache;
use crate::types::{BINDING_PARAMETER_URL, Element, filter_extensions};

const CONTAINED_REFERENCE_PREFIX: char = '#';

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingParameter {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fhir_path_expression: Option<String>,
}

impl BindingParameter {
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            fhir_path_expression: None,
        }
    }

    pub fn expression(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            fhir_path_expression: Some(expression.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedValueSet {
    pub initial_value_set_url: String,
    pub updatable_value_set_url: String,
    pub binding_parameters: Vec<BindingParameter>,
    pub is_dynamic: bool,
    /// Items bound to this value set.
    pub link_ids: Vec<String>,
}

impl ProcessedValueSet {
    pub fn new(initial_value_set_url: impl Into<String>, binding_parameters: Vec<BindingParameter>) -> Self {
        let initial_value_set_url = initial_value_set_url.into();
        let binding_parameters = if initial_value_set_url.starts_with(CONTAINED_REFERENCE_PREFIX) {
            Vec::new()
        } else {
            binding_parameters
        };
        let is_dynamic = binding_parameters
            .iter()
            .any(|parameter| parameter.fhir_path_expression.is_some());
        let updatable_value_set_url =
            add_binding_parameters_to_url(&initial_value_set_url, &binding_parameters);

        Self {
            initial_value_set_url,
            updatable_value_set_url,
            binding_parameters,
            is_dynamic,
            link_ids: Vec::new(),
        }
    }

    pub fn with_link_id(mut self, link_id: impl Into<String>) -> Self {
        self.link_ids.push(link_id.into());
        self
    }
}

/// Processed value sets keyed by their initial URL.
pub type ProcessedValueSets = IndexMap<String, ProcessedValueSet>;

/// Reads `binding-parameter` extensions from an `_answerValueSet` element.
///
/// Each parameter has a `name` and an `expression` sub-extension; the latter
/// holds either a FHIRPath expression or a literal string.
pub fn read_binding_parameters(element: &Element) -> Vec<BindingParameter> {
    filter_extensions(&element.extension, BINDING_PARAMETER_URL)
        .filter_map(|extension| {
            let name = extension.child("name")?.value_string.clone()?;
            let value = extension.child("expression")?;

            if let Some(expression) = value
                .value_expression
                .as_ref()
                .filter(|expression| expression.is_fhirpath())
                .and_then(|expression| expression.expression.clone())
            {
                return Some(BindingParameter::expression(name, expression));
            }
            value
                .value_string
                .clone()
                .map(|literal| BindingParameter::literal(name, literal))
        })
        .collect()
}

/// Appends every parameter with a non-empty value to `url`.
pub fn add_binding_parameters_to_url(url: &str, parameters: &[BindingParameter]) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    let mut appended = false;
    for parameter in parameters.iter().filter(|p| !p.value.is_empty()) {
        query.append_pair(&parameter.name, &parameter.value);
        appended = true;
    }
    if !appended {
        return url.to_string();
    }

    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{}", query.finish())
}

/// Re-binds expression-driven parameters. Whenever a bound value changes the
/// URL is rebuilt and the answers of every item using the value set are
/// cleared.
pub async fn evaluate_dynamic_value_sets(
    value_sets: &mut ProcessedValueSets,
    context: &EvaluationContext,
    cache: &mut ExpressionCache,
    runtime: &ExpressionRuntime,
) -> (bool, ComputedItemUpdates) {
    let root = json!({});
    let mut is_updated = false;
    let mut computed_new_answers = ComputedItemUpdates::new();

    for (url, value_set) in value_sets.iter_mut().filter(|(_, vs)| vs.is_dynamic) {
        let mut changed = false;

        for parameter in value_set.binding_parameters.iter_mut() {
            let Some(expression) = parameter.fhir_path_expression.as_deref() else {
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
                        value_set = %url,
                        parameter = %parameter.name,
                        expression = %expression,
                        error = %e,
                        "Failed to evaluate binding parameter"
                    );
                    continue;
                }
            };

            match result.first() {
                Some(JsonValue::String(value)) if *value != parameter.value => {
                    parameter.value = value.clone();
                    changed = true;
                }
                None if !parameter.value.is_empty() => {
                    parameter.value.clear();
                    changed = true;
                }
                _ => {}
            }
        }

        if changed {
            value_set.updatable_value_set_url = add_binding_parameters_to_url(
                &value_set.initial_value_set_url,
                &value_set.binding_parameters,
            );
            for link_id in &value_set.link_ids {
                computed_new_answers.insert(link_id.clone(), None);
            }
            tracing::debug!(
                value_set = %url,
                url = %value_set.updatable_value_set_url,
                "Value set binding updated"
            );
            is_updated = true;
        }
    }

    (is_updated, computed_new_answers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EngineConfig;
    use crate::evaluator::{EvaluationOptions, EvaluatorResult, ExpressionEvaluator};
    use crate::types::{Expression, Extension};
    use async_trait::async_trait;
    use std::sync::Arc;

    const CONDITIONS_VS: &str = "https://example.org/ValueSet/conditions";

    /// Returns the context value named by the expression without its `%`.
    struct LookupEvaluator;

    #[async_trait]
    impl ExpressionEvaluator for LookupEvaluator {
        async fn evaluate(
            &self,
            _root: &JsonValue,
            expression: &str,
            context: &EvaluationContext,
            _options: &EvaluationOptions,
        ) -> EvaluatorResult<Vec<JsonValue>> {
            Ok(context
                .get(expression.trim_start_matches('%'))
                .cloned()
                .into_iter()
                .collect())
        }
    }

    fn runtime() -> ExpressionRuntime {
        ExpressionRuntime::new(Arc::new(LookupEvaluator), &EngineConfig::default())
    }

    #[test]
    fn test_url_binding_separator() {
        let params = vec![
            BindingParameter::literal("system", "http://snomed.info/sct"),
            BindingParameter::literal("empty", ""),
        ];
        assert_eq!(
            add_binding_parameters_to_url(CONDITIONS_VS, &params),
            "https://example.org/ValueSet/conditions?system=http%3A%2F%2Fsnomed.info%2Fsct"
        );
        assert_eq!(
            add_binding_parameters_to_url("https://example.org/vs?version=2", &params),
            "https://example.org/vs?version=2&system=http%3A%2F%2Fsnomed.info%2Fsct"
        );
        assert_eq!(add_binding_parameters_to_url(CONDITIONS_VS, &[]), CONDITIONS_VS);
    }

    #[test]
    fn test_contained_value_set_has_no_parameters() {
        let value_set = ProcessedValueSet::new(
            "#local",
            vec![BindingParameter::expression("gender", "%gender")],
        );
        assert!(value_set.binding_parameters.is_empty());
        assert!(!value_set.is_dynamic);
        assert_eq!(value_set.updatable_value_set_url, "#local");
    }

    #[test]
    fn test_read_binding_parameters() {
        let element = Element {
            extension: vec![
                Extension::new(BINDING_PARAMETER_URL)
                    .with_extension(Extension::new("name").with_string("gender"))
                    .with_extension(
                        Extension::new("expression").with_expression(Expression::fhirpath("%gender")),
                    ),
                Extension::new(BINDING_PARAMETER_URL)
                    .with_extension(Extension::new("name").with_string("count"))
                    .with_extension(Extension::new("expression").with_string("10")),
                Extension::new(BINDING_PARAMETER_URL)
                    .with_extension(Extension::new("expression").with_string("nameless")),
            ],
        };

        let parameters = read_binding_parameters(&element);
        assert_eq!(
            parameters,
            vec![
                BindingParameter::expression("gender", "%gender"),
                BindingParameter::literal("count", "10"),
            ]
        );
    }

    #[tokio::test]
    async fn test_parameter_change_rebuilds_url_and_clears_answers() {
        let mut value_sets = ProcessedValueSets::new();
        value_sets.insert(
            CONDITIONS_VS.to_string(),
            ProcessedValueSet::new(
                CONDITIONS_VS,
                vec![BindingParameter::expression("gender", "%gender")],
            )
            .with_link_id("condition"),
        );
        let mut cache = ExpressionCache::default();

        let context = EvaluationContext::new().with_variable("gender", json!("female"));
        let (updated, cleared) =
            evaluate_dynamic_value_sets(&mut value_sets, &context, &mut cache, &runtime()).await;
        assert!(updated);
        assert_eq!(cleared.get("condition"), Some(&None));
        assert_eq!(
            value_sets[CONDITIONS_VS].updatable_value_set_url,
            format!("{CONDITIONS_VS}?gender=female")
        );

        let (updated, cleared) = evaluate_dynamic_value_sets(
            &mut value_sets,
            &EvaluationContext::new(),
            &mut cache,
            &runtime(),
        )
        .await;
        assert!(updated);
        assert!(cleared.contains_key("condition"));
        assert_eq!(value_sets[CONDITIONS_VS].updatable_value_set_url, CONDITIONS_VS);
    }
}
