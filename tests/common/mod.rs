use async_trait::async_trait;
use futures::future::BoxFuture;
use octofhir_sdc_engine::*;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;

type SyncScript =
    Box<dyn Fn(&JsonValue, &EvaluationContext) -> EvaluatorResult<Vec<JsonValue>> + Send + Sync>;
type AsyncScript =
    Box<dyn Fn(&EvaluationContext) -> BoxFuture<'static, EvaluatorResult<Vec<JsonValue>>> + Send + Sync>;

enum Script {
    Sync(SyncScript),
    Async(AsyncScript),
}

/// Evaluator driven by per-expression closures. Unscripted expressions fail
/// with a syntax error, which the engines log and skip.
#[derive(Default)]
pub struct ScriptedEvaluator {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script<F>(mut self, expression: &str, script: F) -> Self
    where
        F: Fn(&JsonValue, &EvaluationContext) -> EvaluatorResult<Vec<JsonValue>> + Send + Sync + 'static,
    {
        self.scripts
            .insert(expression.to_string(), Script::Sync(Box::new(script)));
        self
    }

    /// A script standing in for a terminology lookup that completes later.
    pub fn terminology<F>(mut self, expression: &str, script: F) -> Self
    where
        F: Fn(&EvaluationContext) -> BoxFuture<'static, EvaluatorResult<Vec<JsonValue>>>
            + Send
            + Sync
            + 'static,
    {
        self.scripts
            .insert(expression.to_string(), Script::Async(Box::new(script)));
        self
    }

    /// Shorthand for a variable that reads the first answer of `link_id`
    /// from the evaluation root.
    pub fn answer_variable(self, expression: &str, link_id: &'static str) -> Self {
        self.script(expression, move |root, _| {
            Ok(find_answer(root, link_id).into_iter().collect())
        })
    }

    /// Shorthand for an expression that passes a context variable through.
    pub fn passthrough(self, expression: &str, variable: &'static str) -> Self {
        self.script(expression, move |_, context| Ok(context_values(context, variable)))
    }

    pub fn call_count(&self, expression: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|c| c.as_str() == expression).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ExpressionEvaluator for ScriptedEvaluator {
    async fn evaluate(
        &self,
        root: &JsonValue,
        expression: &str,
        context: &EvaluationContext,
        _options: &EvaluationOptions,
    ) -> EvaluatorResult<Vec<JsonValue>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(expression.to_string());
        }

        match self.scripts.get(expression) {
            Some(Script::Sync(script)) => script(root, context),
            Some(Script::Async(script)) => script(context).await,
            None => Err(EvaluatorError::Syntax(format!("unscripted expression: {expression}"))),
        }
    }
}

/// First answer value of the first item with `link_id`, searching items and
/// nested answer items.
#[allow(dead_code)]
pub fn find_answer(node: &JsonValue, link_id: &str) -> Option<JsonValue> {
    let items = node.get("item").and_then(JsonValue::as_array)?;
    for item in items {
        if item.get("linkId").and_then(JsonValue::as_str) == Some(link_id) {
            let answer = item.get("answer").and_then(|a| a.get(0))?;
            return answer
                .as_object()?
                .iter()
                .find(|(key, _)| key.starts_with("value"))
                .map(|(_, value)| value.clone());
        }
        if let Some(found) = find_answer(item, link_id) {
            return Some(found);
        }
        if let Some(answers) = item.get("answer").and_then(JsonValue::as_array) {
            for answer in answers {
                if let Some(found) = find_answer(answer, link_id) {
                    return Some(found);
                }
            }
        }
    }
    None
}

/// Values of a context variable as a list, whether stored as an array or not.
#[allow(dead_code)]
pub fn context_values(context: &EvaluationContext, name: &str) -> Vec<JsonValue> {
    match context.get(name) {
        Some(JsonValue::Array(values)) => values.clone(),
        Some(value) => vec![value.clone()],
        None => Vec::new(),
    }
}

#[allow(dead_code)]
pub fn context_number(context: &EvaluationContext, name: &str) -> Option<f64> {
    context_values(context, name).first().and_then(JsonValue::as_f64)
}

#[allow(dead_code)]
pub fn variable(name: &str, expression: &str) -> Extension {
    Extension::new(VARIABLE_URL).with_expression(Expression::fhirpath(expression).with_name(name))
}

#[allow(dead_code)]
pub fn calculated(expression: &str) -> Extension {
    Extension::new(CALCULATED_EXPRESSION_URL).with_expression(Expression::fhirpath(expression))
}

#[allow(dead_code)]
pub fn enable_when_expression(expression: &str) -> Extension {
    Extension::new(ENABLE_WHEN_EXPRESSION_URL).with_expression(Expression::fhirpath(expression))
}

#[allow(dead_code)]
pub fn target_constraint(key: &str, expression: &str, human: &str, location: Option<&str>) -> Extension {
    let mut extension = Extension::new(TARGET_CONSTRAINT_URL)
        .with_extension(Extension {
            value_id: Some(key.to_string()),
            ..Extension::new("key")
        })
        .with_extension(Extension {
            value_code: Some("error".to_string()),
            ..Extension::new("severity")
        })
        .with_extension(Extension::new("expression").with_expression(Expression::fhirpath(expression)))
        .with_extension(Extension::new("human").with_string(human));
    if let Some(location) = location {
        extension = extension.with_extension(Extension::new("location").with_string(location));
    }
    extension
}

#[allow(dead_code)]
pub fn answer_options_toggle(options: &[Coding], expression: &str) -> Extension {
    let mut extension = Extension::new(ANSWER_OPTIONS_TOGGLE_EXPRESSION_URL);
    for option in options {
        extension = extension.with_extension(Extension {
            value_coding: Some(option.clone()),
            ..Extension::new("option")
        });
    }
    extension.with_extension(Extension::new("expression").with_expression(Expression::fhirpath(expression)))
}

#[allow(dead_code)]
pub fn binding_parameter(name: &str, expression: &str) -> Extension {
    Extension::new(BINDING_PARAMETER_URL)
        .with_extension(Extension::new("name").with_string(name))
        .with_extension(Extension::new("expression").with_expression(Expression::fhirpath(expression)))
}

/// Keeps one decimal place, as FHIRPath `round(1)` does.
#[allow(dead_code)]
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[allow(dead_code)]
pub fn bmi_response(weight: f64, height: f64) -> QuestionnaireResponse {
    QuestionnaireResponse::new()
        .with_item(ResponseItem::new("weight").with_answer(FhirValue::Decimal(weight)))
        .with_item(ResponseItem::new("height").with_answer(FhirValue::Decimal(height)))
}
