//! Seam to the external FHIRPath evaluator.
//!
//! The engine never parses or executes FHIRPath itself. Callers plug in any
//! implementation of [`ExpressionEvaluator`]; the engine only decides when to
//! call it, which root node to pass, and what to do with the result.
//!
//! Evaluation is a single async operation. Whether a given expression can
//! suspend (a terminology round trip) is declared up front through
//! [`ExpressionEvaluator::is_synchronous`], and only results of expressions that
//! can suspend are memoized in the [`ExpressionCache`].

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;

use crate::context::EvaluationContext;
use crate::core::EngineConfig;
use crate::storage::ExpressionCache;

/// FHIRPath functions and variables that require a terminology server.
pub const TERMINOLOGY_FUNCTIONS: &[&str] = &[
    "memberOf(",
    "%terminologies",
    "expand(",
    "lookup(",
    "validateVS(",
    "validateCS(",
    "subsumes(",
    "translate(",
];

#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Unknown variable: %{0}")]
    UnknownVariable(String),

    #[error("Terminology error: {0}")]
    Terminology(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type EvaluatorResult<T> = Result<T, EvaluatorError>;

/// Per-call options forwarded to the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOptions {
    /// Type path of the root node, e.g. `QuestionnaireResponse.item`.
    pub base: Option<String>,
    /// When false the evaluator must not wait on terminology calls.
    pub asynchronous: bool,
    pub terminology_url: String,
}

#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        root: &JsonValue,
        expression: &str,
        context: &EvaluationContext,
        options: &EvaluationOptions,
    ) -> EvaluatorResult<Vec<JsonValue>>;

    /// Whether evaluating `expression` completes without a suspension point.
    fn is_synchronous(&self, expression: &str) -> bool {
        !references_terminology(expression)
    }
}

pub fn references_terminology(expression: &str) -> bool {
    TERMINOLOGY_FUNCTIONS
        .iter()
        .any(|function| expression.contains(function))
}

/// Result of an evaluation routed through the [`ExpressionCache`].
#[derive(Debug, Clone, PartialEq)]
pub enum CachedEvaluation {
    /// The expression already has a memoized result; the caller keeps its state.
    Skipped,
    Evaluated(Vec<JsonValue>),
}

/// Evaluator handle bundled with the per-engine call options.
#[derive(Clone)]
pub struct ExpressionRuntime {
    evaluator: Arc<dyn ExpressionEvaluator>,
    terminology_url: String,
}

impl std::fmt::Debug for ExpressionRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionRuntime")
            .field("terminology_url", &self.terminology_url)
            .finish_non_exhaustive()
    }
}

impl ExpressionRuntime {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>, config: &EngineConfig) -> Self {
        Self {
            evaluator,
            terminology_url: config.terminology_server_url.clone(),
        }
    }

    pub fn evaluator(&self) -> &Arc<dyn ExpressionEvaluator> {
        &self.evaluator
    }

    pub fn options(&self, base: Option<&str>) -> EvaluationOptions {
        EvaluationOptions {
            base: base.map(str::to_string),
            asynchronous: true,
            terminology_url: self.terminology_url.clone(),
        }
    }

    pub async fn evaluate(
        &self,
        root: &JsonValue,
        expression: &str,
        context: &EvaluationContext,
        base: Option<&str>,
    ) -> EvaluatorResult<Vec<JsonValue>> {
        self.evaluator
            .evaluate(root, expression, context, &self.options(base))
            .await
    }

    /// Evaluates without awaiting terminology calls, used for expressions over
    /// the static questionnaire definition.
    pub async fn evaluate_static(
        &self,
        root: &JsonValue,
        expression: &str,
        context: &EvaluationContext,
    ) -> EvaluatorResult<Vec<JsonValue>> {
        let options = EvaluationOptions {
            asynchronous: false,
            ..self.options(None)
        };
        self.evaluator
            .evaluate(root, expression, context, &options)
            .await
    }

    /// Engine-state evaluation: an expression with a memoized result is not
    /// re-run, a fresh result of a terminology-backed expression is memoized.
    pub async fn evaluate_or_skip_cached(
        &self,
        cache: &mut ExpressionCache,
        root: &JsonValue,
        expression: &str,
        context: &EvaluationContext,
    ) -> EvaluatorResult<CachedEvaluation> {
        if cache.is_cached(expression) {
            return Ok(CachedEvaluation::Skipped);
        }

        let result = self.evaluate(root, expression, context, None).await?;
        if !self.evaluator.is_synchronous(expression) {
            cache.store(expression, result.clone());
        }
        Ok(CachedEvaluation::Evaluated(result))
    }

    /// Variable evaluation: a memoized result is reused in place of re-running
    /// the expression, since the context needs a value either way.
    pub async fn evaluate_reusing_cached(
        &self,
        cache: &mut ExpressionCache,
        root: &JsonValue,
        expression: &str,
        context: &EvaluationContext,
        base: Option<&str>,
    ) -> EvaluatorResult<Vec<JsonValue>> {
        if cache.is_cached(expression) {
            if let Some(result) = cache.get(expression) {
                return Ok(result.clone());
            }
        }

        let result = self.evaluate(root, expression, context, base).await?;
        if !self.evaluator.is_synchronous(expression) {
            cache.store(expression, result.clone());
        }
        Ok(result)
    }
}
