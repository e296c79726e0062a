//! # OctoFHIR SDC Engine
//!
//! A reactive expression engine for FHIR Structured Data Capture
//! questionnaires. It keeps a `QuestionnaireResponse` consistent with the
//! declarations attached to its `Questionnaire`.
//!
//! ## Features
//!
//! - **enableWhen**: declarative conditions and FHIRPath expressions, including
//!   items inside repeating groups
//! - **Calculated values**: chained `calculatedExpression` recomputation to a
//!   fixpoint with a bounded number of passes
//! - **Target constraints**: form-level validation rules mapped to item locations
//! - **Answer option toggles and dynamic value sets**: selectable options and
//!   parameterised expansion URLs that follow other answers
//!
//! FHIRPath itself is not implemented here. Plug any evaluator in through
//! [`ExpressionEvaluator`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use octofhir_sdc_engine::*;
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! struct MyEvaluator;
//!
//! #[async_trait::async_trait]
//! impl ExpressionEvaluator for MyEvaluator {
//!     async fn evaluate(
//!         &self,
//!         _root: &Value,
//!         _expression: &str,
//!         _context: &EvaluationContext,
//!         _options: &EvaluationOptions,
//!     ) -> EvaluatorResult<Vec<Value>> {
//!         Ok(vec![])
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let questionnaire: Questionnaire = serde_json::from_str(r#"{"resourceType": "Questionnaire"}"#)?;
//! let mut session = FormSession::new(questionnaire, Arc::new(MyEvaluator), EngineConfig::default())?;
//!
//! session.initialise(QuestionnaireResponse::new()).await;
//! let update = session.update_response(QuestionnaireResponse::new()).await;
//! println!("changed: {}", update.is_updated());
//! # Ok(())
//! # }
//! ```

pub mod answer_options_toggle;
pub mod calculated;
pub mod computed_updates;
pub mod context;
pub mod core;
pub mod dynamic_value_set;
pub mod enable_when;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod orchestrator;
pub mod session;
pub mod storage;
pub mod target_constraint;
pub mod types;

pub use answer_options_toggle::{
    AnswerOptionsToggleExpression, AnswerOptionsToggleExpressions,
    evaluate_answer_options_toggle_expressions,
};
pub use calculated::{
    CalculatedExpression, CalculatedExpressions, CalculatedSource, CalculatedValue,
    CalculationOutcome, apply_calculated_expression_values_to_response,
    evaluate_calculated_expressions, evaluate_initial_calculated_expressions,
    mark_calculated_values_applied, process_calculated_expressions,
};
pub use computed_updates::{ComputedItemUpdates, apply_computed_updates};
pub use context::{EvaluationContext, build_context};
pub use crate::core::{CacheConfig, EngineConfig};
pub use dynamic_value_set::{
    BindingParameter, ProcessedValueSet, ProcessedValueSets, add_binding_parameters_to_url,
    evaluate_dynamic_value_sets,
};
pub use enable_when::{
    EnableWhenExpressions, EnableWhenItems, LinkedQuestionsMap, RepeatMutation,
    evaluate_enable_when_expressions,
};
pub use error::Result;
pub use error::EngineError;
pub use evaluator::{
    EvaluationOptions, EvaluatorError, EvaluatorResult, ExpressionEvaluator, ExpressionRuntime,
};
pub use model::{ItemTypeInfo, QuestionnaireModel, Variables, XFhirQueryVariable};
pub use orchestrator::{OtherExpressionsOutcome, evaluate_other_expressions};
pub use session::{FormSession, SessionUpdate};
pub use storage::{ExpressionCache, ResponseItemIndex};
pub use target_constraint::{
    ConstraintSeverity, TargetConstraint, TargetConstraints, evaluate_target_constraints,
    read_target_constraint_location_link_ids,
};
pub use types::*;
