//! Document model for the parts of FHIR R4 `Questionnaire` and
//! `QuestionnaireResponse` the engine reads.

pub mod extension;
pub mod questionnaire;
pub mod response;
pub mod value;

pub use extension::{
    ANSWER_OPTIONS_TOGGLE_EXPRESSION_URL, BINDING_PARAMETER_URL, CALCULATED_EXPRESSION_URL,
    ENABLE_WHEN_EXPRESSION_URL, Element, Expression, Extension, FHIRPATH_LANGUAGE,
    MAX_DECIMAL_PLACES_URL, TARGET_CONSTRAINT_URL, UNIT_OPTION_URL, VARIABLE_URL,
    X_FHIR_QUERY_LANGUAGE, fhirpath_expression_extension, filter_extensions, find_extension,
};
pub use questionnaire::{
    AnswerOption, EnableBehavior, EnableWhen, EnableWhenOperator, ItemType, Questionnaire,
    QuestionnaireItem,
};
pub use response::{QuestionnaireResponse, ResponseAnswer, ResponseItem};
pub use value::{Coding, FhirValue, Quantity};
