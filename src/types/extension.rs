//! FHIR extensions and the SDC extension URLs the engine understands.

use serde::{Deserialize, Serialize};

use super::value::Coding;

pub const VARIABLE_URL: &str = "http://hl7.org/fhir/StructureDefinition/variable";
pub const CALCULATED_EXPRESSION_URL: &str =
    "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-calculatedExpression";
pub const ENABLE_WHEN_EXPRESSION_URL: &str =
    "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-enableWhenExpression";
pub const ANSWER_OPTIONS_TOGGLE_EXPRESSION_URL: &str =
    "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-answerOptionsToggleExpression";
pub const TARGET_CONSTRAINT_URL: &str = "http://hl7.org/fhir/StructureDefinition/targetConstraint";
pub const BINDING_PARAMETER_URL: &str =
    "http://hl7.org/fhir/tools/StructureDefinition/binding-parameter";
pub const MAX_DECIMAL_PLACES_URL: &str = "http://hl7.org/fhir/StructureDefinition/maxDecimalPlaces";
pub const UNIT_OPTION_URL: &str =
    "http://hl7.org/fhir/StructureDefinition/questionnaire-unitOption";

pub const FHIRPATH_LANGUAGE: &str = "text/fhirpath";
pub const X_FHIR_QUERY_LANGUAGE: &str = "application/x-fhir-query";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expression {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Expression {
    pub fn fhirpath(expression: impl Into<String>) -> Self {
        Self {
            language: Some(FHIRPATH_LANGUAGE.to_string()),
            expression: Some(expression.into()),
            ..Default::default()
        }
    }

    pub fn x_fhir_query(query: impl Into<String>) -> Self {
        Self {
            language: Some(X_FHIR_QUERY_LANGUAGE.to_string()),
            expression: Some(query.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_fhirpath(&self) -> bool {
        self.language.as_deref() == Some(FHIRPATH_LANGUAGE)
    }

    pub fn is_x_fhir_query(&self) -> bool {
        self.language.as_deref() == Some(X_FHIR_QUERY_LANGUAGE)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_expression: Option<Expression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_integer: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_decimal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_boolean: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_coding: Option<Coding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
}

impl Extension {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_expression(mut self, expression: Expression) -> Self {
        self.value_expression = Some(expression);
        self
    }

    pub fn with_string(mut self, value: impl Into<String>) -> Self {
        self.value_string = Some(value.into());
        self
    }

    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.extension.push(extension);
        self
    }

    /// First nested extension with the given url.
    pub fn child(&self, url: &str) -> Option<&Extension> {
        self.extension.iter().find(|ext| ext.url == url)
    }

    /// String-ish payload regardless of which primitive slot carries it.
    pub fn string_value(&self) -> Option<&str> {
        self.value_string
            .as_deref()
            .or(self.value_code.as_deref())
            .or(self.value_id.as_deref())
    }
}

/// Primitive element extensions, e.g. `_text` or `_answerValueSet`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Element {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
}

pub fn find_extension<'a>(extensions: &'a [Extension], url: &str) -> Option<&'a Extension> {
    extensions.iter().find(|ext| ext.url == url)
}

pub fn filter_extensions<'a>(
    extensions: &'a [Extension],
    url: &'a str,
) -> impl Iterator<Item = &'a Extension> + 'a {
    extensions.iter().filter(move |ext| ext.url == url)
}

/// The FHIRPath expression carried by an extension with the given url, if any.
pub fn fhirpath_expression_extension<'a>(
    extensions: &'a [Extension],
    url: &str,
) -> Option<&'a Expression> {
    extensions
        .iter()
        .filter(|ext| ext.url == url)
        .filter_map(|ext| ext.value_expression.as_ref())
        .find(|expression| expression.is_fhirpath() && expression.expression.is_some())
}
