use super::{ItemTypeInfo, QUESTIONNAIRE_LEVEL, QuestionnaireModel, XFhirQueryVariable};
use crate::answer_options_toggle::AnswerOptionsToggleExpression;
use crate::calculated::{CalculatedExpression, CalculatedSource};
use crate::dynamic_value_set::{ProcessedValueSet, read_binding_parameters};
use crate::enable_when::{
    EnableWhenRepeatExpression, EnableWhenRepeatItem, EnableWhenSingleExpression,
    EnableWhenSingleItem,
};
use crate::target_constraint::{ConstraintSeverity, TargetConstraint};
use crate::types::{
    ANSWER_OPTIONS_TOGGLE_EXPRESSION_URL, CALCULATED_EXPRESSION_URL, ENABLE_WHEN_EXPRESSION_URL,
    Extension, FhirValue, Questionnaire, QuestionnaireItem, TARGET_CONSTRAINT_URL, VARIABLE_URL,
    fhirpath_expression_extension, filter_extensions,
};

pub(super) fn extract(questionnaire: &Questionnaire) -> QuestionnaireModel {
    let mut model = QuestionnaireModel::default();

    for item in &questionnaire.item {
        extract_item(&mut model, item, None);
    }

    read_variables(&mut model, QUESTIONNAIRE_LEVEL, &questionnaire.extension);
    read_target_constraints(&mut model, None, &questionnaire.extension);

    model
}

/// Children are visited before their parent, so a parent's item variables
/// are evaluated after its descendants'.
fn extract_item(model: &mut QuestionnaireModel, item: &QuestionnaireItem, repeat_parent: Option<&str>) {
    let child_parent = if item.is_repeating_group() {
        Some(item.link_id.as_str())
    } else {
        repeat_parent
    };
    for child in &item.item {
        extract_item(model, child, child_parent);
    }

    let link_id = item.link_id.as_str();
    model
        .item_types
        .insert(link_id.to_string(), ItemTypeInfo::from(item));

    read_variables(model, link_id, &item.extension);
    read_enable_when(model, item, repeat_parent);
    read_calculated_expressions(model, item);
    read_target_constraints(model, Some(link_id), &item.extension);
    read_answer_options_toggles(model, item);
    read_value_set(model, item);
}

fn read_variables(model: &mut QuestionnaireModel, scope: &str, extensions: &[Extension]) {
    for expression in filter_extensions(extensions, VARIABLE_URL)
        .filter_map(|extension| extension.value_expression.as_ref())
    {
        let Some(name) = expression.name.clone() else {
            continue;
        };

        if expression.is_x_fhir_query() {
            model
                .variables
                .x_fhir_query_variables
                .insert(name, XFhirQueryVariable::new(expression.clone()));
        } else if expression.is_fhirpath() && expression.expression.is_some() {
            model
                .variables
                .fhir_path_variables
                .entry(scope.to_string())
                .or_default()
                .push(expression.clone());
        }
    }
}

fn read_enable_when(model: &mut QuestionnaireModel, item: &QuestionnaireItem, repeat_parent: Option<&str>) {
    let link_id = item.link_id.clone();

    if !item.enable_when.is_empty() {
        match repeat_parent {
            Some(parent) => {
                model.enable_when_items.repeat_items.insert(
                    link_id.clone(),
                    EnableWhenRepeatItem::new(parent, &item.enable_when, item.enable_behavior),
                );
            }
            None => {
                model.enable_when_items.single_items.insert(
                    link_id.clone(),
                    EnableWhenSingleItem::new(&item.enable_when, item.enable_behavior),
                );
            }
        }
    }

    let Some(expression) = fhirpath_expression_extension(&item.extension, ENABLE_WHEN_EXPRESSION_URL)
        .and_then(|expression| expression.expression.clone())
    else {
        return;
    };

    match repeat_parent {
        Some(parent) => {
            model.enable_when_expressions.repeat_expressions.insert(
                link_id,
                EnableWhenRepeatExpression {
                    expression,
                    parent_link_id: parent.to_string(),
                    enabled_indexes: Vec::new(),
                },
            );
        }
        None => {
            model.enable_when_expressions.single_expressions.insert(
                link_id,
                EnableWhenSingleExpression {
                    expression,
                    is_enabled: false,
                },
            );
        }
    }
}

fn read_calculated_expressions(model: &mut QuestionnaireModel, item: &QuestionnaireItem) {
    let sources = [
        (Some(item.extension.as_slice()), CalculatedSource::Item),
        (
            item.text_element.as_ref().map(|e| e.extension.as_slice()),
            CalculatedSource::ItemText,
        ),
        (
            item.answer_value_set_element
                .as_ref()
                .map(|e| e.extension.as_slice()),
            CalculatedSource::ItemAnswerValueSet,
        ),
    ];

    let expressions: Vec<CalculatedExpression> = sources
        .into_iter()
        .filter_map(|(extensions, from)| {
            let expression = fhirpath_expression_extension(extensions?, CALCULATED_EXPRESSION_URL)?;
            Some(CalculatedExpression::new(expression.expression.clone()?, from))
        })
        .collect();

    if !expressions.is_empty() {
        model
            .calculated_expressions
            .insert(item.link_id.clone(), expressions);
    }
}

fn read_target_constraints(model: &mut QuestionnaireModel, link_id: Option<&str>, extensions: &[Extension]) {
    for extension in filter_extensions(extensions, TARGET_CONSTRAINT_URL) {
        let Some(key) = extension.child("key").and_then(Extension::string_value) else {
            continue;
        };

        let severity = match extension.child("severity").and_then(Extension::string_value) {
            Some("warning") => ConstraintSeverity::Warning,
            _ => ConstraintSeverity::Error,
        };

        let constraint = TargetConstraint {
            key: key.to_string(),
            severity,
            expression: extension
                .child("expression")
                .and_then(|child| child.value_expression.as_ref())
                .and_then(|expression| expression.expression.clone()),
            human: extension
                .child("human")
                .and_then(Extension::string_value)
                .unwrap_or_default()
                .to_string(),
            location: extension
                .child("location")
                .and_then(Extension::string_value)
                .map(str::to_string),
            link_id: link_id.map(str::to_string),
            is_invalid: false,
        };

        model
            .target_constraints
            .insert(constraint.key.clone(), constraint);
    }
}

fn read_answer_options_toggles(model: &mut QuestionnaireModel, item: &QuestionnaireItem) {
    let toggles: Vec<AnswerOptionsToggleExpression> =
        filter_extensions(&item.extension, ANSWER_OPTIONS_TOGGLE_EXPRESSION_URL)
            .filter_map(|extension| {
                let expression = extension
                    .child("expression")?
                    .value_expression
                    .as_ref()?
                    .expression
                    .clone()?;
                let options = extension
                    .extension
                    .iter()
                    .filter(|child| child.url == "option")
                    .filter_map(option_value)
                    .collect();
                Some(AnswerOptionsToggleExpression::new(options, expression))
            })
            .collect();

    if !toggles.is_empty() {
        model
            .answer_options_toggle_expressions
            .insert(item.link_id.clone(), toggles);
    }
}

fn option_value(extension: &Extension) -> Option<FhirValue> {
    if let Some(coding) = &extension.value_coding {
        return Some(FhirValue::Coding(coding.clone()));
    }
    if let Some(value) = &extension.value_string {
        return Some(FhirValue::String(value.clone()));
    }
    extension.value_integer.map(FhirValue::Integer)
}

fn read_value_set(model: &mut QuestionnaireModel, item: &QuestionnaireItem) {
    let Some(url) = item.answer_value_set.as_deref() else {
        return;
    };

    if let Some(existing) = model.processed_value_sets.get_mut(url) {
        existing.link_ids.push(item.link_id.clone());
        return;
    }

    let parameters = item
        .answer_value_set_element
        .as_ref()
        .map(read_binding_parameters)
        .unwrap_or_default();
    model.processed_value_sets.insert(
        url.to_string(),
        ProcessedValueSet::new(url, parameters).with_link_id(item.link_id.clone()),
    );
}
