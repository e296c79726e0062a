use indexmap::IndexMap;

use super::{CalculatedExpressions, CalculatedSource, CalculatedValue, value_to_answer};
use crate::model::ItemTypeInfo;
use crate::types::{
    ItemType, Questionnaire, QuestionnaireItem, QuestionnaireResponse, ResponseAnswer, ResponseItem,
};

/// What the response should hold for an item with an `item`-sourced value.
#[derive(Debug, Clone, PartialEq)]
enum Projection {
    Answer(ResponseAnswer),
    Clear,
}

/// Writes `item`-sourced calculated values into the response.
///
/// Only values that differ from the last applied one are written, so an
/// answer the user edited is kept until its calculation changes.
///
/// Items are rebuilt in questionnaire order. Groups (repeating or not) that
/// hold a calculated leaf anywhere beneath them are created when absent, and
/// every instance of a repeated group receives the value. Response items the
/// questionnaire does not define are kept after the defined ones.
pub fn apply_calculated_expression_values_to_response(
    questionnaire: &Questionnaire,
    item_types: &IndexMap<String, ItemTypeInfo>,
    response: &QuestionnaireResponse,
    expressions: &CalculatedExpressions,
) -> QuestionnaireResponse {
    let projections = collect_projections(item_types, expressions);
    if projections.is_empty() {
        return response.clone();
    }

    let mut updated = response.clone();
    updated.item = rebuild_items(&questionnaire.item, response.item.clone(), &projections);
    updated
}

fn collect_projections(
    item_types: &IndexMap<String, ItemTypeInfo>,
    expressions: &CalculatedExpressions,
) -> IndexMap<String, Projection> {
    let mut projections = IndexMap::new();

    for (link_id, item_expressions) in expressions {
        let Some(calculated) = item_expressions
            .iter()
            .find(|calculated| calculated.from == CalculatedSource::Item)
        else {
            continue;
        };
        if calculated.value == calculated.last_applied {
            continue;
        }

        let projection = match &calculated.value {
            CalculatedValue::NotEvaluated => continue,
            // Only a value this engine wrote earlier is cleared.
            CalculatedValue::Empty if calculated.last_applied.as_value().is_none() => continue,
            CalculatedValue::Empty => Projection::Clear,
            CalculatedValue::Value(value) => {
                let Some(info) = item_types.get(link_id) else {
                    continue;
                };
                match value_to_answer(info, value) {
                    Some(answer) => Projection::Answer(ResponseAnswer::new(answer)),
                    None => continue,
                }
            }
        };
        projections.insert(link_id.clone(), projection);
    }

    projections
}

/// Records the current `item` values as written into the response.
pub fn mark_calculated_values_applied(expressions: &mut CalculatedExpressions) {
    for calculated in expressions.values_mut().flatten() {
        if calculated.from == CalculatedSource::Item {
            calculated.last_applied = calculated.value.clone();
        }
    }
}

fn subtree_has_projection(item: &QuestionnaireItem, projections: &IndexMap<String, Projection>) -> bool {
    matches!(projections.get(&item.link_id), Some(Projection::Answer(_)))
        || item
            .item
            .iter()
            .any(|child| subtree_has_projection(child, projections))
}

fn rebuild_items(
    definitions: &[QuestionnaireItem],
    existing: Vec<ResponseItem>,
    projections: &IndexMap<String, Projection>,
) -> Vec<ResponseItem> {
    let mut pool = existing;
    let mut rebuilt = Vec::with_capacity(pool.len());

    for definition in definitions {
        let (mut instances, rest): (Vec<_>, Vec<_>) = pool
            .into_iter()
            .partition(|item| item.link_id == definition.link_id);
        pool = rest;

        let needs_instance = matches!(
            projections.get(&definition.link_id),
            Some(Projection::Answer(_))
        ) || (definition.item_type == ItemType::Group
            && subtree_has_projection(definition, projections));
        if instances.is_empty() && needs_instance {
            let mut created = ResponseItem::new(definition.link_id.clone());
            created.text = definition.text.clone();
            instances.push(created);
        }

        for instance in instances.iter_mut() {
            project_item(definition, instance, projections);
        }

        rebuilt.extend(
            instances
                .into_iter()
                .filter(|item| !is_hollow(definition, item, projections)),
        );
    }

    rebuilt.extend(pool);
    rebuilt
}

fn project_item(
    definition: &QuestionnaireItem,
    instance: &mut ResponseItem,
    projections: &IndexMap<String, Projection>,
) {
    match projections.get(&definition.link_id) {
        Some(Projection::Answer(answer)) => {
            let nested = instance
                .answer
                .first()
                .map(|existing| existing.item.clone())
                .unwrap_or_default();
            let mut answer = answer.clone();
            answer.item = nested;
            instance.answer = vec![answer];
        }
        Some(Projection::Clear) => instance.answer.clear(),
        None => {}
    }

    if definition.item.is_empty() {
        return;
    }

    if definition.item_type == ItemType::Group {
        let children = std::mem::take(&mut instance.item);
        instance.item = rebuild_items(&definition.item, children, projections);
    } else {
        for answer in instance.answer.iter_mut() {
            let children = std::mem::take(&mut answer.item);
            answer.item = rebuild_items(&definition.item, children, projections);
        }
    }
}

/// An item whose calculated answer was cleared and that holds nothing else.
fn is_hollow(
    definition: &QuestionnaireItem,
    item: &ResponseItem,
    projections: &IndexMap<String, Projection>,
) -> bool {
    item.answer.is_empty()
        && item.item.is_empty()
        && matches!(projections.get(&definition.link_id), Some(Projection::Clear))
}
