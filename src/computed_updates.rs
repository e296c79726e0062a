use indexmap::IndexMap;

use crate::types::{QuestionnaireResponse, ResponseAnswer, ResponseItem};

/// linkId to replacement answers; `None` clears the item's answers because the
/// basis they were chosen from changed.
pub type ComputedItemUpdates = IndexMap<String, Option<Vec<ResponseAnswer>>>;

/// Splices computed updates into every instance of the named items.
pub fn apply_computed_updates(
    response: &QuestionnaireResponse,
    updates: &ComputedItemUpdates,
) -> QuestionnaireResponse {
    if updates.is_empty() {
        return response.clone();
    }

    let mut updated = response.clone();
    for item in updated.item.iter_mut() {
        apply_recursive(item, updates);
    }
    updated
}

fn apply_recursive(item: &mut ResponseItem, updates: &ComputedItemUpdates) {
    if let Some(update) = updates.get(&item.link_id) {
        match update {
            Some(answers) => item.answer = answers.clone(),
            None => item.answer.clear(),
        }
    }

    for child in item.item.iter_mut() {
        apply_recursive(child, updates);
    }
    for answer in item.answer.iter_mut() {
        for child in answer.item.iter_mut() {
            apply_recursive(child, updates);
        }
    }
}
