//! Conditional visibility of questionnaire items.
//!
//! Declarative `enableWhen` conditions are tracked per item together with the
//! latest observed answer of every linked question. Items inside a repeating
//! group keep one answer slot and one enabled flag per parent instance.

pub mod compare;
pub mod expressions;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::storage::ResponseItemIndex;
use crate::types::{EnableBehavior, EnableWhen, FhirValue, QuestionnaireResponse, ResponseItem};

pub use compare::{answer_satisfies, condition_satisfied};
pub use expressions::{
    EnableWhenExpressions, EnableWhenRepeatExpression, EnableWhenSingleExpression,
    evaluate_enable_when_expressions, insert_repeat_index,
};

/// Question linkId to the linkIds of the conditional items that reference it.
pub type LinkedQuestionsMap = IndexMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableWhenLinkedItem {
    pub enable_when: EnableWhen,
    #[serde(default)]
    pub answer: Vec<FhirValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableWhenSingleItem {
    pub linked: Vec<EnableWhenLinkedItem>,
    pub enable_behavior: Option<EnableBehavior>,
    pub is_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableWhenRepeatLinkedItem {
    pub enable_when: EnableWhen,
    /// Answer per parent repeat instance.
    #[serde(default)]
    pub answers: Vec<Option<FhirValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableWhenRepeatItem {
    pub parent_link_id: String,
    pub linked: Vec<EnableWhenRepeatLinkedItem>,
    pub enable_behavior: Option<EnableBehavior>,
    pub enabled_indexes: Vec<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableWhenItems {
    pub single_items: IndexMap<String, EnableWhenSingleItem>,
    pub repeat_items: IndexMap<String, EnableWhenRepeatItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMutation {
    Add,
    Remove,
}

impl EnableWhenSingleItem {
    pub fn new(conditions: &[EnableWhen], enable_behavior: Option<EnableBehavior>) -> Self {
        Self {
            linked: conditions
                .iter()
                .map(|enable_when| EnableWhenLinkedItem {
                    enable_when: enable_when.clone(),
                    answer: Vec::new(),
                })
                .collect(),
            enable_behavior,
            is_enabled: false,
        }
    }

    pub fn check_enabled(&self) -> bool {
        let results: Vec<bool> = self
            .linked
            .iter()
            .map(|linked| condition_satisfied(&linked.enable_when, &linked.answer))
            .collect();
        evaluate_combination(&results, self.enable_behavior)
    }
}

impl EnableWhenRepeatItem {
    pub fn new(
        parent_link_id: impl Into<String>,
        conditions: &[EnableWhen],
        enable_behavior: Option<EnableBehavior>,
    ) -> Self {
        Self {
            parent_link_id: parent_link_id.into(),
            linked: conditions
                .iter()
                .map(|enable_when| EnableWhenRepeatLinkedItem {
                    enable_when: enable_when.clone(),
                    answers: Vec::new(),
                })
                .collect(),
            enable_behavior,
            enabled_indexes: Vec::new(),
        }
    }

    pub fn check_enabled(&self, instance: usize) -> bool {
        let results: Vec<bool> = self
            .linked
            .iter()
            .map(|linked| {
                let answer = linked.answers.get(instance).cloned().flatten();
                condition_satisfied(&linked.enable_when, answer.as_slice())
            })
            .collect();
        evaluate_combination(&results, self.enable_behavior)
    }

    pub fn is_enabled(&self, instance: usize) -> bool {
        self.enabled_indexes.get(instance).copied().unwrap_or(false)
    }

    fn set_enabled(&mut self, instance: usize, enabled: bool) -> bool {
        if self.enabled_indexes.len() <= instance {
            self.enabled_indexes.resize(instance + 1, false);
        }
        let changed = self.enabled_indexes[instance] != enabled;
        self.enabled_indexes[instance] = enabled;
        changed
    }
}

impl EnableWhenItems {
    pub fn is_empty(&self) -> bool {
        self.single_items.is_empty() && self.repeat_items.is_empty()
    }

    /// Enabled state of `link_id`; items without conditions are always enabled.
    pub fn is_enabled(&self, link_id: &str, instance: Option<usize>) -> bool {
        if let Some(item) = self.single_items.get(link_id) {
            return item.is_enabled;
        }
        match (self.repeat_items.get(link_id), instance) {
            (Some(item), Some(instance)) => item.is_enabled(instance),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// `Any` is a logical OR, `All` (the default) a logical AND. No results means
/// not enabled.
pub fn evaluate_combination(results: &[bool], behavior: Option<EnableBehavior>) -> bool {
    if results.is_empty() {
        return false;
    }
    match behavior.unwrap_or_default() {
        EnableBehavior::Any => results.iter().any(|enabled| *enabled),
        EnableBehavior::All => results.iter().all(|enabled| *enabled),
    }
}

pub fn create_linked_questions_map(items: &EnableWhenItems) -> LinkedQuestionsMap {
    let mut linked_questions = LinkedQuestionsMap::new();

    let single = items
        .single_items
        .iter()
        .flat_map(|(link_id, item)| item.linked.iter().map(move |l| (link_id, &l.enable_when)));
    let repeat = items
        .repeat_items
        .iter()
        .flat_map(|(link_id, item)| item.linked.iter().map(move |l| (link_id, &l.enable_when)));

    for (link_id, enable_when) in single.chain(repeat) {
        let dependents = linked_questions
            .entry(enable_when.question.clone())
            .or_default();
        if !dependents.contains(link_id) {
            dependents.push(link_id.clone());
        }
    }

    linked_questions
}

/// Records `new_answer` as the current answer of `question_id` in every
/// dependent item and recomputes only those items. Repeat items are updated
/// only when `repeat_index` names the parent instance. Returns whether any
/// enabled flag changed.
pub fn update_answer(
    items: &mut EnableWhenItems,
    dependent_link_ids: &[String],
    question_id: &str,
    new_answer: &[FhirValue],
    repeat_index: Option<usize>,
) -> bool {
    let mut is_updated = false;

    for link_id in dependent_link_ids {
        if let Some(item) = items.single_items.get_mut(link_id) {
            for linked in item.linked.iter_mut() {
                if linked.enable_when.question == question_id {
                    linked.answer = new_answer.to_vec();
                }
            }

            let enabled = item.check_enabled();
            if item.is_enabled != enabled {
                item.is_enabled = enabled;
                is_updated = true;
            }
            continue;
        }

        let (Some(item), Some(instance)) = (items.repeat_items.get_mut(link_id), repeat_index)
        else {
            continue;
        };

        for linked in item.linked.iter_mut() {
            if linked.enable_when.question == question_id {
                if linked.answers.len() <= instance {
                    linked.answers.resize(instance + 1, None);
                }
                linked.answers[instance] = new_answer.first().cloned();
            }
        }

        let enabled = item.check_enabled(instance);
        is_updated |= item.set_enabled(instance, enabled);
    }

    is_updated
}

/// Answers already present in a pre-populated response for every linked
/// question, keyed by question linkId. A later instance overrides an earlier one.
pub fn read_initial_answers(
    response: &QuestionnaireResponse,
    linked_questions: &LinkedQuestionsMap,
) -> IndexMap<String, Vec<FhirValue>> {
    fn read_recursive(
        item: &ResponseItem,
        linked_questions: &LinkedQuestionsMap,
        initial: &mut IndexMap<String, Vec<FhirValue>>,
    ) {
        if linked_questions.contains_key(&item.link_id) && item.has_answer() {
            initial.insert(item.link_id.clone(), answer_values(item));
        }
        for child in &item.item {
            read_recursive(child, linked_questions, initial);
        }
        for answer in &item.answer {
            for child in &answer.item {
                read_recursive(child, linked_questions, initial);
            }
        }
    }

    let mut initial = IndexMap::new();
    for item in &response.item {
        read_recursive(item, linked_questions, &mut initial);
    }
    initial
}

/// Seeds every conditional item from the answers currently in `response` and
/// recomputes its enabled state. A linked question without an answer resets
/// its slot, so a cleared answer no longer counts.
pub fn assign_populated_answers(
    items: &mut EnableWhenItems,
    response: &QuestionnaireResponse,
) -> LinkedQuestionsMap {
    let linked_questions = create_linked_questions_map(items);
    let current = read_initial_answers(response, &linked_questions);

    for item in items.single_items.values_mut() {
        for linked in item.linked.iter_mut() {
            linked.answer = current
                .get(&linked.enable_when.question)
                .cloned()
                .unwrap_or_default();
        }
        item.is_enabled = item.check_enabled();
    }

    let index = ResponseItemIndex::build(response);
    for item in items.repeat_items.values_mut() {
        let instances = index.get(&item.parent_link_id);
        for linked in item.linked.iter_mut() {
            linked.answers = instances
                .iter()
                .map(|instance| {
                    find_descendant(instance, &linked.enable_when.question)
                        .and_then(|found| answer_values(found).into_iter().next())
                })
                .collect();
        }
        item.enabled_indexes = (0..instances.len())
            .map(|instance| item.check_enabled(instance))
            .collect();
    }

    linked_questions
}

/// Shifts per-instance slots of every repeat item under `parent_link_id` when
/// a parent instance is inserted or removed at `index`.
pub fn mutate_repeat_instances(
    items: &mut EnableWhenItems,
    parent_link_id: &str,
    index: usize,
    mutation: RepeatMutation,
) -> bool {
    let mut is_updated = false;

    for item in items
        .repeat_items
        .values_mut()
        .filter(|item| item.parent_link_id == parent_link_id)
    {
        match mutation {
            RepeatMutation::Add => {
                for linked in item.linked.iter_mut() {
                    if linked.answers.len() < index {
                        linked.answers.resize(index, None);
                    }
                    linked.answers.insert(index, None);
                }
                if item.enabled_indexes.len() < index {
                    item.enabled_indexes.resize(index, false);
                }
                let enabled = item.check_enabled(index);
                item.enabled_indexes.insert(index, enabled);
                is_updated = true;
            }
            RepeatMutation::Remove => {
                for linked in item.linked.iter_mut() {
                    if index < linked.answers.len() {
                        linked.answers.remove(index);
                    }
                }
                if index < item.enabled_indexes.len() {
                    item.enabled_indexes.remove(index);
                    is_updated = true;
                }
            }
        }
    }

    is_updated
}

fn answer_values(item: &ResponseItem) -> Vec<FhirValue> {
    item.answer
        .iter()
        .filter_map(|answer| answer.value.clone())
        .collect()
}

fn find_descendant<'a>(item: &'a ResponseItem, link_id: &str) -> Option<&'a ResponseItem> {
    if item.link_id == link_id {
        return Some(item);
    }
    item.item
        .iter()
        .chain(item.answer.iter().flat_map(|answer| answer.item.iter()))
        .find_map(|child| find_descendant(child, link_id))
}
