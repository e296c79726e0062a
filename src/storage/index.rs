use indexmap::IndexMap;

use crate::types::{QuestionnaireResponse, ResponseItem};

/// Flattened view of a response: every item instance grouped under its linkId.
///
/// Instances keep document order, so repeat-group instance `i` is
/// `index.get(link_id)[i]`. Items the questionnaire does not define are still
/// indexed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseItemIndex {
    items: IndexMap<String, Vec<ResponseItem>>,
}

impl ResponseItemIndex {
    pub fn build(response: &QuestionnaireResponse) -> Self {
        let mut index = Self::default();
        for item in &response.item {
            index.insert_recursive(item);
        }
        index
    }

    fn insert_recursive(&mut self, item: &ResponseItem) {
        self.items
            .entry(item.link_id.clone())
            .or_default()
            .push(item.clone());

        for child in &item.item {
            self.insert_recursive(child);
        }
        for answer in &item.answer {
            for child in &answer.item {
                self.insert_recursive(child);
            }
        }
    }

    pub fn get(&self, link_id: &str) -> &[ResponseItem] {
        self.items.get(link_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, link_id: &str) -> bool {
        self.items.contains_key(link_id)
    }

    pub fn instance_count(&self, link_id: &str) -> usize {
        self.get(link_id).len()
    }

    pub fn link_ids(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ResponseItem])> {
        self.items
            .iter()
            .map(|(link_id, instances)| (link_id.as_str(), instances.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FhirValue;

    fn medication(name: &str) -> ResponseItem {
        ResponseItem::new("medication")
            .with_item(ResponseItem::new("medication-name").with_answer(FhirValue::String(
                name.to_string(),
            )))
    }

    #[test]
    fn test_repeat_instances_keep_document_order() {
        let response = QuestionnaireResponse::new()
            .with_item(medication("aspirin"))
            .with_item(ResponseItem::new("smoker").with_answer(FhirValue::Boolean(false)))
            .with_item(medication("warfarin"));

        let index = ResponseItemIndex::build(&response);
        assert_eq!(index.instance_count("medication"), 2);

        let names: Vec<_> = index
            .get("medication-name")
            .iter()
            .map(|item| item.answer[0].value.clone())
            .collect();
        assert_eq!(
            names,
            vec![
                Some(FhirValue::String("aspirin".to_string())),
                Some(FhirValue::String("warfarin".to_string())),
            ]
        );
    }

    #[test]
    fn test_items_nested_under_answers_are_indexed() {
        let mut smoker = ResponseItem::new("smoker").with_answer(FhirValue::Boolean(true));
        smoker.answer[0]
            .item
            .push(ResponseItem::new("packs").with_answer(FhirValue::Integer(2)));

        let index = ResponseItemIndex::build(&QuestionnaireResponse::new().with_item(smoker));
        assert!(index.contains("packs"));
    }

    #[test]
    fn test_missing_link_id_is_empty() {
        let index = ResponseItemIndex::build(&QuestionnaireResponse::new());
        assert!(index.is_empty());
        assert!(index.get("anything").is_empty());
        assert_eq!(index.instance_count("anything"), 0);
    }
}
