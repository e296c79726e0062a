mod common;

use common::*;
use octofhir_sdc_engine::enable_when::{
    EnableWhenSingleItem, create_linked_questions_map, evaluate_combination, update_answer,
};
use octofhir_sdc_engine::*;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

fn session(questionnaire: Questionnaire, evaluator: ScriptedEvaluator) -> FormSession {
    FormSession::new(questionnaire, Arc::new(evaluator), EngineConfig::default()).unwrap()
}

#[tokio::test]
async fn test_unanswered_question_enables_negative_conditions() {
    let questionnaire = Questionnaire::new()
        .with_item(QuestionnaireItem::new("smoker", ItemType::Boolean))
        .with_item(
            QuestionnaireItem::new("never-smoked-reason", ItemType::String).with_enable_when(
                EnableWhen::new("smoker", EnableWhenOperator::NotEqual, FhirValue::Boolean(true)),
            ),
        )
        .with_item(
            QuestionnaireItem::new("ask-later", ItemType::Boolean).with_enable_when(EnableWhen::new(
                "smoker",
                EnableWhenOperator::Exists,
                FhirValue::Boolean(false),
            )),
        );
    let mut session = session(questionnaire, ScriptedEvaluator::new());

    session.initialise(QuestionnaireResponse::new()).await;
    assert!(session.is_enabled("never-smoked-reason", None));
    assert!(session.is_enabled("ask-later", None));

    assert!(session.enable_when_answer_changed("smoker", &[FhirValue::Boolean(true)], None));
    assert!(!session.is_enabled("never-smoked-reason", None));
    assert!(!session.is_enabled("ask-later", None));

    assert!(session.enable_when_answer_changed("smoker", &[FhirValue::Boolean(false)], None));
    assert!(session.is_enabled("never-smoked-reason", None));
    assert!(!session.is_enabled("ask-later", None));
}

#[tokio::test]
async fn test_cleared_answer_disables_dependent_item() {
    let questionnaire = Questionnaire::new()
        .with_item(QuestionnaireItem::new("pain", ItemType::Boolean))
        .with_item(
            QuestionnaireItem::new("pain-location", ItemType::String).with_enable_when(
                EnableWhen::new("pain", EnableWhenOperator::Equal, FhirValue::Boolean(true)),
            ),
        );
    let mut session = session(questionnaire, ScriptedEvaluator::new());

    session
        .initialise(
            QuestionnaireResponse::new()
                .with_item(ResponseItem::new("pain").with_answer(FhirValue::Boolean(true))),
        )
        .await;
    assert!(session.is_enabled("pain-location", None));

    let update = session
        .update_response(QuestionnaireResponse::new().with_item(ResponseItem::new("pain")))
        .await;

    assert!(update.enable_when_items_updated);
    assert!(!session.is_enabled("pain-location", None));
}

#[tokio::test]
async fn test_not_equal_matches_any_of_several_answers() {
    let questionnaire = Questionnaire::new()
        .with_item(QuestionnaireItem::new("symptoms", ItemType::String).repeating())
        .with_item(
            QuestionnaireItem::new("other-symptoms", ItemType::String).with_enable_when(
                EnableWhen::new(
                    "symptoms",
                    EnableWhenOperator::NotEqual,
                    FhirValue::String("cough".to_string()),
                ),
            ),
        );
    let mut session = session(questionnaire, ScriptedEvaluator::new());
    session.initialise(QuestionnaireResponse::new()).await;

    let symptoms = [
        FhirValue::String("cough".to_string()),
        FhirValue::String("fever".to_string()),
    ];
    assert!(session.enable_when_answer_changed("symptoms", &symptoms, None));
    assert!(session.is_enabled("other-symptoms", None));

    assert!(session.enable_when_answer_changed(
        "symptoms",
        &[FhirValue::String("cough".to_string())],
        None
    ));
    assert!(!session.is_enabled("other-symptoms", None));
}

#[test]
fn test_all_and_any_policies() {
    let conditions = vec![
        EnableWhen::new("age", EnableWhenOperator::GreaterOrEqual, FhirValue::Integer(18)),
        EnableWhen::new("consent", EnableWhenOperator::Equal, FhirValue::Boolean(true)),
    ];

    for (behavior, expected) in [(EnableBehavior::All, false), (EnableBehavior::Any, true)] {
        let mut items = EnableWhenItems::default();
        items.single_items.insert(
            "details".to_string(),
            EnableWhenSingleItem::new(&conditions, Some(behavior)),
        );
        let linked = create_linked_questions_map(&items);
        assert_eq!(linked["age"], vec!["details".to_string()]);

        update_answer(&mut items, &linked["age"], "age", &[FhirValue::Integer(20)], None);
        update_answer(
            &mut items,
            &linked["consent"],
            "consent",
            &[FhirValue::Boolean(false)],
            None,
        );

        assert_eq!(items.single_items["details"].is_enabled, expected, "{behavior:?}");
    }

    assert!(!evaluate_combination(&[], Some(EnableBehavior::Any)));
    assert!(!evaluate_combination(&[], None));
}

#[test]
fn test_unchanged_answer_reports_no_update() {
    let conditions = vec![EnableWhen::new(
        "age",
        EnableWhenOperator::Greater,
        FhirValue::Integer(65),
    )];
    let mut items = EnableWhenItems::default();
    items
        .single_items
        .insert("senior".to_string(), EnableWhenSingleItem::new(&conditions, None));
    let dependents = vec!["senior".to_string()];

    assert!(update_answer(&mut items, &dependents, "age", &[FhirValue::Integer(70)], None));
    assert!(!update_answer(&mut items, &dependents, "age", &[FhirValue::Integer(80)], None));
}

fn medications_questionnaire() -> Questionnaire {
    Questionnaire::new().with_item(
        QuestionnaireItem::new("meds", ItemType::Group)
            .repeating()
            .with_item(QuestionnaireItem::new("dose", ItemType::Integer))
            .with_item(
                QuestionnaireItem::new("note", ItemType::String).with_enable_when(EnableWhen::new(
                    "dose",
                    EnableWhenOperator::Greater,
                    FhirValue::Integer(2),
                )),
            ),
    )
}

fn medication(dose: i64) -> ResponseItem {
    ResponseItem::new("meds").with_item(ResponseItem::new("dose").with_answer(FhirValue::Integer(dose)))
}

#[tokio::test]
async fn test_repeat_instances_shift_in_place() {
    let mut session = session(medications_questionnaire(), ScriptedEvaluator::new());
    session
        .initialise(
            QuestionnaireResponse::new()
                .with_item(medication(1))
                .with_item(medication(5)),
        )
        .await;

    let note = |session: &FormSession| session.model().enable_when_items.repeat_items["note"].clone();
    assert_eq!(note(&session).enabled_indexes, vec![false, true]);

    assert!(session.add_repeat_instance("meds", 1));
    assert_eq!(note(&session).enabled_indexes, vec![false, false, true]);
    assert_eq!(
        note(&session).linked[0].answers,
        vec![Some(FhirValue::Integer(1)), None, Some(FhirValue::Integer(5))]
    );

    assert!(session.enable_when_answer_changed("dose", &[FhirValue::Integer(4)], Some(1)));
    assert!(session.is_enabled("note", Some(1)));

    assert!(session.remove_repeat_instance("meds", 0));
    assert_eq!(note(&session).enabled_indexes, vec![true, true]);
    assert_eq!(
        note(&session).linked[0].answers,
        vec![Some(FhirValue::Integer(4)), Some(FhirValue::Integer(5))]
    );
    assert!(!session.is_enabled("note", None));
}

const NOTE_EXPRESSION: &str =
    "%resource.item.where(linkId='meds').item.where(linkId='dose').answer.value > 2";

fn dose_above_two(instance: usize) -> impl Fn(&JsonValue, &EvaluationContext) -> EvaluatorResult<Vec<JsonValue>> {
    move |_, context| {
        let dose = context
            .resource()
            .and_then(|resource| resource["item"].as_array())
            .and_then(|items| items.iter().filter(|i| i["linkId"] == "meds").nth(instance))
            .and_then(|meds| find_answer(meds, "dose"))
            .and_then(|dose| dose.as_i64());
        Ok(dose.map(|dose| json!(dose > 2)).into_iter().collect())
    }
}

#[tokio::test]
async fn test_repeat_expression_is_evaluated_per_instance() {
    let mut questionnaire = medications_questionnaire();
    questionnaire.item[0].item[1].enable_when.clear();
    questionnaire.item[0].item[1]
        .extension
        .push(enable_when_expression(NOTE_EXPRESSION));

    let evaluator = ScriptedEvaluator::new()
        .script(&insert_repeat(0), dose_above_two(0))
        .script(&insert_repeat(1), dose_above_two(1));
    let mut session = session(questionnaire, evaluator);

    let response = QuestionnaireResponse::new()
        .with_item(medication(1))
        .with_item(medication(5));
    let update = session.update_response(response.clone()).await;

    assert!(update.other.enable_when_expressions_updated);
    assert!(!session.is_enabled("note", Some(0)));
    assert!(session.is_enabled("note", Some(1)));

    let update = session.update_response(response).await;
    assert!(!update.other.enable_when_expressions_updated);
}

fn insert_repeat(instance: usize) -> String {
    octofhir_sdc_engine::enable_when::insert_repeat_index(NOTE_EXPRESSION, instance)
}

#[tokio::test]
async fn test_single_expression_is_idempotent() {
    let age = "%resource.item.where(linkId='age').answer.value";
    let questionnaire = Questionnaire::new()
        .with_extension(variable("age", age))
        .with_item(QuestionnaireItem::new("age", ItemType::Integer))
        .with_item(
            QuestionnaireItem::new("employer", ItemType::String)
                .with_extension(enable_when_expression("%age >= 18")),
        );
    let evaluator = ScriptedEvaluator::new()
        .answer_variable(age, "age")
        .script("%age >= 18", |_, context| {
            Ok(context_number(context, "age")
                .map(|age| json!(age >= 18.0))
                .into_iter()
                .collect())
        });
    let mut session = session(questionnaire, evaluator);

    let adult = QuestionnaireResponse::new()
        .with_item(ResponseItem::new("age").with_answer(FhirValue::Integer(30)));

    let first = session.update_response(adult.clone()).await;
    assert!(first.other.enable_when_expressions_updated);
    assert!(session.is_enabled("employer", None));

    let second = session.update_response(adult).await;
    assert!(!second.is_updated());

    let third = session.update_response(QuestionnaireResponse::new()).await;
    assert!(third.other.enable_when_expressions_updated);
    assert!(!session.is_enabled("employer", None));
}
