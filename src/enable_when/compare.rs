use chrono::{DateTime, NaiveDate};
use std::cmp::Ordering;

use crate::types::{Coding, EnableWhen, EnableWhenOperator, FhirValue, Quantity};

/// Whether the current answers of the linked question satisfy `condition`.
///
/// One satisfying answer is enough, whatever the operator. With no answers
/// only `exists = false` and `!= <boolean>` are satisfied.
pub fn condition_satisfied(condition: &EnableWhen, answers: &[FhirValue]) -> bool {
    match condition.operator {
        EnableWhenOperator::Exists => match condition.answer {
            FhirValue::Boolean(expected) => !answers.is_empty() == expected,
            _ => false,
        },
        EnableWhenOperator::NotEqual if answers.is_empty() => {
            matches!(condition.answer, FhirValue::Boolean(_))
        }
        _ => answers
            .iter()
            .any(|answer| answer_satisfies(condition, answer)),
    }
}

/// Type-directed comparison of one answer against the expected value.
/// Unsupported type pairs never satisfy the condition.
pub fn answer_satisfies(condition: &EnableWhen, answer: &FhirValue) -> bool {
    let operator = condition.operator;
    let ordering = match (answer, &condition.answer) {
        (FhirValue::Boolean(a), FhirValue::Boolean(e)) => Some(a.cmp(e)),
        (
            FhirValue::Decimal(_) | FhirValue::Integer(_),
            FhirValue::Decimal(_) | FhirValue::Integer(_),
        ) => answer
            .as_f64()
            .zip(condition.answer.as_f64())
            .and_then(|(a, e)| a.partial_cmp(&e)),
        (FhirValue::Date(a), FhirValue::Date(e)) => Some(compare_dates(a, e)),
        (FhirValue::DateTime(a), FhirValue::DateTime(e)) => Some(compare_date_times(a, e)),
        (FhirValue::Time(a), FhirValue::Time(e))
        | (FhirValue::String(a), FhirValue::String(e))
        | (FhirValue::Uri(a), FhirValue::Uri(e)) => Some(a.cmp(e)),
        (FhirValue::Coding(a), FhirValue::Coding(e)) => compare_codings(a, e),
        (FhirValue::Quantity(a), FhirValue::Quantity(e)) => compare_quantities(a, e),
        _ => None,
    };

    match ordering {
        Some(ordering) => apply_operator(operator, ordering),
        None => false,
    }
}

fn apply_operator(operator: EnableWhenOperator, ordering: Ordering) -> bool {
    match operator {
        EnableWhenOperator::Equal => ordering == Ordering::Equal,
        EnableWhenOperator::NotEqual => ordering != Ordering::Equal,
        EnableWhenOperator::Greater => ordering == Ordering::Greater,
        EnableWhenOperator::Less => ordering == Ordering::Less,
        EnableWhenOperator::GreaterOrEqual => ordering != Ordering::Less,
        EnableWhenOperator::LessOrEqual => ordering != Ordering::Greater,
        EnableWhenOperator::Exists => false,
    }
}

/// Full dates compare chronologically, partial dates (`2024`, `2024-03`) lexically.
fn compare_dates(a: &str, e: &str) -> Ordering {
    match (
        NaiveDate::parse_from_str(a, "%Y-%m-%d"),
        NaiveDate::parse_from_str(e, "%Y-%m-%d"),
    ) {
        (Ok(a), Ok(e)) => a.cmp(&e),
        _ => a.cmp(e),
    }
}

fn compare_date_times(a: &str, e: &str) -> Ordering {
    match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(e)) {
        (Ok(a), Ok(e)) => a.cmp(&e),
        _ => compare_dates(a, e),
    }
}

fn compare_codings(a: &Coding, e: &Coding) -> Option<Ordering> {
    match (&a.code, &e.code) {
        (Some(a), Some(e)) => Some(a.cmp(e)),
        _ => match (&a.display, &e.display) {
            (Some(a), Some(e)) => Some(a.cmp(e)),
            _ => None,
        },
    }
}

fn compare_quantities(a: &Quantity, e: &Quantity) -> Option<Ordering> {
    if !a.same_unit(e) {
        return None;
    }
    a.value?.partial_cmp(&e.value?)
}
