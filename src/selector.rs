//! Label-selector matching for group membership.
//!
//! Implements the standard selector semantics over claim labels:
//! `matchLabels` is a conjunction of equality terms and `matchExpressions`
//! supports the In / NotIn / Exists / DoesNotExist operators. One deliberate
//! deviation from the built-in scheduler semantics: a selector with no terms
//! matches **nothing**: group membership must be declared explicitly, an
//! empty selector must not capture every claim in the cluster.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use crate::Error;

/// True iff `labels` satisfies every term of `selector`.
///
/// Returns a validation error for an unknown `matchExpressions` operator.
pub fn selector_matches(
    selector: &LabelSelector,
    labels: &BTreeMap<String, String>,
) -> Result<bool, Error> {
    let match_labels = selector.match_labels.as_ref();
    let match_expressions = selector.match_expressions.as_ref();

    let no_terms = match_labels.map_or(true, BTreeMap::is_empty)
        && match_expressions.map_or(true, Vec::is_empty);
    if no_terms {
        return Ok(false);
    }

    if let Some(required) = match_labels {
        for (key, value) in required {
            if labels.get(key) != Some(value) {
                return Ok(false);
            }
        }
    }

    if let Some(expressions) = match_expressions {
        for expression in expressions {
            if !requirement_matches(expression, labels)? {
                return Ok(false);
            }
        }
    }

    Ok(true)
}

fn requirement_matches(
    requirement: &LabelSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> Result<bool, Error> {
    let actual = labels.get(&requirement.key);
    let values = requirement.values.as_deref().unwrap_or(&[]);

    match requirement.operator.as_str() {
        "In" => Ok(actual.is_some_and(|value| values.iter().any(|candidate| candidate == value))),
        "NotIn" => Ok(actual.map_or(true, |value| !values.iter().any(|candidate| candidate == value))),
        "Exists" => Ok(actual.is_some()),
        "DoesNotExist" => Ok(actual.is_none()),
        other => Err(Error::validation(format!(
            "unsupported label selector operator {:?}",
            other
        ))),
    }
}
