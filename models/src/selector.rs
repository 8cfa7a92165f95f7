//! Evaluation of `LabelSelector`s against label sets.
//!
//! A missing selector selects nothing, while an empty selector selects everything, mirroring how
//! PodDisruptionBudget selectors are interpreted by the API server.
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use snafu::ensure;

use std::collections::BTreeMap;

pub type Result<T> = std::result::Result<T, error::SelectorError>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    In { key: String, values: Vec<String> },
    NotIn { key: String, values: Vec<String> },
    Exists { key: String },
    DoesNotExist { key: String },
}

impl Requirement {
    fn from_expression(expression: &LabelSelectorRequirement) -> Result<Self> {
        let key = expression.key.clone();
        let values = expression.values.clone().unwrap_or_default();
        match expression.operator.as_str() {
            operator @ ("In" | "NotIn") => {
                ensure!(
                    !values.is_empty(),
                    error::MissingValuesSnafu {
                        key,
                        operator: operator.to_string(),
                    }
                );
                Ok(if operator == "In" {
                    Requirement::In { key, values }
                } else {
                    Requirement::NotIn { key, values }
                })
            }
            operator @ ("Exists" | "DoesNotExist") => {
                ensure!(
                    values.is_empty(),
                    error::UnexpectedValuesSnafu {
                        key,
                        operator: operator.to_string(),
                    }
                );
                Ok(if operator == "Exists" {
                    Requirement::Exists { key }
                } else {
                    Requirement::DoesNotExist { key }
                })
            }
            operator => error::UnknownOperatorSnafu {
                key,
                operator: operator.to_string(),
            }
            .fail(),
        }
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::In { key, values } => labels
                .get(key)
                .map_or(false, |value| values.contains(value)),
            Requirement::NotIn { key, values } => labels
                .get(key)
                .map_or(true, |value| !values.contains(value)),
            Requirement::Exists { key } => labels.contains_key(key),
            Requirement::DoesNotExist { key } => !labels.contains_key(key),
        }
    }
}

/// A validated label selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    /// Matches no label set.
    Nothing,
    /// Matches label sets satisfying every requirement. With no requirements, matches everything.
    Requirements(Vec<Requirement>),
}

impl Selector {
    /// Validates a label selector. Malformed expressions are rejected rather than ignored.
    pub fn from_label_selector(selector: Option<&LabelSelector>) -> Result<Self> {
        let Some(selector) = selector else {
            return Ok(Selector::Nothing);
        };

        let mut requirements: Vec<Requirement> = selector
            .match_labels
            .iter()
            .flatten()
            .map(|(key, value)| Requirement::In {
                key: key.clone(),
                values: vec![value.clone()],
            })
            .collect();
        for expression in selector.match_expressions.iter().flatten() {
            requirements.push(Requirement::from_expression(expression)?);
        }
        Ok(Selector::Requirements(requirements))
    }

    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let empty = BTreeMap::new();
        let labels = labels.unwrap_or(&empty);
        match self {
            Selector::Nothing => false,
            Selector::Requirements(requirements) => requirements
                .iter()
                .all(|requirement| requirement.matches(labels)),
        }
    }
}

pub mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum SelectorError {
        #[snafu(display("'{}' is not a valid label selector operator (key '{}')", operator, key))]
        UnknownOperator { key: String, operator: String },

        #[snafu(display("Operator '{}' on key '{}' requires at least one value", operator, key))]
        MissingValues { key: String, operator: String },

        #[snafu(display("Operator '{}' on key '{}' must not have values", operator, key))]
        UnexpectedValues { key: String, operator: String },
    }
}
