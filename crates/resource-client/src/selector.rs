//! Field and label selectors.
//!
//! Selectors are handed to the API server as strings. They are also parsed here
//! so malformed expressions fail at startup, and so in-memory clients can apply
//! the same filtering the server would.
//!
//! Supported syntax, comma-separated:
//! - field selectors: `path=value`, `path==value`, `path!=value` over dotted paths
//!   such as `status.phase=Running`
//! - label selectors: `key=value`, `key==value`, `key!=value`, `key`, `!key`,
//!   `key in (a,b)`, `key notin (a,b)`

use crate::error::ClientError;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// Comparison used by a selector requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=` or `==`
    Equals,
    /// `!=`
    NotEquals,
}

/// One `path op value` term of a field selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRequirement {
    /// Dotted path into the object, e.g. `status.phase`
    pub path: String,
    /// Comparison
    pub operator: Operator,
    /// Expected value
    pub value: String,
}

/// A parsed field selector. All requirements must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    /// The parsed requirements.
    #[must_use]
    pub fn requirements(&self) -> &[FieldRequirement] {
        &self.requirements
    }

    /// Evaluates the selector against an object serialized to JSON.
    ///
    /// Missing fields compare as the empty string, as the API server does.
    #[must_use]
    pub fn matches(&self, object: &Value) -> bool {
        self.requirements.iter().all(|requirement| {
            let actual = lookup(object, &requirement.path);
            match requirement.operator {
                Operator::Equals => actual == requirement.value,
                Operator::NotEquals => actual != requirement.value,
            }
        })
    }
}

impl FromStr for FieldSelector {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let requirements = terms(s)
            .into_iter()
            .map(|term| {
                let (path, operator, value) = split_term(term)
                    .ok_or_else(|| invalid(s, "expected `path=value` or `path!=value`"))?;
                if path.is_empty() || path.split('.').any(str::is_empty) {
                    return Err(invalid(s, "empty field path"));
                }
                Ok(FieldRequirement {
                    path: path.to_string(),
                    operator,
                    value: value.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { requirements })
    }
}

/// One term of a label selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelRequirement {
    /// `key=value`
    Equals(String, String),
    /// `key!=value`; also holds when the label is absent
    NotEquals(String, String),
    /// `key`
    Exists(String),
    /// `!key`
    DoesNotExist(String),
    /// `key in (a,b)`
    In(String, BTreeSet<String>),
    /// `key notin (a,b)`; also holds when the label is absent
    NotIn(String, BTreeSet<String>),
}

impl LabelRequirement {
    fn key(&self) -> &str {
        match self {
            Self::Equals(key, _)
            | Self::NotEquals(key, _)
            | Self::Exists(key)
            | Self::DoesNotExist(key)
            | Self::In(key, _)
            | Self::NotIn(key, _) => key,
        }
    }
}

/// A parsed label selector. All requirements must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<LabelRequirement>,
}

impl LabelSelector {
    /// The parsed requirements.
    #[must_use]
    pub fn requirements(&self) -> &[LabelRequirement] {
        &self.requirements
    }

    /// Evaluates the selector against an object's labels.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|requirement| match requirement {
            LabelRequirement::Equals(key, value) => labels.get(key) == Some(value),
            LabelRequirement::NotEquals(key, value) => labels.get(key) != Some(value),
            LabelRequirement::Exists(key) => labels.contains_key(key),
            LabelRequirement::DoesNotExist(key) => !labels.contains_key(key),
            LabelRequirement::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            LabelRequirement::NotIn(key, values) => {
                labels.get(key).is_none_or(|v| !values.contains(v))
            }
        })
    }
}

impl FromStr for LabelSelector {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let requirements = terms(s)
            .into_iter()
            .map(|term| {
                let requirement = if term.contains('(') {
                    parse_set_term(term).ok_or_else(|| {
                        invalid(s, "expected `key in (a,b)` or `key notin (a,b)`")
                    })?
                } else {
                    match split_term(term) {
                        Some((key, Operator::Equals, value)) => {
                            LabelRequirement::Equals(key.to_string(), value.to_string())
                        }
                        Some((key, Operator::NotEquals, value)) => {
                            LabelRequirement::NotEquals(key.to_string(), value.to_string())
                        }
                        None => match term.strip_prefix('!') {
                            Some(key) => LabelRequirement::DoesNotExist(key.trim().to_string()),
                            None => LabelRequirement::Exists(term.to_string()),
                        },
                    }
                };
                if !valid_label_key(requirement.key()) {
                    return Err(invalid(s, "invalid label key"));
                }
                Ok(requirement)
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { requirements })
    }
}

/// Splits at commas outside parentheses, dropping empty terms.
fn terms(s: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&s[start..]);
    terms
        .into_iter()
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .collect()
}

fn parse_set_term(term: &str) -> Option<LabelRequirement> {
    let (head, rest) = term.split_once('(')?;
    let values = rest.trim_end().strip_suffix(')')?;
    if values.contains(['(', ')']) {
        return None;
    }
    let values: BTreeSet<String> = values
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .collect();
    if values.is_empty() {
        return None;
    }

    let mut words = head.split_whitespace();
    let (key, operator) = (words.next()?, words.next()?);
    if words.next().is_some() {
        return None;
    }
    match operator {
        "in" => Some(LabelRequirement::In(key.to_string(), values)),
        "notin" => Some(LabelRequirement::NotIn(key.to_string(), values)),
        _ => None,
    }
}

fn split_term(term: &str) -> Option<(&str, Operator, &str)> {
    let (key, operator, value) = if let Some((key, value)) = term.split_once("!=") {
        (key, Operator::NotEquals, value)
    } else if let Some((key, value)) = term.split_once("==") {
        (key, Operator::Equals, value)
    } else {
        let (key, value) = term.split_once('=')?;
        (key, Operator::Equals, value)
    };
    Some((key.trim(), operator, value.trim()))
}

fn valid_label_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

fn lookup(object: &Value, path: &str) -> String {
    let mut current = object;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    match current {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn invalid(selector: &str, reason: &str) -> ClientError {
    ClientError::InvalidSelector(format!("{selector:?}: {reason}"))
}
