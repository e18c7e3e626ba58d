//! Rich annotations and the per-key merge algebra
//!
//! Annotations travel through the engine in a "rich" form that carries a
//! merge strategy alongside each JSON value. Policies never see strategies:
//! the wire form flattens to plain `key -> value` JSON. Merging folds a
//! lower-priority set into a higher-priority one, with the strategy that
//! governs a key taken from the highest-priority source that declares one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// How two values for the same annotation key combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Higher-priority value wins outright
    Replace,
    /// Arrays become `[higher.., lower..]`, objects shallow-merge (higher wins)
    Append,
    /// Arrays become `[lower.., higher..]`, objects shallow-merge (lower wins)
    Prepend,
    /// Arrays concatenate, objects merge recursively (higher wins on leaves)
    #[default]
    Deep,
    /// Arrays become a deduplicated union, objects merge as `deep`
    Union,
}

/// One annotation entry: a JSON value plus an optional declared strategy
///
/// A `None` strategy defers to the lower-priority entry's strategy during a
/// merge, and ultimately to [`MergeStrategy::Deep`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationValue {
    pub value: Value,

    #[serde(
        rename = "merge_strategy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub strategy: Option<MergeStrategy>,
}

impl AnnotationValue {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            strategy: None,
        }
    }

    pub fn with_strategy(value: Value, strategy: MergeStrategy) -> Self {
        Self {
            value,
            strategy: Some(strategy),
        }
    }
}

/// An ordered map of annotation key to rich entry
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RichAnnotations(BTreeMap<String, AnnotationValue>);

impl RichAnnotations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Promote a plain JSON object: every entry gets the default strategy
    pub fn from_plain(map: &Map<String, Value>) -> Self {
        Self(
            map.iter()
                .map(|(k, v)| (k.clone(), AnnotationValue::new(v.clone())))
                .collect(),
        )
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: AnnotationValue) {
        self.0.insert(key.into(), entry);
    }

    pub fn get(&self, key: &str) -> Option<&AnnotationValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AnnotationValue)> {
        self.0.iter()
    }

    /// Flatten to the plain JSON form handed to policies
    pub fn to_wire(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(k, entry)| (k.clone(), entry.value.clone()))
            .collect()
    }

    /// Merge `higher` over `lower`
    ///
    /// Keys present only in one source carry over unchanged. For a shared
    /// key the governing strategy is the higher entry's, falling back to the
    /// lower entry's, then to `deep`.
    pub fn merge(lower: &Self, higher: &Self) -> Self {
        let mut out = lower.0.clone();

        for (key, high) in &higher.0 {
            match lower.0.get(key) {
                None => {
                    out.insert(key.clone(), high.clone());
                }
                Some(low) => {
                    let strategy = high
                        .strategy
                        .or(low.strategy)
                        .unwrap_or_default();
                    let merged = apply(strategy, &low.value, &high.value);
                    out.insert(
                        key.clone(),
                        AnnotationValue {
                            value: merged,
                            strategy: high.strategy.or(low.strategy),
                        },
                    );
                }
            }
        }

        Self(out)
    }

    /// Fold equal-priority contributors into one set
    ///
    /// Contributors must arrive in a deterministic order; each successive
    /// contributor merges over the accumulated result.
    pub fn combine<'a>(sources: impl IntoIterator<Item = &'a Self>) -> Self {
        sources
            .into_iter()
            .fold(Self::new(), |acc, next| Self::merge(&acc, next))
    }

    /// Fold a precedence chain, lowest priority first
    pub fn fold_chain<'a>(layers: impl IntoIterator<Item = &'a Self>) -> Self {
        layers
            .into_iter()
            .fold(Self::new(), |acc, higher| Self::merge(&acc, higher))
    }
}

impl FromIterator<(String, AnnotationValue)> for RichAnnotations {
    fn from_iter<T: IntoIterator<Item = (String, AnnotationValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Apply one strategy to a (lower, higher) value pair
///
/// Operands of differing JSON kinds fall back to the strategy's scalar rule.
/// Array concatenation skips when the higher operand already carries the
/// lower operand at the joining boundary, which keeps the whole merge chain
/// re-entrant: normalizing an already-normalized request changes nothing.
fn apply(strategy: MergeStrategy, lower: &Value, higher: &Value) -> Value {
    match strategy {
        MergeStrategy::Replace => higher.clone(),
        MergeStrategy::Append => match (lower, higher) {
            (Value::Array(l), Value::Array(h)) => {
                if h.ends_with(l) {
                    higher.clone()
                } else {
                    Value::Array(h.iter().chain(l.iter()).cloned().collect())
                }
            }
            (Value::Object(l), Value::Object(h)) => Value::Object(shallow(l, h, true)),
            _ => higher.clone(),
        },
        MergeStrategy::Prepend => match (lower, higher) {
            (Value::Array(l), Value::Array(h)) => {
                if h.starts_with(l) {
                    higher.clone()
                } else {
                    Value::Array(l.iter().chain(h.iter()).cloned().collect())
                }
            }
            (Value::Object(l), Value::Object(h)) => Value::Object(shallow(l, h, false)),
            _ => lower.clone(),
        },
        MergeStrategy::Deep => match (lower, higher) {
            (Value::Array(l), Value::Array(h)) => {
                if h.ends_with(l) {
                    higher.clone()
                } else {
                    Value::Array(h.iter().chain(l.iter()).cloned().collect())
                }
            }
            (Value::Object(l), Value::Object(h)) => Value::Object(deep(l, h)),
            _ => higher.clone(),
        },
        MergeStrategy::Union => match (lower, higher) {
            (Value::Array(l), Value::Array(h)) => {
                let mut out: Vec<Value> = Vec::with_capacity(h.len() + l.len());
                for item in h.iter().chain(l.iter()) {
                    if !out.contains(item) {
                        out.push(item.clone());
                    }
                }
                Value::Array(out)
            }
            (Value::Object(l), Value::Object(h)) => Value::Object(deep(l, h)),
            _ => higher.clone(),
        },
    }
}

/// Shallow object merge; `higher_wins` picks the side kept on conflicts
fn shallow(lower: &Map<String, Value>, higher: &Map<String, Value>, higher_wins: bool) -> Map<String, Value> {
    let mut out = lower.clone();
    for (k, v) in higher {
        if higher_wins || !out.contains_key(k) {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

/// Recursive object merge with `deep` array and scalar rules
fn deep(lower: &Map<String, Value>, higher: &Map<String, Value>) -> Map<String, Value> {
    let mut out = lower.clone();
    for (k, hv) in higher {
        let merged = match out.get(k) {
            Some(lv) => apply(MergeStrategy::Deep, lv, hv),
            None => hv.clone(),
        };
        out.insert(k.clone(), merged);
    }
    out
}
