// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Key extraction and member ordering used while grouping map results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Key a mapped value is grouped under.
///
/// Numbers order before text; within a variant the natural order applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupKey {
    Number(i64),
    Text(String),
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Number(n) => write!(f, "{}", n),
            GroupKey::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for GroupKey {
    fn from(value: &str) -> Self {
        GroupKey::Text(value.to_string())
    }
}

impl From<String> for GroupKey {
    fn from(value: String) -> Self {
        GroupKey::Text(value)
    }
}

impl From<i64> for GroupKey {
    fn from(value: i64) -> Self {
        GroupKey::Number(value)
    }
}

impl From<i32> for GroupKey {
    fn from(value: i32) -> Self {
        GroupKey::Number(value.into())
    }
}

impl From<u32> for GroupKey {
    fn from(value: u32) -> Self {
        GroupKey::Number(value.into())
    }
}

impl From<bool> for GroupKey {
    fn from(value: bool) -> Self {
        GroupKey::Number(value.into())
    }
}

type KeyFn<T> = dyn Fn(&T) -> GroupKey + Send + Sync;
type CompareFn<M> = dyn Fn(&M, &M) -> Ordering + Send + Sync;

/// Key every item shares when no key function is configured
pub const DEFAULT_GROUP_KEY: &str = "task";

/// Extracts the group key from an original input item
pub struct KeyPolicy<T> {
    key_fn: Arc<KeyFn<T>>,
}

impl<T: 'static> KeyPolicy<T> {
    pub fn new<F>(key_fn: F) -> Self
    where
        F: Fn(&T) -> GroupKey + Send + Sync + 'static,
    {
        Self {
            key_fn: Arc::new(key_fn),
        }
    }

    /// Every item lands in the single group `"task"`
    pub fn constant() -> Self {
        Self::new(|_| GroupKey::from(DEFAULT_GROUP_KEY))
    }
}

impl<T> KeyPolicy<T> {
    pub fn key(&self, item: &T) -> GroupKey {
        (self.key_fn)(item)
    }
}

impl<T: 'static> Default for KeyPolicy<T> {
    fn default() -> Self {
        Self::constant()
    }
}

impl<T> Clone for KeyPolicy<T> {
    fn clone(&self) -> Self {
        Self {
            key_fn: self.key_fn.clone(),
        }
    }
}

/// Orders the members of one group before they are reduced
pub enum SortPolicy<M> {
    /// Best-effort ordering over the serialized form, see [`default_compare`]
    Default,
    By(Arc<CompareFn<M>>),
}

impl<M: 'static> SortPolicy<M> {
    pub fn by<F>(compare: F) -> Self
    where
        F: Fn(&M, &M) -> Ordering + Send + Sync + 'static,
    {
        SortPolicy::By(Arc::new(compare))
    }
}

impl<M: Serialize> SortPolicy<M> {
    /// Stable sort of `members` in place
    pub fn sort(&self, members: &mut Vec<M>) {
        match self {
            SortPolicy::By(compare) => members.sort_by(|a, b| compare(a, b)),
            SortPolicy::Default => {
                // Project once; serialization failures compare as null.
                let mut projected: Vec<(Value, M)> = members
                    .drain(..)
                    .map(|m| (serde_json::to_value(&m).unwrap_or(Value::Null), m))
                    .collect();
                projected.sort_by(|(a, _), (b, _)| default_compare(a, b));
                members.extend(projected.into_iter().map(|(_, m)| m));
            }
        }
    }
}

impl<M> Default for SortPolicy<M> {
    fn default() -> Self {
        SortPolicy::Default
    }
}

impl<M> Clone for SortPolicy<M> {
    fn clone(&self) -> Self {
        match self {
            SortPolicy::Default => SortPolicy::Default,
            SortPolicy::By(compare) => SortPolicy::By(compare.clone()),
        }
    }
}

/// Fallback comparator: numbers ascending, strings lexicographic, objects by
/// the first numeric (else first string) field of `a` when `b` has that field
/// with the same type. Anything else is considered equal.
pub fn default_compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Object(x), Value::Object(y)) => {
            let field = x
                .iter()
                .find(|(_, v)| v.is_number())
                .or_else(|| x.iter().find(|(_, v)| v.is_string()));

            match field {
                Some((name, left)) => match (left, y.get(name)) {
                    (Value::Number(l), Some(Value::Number(r))) => compare_numbers(l, r),
                    (Value::String(l), Some(Value::String(r))) => l.cmp(r),
                    _ => Ordering::Equal,
                },
                None => Ordering::Equal,
            }
        }
        _ => Ordering::Equal,
    }
}

fn compare_numbers(x: &serde_json::Number, y: &serde_json::Number) -> Ordering {
    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
        return x.cmp(&y);
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        _ => Ordering::Equal,
    }
}
