// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::error::MapReduceError;
use crate::grouping::{GroupKey, KeyPolicy, SortPolicy};
use crate::splitter::Batch;
use crate::worker_message::MapOutput;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// One original item next to the value its mapper produced
#[derive(Debug, Clone, PartialEq)]
pub struct MapRecord<'a, T, M> {
    pub item: &'a T,
    pub value: M,
}

/// Mapped values sharing one key, in reduce order
#[derive(Debug, Clone, PartialEq)]
pub struct Group<M> {
    pub key: GroupKey,
    pub members: Vec<M>,
}

/// Pairs every successful mapped value with its original item.
///
/// `results[i]` must come from `batches[i]` and have one slot per item;
/// anything else is a protocol violation.
pub fn align<'a, T, M>(
    batches: &'a [Batch<T>],
    results: Vec<MapOutput<M>>,
) -> Result<Vec<MapRecord<'a, T, M>>, MapReduceError> {
    if results.len() > batches.len() {
        let extra = &results[batches.len()];
        return Err(MapReduceError::MisalignedBatch {
            batch_index: batches.len(),
            expected: 0,
            actual: extra.len(),
        });
    }

    let mut results = results.into_iter();
    let mut records = Vec::new();
    for batch in batches {
        let result = results.next().unwrap_or_default();
        if result.len() != batch.len() {
            return Err(MapReduceError::MisalignedBatch {
                batch_index: batch.index,
                expected: batch.len(),
                actual: result.len(),
            });
        }
        records.extend(
            batch
                .items
                .iter()
                .zip(result)
                .filter_map(|(item, slot)| {
                    slot.into_value().map(|value| MapRecord { item, value })
                }),
        );
    }
    Ok(records)
}

/// Groups mapped values by the key of their original item.
///
/// Groups appear in order of first key occurrence across the batches; failed
/// items contribute nothing and never create a group.
pub fn combine<T, M: Serialize>(
    batches: &[Batch<T>],
    results: Vec<MapOutput<M>>,
    keys: &KeyPolicy<T>,
    sort: &SortPolicy<M>,
) -> Result<Vec<Group<M>>, MapReduceError> {
    let records = align(batches, results)?;

    let mut groups: Vec<Group<M>> = Vec::new();
    let mut positions: HashMap<GroupKey, usize> = HashMap::new();
    for MapRecord { item, value } in records {
        let key = keys.key(item);
        match positions.get(&key) {
            Some(&position) => groups[position].members.push(value),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push(Group {
                    key,
                    members: vec![value],
                });
            }
        }
    }

    for group in &mut groups {
        sort.sort(&mut group.members);
    }
    debug!(groups = groups.len(), "mapped values combined");
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker_message::Slot;
    use serde_json::{json, Value};

    fn batches(items: Vec<Vec<Value>>) -> Vec<Batch<Value>> {
        items
            .into_iter()
            .enumerate()
            .map(|(index, items)| Batch { index, items })
            .collect()
    }

    fn key_by_g() -> KeyPolicy<Value> {
        KeyPolicy::new(|item: &Value| match item["g"].as_str() {
            Some(g) => GroupKey::from(g),
            None => GroupKey::from("none"),
        })
    }

    #[test]
    fn test_groups_follow_first_occurrence() {
        let batches = batches(vec![
            vec![json!({"g": "a", "v": 1}), json!({"g": "b", "v": 2})],
            vec![json!({"g": "a", "v": 3})],
        ]);
        let results = vec![vec![Slot::Value(1), Slot::Value(2)], vec![Slot::Value(3)]];

        let groups = combine(&batches, results, &key_by_g(), &SortPolicy::Default).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, GroupKey::from("a"));
        assert_eq!(groups[0].members, vec![1, 3]);
        assert_eq!(groups[1].key, GroupKey::from("b"));
        assert_eq!(groups[1].members, vec![2]);
    }

    #[test]
    fn test_failed_items_are_skipped_without_shifting() {
        let batches = batches(vec![vec![
            json!({"g": "a"}),
            json!({"g": "b"}),
            json!({"g": "a"}),
        ]]);
        let results = vec![vec![Slot::Value(10), Slot::Failed, Slot::Value(30)]];

        let groups = combine(&batches, results, &key_by_g(), &SortPolicy::Default).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, vec![10, 30]);
    }

    #[test]
    fn test_members_are_sorted_within_group() {
        let batches = batches(vec![vec![json!(1), json!(2), json!(3)]]);
        let results = vec![vec![Slot::Value(9), Slot::Value(2), Slot::Value(5)]];

        let groups = combine(&batches, results, &KeyPolicy::constant(), &SortPolicy::Default)
            .unwrap();
        assert_eq!(groups[0].key, GroupKey::from("task"));
        assert_eq!(groups[0].members, vec![2, 5, 9]);

        let descending = SortPolicy::by(|a: &i32, b: &i32| b.cmp(a));
        let batches = batches_of_three();
        let groups = combine(
            &batches,
            vec![vec![Slot::Value(9), Slot::Value(2), Slot::Value(5)]],
            &KeyPolicy::constant(),
            &descending,
        )
        .unwrap();
        assert_eq!(groups[0].members, vec![9, 5, 2]);
    }

    #[test]
    fn test_null_mapped_values_are_kept() {
        let batches = batches_of_three();
        let results = vec![vec![Slot::Value(None), Slot::Failed, Slot::Value(Some(3))]];

        let groups = combine(
            &batches,
            results,
            &KeyPolicy::constant(),
            &SortPolicy::by(|a: &Option<i32>, b: &Option<i32>| a.cmp(b)),
        )
        .unwrap();
        assert_eq!(groups[0].members, vec![None, Some(3)]);
    }

    fn batches_of_three() -> Vec<Batch<Value>> {
        batches(vec![vec![json!(1), json!(2), json!(3)]])
    }

    #[test]
    fn test_short_result_is_rejected() {
        let batches = batches(vec![vec![json!(1), json!(2)], vec![json!(3)]]);
        let results = vec![vec![Slot::Value(1), Slot::Value(2)], vec![]];

        let err = combine(&batches, results, &KeyPolicy::constant(), &SortPolicy::<i32>::Default)
            .unwrap_err();
        assert!(matches!(
            err,
            MapReduceError::MisalignedBatch {
                batch_index: 1,
                expected: 1,
                actual: 0
            }
        ));
    }

    #[test]
    fn test_missing_batch_result_is_rejected() {
        let batches = batches(vec![vec![json!(1)], vec![json!(2)]]);
        let err = align(&batches, vec![vec![Slot::Value(1)]]).unwrap_err();
        assert!(matches!(
            err,
            MapReduceError::MisalignedBatch { batch_index: 1, .. }
        ));
    }

    #[test]
    fn test_no_input_gives_no_groups() {
        let groups = combine::<Value, i32>(
            &[],
            Vec::new(),
            &KeyPolicy::constant(),
            &SortPolicy::Default,
        )
        .unwrap();
        assert!(groups.is_empty());
    }
}
