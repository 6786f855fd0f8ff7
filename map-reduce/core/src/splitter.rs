// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::error::ConfigError;

/// Contiguous slice of the input assigned to exactly one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    pub index: usize,
    pub items: Vec<T>,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Partitions `items` into at most `pool_size` contiguous batches of
/// `ceil(len / pool_size)` items each; only the last batch may be shorter.
pub fn split<T>(items: Vec<T>, pool_size: usize) -> Result<Vec<Batch<T>>, ConfigError> {
    if pool_size == 0 {
        return Err(ConfigError::InvalidPoolSize(pool_size));
    }
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let batch_size = items.len().div_ceil(pool_size);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut remaining = items.into_iter().peekable();

    while remaining.peek().is_some() {
        let items: Vec<T> = remaining.by_ref().take(batch_size).collect();
        batches.push(Batch {
            index: batches.len(),
            items,
        });
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flatten(batches: &[Batch<u32>]) -> Vec<u32> {
        batches.iter().flat_map(|b| b.items.iter().copied()).collect()
    }

    #[test]
    fn test_split_preserves_order_and_bounds_batch_count() {
        for len in 0..40u32 {
            for pool_size in 1..12 {
                let input: Vec<u32> = (0..len).collect();
                let batches = split(input.clone(), pool_size).unwrap();

                assert!(batches.len() <= pool_size);
                assert_eq!(flatten(&batches), input);
                assert!(batches.iter().all(|b| !b.is_empty()));
                for (i, batch) in batches.iter().enumerate() {
                    assert_eq!(batch.index, i);
                }
            }
        }
    }

    #[test]
    fn test_only_last_batch_may_be_shorter() {
        let batches = split((0..10).collect::<Vec<u32>>(), 4).unwrap();
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn test_single_worker_gets_everything() {
        let batches = split(vec![1, 2, 3], 1).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].items, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_input_yields_no_batches() {
        let batches = split(Vec::<u32>::new(), 8).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn test_zero_pool_size_is_rejected() {
        assert!(matches!(
            split(vec![1], 0),
            Err(ConfigError::InvalidPoolSize(0))
        ));
    }
}
