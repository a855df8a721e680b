//! ⚖️ The assigner: slices N partitions across T tasks, contiguously, fairly, forever the same way.
//!
//! When there are at least as many tasks as partitions, task `i` gets `partitions[i]` or nothing.
//! Otherwise the first `N % T` tasks get one extra, and task `i` starts at
//! `base * i + min(i, remainder)`. Concatenate every task's slice in task order and you get the
//! original list back, no gaps, no overlaps.

use anyhow::Result;

use crate::error::PartitionError;

/// 🔪 The contiguous slice of `partitions` that belongs to task `task` (0-based) of `total`.
pub fn assign_partitions<T>(partitions: &[T], task: usize, total: usize) -> Result<&[T]> {
    let len = partitions.len();
    if total == 0 {
        return Err(PartitionError::InvalidTask { task, total }.into());
    }
    if total >= len {
        return Ok(partitions.get(task).map(std::slice::from_ref).unwrap_or(&[]));
    }
    if task >= total {
        return Err(PartitionError::InvalidTask { task, total }.into());
    }

    let base = len / total;
    let remainder = len % total;
    let offset = base * task + task.min(remainder);
    let count = base + usize::from(task < remainder);
    Ok(&partitions[offset..offset + count])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_task<T: Clone>(partitions: &[T], total: usize) -> Result<Vec<Vec<T>>> {
        (0..total)
            .map(|task| assign_partitions(partitions, task, total).map(<[T]>::to_vec))
            .collect()
    }

    #[test]
    fn the_one_where_seven_shards_meet_three_tasks() -> Result<()> {
        let partitions: Vec<u32> = (0..7).collect();
        assert_eq!(
            every_task(&partitions, 3)?,
            vec![vec![0, 1, 2], vec![3, 4], vec![5, 6]]
        );
        Ok(())
    }

    #[test]
    fn the_one_where_two_shards_meet_five_tasks() -> Result<()> {
        let partitions = ["a", "b"];
        assert_eq!(
            every_task(&partitions, 5)?,
            vec![vec!["a"], vec!["b"], vec![], vec![], vec![]]
        );
        Ok(())
    }

    #[test]
    fn the_one_where_every_split_puts_the_list_back_together() -> Result<()> {
        for len in 0..=25usize {
            let partitions: Vec<usize> = (0..len).collect();
            for total in 1..=12usize {
                let assigned = every_task(&partitions, total)?;
                let rebuilt: Vec<usize> = assigned.iter().flatten().copied().collect();
                assert_eq!(rebuilt, partitions, "N={len} T={total} lost or reordered something");

                let sizes: Vec<usize> = assigned.iter().map(Vec::len).collect();
                let (min, max) = (sizes.iter().min(), sizes.iter().max());
                assert!(
                    max.zip(min).is_some_and(|(max, min)| max - min <= 1),
                    "N={len} T={total} is unfair: {sizes:?}"
                );
                if total >= len {
                    assert!(sizes[..len].iter().all(|&s| s == 1));
                    assert!(sizes[len..].iter().all(|&s| s == 0));
                }
            }
        }
        Ok(())
    }

    #[test]
    fn the_one_where_nonsense_task_numbers_are_refused() {
        let partitions = [1, 2, 3, 4];
        let err = assign_partitions(&partitions, 0, 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PartitionError>(),
            Some(PartitionError::InvalidTask { task: 0, total: 0 })
        ));
        assert!(assign_partitions(&partitions, 2, 2).is_err());
        // -- 📭 more tasks than partitions: tasks past the end get nothing
        assert!(assign_partitions(&partitions, 5, 9).map(<[i32]>::is_empty).unwrap_or(false));
    }
}
