use std::num::NonZeroUsize;
use std::ops::Range;

use log::warn;

/// Splits `total` users among `num_workers` and returns the block owned by `worker_id`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)`.
/// - Sizes differ by at most 1, the first `total % num_workers` workers get the extra user.
/// - The last worker's block always reaches `total`.
///
/// # Panics
/// If `num_workers` is zero or `worker_id` is out of range.
pub fn shard_range(total: usize, worker_id: usize, num_workers: usize) -> Range<usize> {
    assert!(num_workers > 0);
    assert!(worker_id < num_workers);

    let base = total / num_workers;
    let rem = total % num_workers;

    let start = worker_id * base + worker_id.min(rem);
    let extra = if worker_id < rem { 1 } else { 0 };
    let mut end = start + base + extra;

    if worker_id == num_workers - 1 && end < total {
        warn!(worker_id = worker_id, end = end, total = total; "clamping last block to the user count");
        end = total;
    }

    start..end
}

/// Shard specification for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub worker_id: usize,
    pub num_workers: NonZeroUsize,
}

impl ShardSpec {
    pub fn new(worker_id: usize, num_workers: NonZeroUsize) -> Self {
        assert!(worker_id < num_workers.get(), "worker_id out of range");
        Self {
            worker_id,
            num_workers,
        }
    }

    #[inline]
    pub fn range(self, total: usize) -> Range<usize> {
        shard_range(total, self.worker_id, self.num_workers.get())
    }

    /// Block length of every worker, in worker order.
    pub fn sizes(self, total: usize) -> Vec<usize> {
        let workers = self.num_workers.get();
        (0..workers)
            .map(|w| shard_range(total, w, workers).len())
            .collect()
    }
}

/// Offsets at which each block starts when blocks of `sizes` are laid out back to back.
pub fn displacements(sizes: &[usize]) -> Vec<usize> {
    sizes
        .iter()
        .scan(0, |offset, size| {
            let start = *offset;
            *offset += size;
            Some(start)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_range_balanced() {
        // total 10, workers 3 => sizes 4,3,3
        assert_eq!(shard_range(10, 0, 3), 0..4);
        assert_eq!(shard_range(10, 1, 3), 4..7);
        assert_eq!(shard_range(10, 2, 3), 7..10);
    }

    #[test]
    fn seven_users_three_workers() {
        let spec = ShardSpec::new(0, NonZeroUsize::new(3).unwrap());
        let sizes = spec.sizes(7);

        assert_eq!(sizes, vec![3, 2, 2]);
        assert_eq!(displacements(&sizes), vec![0, 3, 5]);
    }

    #[test]
    fn more_workers_than_users_leaves_trailing_blocks_empty() {
        assert_eq!(shard_range(2, 0, 4), 0..1);
        assert_eq!(shard_range(2, 1, 4), 1..2);
        assert_eq!(shard_range(2, 2, 4), 2..2);
        assert_eq!(shard_range(2, 3, 4), 2..2);
        assert_eq!(shard_range(0, 0, 1), 0..0);
    }

    #[test]
    fn shard_spec_range_matches_function() {
        let spec = ShardSpec::new(1, NonZeroUsize::new(3).unwrap());
        assert_eq!(spec.range(10), 4..7);
    }

    #[test]
    fn every_user_is_owned_exactly_once() {
        for total in 0..64 {
            for workers in 1..12 {
                let mut owner = vec![None; total];
                let mut next = 0;

                for w in 0..workers {
                    let range = shard_range(total, w, workers);
                    assert_eq!(range.start, next, "gap or overlap at worker {w}");
                    next = range.end;

                    for u in range {
                        assert!(owner[u].replace(w).is_none(), "user {u} owned twice");
                    }
                }

                assert_eq!(next, total);
                assert!(owner.iter().all(Option::is_some));
            }
        }
    }

    #[test]
    fn blocks_differ_by_at_most_one() {
        for total in 0..200 {
            for workers in 1..17 {
                let spec = ShardSpec::new(0, NonZeroUsize::new(workers).unwrap());
                let sizes = spec.sizes(total);
                let max = sizes.iter().max().unwrap();
                let min = sizes.iter().min().unwrap();
                assert!(max - min <= 1, "total={total} workers={workers} sizes={sizes:?}");
            }
        }
    }

    #[test]
    fn last_block_reaches_total_without_clamping() {
        // The balanced formula already ends at `total`, the clamp is only a backstop.
        for total in 0..500 {
            for workers in 1..33 {
                let base = total / workers;
                let rem = total % workers;
                let last = workers - 1;
                let unclamped = last * base + last.min(rem) + base + usize::from(last < rem);
                assert_eq!(unclamped, total);
            }
        }
    }
}
