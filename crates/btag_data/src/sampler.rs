use crate::error::DataError;
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

/// A `Sampler` decides which window start offsets a cycle visits, and in
/// which order.
///
/// # Method
/// - `iter(epoch)`: returns the start offsets for one cycle over the source.
///    - The `epoch` parameter lets randomized samplers derive a fresh but
///      reproducible order per cycle from their base seed.
///
/// Every offset yielded must be a valid window start, i.e. at most
/// `total_events - batch_size`.
pub trait Sampler: Send + Sync {
    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_>;

    /// Number of offsets yielded per cycle.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returns every start offset `0, b, 2b, ...` up to and including
/// `total - batch_size`.
fn window_starts(total: usize, batch_size: usize) -> Result<Vec<usize>> {
    if batch_size == 0 || batch_size > total {
        return Err(DataError::config(format!(
            "batch_size must be in 1..={}, but got batch_size={}",
            total, batch_size
        ))
        .into());
    }
    Ok((0..=total - batch_size).step_by(batch_size).collect())
}

/// ============================================================================
/// Yields non-overlapping window starts in ascending order.
///
/// With 10 events and a batch size of 3 the starts are `0, 3, 6`; the
/// trailing event is never part of a window.
///
/// # Examples
/// ```ignore
/// let sampler = SequentialWindowSampler::new(10, 3)?;
/// let starts: Vec<_> = sampler.iter(0).collect();
/// assert_eq!(starts, vec![0, 3, 6]);
/// ```
#[derive(Debug, Clone)]
pub struct SequentialWindowSampler {
    starts: Vec<usize>,
}

impl SequentialWindowSampler {
    pub fn new(total_events: usize, batch_size: usize) -> Result<Self> {
        Ok(Self {
            starts: window_starts(total_events, batch_size)?,
        })
    }
}

impl Sampler for SequentialWindowSampler {
    fn iter(&self, _epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        Box::new(self.starts.iter().copied())
    }

    fn len(&self) -> usize {
        self.starts.len()
    }
}

/// ============================================================================
/// Visits the same window starts as [`SequentialWindowSampler`], in an order
/// shuffled once per epoch.
///
/// The RNG for epoch `e` is seeded with `base_seed + e`, so each cycle sees a
/// different order while a fixed `base_seed` reproduces every cycle exactly.
/// Events inside a window stay contiguous.
#[derive(Debug, Clone)]
pub struct ShuffledWindowSampler {
    starts: Vec<usize>,
    base_seed: u64,
}

impl ShuffledWindowSampler {
    pub fn new(total_events: usize, batch_size: usize, base_seed: u64) -> Result<Self> {
        Ok(Self {
            starts: window_starts(total_events, batch_size)?,
            base_seed,
        })
    }

    #[inline]
    fn derive_rng_for_epoch(&self, epoch: usize) -> StdRng {
        StdRng::seed_from_u64(self.base_seed.wrapping_add(epoch as u64))
    }
}

impl Sampler for ShuffledWindowSampler {
    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        let mut rng = self.derive_rng_for_epoch(epoch);
        let mut starts = self.starts.clone();
        starts.shuffle(&mut rng);
        Box::new(starts.into_iter())
    }

    fn len(&self) -> usize {
        self.starts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_starts() -> Result<()> {
        let cases = [
            (10, 3, vec![0, 3, 6]),
            (9, 3, vec![0, 3, 6]),
            (10, 10, vec![0]),
            (10, 1, (0..10).collect()),
            (7, 4, vec![0]),
        ];
        for (total, batch_size, expected) in cases {
            let sampler = SequentialWindowSampler::new(total, batch_size)?;
            assert_eq!(sampler.iter(0).collect::<Vec<_>>(), expected);
            assert_eq!(sampler.len(), expected.len());
            // order does not depend on the epoch
            assert_eq!(sampler.iter(5).collect::<Vec<_>>(), expected);
        }
        Ok(())
    }

    #[test]
    fn test_invalid_batch_size() {
        for (total, batch_size) in [(10, 0), (10, 11), (0, 1)] {
            let err = SequentialWindowSampler::new(total, batch_size).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<DataError>(),
                Some(DataError::Config(_))
            ));
            assert!(ShuffledWindowSampler::new(total, batch_size, 0).is_err());
        }
    }

    #[test]
    fn test_shuffled_is_a_reproducible_permutation() -> Result<()> {
        let sampler = ShuffledWindowSampler::new(1000, 10, 42)?;
        let first: Vec<usize> = sampler.iter(0).collect();
        let again: Vec<usize> = sampler.iter(0).collect();
        assert_eq!(first, again);

        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..=990).step_by(10).collect::<Vec<_>>());

        let next_epoch: Vec<usize> = sampler.iter(1).collect();
        assert_ne!(first, next_epoch);

        let other_seed = ShuffledWindowSampler::new(1000, 10, 43)?;
        assert_eq!(other_seed.iter(0).collect::<Vec<_>>(), next_epoch);
        Ok(())
    }
}
