//! Seeded pseudo-random generator driving scenario construction.
//!
//! Everything downstream derives its randomness from repeated `next()` calls
//! on this one mixing function, so two runs with the same seed make the same
//! logical decisions forever. Inserting or removing a `next()` call shifts
//! every later value; that is the accepted cost of determinism by
//! construction, not a bug.
const ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Deterministic 32-bit-state generator (mulberry32 mixing transform).
///
/// Not cryptographic: the goal is byte-identical sequences across platforms
/// and runs, not unpredictability.
#[derive(Debug, Clone)]
pub struct FuzzRng {
    state: u32,
}

impl FuzzRng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Derive an independent stream for a logical sub-sequence.
    ///
    /// Scenario `i` uses `seed + i * 1000 + 1` so per-scenario streams never
    /// depend on how much randomness earlier scenarios consumed.
    pub fn derive(seed: u32, offset: u32) -> Self {
        Self::new(seed.wrapping_add(offset))
    }

    /// Next value in `[0.0, 1.0)`.
    pub fn next(&mut self) -> f64 {
        self.state = self.state.wrapping_add(0x6d2b_79f5);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        f64::from(t ^ (t >> 14)) / 4_294_967_296.0
    }

    /// Integer in `[0, max)`; returns 0 when `max` is 0.
    ///
    /// Always consumes exactly one `next()` call so the stream position does
    /// not depend on the bound.
    pub fn random_int(&mut self, max: usize) -> usize {
        let roll = self.next();
        if max == 0 {
            return 0;
        }
        let value = (roll * max as f64) as usize;
        value.min(max - 1)
    }

    /// Integer in `[min, max]`; `min` wins when the bounds are inverted.
    pub fn random_int_inclusive(&mut self, min: usize, max: usize) -> usize {
        if max <= min {
            // Keep the stream advancing even for degenerate bounds.
            let _ = self.next();
            return min;
        }
        min + self.random_int(max - min + 1)
    }

    /// Pick one element; `None` only for an empty slice.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            let _ = self.next();
            return None;
        }
        let index = self.random_int(items.len());
        items.get(index)
    }

    /// In-place Fisher-Yates shuffle driven by `next()`.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        if items.len() < 2 {
            return;
        }
        for i in (1..items.len()).rev() {
            let j = self.random_int(i + 1);
            items.swap(i, j);
        }
    }

    /// Random subset of up to `max_size` elements, in shuffled order.
    pub fn random_subset<T: Clone>(&mut self, items: &[T], max_size: usize) -> Vec<T> {
        let mut pool: Vec<T> = items.to_vec();
        self.shuffle(&mut pool);
        let take = self.random_int_inclusive(0, max_size.min(pool.len()));
        pool.truncate(take);
        pool
    }

    /// Short lowercase-alphanumeric identifier fragment.
    pub fn short_alnum(&mut self, len: usize) -> String {
        (0..len)
            .map(|_| ALNUM[self.random_int(ALNUM.len())] as char)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn all_distinct<T: Ord>(values: &[T]) -> bool {
        values.iter().collect::<BTreeSet<_>>().len() == values.len()
    }

    #[test]
    fn identical_seeds_yield_identical_sequences() {
        let mut a = FuzzRng::new(42);
        let mut b = FuzzRng::new(42);
        for _ in 0..1000 {
            assert_eq!(a.next().to_bits(), b.next().to_bits());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = FuzzRng::new(1);
        let mut b = FuzzRng::new(2);
        assert_ne!(a.next().to_bits(), b.next().to_bits());
    }

    #[test]
    fn next_stays_in_unit_interval() {
        let mut rng = FuzzRng::new(999);
        for _ in 0..10_000 {
            let v = rng.next();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn random_int_respects_bound() {
        let mut rng = FuzzRng::new(7);
        for _ in 0..10_000 {
            assert!(rng.random_int(10) < 10);
        }
        assert_eq!(rng.random_int(0), 0);
        assert_eq!(rng.random_int(1), 0);
    }

    #[test]
    fn random_int_inclusive_covers_both_ends() {
        let mut rng = FuzzRng::new(11);
        let mut seen = BTreeSet::new();
        for _ in 0..1000 {
            seen.insert(rng.random_int_inclusive(8, 20));
        }
        assert!(seen.contains(&8));
        assert!(seen.contains(&20));
        assert!(seen.iter().all(|v| (8..=20).contains(v)));
    }

    #[test]
    fn shuffle_is_a_permutation_and_deterministic() {
        let mut a = FuzzRng::new(5);
        let mut b = FuzzRng::new(5);
        let mut left: Vec<u32> = (0..32).collect();
        let mut right: Vec<u32> = (0..32).collect();
        a.shuffle(&mut left);
        b.shuffle(&mut right);
        assert_eq!(left, right);
        let mut sorted = left.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..32).collect::<Vec<u32>>());
    }

    #[test]
    fn random_subset_is_bounded() {
        let mut rng = FuzzRng::new(13);
        let items: Vec<u32> = (0..10).collect();
        for _ in 0..200 {
            let subset = rng.random_subset(&items, 4);
            assert!(subset.len() <= 4);
            assert!(all_distinct(&subset));
        }
    }

    #[test]
    fn short_alnum_is_lowercase_alnum() {
        let mut rng = FuzzRng::new(17);
        let s = rng.short_alnum(12);
        assert_eq!(s.len(), 12);
        assert!(s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn pick_consumes_stream_even_when_empty() {
        let mut a = FuzzRng::new(23);
        let mut b = FuzzRng::new(23);
        let empty: [u32; 0] = [];
        assert!(a.pick(&empty).is_none());
        let _ = b.next();
        assert_eq!(a.next().to_bits(), b.next().to_bits());
    }
}
