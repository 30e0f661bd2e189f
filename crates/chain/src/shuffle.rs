//! Lazy Fisher-Yates draw without replacement over `0..count`.

use std::collections::HashMap;

use rand::Rng;

pub struct ShuffleGenerator<R: Rng> {
    swapped: HashMap<u64, u64>,
    remaining: u64,
    rng: R,
}

impl<R: Rng> ShuffleGenerator<R> {
    pub fn new(count: u64, rng: R) -> Self {
        Self { swapped: HashMap::new(), remaining: count, rng }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Next unique index, or `None` once the range is exhausted.
    pub fn next_index(&mut self) -> Option<u64> {
        if self.remaining == 0 {
            return None;
        }
        let pick = self.rng.gen_range(0..self.remaining);
        let value = self.swapped.get(&pick).copied().unwrap_or(pick);
        let last = self.remaining - 1;
        let last_value = self.swapped.get(&last).copied().unwrap_or(last);
        self.swapped.insert(pick, last_value);
        self.swapped.remove(&last);
        self.remaining = last;
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn yields_every_index_exactly_once() {
        let mut generator = ShuffleGenerator::new(50, StdRng::seed_from_u64(7));
        let mut seen = vec![false; 50];
        while let Some(index) = generator.next_index() {
            assert!(!seen[index as usize], "index {index} repeated");
            seen[index as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn empty_range_yields_nothing() {
        let mut generator = ShuffleGenerator::new(0, StdRng::seed_from_u64(7));
        assert_eq!(generator.next_index(), None);
    }
}
