//! Contract label allocation without repetition.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeSet;

/// Default pool of human-readable contract names.
pub const CONTRACT_LABELS: &[&str] = &[
    "Harbor Expansion",
    "Rail Corridor",
    "Grid Upgrade",
    "Hospital Wing",
    "Stadium Retrofit",
    "Airport Terminal",
    "Water Treatment",
    "Transit Depot",
    "Data Center",
    "Wind Farm",
    "Bridge Repair",
    "Housing Block",
];

/// Hands out labels from a fixed pool, never two active at once.
///
/// When every pool label is in use, falls back to `Contract N`.
#[derive(Clone, Debug)]
pub struct LabelPool {
    pool: Vec<String>,
    in_use: BTreeSet<String>,
}

impl LabelPool {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pool: Vec<String> = Vec::new();
        for label in labels {
            let label = label.into();
            if !pool.contains(&label) {
                pool.push(label);
            }
        }
        Self {
            pool,
            in_use: BTreeSet::new(),
        }
    }

    pub fn standard() -> Self {
        Self::new(CONTRACT_LABELS.iter().copied())
    }

    /// Draw an unused label at random, or `Contract {position}`.
    pub fn allocate<R: Rng + ?Sized>(&mut self, position: u64, rng: &mut R) -> String {
        let free: Vec<&String> = self
            .pool
            .iter()
            .filter(|l| !self.in_use.contains(*l))
            .collect();
        let label = match free.choose(rng) {
            Some(l) => (*l).clone(),
            None => format!("Contract {position}"),
        };
        self.in_use.insert(label.clone());
        label
    }

    pub fn release(&mut self, label: &str) {
        self.in_use.remove(label);
    }

    pub fn clear(&mut self) {
        self.in_use.clear();
    }

    /// Pool labels not currently in use.
    pub fn available(&self) -> usize {
        self.pool
            .iter()
            .filter(|l| !self.in_use.contains(*l))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn labels_do_not_repeat_until_exhausted() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut pool = LabelPool::new(["A", "B", "C"]);
        let mut seen = BTreeSet::new();
        for n in 1..=3 {
            assert!(seen.insert(pool.allocate(n, &mut rng)));
        }
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.allocate(4, &mut rng), "Contract 4");
        assert_eq!(pool.allocate(5, &mut rng), "Contract 5");
    }

    #[test]
    fn released_labels_return_to_pool() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut pool = LabelPool::new(["A", "A", "B"]);
        assert_eq!(pool.available(), 2);
        let first = pool.allocate(1, &mut rng);
        pool.allocate(2, &mut rng);
        pool.release(&first);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.allocate(3, &mut rng), first);
        pool.clear();
        assert_eq!(pool.available(), 2);
    }
}
