use rand::Rng;

/// Table-driven weighted choice between traffic variants.
///
/// Mixed-traffic scenarios map each variant to a weight and draw a fresh variant every
/// iteration, replacing chains of hand-written random-threshold conditionals.
pub struct WeightedChoice<T> {
    entries: Vec<(u32, T)>,
    total: u32,
}

impl<T> WeightedChoice<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            total: 0,
        }
    }

    /// Add a variant. Zero-weight variants would never be drawn and are rejected.
    pub fn add(mut self, weight: u32, item: T) -> Self {
        assert!(weight > 0, "variant weight must be positive");
        self.total += weight;
        self.entries.push((weight, item));
        self
    }

    pub fn choose(&self) -> &T {
        self.choose_with(&mut rand::thread_rng())
    }

    pub fn choose_with(&self, rng: &mut impl Rng) -> &T {
        assert!(!self.entries.is_empty(), "no variants registered");

        let mut draw = rng.gen_range(0..self.total);
        for (weight, item) in &self.entries {
            if draw < *weight {
                return item;
            }
            draw -= weight;
        }
        // gen_range is exclusive of the upper bound, so the loop always returns.
        unreachable!("weighted draw out of range")
    }
}

impl<T> Default for WeightedChoice<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn respects_weights() {
        let table = WeightedChoice::new().add(40, "health").add(30, "device").add(30, "measure");
        let mut rng = StdRng::seed_from_u64(7);

        let mut counts = std::collections::HashMap::new();
        for _ in 0..10_000 {
            *counts.entry(*table.choose_with(&mut rng)).or_insert(0u32) += 1;
        }

        let health = counts["health"] as f64 / 10_000.0;
        assert!((0.35..0.45).contains(&health), "health share {health}");
        assert!(counts["device"] > 0 && counts["measure"] > 0);
    }

    #[test]
    fn single_variant_always_wins() {
        let table = WeightedChoice::new().add(1, 42);
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..10 {
            assert_eq!(*table.choose_with(&mut rng), 42);
        }
    }

    #[test]
    #[should_panic(expected = "weight must be positive")]
    fn rejects_zero_weight() {
        let _ = WeightedChoice::new().add(0, ());
    }
}
