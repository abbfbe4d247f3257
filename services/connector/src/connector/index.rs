//! Snapshot of the seeds a scan holds at the start of a run

use std::collections::HashMap;

use crate::inventory::Seed;

/// Seeds keyed by name, remembering the order the inventory returned them in
#[derive(Debug, Default)]
pub struct SeedIndex {
    by_name: HashMap<String, Seed>,
    order: Vec<String>,
}

impl SeedIndex {
    /// Build the index. A repeated name keeps the later seed.
    pub fn from_seeds(seeds: Vec<Seed>) -> Self {
        let mut index = Self {
            by_name: HashMap::with_capacity(seeds.len()),
            order: Vec::with_capacity(seeds.len()),
        };

        for seed in seeds {
            let name = seed.name.clone();
            if index.by_name.insert(name.clone(), seed).is_none() {
                index.order.push(name);
            }
        }

        index
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Remove and return the seed with this name, marking it as kept
    pub fn take(&mut self, name: &str) -> Option<Seed> {
        self.by_name.remove(name)
    }

    /// Consume the index, yielding the seeds never taken, in fetch order
    pub fn into_remaining(mut self) -> Vec<Seed> {
        self.order
            .iter()
            .filter_map(|name| self.by_name.remove(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(id: &str, name: &str) -> Seed {
        Seed {
            id: id.to_string(),
            name: name.to_string(),
            tags: vec![],
        }
    }

    #[test]
    fn test_take_removes_entry() {
        let mut index = SeedIndex::from_seeds(vec![seed("1", "a.com"), seed("2", "b.com")]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.take("a.com").map(|s| s.id), Some("1".to_string()));
        assert!(index.take("a.com").is_none());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remaining_in_fetch_order() {
        let mut index = SeedIndex::from_seeds(vec![
            seed("1", "c.com"),
            seed("2", "a.com"),
            seed("3", "b.com"),
        ]);
        index.take("a.com");

        let names: Vec<_> = index.into_remaining().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["c.com", "b.com"]);
    }

    #[test]
    fn test_duplicate_name_keeps_later_seed() {
        let index = SeedIndex::from_seeds(vec![seed("1", "a.com"), seed("2", "a.com")]);
        let remaining = index.into_remaining();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "2");
    }
}
