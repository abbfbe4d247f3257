//! Order-preserving deduplication

use std::collections::HashSet;
use std::hash::Hash;

use tracing::trace;

/// Keep the first occurrence of every item, dropping later repeats.
///
/// Comparison is exact equality, so strings are deduplicated case-sensitively.
pub fn dedup<T>(items: Vec<T>) -> Vec<T>
where
    T: Eq + Hash + Clone,
{
    if items.len() < 2 {
        return items;
    }

    let total = items.len();
    let mut seen = HashSet::with_capacity(total);
    let unique: Vec<T> = items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect();

    trace!(removed = total - unique.len(), "Removed duplicates");

    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dedup_keeps_first_occurrence_order() {
        let out = dedup(strings(&["b", "a", "b", "c", "a"]));
        assert_eq!(out, strings(&["b", "a", "c"]));
    }

    #[test]
    fn test_dedup_is_case_sensitive() {
        let out = dedup(strings(&["Example.com", "example.com"]));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_dedup_short_inputs_pass_through() {
        assert!(dedup(Vec::<String>::new()).is_empty());
        assert_eq!(dedup(strings(&["only"])), strings(&["only"]));
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let inputs = [
            strings(&["x", "y", "x", "x", "z", "y"]),
            strings(&["a", "a", "a"]),
            strings(&["1", "2", "3"]),
        ];

        for input in inputs {
            let once = dedup(input.clone());
            let twice = dedup(once.clone());
            assert_eq!(once, twice);

            let unique: HashSet<_> = once.iter().collect();
            assert_eq!(unique.len(), once.len(), "no repeated elements");

            // first occurrences appear in the same relative order as the input
            let mut expected = Vec::new();
            for item in &input {
                if !expected.contains(item) {
                    expected.push(item.clone());
                }
            }
            assert_eq!(once, expected);
        }
    }
}
