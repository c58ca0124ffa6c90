//! Generic desired/current diff keyed by a natural key

use std::collections::HashMap;
use std::hash::Hash;

/// Outcome of [`diff_by_id`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<T> {
    /// Present only in the desired list
    pub to_create: Vec<T>,

    /// Present only in the current list
    pub to_delete: Vec<T>,

    /// Present on both sides, as `(current, desired)`, to be checked for drift
    pub to_check: Vec<(T, T)>,
}

impl<T> Diff<T> {
    pub fn is_unchanged(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

impl<T> Default for Diff<T> {
    fn default() -> Self {
        Self {
            to_create: Vec::new(),
            to_delete: Vec::new(),
            to_check: Vec::new(),
        }
    }
}

/// Partition `desired` and `current` by `key`
///
/// Items keep their input order. A key repeated in `desired` is only acted
/// upon once; a key repeated in `current` pairs its first occurrence and
/// schedules the duplicates for deletion.
pub fn diff_by_id<T, K, F>(desired: &[T], current: &[T], key: F) -> Diff<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut current_by_key: HashMap<K, usize> = HashMap::with_capacity(current.len());
    let mut duplicates = Vec::new();
    for (index, item) in current.iter().enumerate() {
        let k = key(item);
        if current_by_key.contains_key(&k) {
            duplicates.push(index);
        } else {
            current_by_key.insert(k, index);
        }
    }

    let mut diff = Diff::default();
    let mut matched = vec![false; current.len()];
    let mut seen_desired = std::collections::HashSet::with_capacity(desired.len());

    for item in desired {
        let k = key(item);
        if let Some(&index) = current_by_key.get(&k) {
            if !matched[index] {
                matched[index] = true;
                diff.to_check.push((current[index].clone(), item.clone()));
            }
        } else if seen_desired.insert(k) {
            diff.to_create.push(item.clone());
        }
    }

    for (index, item) in current.iter().enumerate() {
        if !matched[index] || duplicates.contains(&index) {
            diff.to_delete.push(item.clone());
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Subnet {
        id: &'static str,
        zone: &'static str,
        cidr: &'static str,
    }

    fn subnet(id: &'static str, zone: &'static str, cidr: &'static str) -> Subnet {
        Subnet { id, zone, cidr }
    }

    fn key(s: &Subnet) -> (&'static str, &'static str) {
        (s.zone, s.cidr)
    }

    #[test]
    fn test_partition() {
        let desired = vec![
            subnet("", "a", "10.0.0.0/24"),
            subnet("", "b", "10.0.1.0/24"),
        ];
        let current = vec![
            subnet("vsw-1", "a", "10.0.0.0/24"),
            subnet("vsw-2", "c", "10.0.2.0/24"),
        ];

        let diff = diff_by_id(&desired, &current, key);
        assert_eq!(diff.to_create, vec![subnet("", "b", "10.0.1.0/24")]);
        assert_eq!(diff.to_delete, vec![subnet("vsw-2", "c", "10.0.2.0/24")]);
        assert_eq!(diff.to_check.len(), 1);
        assert_eq!(diff.to_check[0].0.id, "vsw-1");
        assert!(!diff.is_unchanged());
    }

    #[test]
    fn test_identical_lists_are_unchanged() {
        let items = vec![subnet("vsw-1", "a", "10.0.0.0/24")];
        let diff = diff_by_id(&items, &items, key);
        assert!(diff.is_unchanged());
        assert_eq!(diff.to_check.len(), 1);
    }

    #[test]
    fn test_duplicates() {
        let desired = vec![
            subnet("", "a", "10.0.0.0/24"),
            subnet("", "a", "10.0.0.0/24"),
            subnet("", "b", "10.0.1.0/24"),
            subnet("", "b", "10.0.1.0/24"),
        ];
        let current = vec![
            subnet("vsw-1", "a", "10.0.0.0/24"),
            subnet("vsw-2", "a", "10.0.0.0/24"),
        ];

        let diff = diff_by_id(&desired, &current, key);
        assert_eq!(diff.to_check.len(), 1);
        assert_eq!(diff.to_create.len(), 1);
        assert_eq!(diff.to_delete, vec![subnet("vsw-2", "a", "10.0.0.0/24")]);
    }

    /// Every key lands in exactly one bucket, and the buckets cover both inputs.
    #[test]
    fn test_sets_are_disjoint_and_complete() {
        let zones = ["a", "b", "c", "d"];
        let cidrs = ["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24"];
        let universe: Vec<Subnet> = zones
            .iter()
            .flat_map(|z| cidrs.iter().map(move |c| subnet("", z, c)))
            .collect();

        // Deterministic pseudo-random subsets.
        let mut seed = 0x2545_f491_u64;
        for _ in 0..200 {
            let mut pick = || {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                seed
            };
            let desired: Vec<Subnet> = universe
                .iter()
                .filter(|_| pick() % 2 == 0)
                .cloned()
                .collect();
            let current: Vec<Subnet> = universe
                .iter()
                .filter(|_| pick() % 3 == 0)
                .cloned()
                .collect();

            let diff = diff_by_id(&desired, &current, key);

            let create: HashSet<_> = diff.to_create.iter().map(key).collect();
            let delete: HashSet<_> = diff.to_delete.iter().map(key).collect();
            let check: HashSet<_> = diff.to_check.iter().map(|(c, _)| key(c)).collect();

            assert!(create.is_disjoint(&delete));
            assert!(create.is_disjoint(&check));
            assert!(delete.is_disjoint(&check));

            let want: HashSet<_> = desired.iter().chain(current.iter()).map(key).collect();
            let got: HashSet<_> = create.union(&delete).chain(check.iter()).cloned().collect();
            assert_eq!(want, got);

            let desired_keys: HashSet<_> = desired.iter().map(key).collect();
            let current_keys: HashSet<_> = current.iter().map(key).collect();
            assert_eq!(check, &desired_keys & &current_keys);
        }
    }
}
