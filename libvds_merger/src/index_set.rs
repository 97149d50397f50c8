//! Ordered sets of train IDs and the set algebra used during alignment.
use bitvec::vec::BitVec;

/// An ascending, duplicate free set of acquisition event (train) IDs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSet {
    ids: Vec<u64>,
}

impl IndexSet {
    /// Build a set from arbitrary ids. Input order and duplicates are discarded.
    pub fn new(mut ids: Vec<u64>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.ids
    }

    pub fn into_vec(self) -> Vec<u64> {
        self.ids
    }

    pub fn contains(&self, id: &u64) -> bool {
        self.ids.binary_search(id).is_ok()
    }

    pub fn first(&self) -> Option<&u64> {
        self.ids.first()
    }

    pub fn last(&self) -> Option<&u64> {
        self.ids.last()
    }

    /// Intersection of two sets in ascending order
    pub fn intersect(&self, other: &IndexSet) -> IndexSet {
        let mut ids = Vec::with_capacity(self.len().min(other.len()));
        let (mut i, mut j) = (0, 0);
        while i < self.ids.len() && j < other.ids.len() {
            match self.ids[i].cmp(&other.ids[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    ids.push(self.ids[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        IndexSet { ids }
    }

    /// Left fold of pairwise intersections. No sets at all yields the empty set.
    pub fn intersect_all<'a, I>(sets: I) -> IndexSet
    where
        I: IntoIterator<Item = &'a IndexSet>,
    {
        let mut sets = sets.into_iter();
        match sets.next() {
            Some(first) => sets.fold(first.clone(), |acc, set| acc.intersect(set)),
            None => IndexSet::empty(),
        }
    }

    /// Mask over `universe` marking the entries that are members of this set
    pub fn membership_mask(&self, universe: &[u64]) -> BitVec {
        universe.iter().map(|id| self.contains(id)).collect()
    }
}

impl FromIterator<u64> for IndexSet {
    fn from_iter<T: IntoIterator<Item = u64>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Intersect two unsorted id arrays, returning the ascending common ids together with the
/// position of each common id's first occurrence in `a` and in `b`.
pub fn intersect_indices(a: &[u64], b: &[u64]) -> (IndexSet, Vec<usize>, Vec<usize>) {
    let common = IndexSet::new(a.to_vec()).intersect(&IndexSet::new(b.to_vec()));
    let a_idx = first_occurrences(a, &common);
    let b_idx = first_occurrences(b, &common);
    (common, a_idx, b_idx)
}

fn first_occurrences(values: &[u64], common: &IndexSet) -> Vec<usize> {
    let mut positions: Vec<Option<usize>> = vec![None; common.len()];
    for (row, value) in values.iter().enumerate() {
        if let Ok(slot) = common.as_slice().binary_search(value) {
            if positions[slot].is_none() {
                positions[slot] = Some(row);
            }
        }
    }
    positions.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_intersect_scenario() {
        let a = IndexSet::new(vec![1, 2, 3, 5]);
        let b = IndexSet::new(vec![2, 3, 4, 5]);
        assert_eq!(a.intersect(&b).as_slice(), &[2, 3, 5]);
    }

    #[test]
    fn test_new_sorts_and_dedups() {
        let set = IndexSet::new(vec![9, 3, 3, 7, 1, 9]);
        assert_eq!(set.as_slice(), &[1, 3, 7, 9]);
    }

    #[test]
    fn test_empty_intersections() {
        let a = IndexSet::new(vec![1, 2]);
        assert!(a.intersect(&IndexSet::empty()).is_empty());
        assert!(IndexSet::empty().intersect(&a).is_empty());
        assert!(IndexSet::intersect_all(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_membership_mask() {
        let set = IndexSet::new(vec![2, 5]);
        let mask = set.membership_mask(&[5, 1, 2, 2, 7]);
        let bits: Vec<bool> = mask.iter().by_vals().collect();
        assert_eq!(bits, vec![true, false, true, true, false]);
    }

    #[test]
    fn test_intersect_indices_first_occurrence() {
        let a = vec![30, 10, 20, 10];
        let b = vec![20, 20, 40, 30];
        let (common, a_idx, b_idx) = intersect_indices(&a, &b);
        assert_eq!(common.as_slice(), &[20, 30]);
        assert_eq!(a_idx, vec![2, 0]);
        assert_eq!(b_idx, vec![0, 3]);
    }

    fn id_set() -> impl Strategy<Value = IndexSet> {
        prop::collection::vec(0u64..64, 0..40).prop_map(IndexSet::new)
    }

    proptest! {
        #[test]
        fn prop_intersect_commutative(a in id_set(), b in id_set()) {
            prop_assert_eq!(a.intersect(&b), b.intersect(&a));
        }

        #[test]
        fn prop_intersect_associative(a in id_set(), b in id_set(), c in id_set()) {
            prop_assert_eq!(a.intersect(&b).intersect(&c), a.intersect(&b.intersect(&c)));
        }

        #[test]
        fn prop_intersection_strictly_increasing(a in id_set(), b in id_set()) {
            let common = a.intersect(&b);
            prop_assert!(common.as_slice().windows(2).all(|w| w[0] < w[1]));
            prop_assert!(common.len() <= a.len().min(b.len()));
        }
    }
}
