use rayon::prelude::*;

use crate::features::Descriptor;

/// Correspondence between a query descriptor and a train descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: u32,
}

/// Number of differing bits
#[inline]
pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Brute-force matcher under the Hamming norm
#[derive(Debug, Clone, Copy)]
pub struct BruteForceMatcher {
    /// Keep a pair only if each side is the other's nearest neighbour
    pub cross_check: bool,
}

impl Default for BruteForceMatcher {
    fn default() -> Self {
        Self { cross_check: true }
    }
}

impl BruteForceMatcher {
    pub fn new(cross_check: bool) -> Self {
        Self { cross_check }
    }

    /// Match every query descriptor to its nearest train descriptor.
    /// Output is ordered by query index.
    pub fn match_descriptors(&self, query: &[Descriptor], train: &[Descriptor]) -> Vec<Match> {
        if query.is_empty() || train.is_empty() {
            return Vec::new();
        }

        let forward = nearest_neighbours(query, train);
        if !self.cross_check {
            return forward;
        }

        let backward = nearest_neighbours(train, query);
        forward
            .into_iter()
            .filter(|m| backward[m.train_idx].train_idx == m.query_idx)
            .collect()
    }
}

/// For each descriptor in `from`, the closest one in `to` (ties go to the lower index)
fn nearest_neighbours(from: &[Descriptor], to: &[Descriptor]) -> Vec<Match> {
    from.par_iter()
        .enumerate()
        .map(|(query_idx, d)| {
            let (train_idx, distance) = to
                .iter()
                .enumerate()
                .map(|(i, t)| (i, hamming_distance(d, t)))
                .min_by_key(|&(i, dist)| (dist, i))
                .unwrap_or((0, u32::MAX));
            Match {
                query_idx,
                train_idx,
                distance,
            }
        })
        .collect()
}

/// Sort ascending by distance (stable, so equal distances keep query order)
pub fn sort_by_distance(matches: &mut [Match]) {
    matches.sort_by_key(|m| m.distance);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn desc(byte: u8) -> Descriptor {
        [byte; 32]
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance(&desc(0), &desc(0)), 0);
        assert_eq!(hamming_distance(&desc(0), &desc(0xff)), 256);
        assert_eq!(hamming_distance(&desc(0b1010_0000), &desc(0)), 64);
    }

    #[test]
    fn test_empty_inputs() {
        let matcher = BruteForceMatcher::default();
        assert!(matcher.match_descriptors(&[], &[desc(1)]).is_empty());
        assert!(matcher.match_descriptors(&[desc(1)], &[]).is_empty());
    }

    #[test]
    fn test_exact_matches_found() {
        let query = vec![desc(0x0f), desc(0xf0), desc(0x33)];
        let train = vec![desc(0x33), desc(0x0f), desc(0xf0)];

        let matches = BruteForceMatcher::default().match_descriptors(&query, &train);
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0], Match { query_idx: 0, train_idx: 1, distance: 0 });
        assert_eq!(matches[1], Match { query_idx: 1, train_idx: 2, distance: 0 });
        assert_eq!(matches[2], Match { query_idx: 2, train_idx: 0, distance: 0 });
    }

    #[test]
    fn test_cross_check_drops_one_sided_matches() {
        // Both queries are closest to train 0, but train 0 prefers query 0
        let mut close = desc(0);
        close[0] = 1;
        let query = vec![desc(0), close];
        let train = vec![desc(0), desc(0xff)];

        let without = BruteForceMatcher::new(false).match_descriptors(&query, &train);
        assert_eq!(without.len(), 2);
        assert_eq!(without[1].train_idx, 0);

        let with = BruteForceMatcher::new(true).match_descriptors(&query, &train);
        assert_eq!(with, vec![Match { query_idx: 0, train_idx: 0, distance: 0 }]);
    }

    #[test]
    fn test_sort_by_distance_is_stable() {
        let mut matches = vec![
            Match { query_idx: 0, train_idx: 0, distance: 9 },
            Match { query_idx: 1, train_idx: 1, distance: 3 },
            Match { query_idx: 2, train_idx: 2, distance: 9 },
            Match { query_idx: 3, train_idx: 3, distance: 0 },
        ];
        sort_by_distance(&mut matches);
        let order: Vec<usize> = matches.iter().map(|m| m.query_idx).collect();
        assert_eq!(order, vec![3, 1, 0, 2]);
    }

    fn descriptors(max_len: usize) -> impl Strategy<Value = Vec<Descriptor>> {
        prop::collection::vec(prop::array::uniform32(any::<u8>()), 1..max_len)
    }

    proptest! {
        #[test]
        fn prop_cross_checked_matches_are_mutual(query in descriptors(24), train in descriptors(24)) {
            let matches = BruteForceMatcher::new(true).match_descriptors(&query, &train);
            let mut seen_train = std::collections::HashSet::new();

            for m in &matches {
                prop_assert!(m.query_idx < query.len());
                prop_assert!(m.train_idx < train.len());
                prop_assert_eq!(m.distance, hamming_distance(&query[m.query_idx], &train[m.train_idx]));
                // No train descriptor is strictly closer to this query
                for t in &train {
                    prop_assert!(hamming_distance(&query[m.query_idx], t) >= m.distance);
                }
                // No query descriptor is strictly closer to this train
                for q in &query {
                    prop_assert!(hamming_distance(q, &train[m.train_idx]) >= m.distance);
                }
                prop_assert!(seen_train.insert(m.train_idx));
            }
        }

        #[test]
        fn prop_hamming_is_symmetric(a in prop::array::uniform32(any::<u8>()), b in prop::array::uniform32(any::<u8>())) {
            prop_assert_eq!(hamming_distance(&a, &b), hamming_distance(&b, &a));
            prop_assert_eq!(hamming_distance(&a, &a), 0);
        }
    }
}
