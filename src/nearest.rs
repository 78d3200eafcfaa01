use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{PeakError, Result};
use crate::peakpop_structs::PositionEntry;
use crate::sorts;

/// Per-chromosome sorted positions supporting closest-entry queries.
///
/// Built once from unordered `(chromosome, position, payload)` triples and
/// queried many times. The only mutation allowed afterwards is [`consume`],
/// which removes a matched entry so repeated queries draw without
/// replacement.
///
/// [`consume`]: NearestIndex::consume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearestIndex<T> {
    by_chrom: FxHashMap<String, Vec<PositionEntry<T>>>,
}

impl<T> NearestIndex<T> {
    pub fn build(triples: impl IntoIterator<Item = (String, i64, T)>) -> Self {
        NearestIndex {
            by_chrom: sorts::build_chrom_index(triples),
        }
    }

    pub fn len(&self) -> usize {
        self.by_chrom.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_chrom.values().all(Vec::is_empty)
    }

    /// A chromosome with no entries is indistinguishable from one we never
    /// saw; both are hard errors, never a silently empty answer.
    fn entries(&self, chrom: &str) -> Result<&[PositionEntry<T>]> {
        match self.by_chrom.get(chrom) {
            Some(entries) if !entries.is_empty() => Ok(entries),
            _ => Err(PeakError::LookupMiss(chrom.to_string())),
        }
    }

    /// The entry on `chrom` closest to `query`, with its index in the
    /// chromosome's sequence. Defined for every query: positions off either
    /// end of the sequence clamp to the boundary entry.
    pub fn nearest(&self, chrom: &str, query: i64) -> Result<(&PositionEntry<T>, usize)> {
        let entries = self.entries(chrom)?;
        let idx = search_closest(entries, query);
        Ok((&entries[idx], idx))
    }

    /// Every entry within `max_distance` of `query`, nearest first, then
    /// ascending past it, then descending below it. The cutoff bounds the
    /// scan in both directions; there is no cap on the number of hits.
    pub fn within_distance(
        &self,
        chrom: &str,
        query: i64,
        max_distance: i64,
    ) -> Result<Vec<&PositionEntry<T>>> {
        let entries = self.entries(chrom)?;
        let closest = search_closest(entries, query);

        let mut hits = Vec::new();
        // If even the closest entry misses the cutoff, nothing qualifies.
        if (entries[closest].pos - query).abs() > max_distance {
            return Ok(hits);
        }

        let mut idx = closest;
        while idx < entries.len() && entries[idx].pos - query <= max_distance {
            hits.push(&entries[idx]);
            idx += 1;
        }

        let mut idx = closest;
        while idx > 0 && query - entries[idx - 1].pos <= max_distance {
            idx -= 1;
            hits.push(&entries[idx]);
        }

        Ok(hits)
    }

    /// Remove and return the entry at `idx`, shifting later indices down by
    /// one. `idx` should come from [`nearest`] on the same, unmodified
    /// index.
    ///
    /// [`nearest`]: NearestIndex::nearest
    pub fn consume(&mut self, chrom: &str, idx: usize) -> Result<PositionEntry<T>> {
        let entries = self
            .by_chrom
            .get_mut(chrom)
            .ok_or_else(|| PeakError::LookupMiss(chrom.to_string()))?;
        if idx >= entries.len() {
            return Err(PeakError::MalformedInput(format!(
                "consume index {} out of bounds for chromosome {} ({} entries)",
                idx,
                chrom,
                entries.len()
            )));
        }
        Ok(entries.remove(idx))
    }
}

/// Closest-value binary search over a position-sorted slice.
///
/// Unlike an exact-match search this always lands somewhere: the candidate
/// range is narrowed on explicit (lo, hi) bounds until the query sits
/// between two adjacent entries, then the nearer of the two wins. Queries
/// outside the range resolve to the boundary entry.
fn search_closest<T>(entries: &[PositionEntry<T>], query: i64) -> usize {
    debug_assert!(!entries.is_empty());

    let mut lo = 0;
    let mut hi = entries.len();
    loop {
        match hi - lo {
            1 => return lo,
            2 => return closer_of(entries, lo, lo + 1, query),
            _ => {
                let split = lo + (hi - lo) / 2;
                debug_assert!(entries[split - 1].pos <= entries[split].pos);

                if entries[split - 1].pos <= query && query <= entries[split].pos {
                    return closer_of(entries, split - 1, split, query);
                } else if query < entries[split - 1].pos {
                    // The entry left of the split stays a candidate.
                    hi = split;
                } else {
                    lo = split;
                }
            }
        }
    }
}

/// Index of whichever of two adjacent entries lies nearer the query.
/// Absolute distances tie toward the lower position.
fn closer_of<T>(entries: &[PositionEntry<T>], a: usize, b: usize, query: i64) -> usize {
    if (query - entries[a].pos).abs() <= (entries[b].pos - query).abs() {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn index_of(positions: &[i64]) -> NearestIndex<usize> {
        NearestIndex::build(
            positions
                .iter()
                .enumerate()
                .map(|(i, &pos)| ("1".to_string(), pos, i)),
        )
    }

    /// Lowest position minimizing the absolute distance to `query`.
    fn brute_nearest(positions: &[i64], query: i64) -> i64 {
        let mut best = positions[0];
        for &pos in positions {
            if (pos - query).abs() < (best - query).abs() {
                best = pos;
            }
        }
        best
    }

    #[test]
    fn nearest_matches_linear_scan() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let n = rng.gen_range(1..40);
            let mut positions: Vec<i64> = (0..n).map(|_| rng.gen_range(-1000..1000)).collect();
            positions.sort_unstable();
            let index = index_of(&positions);

            for _ in 0..50 {
                let query = rng.gen_range(-1500..1500);
                let (entry, idx) = index.nearest("1", query).unwrap();
                assert_eq!(
                    entry.pos,
                    brute_nearest(&positions, query),
                    "positions={:?} query={}",
                    positions,
                    query
                );
                assert_eq!(positions[idx], entry.pos);
            }
        }
    }

    #[test]
    fn nearest_ties_prefer_the_lower_position() {
        let index = index_of(&[100, 200]);
        let (entry, idx) = index.nearest("1", 150).unwrap();
        assert_eq!((entry.pos, idx), (100, 0));

        let index = index_of(&[10, 20, 30, 40]);
        assert_eq!(index.nearest("1", 25).unwrap().0.pos, 20);
        assert_eq!(index.nearest("1", 35).unwrap().0.pos, 30);
    }

    #[test]
    fn nearest_clamps_outside_the_range() {
        let index = index_of(&[100, 200, 300]);
        assert_eq!(index.nearest("1", -5).unwrap().0.pos, 100);
        assert_eq!(index.nearest("1", 10_000).unwrap().0.pos, 300);
    }

    #[test]
    fn single_entry_always_wins() {
        let index = index_of(&[500]);
        let (entry, idx) = index.nearest("1", -1_000_000).unwrap();
        assert_eq!((entry.pos, idx), (500, 0));
    }

    #[test]
    fn missing_chromosome_is_a_hard_error() {
        let index = index_of(&[100]);
        assert!(matches!(
            index.nearest("2", 100),
            Err(PeakError::LookupMiss(_))
        ));
        assert!(matches!(
            index.within_distance("2", 100, 10),
            Err(PeakError::LookupMiss(_))
        ));
    }

    #[test]
    fn within_distance_matches_a_linear_filter() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let n = rng.gen_range(1..30);
            let mut positions: Vec<i64> = (0..n).map(|_| rng.gen_range(-500..500)).collect();
            positions.sort_unstable();
            let index = index_of(&positions);

            let query = rng.gen_range(-800..800);
            let cutoff = rng.gen_range(0..300);

            let mut got: Vec<i64> = index
                .within_distance("1", query, cutoff)
                .unwrap()
                .iter()
                .map(|e| e.pos)
                .collect();
            got.sort_unstable();

            let want: Vec<i64> = positions
                .iter()
                .copied()
                .filter(|pos| (pos - query).abs() <= cutoff)
                .collect();

            assert_eq!(
                got, want,
                "positions={:?} query={} cutoff={}",
                positions, query, cutoff
            );
        }
    }

    #[test]
    fn within_distance_is_empty_when_nothing_is_close() {
        let index = index_of(&[0]);
        assert!(index.within_distance("1", 1000, 10).unwrap().is_empty());

        let index = index_of(&[0, 5, 9]);
        assert!(index.within_distance("1", -500, 100).unwrap().is_empty());
    }

    #[test]
    fn within_distance_yields_forward_hits_then_backward() {
        let index = index_of(&[100, 200, 300, 400]);
        let hits: Vec<i64> = index
            .within_distance("1", 290, 150)
            .unwrap()
            .iter()
            .map(|e| e.pos)
            .collect();
        assert_eq!(hits, vec![300, 400, 200]);
    }

    #[test]
    fn consume_removes_exactly_one_entry() {
        let mut index = index_of(&[100, 200, 300]);
        let (_, idx) = index.nearest("1", 190).unwrap();
        let removed = index.consume("1", idx).unwrap();
        assert_eq!(removed.pos, 200);
        assert_eq!(index.len(), 2);

        // The consumed entry never comes back; the rest keep their order.
        assert_eq!(index.nearest("1", 190).unwrap().0.pos, 100);
        let rest: Vec<i64> = index
            .within_distance("1", 0, 1000)
            .unwrap()
            .iter()
            .map(|e| e.pos)
            .collect();
        assert_eq!(rest, vec![100, 300]);
    }

    #[test]
    fn consume_supports_draw_without_replacement() {
        let mut index = index_of(&[10, 20, 30]);
        let mut drawn = Vec::new();
        for _ in 0..3 {
            let (pos, idx) = {
                let (entry, idx) = index.nearest("1", 19).unwrap();
                (entry.pos, idx)
            };
            drawn.push(pos);
            index.consume("1", idx).unwrap();
        }
        assert_eq!(drawn, vec![20, 10, 30]);

        // Exhausted chromosomes fail like missing ones.
        assert!(matches!(
            index.nearest("1", 19),
            Err(PeakError::LookupMiss(_))
        ));
    }

    #[test]
    fn consume_rejects_stale_indices() {
        let mut index = index_of(&[10]);
        index.consume("1", 0).unwrap();
        assert!(index.consume("1", 0).is_err());
        assert!(matches!(
            index.consume("2", 0),
            Err(PeakError::LookupMiss(_))
        ));
    }
}
