use radsort::sort_by_key;
use rustc_hash::FxHashMap;

use crate::peakpop_structs::PositionEntry;

/// Group position entries by chromosome and sort each group by position.
/// radsort is stable, so entries sharing a position keep their input order.
pub fn build_chrom_index<T>(
    triples: impl IntoIterator<Item = (String, i64, T)>,
) -> FxHashMap<String, Vec<PositionEntry<T>>> {
    let mut by_chrom: FxHashMap<String, Vec<PositionEntry<T>>> = FxHashMap::default();

    for (chrom, pos, payload) in triples {
        by_chrom
            .entry(chrom)
            .or_default()
            .push(PositionEntry { pos, payload });
    }

    for entries in by_chrom.values_mut() {
        sort_by_key(entries, |e| e.pos);
    }

    by_chrom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_and_sorts_per_chromosome() {
        let by_chrom = build_chrom_index(vec![
            ("2".to_string(), 50, "c"),
            ("1".to_string(), 300, "b"),
            ("1".to_string(), 100, "a"),
        ]);

        let chr1: Vec<i64> = by_chrom["1"].iter().map(|e| e.pos).collect();
        assert_eq!(chr1, vec![100, 300]);
        assert_eq!(by_chrom["2"][0].payload, "c");
    }

    #[test]
    fn equal_positions_keep_input_order() {
        let by_chrom = build_chrom_index(vec![
            ("1".to_string(), 10, "first"),
            ("1".to_string(), 10, "second"),
            ("1".to_string(), 5, "lowest"),
        ]);

        let payloads: Vec<&str> = by_chrom["1"].iter().map(|e| e.payload).collect();
        assert_eq!(payloads, vec!["lowest", "first", "second"]);
    }
}
