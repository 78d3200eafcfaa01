use rustc_hash::FxHashMap;

use crate::error::{PeakError, Result};
use crate::peakpop_structs::Peak;

/// Per-population sequencing-depth factors: each population's share of the
/// grand read total. Built in a full pass over the peak stream before any
/// cluster is emitted, and never mutated afterwards. Dividing read counts
/// and peak heights by these factors keeps deeply sequenced populations
/// from dominating cross-population comparisons.
#[derive(Debug, Clone)]
pub struct NormalizationTable {
    fractions: FxHashMap<String, f64>,
    pops: Vec<String>,
}

impl NormalizationTable {
    /// Sum reads per population over the whole stream. Scaling by the grand
    /// total keeps the factors near unity instead of in the millions.
    pub fn from_peaks<'a>(peaks: impl IntoIterator<Item = &'a Peak>) -> Result<Self> {
        let mut totals: FxHashMap<String, u64> = FxHashMap::default();
        for peak in peaks {
            *totals.entry(peak.pop.clone()).or_insert(0) += peak.n_reads;
        }
        Self::from_totals(totals)
    }

    pub fn from_totals(totals: FxHashMap<String, u64>) -> Result<Self> {
        let grand_total: u64 = totals.values().sum();
        if grand_total == 0 {
            return Err(PeakError::MalformedInput(
                "no reads in any population; cannot compute normalization factors".into(),
            ));
        }

        let mut pops: Vec<String> = totals.keys().cloned().collect();
        pops.sort();

        let fractions = totals
            .into_iter()
            .map(|(pop, reads)| (pop, reads as f64 / grand_total as f64))
            .collect();

        Ok(NormalizationTable { fractions, pops })
    }

    /// Population codes in canonical (alphabetical) order. Side-channel
    /// output columns follow this ordering.
    pub fn populations(&self) -> &[String] {
        &self.pops
    }

    /// Depth factor for `pop`. A population without reads would turn the
    /// height and read normalizations into divisions by zero, so it is
    /// rejected here rather than at every call site.
    pub fn factor(&self, pop: &str) -> Result<f64> {
        match self.fractions.get(pop) {
            Some(&f) if f > 0.0 => Ok(f),
            _ => Err(PeakError::ZeroReads(pop.to_string())),
        }
    }

    /// Factors paired with their population codes, in canonical order.
    pub fn factors(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.pops
            .iter()
            .map(move |pop| (pop.as_str(), self.fractions[pop.as_str()]))
    }
}
