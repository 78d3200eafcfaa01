use serde::{Deserialize, Serialize};

/// A called peak from one population's assay.
///
/// `pop` is the population code alone; any `_suffix` on the source label is
/// stripped during parsing. Streams of peaks are expected sorted by
/// (chromosome, start).
#[derive(Debug, Clone)]
pub struct Peak {
    pub chrom: String,
    pub start: i64,
    pub end: i64,
    pub pop: String,
    pub n_reads: u64,
    pub fold_change: f64,
    pub log10p: f64,
    pub height: f64,
}

/// A genomic position paired with whatever identifies it (an rsID, a gene
/// id, ...). Per-chromosome sequences of these are kept sorted by `pos`,
/// ties in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry<T> {
    pub pos: i64,
    pub payload: T,
}
