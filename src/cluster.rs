use std::collections::BTreeMap;
use std::io::Write;

use log::info;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{PeakError, Result};
use crate::normalize::NormalizationTable;
use crate::peakpop_structs::Peak;

/// Tuning knobs for the greedy merge.
#[derive(Debug, Clone, Copy)]
pub struct ClusterConfig {
    /// Fraction of the open cluster a peak must cover when it overlaps both
    /// of its neighbors; below this it seeds a new cluster instead.
    pub min_overlap: f64,
    /// Bases ignored at interval boundaries so trivial abutments do not
    /// chain unrelated peaks together.
    pub offset: i64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            min_overlap: 0.75,
            offset: 4,
        }
    }
}

/// A consensus peak accumulated from overlapping per-population peaks.
///
/// Seeded from a single peak and grown with [`add`]; once emitted it is
/// never touched again. `end` is the running max of member ends, `start`
/// stays the seed's.
///
/// [`add`]: Cluster::add
#[derive(Debug, Clone)]
pub struct Cluster {
    pub chrom: String,
    pub start: i64,
    pub end: i64,
    /// `{chrom}_{start}` of the seed peak.
    pub name: String,
    pub count: u64,
    pub fold_change: f64,
    pub log10p: f64,
    /// Contributing population labels in arrival order. Repeats mean one
    /// population placed several peaks in the cluster; that is tracked as a
    /// summary statistic, not treated as an error.
    pub pops: Vec<String>,
    pop_to_max_height: FxHashMap<String, f64>,
    pop_to_reads: FxHashMap<String, Vec<u64>>,
}

impl Cluster {
    fn seed(peak: &Peak, norm: &NormalizationTable) -> Result<Self> {
        let mut pop_to_max_height = FxHashMap::default();
        pop_to_max_height.insert(peak.pop.clone(), peak.height / norm.factor(&peak.pop)?);

        let mut pop_to_reads: FxHashMap<String, Vec<u64>> = FxHashMap::default();
        pop_to_reads.insert(peak.pop.clone(), vec![peak.n_reads]);

        Ok(Cluster {
            chrom: peak.chrom.clone(),
            start: peak.start,
            end: peak.end,
            name: format!("{}_{}", peak.chrom, peak.start),
            count: 1,
            fold_change: peak.fold_change,
            log10p: peak.log10p,
            pops: vec![peak.pop.clone()],
            pop_to_max_height,
            pop_to_reads,
        })
    }

    fn add(&mut self, peak: &Peak, norm: &NormalizationTable) -> Result<()> {
        self.end = self.end.max(peak.end);
        self.count += 1;
        self.pops.push(peak.pop.clone());

        // Pairwise running average, kept in exactly this form. It is not an
        // arithmetic mean and it depends on arrival order; the downstream
        // tables were produced with it.
        self.fold_change = (self.fold_change + peak.fold_change) / 2.0;
        self.log10p = (self.log10p + peak.log10p) / 2.0;

        let height = peak.height / norm.factor(&peak.pop)?;
        let max = self.pop_to_max_height.entry(peak.pop.clone()).or_insert(0.0);
        if height > *max {
            *max = height;
        }
        self.pop_to_reads
            .entry(peak.pop.clone())
            .or_default()
            .push(peak.n_reads);
        Ok(())
    }

    /// Signed width, `start - end`. Zero or negative for any well-formed
    /// interval; the overlap test divides by this and takes the absolute
    /// value of the quotient, so the sign convention is load-bearing and
    /// kept as is.
    pub fn span(&self) -> i64 {
        self.start - self.end
    }

    /// Peaks beyond the first that each population contributed, summed.
    fn extra_pop_count(&self) -> u64 {
        let distinct: FxHashSet<&str> = self.pops.iter().map(String::as_str).collect();
        (self.pops.len() - distinct.len()) as u64
    }

    /// Median read count for `pop` corrected for sequencing depth, zero
    /// when the population contributed nothing to this cluster.
    pub fn normalized_median_reads(&self, pop: &str, norm: &NormalizationTable) -> Result<f64> {
        match self.pop_to_reads.get(pop) {
            Some(reads) if !reads.is_empty() => Ok(median(reads) / norm.factor(pop)?),
            _ => Ok(0.0),
        }
    }

    /// Tallest depth-corrected member peak for `pop`, zero when absent.
    pub fn normalized_max_height(&self, pop: &str) -> f64 {
        self.pop_to_max_height.get(pop).copied().unwrap_or(0.0)
    }

    /// One tab-separated line: region, seed-derived name, member count,
    /// averaged scores, comma-joined population list.
    pub fn write<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.chrom,
            self.start,
            self.end,
            self.name,
            self.count,
            self.fold_change,
            self.log10p,
            self.pops.join(",")
        )?;
        Ok(())
    }

    /// Region plus one normalized median read count per population, in the
    /// table's canonical population order.
    pub fn write_pop_reads<W: Write>(&self, out: &mut W, norm: &NormalizationTable) -> Result<()> {
        write!(out, "{}\t{}\t{}", self.chrom, self.start, self.end)?;
        for pop in norm.populations() {
            write!(out, "\t{}", self.normalized_median_reads(pop, norm)?)?;
        }
        writeln!(out)?;
        Ok(())
    }

    /// Region plus one normalized max height per population, same ordering
    /// as the reads channel.
    pub fn write_pop_max_height<W: Write>(
        &self,
        out: &mut W,
        norm: &NormalizationTable,
    ) -> Result<()> {
        write!(out, "{}\t{}\t{}", self.chrom, self.start, self.end)?;
        for pop in norm.populations() {
            write!(out, "\t{}", self.normalized_max_height(pop))?;
        }
        writeln!(out)?;
        Ok(())
    }
}

fn median(values: &[u64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    } else {
        sorted[mid] as f64
    }
}

/// Counters accumulated over a whole clustering run.
#[derive(Debug, Clone, Default)]
pub struct MergeStats {
    pub lines: u64,
    pub clusters: u64,
    /// member count -> number of clusters of that size
    pub cluster_sizes: BTreeMap<u64, u64>,
    /// extra same-population peaks -> number of clusters with that many
    pub extra_pops: BTreeMap<u64, u64>,
}

impl MergeStats {
    fn note(&mut self, cluster: &Cluster) {
        *self.cluster_sizes.entry(cluster.count).or_insert(0) += 1;
        let extra = cluster.extra_pop_count();
        if extra > 0 {
            *self.extra_pops.entry(extra).or_insert(0) += 1;
        }
    }

    pub fn total_clustered(&self) -> u64 {
        self.cluster_sizes.iter().map(|(size, n)| size * n).sum()
    }

    pub fn log_summary(&self) {
        info!("total lines:\t{}", self.lines);
        info!("total clusters:\t{}", self.clusters);
        info!("total clustered:\t{}", self.total_clustered());
        info!("cluster sizes:");
        for (size, n) in &self.cluster_sizes {
            info!("\t{}:\t{}", size, n);
        }
        if self.extra_pops.is_empty() {
            info!("no extra peaks for a single population in any cluster");
        } else {
            info!("extra peaks for a single population in clusters:");
            for (extra, n) in &self.extra_pops {
                info!("\t{}:\t{}", extra, n);
            }
        }
    }
}

/// Merge a coordinate-sorted peak stream into consensus clusters.
///
/// Runs a lagged three-peak window over the stream so every decision sees
/// the peak before and after the one under consideration:
///
/// - overlaps only its predecessor: joins the open cluster;
/// - overlaps predecessor and successor: joins only when the predecessor
///   overlap covers more than `min_overlap` of the open cluster, otherwise
///   the cluster is sealed and the peak seeds the next one;
/// - anything else: seals the cluster and seeds the next one.
///
/// Overlap tests shrink interval ends by `offset` bases first. `emit` is
/// called exactly once per sealed cluster, in stream order. The stream must
/// hold at least two peaks; fewer is a malformed input.
pub fn cluster_peaks<I, F>(
    peaks: I,
    cfg: &ClusterConfig,
    norm: &NormalizationTable,
    mut emit: F,
) -> Result<MergeStats>
where
    I: IntoIterator<Item = Peak>,
    F: FnMut(&Cluster) -> Result<()>,
{
    let mut stream = peaks.into_iter();
    let mut stats = MergeStats::default();

    let mut prior = stream.next().ok_or_else(|| {
        PeakError::MalformedInput("peak stream is empty; need at least two peaks".into())
    })?;
    let mut cluster = Cluster::seed(&prior, norm)?;
    stats.lines += 1;
    stats.clusters += 1;

    let mut current = stream.next().ok_or_else(|| {
        PeakError::MalformedInput("peak stream holds a single peak; need at least two".into())
    })?;
    stats.lines += 1;

    for next in stream {
        stats.lines += 1;
        let overlaps_prior = current.start < prior.end - cfg.offset;
        let overlaps_next = next.start < current.end - cfg.offset;

        if overlaps_prior && overlaps_next {
            // Shifted on both sides; keep the peak only if it still covers
            // most of the open cluster.
            let frac = ((prior.end - current.start) as f64 / cluster.span() as f64).abs();
            if frac > cfg.min_overlap {
                cluster.add(&current, norm)?;
            } else {
                stats.note(&cluster);
                emit(&cluster)?;
                cluster = Cluster::seed(&current, norm)?;
                stats.clusters += 1;
            }
        } else if overlaps_prior {
            cluster.add(&current, norm)?;
        } else {
            stats.note(&cluster);
            emit(&cluster)?;
            cluster = Cluster::seed(&current, norm)?;
            stats.clusters += 1;
        }

        prior = current;
        current = next;
    }

    // One final boundary check between the two peaks still in the window.
    if current.start - cfg.offset < prior.end {
        cluster.add(&current, norm)?;
    } else {
        stats.note(&cluster);
        emit(&cluster)?;
        cluster = Cluster::seed(&current, norm)?;
        stats.clusters += 1;
    }

    stats.note(&cluster);
    emit(&cluster)?;

    Ok(stats)
}
