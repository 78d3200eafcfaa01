use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use log::{error, info};

use peakpop::cluster::{cluster_peaks, ClusterConfig};
use peakpop::index_cache::{load_or_build, FileStore, IndexStore, NoStore};
use peakpop::input::{self, PeakFormat, PeakReader, RegionReader, TssInfo};
use peakpop::nearest::NearestIndex;
use peakpop::normalize::NormalizationTable;
use peakpop::peakpop_structs::Peak;

/// Population-scale peak toolkit: merge peaks called per population into
/// consensus clusters, and map peak regions to nearby annotated positions.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a sorted multi-population peak file into consensus clusters
    Merge(MergeArgs),
    /// Print transcription start sites within a distance of each peak
    Tss(TssArgs),
    /// Assign peaks the nearest variant id, drawing without replacement
    Rsid(RsidArgs),
}

#[derive(Args)]
struct MergeArgs {
    /// Input peak file, sorted by chromosome and start ("-" for stdin)
    #[arg(short, long, default_value = "-")]
    infile: PathBuf,

    /// Output cluster file ("-" for stdout)
    #[arg(short, long, default_value = "-")]
    outfile: PathBuf,

    /// Fraction of the open cluster a doubly-overlapping peak must cover
    /// to join it instead of starting a new cluster
    #[arg(short = 'p', long, default_value_t = 0.75)]
    percent_overlap: f64,

    /// Bases trimmed from interval ends before testing overlap, so trivial
    /// abutments do not merge
    #[arg(long, default_value_t = 4)]
    offset: i64,

    /// Also write per-population normalized median read counts, one line
    /// per cluster
    #[arg(long)]
    reads_file: Option<PathBuf>,

    /// Also write per-population normalized max peak heights, one line per
    /// cluster
    #[arg(long)]
    height_file: Option<PathBuf>,
}

#[derive(Args)]
struct TssArgs {
    /// TSS table: whitespace-separated, position in column 5 followed by
    /// gene id and symbol
    tss_table: PathBuf,

    /// Peak region file (tab-separated, first three columns used)
    peaks: PathBuf,

    /// Report every TSS within this many bases of the peak midpoint
    #[arg(short = 'd', long, default_value_t = 100_000)]
    max_distance: i64,
}

#[derive(Args)]
struct RsidArgs {
    /// Variant table of "chrom pos rsid" lines
    variants: PathBuf,

    /// Peak region file (tab-separated, first three columns used)
    peaks: PathBuf,

    /// Accept a variant this far from the peak midpoint even when it falls
    /// outside the peak itself
    #[arg(short = 'd', long, default_value_t = 200)]
    max_distance: i64,

    /// Skip the sidecar index cache and rebuild from the variant table
    #[arg(long)]
    no_cache: bool,
}

fn run_merge(args: MergeArgs) -> Result<()> {
    let format = if args.infile == Path::new("-") {
        // stdin carries no name to inspect; assume bed.
        PeakFormat::Bed
    } else {
        PeakFormat::from_path(&args.infile)?
    };

    // One parse pass caching the stream: the peaks are needed twice (read
    // totals first, clustering second) and stdin cannot be rewound.
    let reader = input::open_input(&args.infile)?;
    let peaks: Vec<Peak> = PeakReader::new(reader, format).collect::<peakpop::Result<_>>()?;

    let norm = NormalizationTable::from_peaks(&peaks)?;
    let factors: Vec<String> = norm
        .factors()
        .map(|(pop, f)| format!("{}={:.6}", pop, f))
        .collect();
    info!("population read fractions: {}", factors.join(" "));

    let mut out = input::open_output(&args.outfile)?;
    let mut reads_out = args.reads_file.as_deref().map(input::open_output).transpose()?;
    let mut height_out = args.height_file.as_deref().map(input::open_output).transpose()?;

    let cfg = ClusterConfig {
        min_overlap: args.percent_overlap,
        offset: args.offset,
    };

    let stats = cluster_peaks(peaks, &cfg, &norm, |cluster| {
        cluster.write(&mut out)?;
        if let Some(w) = reads_out.as_mut() {
            cluster.write_pop_reads(w, &norm)?;
        }
        if let Some(w) = height_out.as_mut() {
            cluster.write_pop_max_height(w, &norm)?;
        }
        Ok(())
    })?;

    out.flush()?;
    if let Some(w) = reads_out.as_mut() {
        w.flush()?;
    }
    if let Some(w) = height_out.as_mut() {
        w.flush()?;
    }

    stats.log_summary();
    Ok(())
}

fn run_tss(args: TssArgs) -> Result<()> {
    let index: NearestIndex<TssInfo> = NearestIndex::build(input::load_tss_table(&args.tss_table)?);
    info!("indexed {} transcription start sites", index.len());

    let mut out = input::open_output(Path::new("-"))?;
    let reader = input::open_input(&args.peaks)?;
    for region in RegionReader::new(reader) {
        let (chrom, start, end) = region?;
        let middle = (start + end) / 2;
        for entry in index.within_distance(&chrom, middle, args.max_distance)? {
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{}",
                chrom, start, end, entry.pos, entry.payload.ensid, entry.payload.symbol
            )?;
        }
    }
    out.flush()?;
    Ok(())
}

fn run_rsid(args: RsidArgs) -> Result<()> {
    let store: Box<dyn IndexStore<String>> = if args.no_cache {
        Box::new(NoStore)
    } else {
        Box::new(FileStore)
    };
    let mut index = load_or_build(&args.variants, store.as_ref(), || {
        Ok(NearestIndex::build(input::load_variant_table(
            &args.variants,
        )?))
    })?;
    info!("indexed {} variants", index.len());

    let mut out = input::open_output(Path::new("-"))?;
    let reader = input::open_input(&args.peaks)?;
    for region in RegionReader::new(reader) {
        let (chrom, start, end) = region?;
        let middle = (start + end) / 2;
        let (pos, idx) = {
            let (entry, idx) = index.nearest(&chrom, middle)?;
            (entry.pos, idx)
        };

        // Accept the variant if it sits inside the peak, or close enough to
        // the midpoint; consuming it keeps later peaks from reusing it.
        if (start <= pos && pos <= end) || (pos - middle).abs() <= args.max_distance {
            let drawn = index.consume(&chrom, idx)?;
            writeln!(out, "{}", drawn.payload)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .init();

    let result = match cli.command {
        Commands::Merge(args) => run_merge(args),
        Commands::Tss(args) => run_tss(args),
        Commands::Rsid(args) => run_rsid(args),
    };

    if let Err(err) = result {
        if is_broken_pipe(&err) {
            std::process::exit(0);
        }
        error!("{:#}", err);
        std::process::exit(1);
    }
}

/// True when the failure is just the downstream reader going away.
fn is_broken_pipe(err: &anyhow::Error) -> bool {
    err.root_cause()
        .downcast_ref::<std::io::Error>()
        .map(|io_err| io_err.kind() == std::io::ErrorKind::BrokenPipe)
        .unwrap_or(false)
}
