use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::{PeakError, Result};
use crate::peakpop_structs::Peak;

/// Input formats the peak reader understands. The caller picks one
/// explicitly; nothing downstream sniffs file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakFormat {
    Bed,
}

impl PeakFormat {
    /// Detect a format from the dot-separated parts of a file name, so
    /// `sample.bed.gz` and `all.sorted.bed` both count as bed while
    /// `file.bedfile` does not. Unknown names are a hard error.
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path.file_name().and_then(OsStr::to_str).unwrap_or("");
        if name.split('.').any(|part| part == "bed") {
            Ok(PeakFormat::Bed)
        } else {
            Err(PeakError::UnknownFormat(name.to_string()))
        }
    }
}

/// Open a path for buffered reading, decompressing gzip transparently.
/// `-` means stdin.
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.extension() == Some(OsStr::new("gz")) {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(reader)))
}

/// Open a path for buffered writing. `-` means stdout.
pub fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if path == Path::new("-") {
        Ok(Box::new(BufWriter::new(io::stdout())))
    } else {
        Ok(Box::new(BufWriter::new(File::create(path)?)))
    }
}

/// Drop a leading `chr` so peak files and annotation tables agree on
/// chromosome naming.
pub fn strip_chr(chrom: &str) -> &str {
    chrom.strip_prefix("chr").unwrap_or(chrom)
}

/// Iterator over full peak records in a tab-separated bed-flavored file.
pub struct PeakReader<R: BufRead> {
    lines: io::Lines<R>,
    line_no: u64,
    format: PeakFormat,
}

impl<R: BufRead> PeakReader<R> {
    pub fn new(reader: R, format: PeakFormat) -> Self {
        PeakReader {
            lines: reader.lines(),
            line_no: 0,
            format,
        }
    }
}

impl<R: BufRead> Iterator for PeakReader<R> {
    type Item = Result<Peak>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = match self.lines.next()? {
            Ok(line) => line,
            Err(err) => return Some(Err(err.into())),
        };
        self.line_no += 1;
        match self.format {
            PeakFormat::Bed => Some(parse_bed_peak(&line, self.line_no)),
        }
    }
}

/// `chrom start end pop n_reads <ignored> fold_change log10p height`
fn parse_bed_peak(line: &str, line_no: u64) -> Result<Peak> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 9 {
        return Err(malformed(
            line_no,
            &format!("expected 9 tab-separated fields, found {}", fields.len()),
        ));
    }

    // Population labels may carry a suffix after an underscore; only the
    // leading code identifies the population.
    let pop = fields[3].split('_').next().unwrap_or(fields[3]);

    Ok(Peak {
        chrom: fields[0].to_string(),
        start: int_field(fields[1], "start", line_no)?,
        end: int_field(fields[2], "end", line_no)?,
        pop: pop.to_string(),
        n_reads: uint_field(fields[4], "read count", line_no)?,
        fold_change: float_field(fields[6], "fold change", line_no)?,
        log10p: float_field(fields[7], "log10 p-value", line_no)?,
        height: float_field(fields[8], "height", line_no)?,
    })
}

/// Iterator over `(chrom, start, end)` rows of a region file. Only the
/// first three columns are read and a leading `chr` is dropped.
pub struct RegionReader<R: BufRead> {
    lines: io::Lines<R>,
    line_no: u64,
}

impl<R: BufRead> RegionReader<R> {
    pub fn new(reader: R) -> Self {
        RegionReader {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for RegionReader<R> {
    type Item = Result<(String, i64, i64)>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = match self.lines.next()? {
            Ok(line) => line,
            Err(err) => return Some(Err(err.into())),
        };
        self.line_no += 1;
        Some(parse_region(&line, self.line_no))
    }
}

fn parse_region(line: &str, line_no: u64) -> Result<(String, i64, i64)> {
    let mut fields = line.split('\t');
    let chrom = fields
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| malformed(line_no, "missing chromosome"))?;
    let start = fields
        .next()
        .ok_or_else(|| malformed(line_no, "missing start"))?;
    let end = fields
        .next()
        .ok_or_else(|| malformed(line_no, "missing end"))?;

    Ok((
        strip_chr(chrom).to_string(),
        int_field(start, "start", line_no)?,
        int_field(end, "end", line_no)?,
    ))
}

/// Gene identity attached to a transcription start site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TssInfo {
    pub ensid: String,
    pub symbol: String,
}

/// Load a TSS table: whitespace-separated rows with the position in column
/// 4 and the gene id and symbol right after it.
pub fn load_tss_table(path: &Path) -> Result<Vec<(String, i64, TssInfo)>> {
    let reader = open_input(path)?;
    let mut rows = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx as u64 + 1;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            return Err(malformed(
                line_no,
                &format!("expected 7 whitespace-separated fields, found {}", fields.len()),
            ));
        }
        rows.push((
            strip_chr(fields[0]).to_string(),
            int_field(fields[4], "tss position", line_no)?,
            TssInfo {
                ensid: fields[5].to_string(),
                symbol: fields[6].to_string(),
            },
        ));
    }
    Ok(rows)
}

/// Load a variant table of `chrom pos rsid` lines.
pub fn load_variant_table(path: &Path) -> Result<Vec<(String, i64, String)>> {
    let reader = open_input(path)?;
    let mut rows = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx as u64 + 1;
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return Err(malformed(
                line_no,
                &format!("expected 3 tab-separated fields, found {}", fields.len()),
            ));
        }
        rows.push((
            strip_chr(fields[0]).to_string(),
            int_field(fields[1], "position", line_no)?,
            fields[2].to_string(),
        ));
    }
    Ok(rows)
}

fn malformed(line_no: u64, msg: &str) -> PeakError {
    PeakError::MalformedInput(format!("line {}: {}", line_no, msg))
}

fn int_field(field: &str, what: &str, line_no: u64) -> Result<i64> {
    field
        .trim()
        .parse()
        .map_err(|_| malformed(line_no, &format!("bad {} value {:?}", what, field)))
}

fn uint_field(field: &str, what: &str, line_no: u64) -> Result<u64> {
    field
        .trim()
        .parse()
        .map_err(|_| malformed(line_no, &format!("bad {} value {:?}", what, field)))
}

fn float_field(field: &str, what: &str, line_no: u64) -> Result<f64> {
    field
        .trim()
        .parse()
        .map_err(|_| malformed(line_no, &format!("bad {} value {:?}", what, field)))
}
