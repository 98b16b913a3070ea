//! Tab-separated, BED-like inputs: per-site p-values and candidate regions.
//!
//! Both streams are `#`-commented, sorted by `(chrom, start)` and read once.
//! Lines are parsed into fixed-field structs; a malformed line stops the
//! iteration with its line number.

use crate::libs::error::{CpvError, Result};
use std::io::BufRead;

/// Position of the p-value column, 1-based. Negative values count from the
/// end of the line, so `-1` is the last column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PColumn(i64);

impl PColumn {
    pub fn new(col: i64) -> Result<Self> {
        if col == 0 {
            return Err(CpvError::NotSupported(
                "column numbers are 1-based, 0 is not a column".to_string(),
            ));
        }
        Ok(Self(col))
    }

    /// ```
    /// # use cpv::libs::bed::PColumn;
    /// assert_eq!(PColumn::new(4).unwrap().resolve(5), Some(3));
    /// assert_eq!(PColumn::new(-1).unwrap().resolve(5), Some(4));
    /// assert_eq!(PColumn::new(-6).unwrap().resolve(5), None);
    /// assert_eq!(PColumn::new(6).unwrap().resolve(5), None);
    /// ```
    pub fn resolve(&self, n_fields: usize) -> Option<usize> {
        let idx = if self.0 > 0 {
            self.0 - 1
        } else {
            n_fields as i64 + self.0
        };
        if idx >= 0 && (idx as usize) < n_fields {
            Some(idx as usize)
        } else {
            None
        }
    }
}

impl Default for PColumn {
    fn default() -> Self {
        Self(-1)
    }
}

/// One per-site test: an interval and its p-value.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRecord {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub p: f64,
}

impl SiteRecord {
    /// ```
    /// # use cpv::libs::bed::{PColumn, SiteRecord};
    /// let rec = SiteRecord::parse("chr1\t10\t20\tx\t0.25", PColumn::default()).unwrap();
    /// assert_eq!(rec.chrom, "chr1");
    /// assert_eq!((rec.start, rec.end), (10, 20));
    /// assert_eq!(rec.p, 0.25);
    ///
    /// assert!(SiteRecord::parse("chr1\t10\t20\t1.5", PColumn::default()).is_err());
    /// assert!(SiteRecord::parse("chr1\t30\t20\t0.5", PColumn::default()).is_err());
    /// assert!(SiteRecord::parse("chr1\t10", PColumn::default()).is_err());
    /// ```
    pub fn parse(line: &str, column: PColumn) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = line.split('\t').collect();
        let (chrom, start, end) = parse_interval(&fields)?;
        let idx = column
            .resolve(fields.len())
            .ok_or_else(|| format!("no column {} in {} fields", column.0, fields.len()))?;
        let p = parse_p(fields[idx])?;

        Ok(Self {
            chrom,
            start,
            end,
            p,
        })
    }
}

/// A candidate region. The source line is kept verbatim for the output.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub line: String,
}

impl Region {
    /// ```
    /// # use cpv::libs::bed::Region;
    /// let region = Region::parse("chr2\t100\t350\tpeak_1").unwrap();
    /// assert_eq!(region.len(), 250);
    /// assert_eq!(region.line, "chr2\t100\t350\tpeak_1");
    ///
    /// assert!(Region::parse("chr2\t100\t100").is_err());
    /// ```
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = line.split('\t').collect();
        let (chrom, start, end) = parse_interval(&fields)?;
        if end == start {
            return Err(format!("empty region {}:{}-{}", chrom, start, end));
        }

        Ok(Self {
            chrom,
            start,
            end,
            line: line.to_string(),
        })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

fn parse_interval(fields: &[&str]) -> std::result::Result<(String, u64, u64), String> {
    if fields.len() < 3 {
        return Err(format!(
            "expected at least 3 tab-separated fields, got {}",
            fields.len()
        ));
    }
    let start: u64 = fields[1]
        .trim()
        .parse()
        .map_err(|_| format!("invalid start '{}'", fields[1]))?;
    let end: u64 = fields[2]
        .trim()
        .parse()
        .map_err(|_| format!("invalid end '{}'", fields[2]))?;
    if end < start {
        return Err(format!("end {} before start {}", end, start));
    }

    Ok((fields[0].to_string(), start, end))
}

fn parse_p(field: &str) -> std::result::Result<f64, String> {
    let p: f64 = field
        .trim()
        .parse()
        .map_err(|_| format!("invalid p-value '{}'", field))?;
    if !(0.0..=1.0).contains(&p) {
        return Err(format!("p-value {} outside [0, 1]", p));
    }
    Ok(p)
}

fn is_skipped(line: &str) -> bool {
    line.trim().is_empty() || line.starts_with('#')
}

//----------------------------
// Readers
//----------------------------
/// Streams [`SiteRecord`]s out of a p-value table.
///
/// The first data line is treated as a header when its p-value column is not
/// a number.
pub struct SiteReader<R: BufRead> {
    lines: std::io::Lines<R>,
    name: String,
    column: PColumn,
    line_no: usize,
    seen_data: bool,
}

impl<R: BufRead> SiteReader<R> {
    pub fn new(reader: R, name: &str, column: PColumn) -> Self {
        Self {
            lines: reader.lines(),
            name: name.to_string(),
            column,
            line_no: 0,
            seen_data: false,
        }
    }
}

impl<R: BufRead> Iterator for SiteReader<R> {
    type Item = Result<SiteRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            let line = line.trim_end_matches('\r');
            if is_skipped(line) {
                continue;
            }

            let first = !self.seen_data;
            self.seen_data = true;
            match SiteRecord::parse(line, self.column) {
                Ok(rec) => return Some(Ok(rec)),
                Err(_) if first && is_header(line, self.column) => continue,
                Err(message) => {
                    return Some(Err(CpvError::Parse {
                        file: self.name.clone(),
                        line: self.line_no,
                        message,
                    }))
                }
            }
        }
    }
}

fn is_header(line: &str, column: PColumn) -> bool {
    let fields: Vec<&str> = line.split('\t').collect();
    match column.resolve(fields.len()) {
        Some(idx) => fields[idx].trim().parse::<f64>().is_err(),
        None => false,
    }
}

/// Streams [`Region`]s out of a region table.
pub struct RegionReader<R: BufRead> {
    lines: std::io::Lines<R>,
    name: String,
    line_no: usize,
}

impl<R: BufRead> RegionReader<R> {
    pub fn new(reader: R, name: &str) -> Self {
        Self {
            lines: reader.lines(),
            name: name.to_string(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for RegionReader<R> {
    type Item = Result<Region>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            let line = line.trim_end_matches('\r');
            if is_skipped(line) {
                continue;
            }

            return Some(Region::parse(line).map_err(|message| CpvError::Parse {
                file: self.name.clone(),
                line: self.line_no,
                message,
            }));
        }
    }
}

/// Number of regions and the longest one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionSummary {
    pub count: usize,
    pub max_len: u64,
}

pub fn summarize_regions(regions: &[Region]) -> RegionSummary {
    RegionSummary {
        count: regions.len(),
        max_len: regions.iter().map(Region::len).max().unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    #[test]
    fn site_reader_skips_comments_and_header() {
        let input = "\
#comment
chrom\tstart\tend\tp
chr1\t1\t2\t0.5

chr1\t5\t6\t0.01
";
        let records: Vec<SiteRecord> =
            SiteReader::new(BufReader::new(input.as_bytes()), "in", PColumn::default())
                .collect::<Result<_>>()
                .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].start, 5);
        assert_eq!(records[1].p, 0.01);
    }

    #[test]
    fn site_reader_reports_line_number() {
        let input = "chr1\t1\t2\t0.5\nchr1\t5\t6\tNA\n";
        let mut reader =
            SiteReader::new(BufReader::new(input.as_bytes()), "in.bed", PColumn::default());
        assert!(reader.next().unwrap().is_ok());
        match reader.next().unwrap() {
            Err(CpvError::Parse { file, line, .. }) => {
                assert_eq!(file, "in.bed");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn site_reader_custom_column() {
        let input = "chr1\t1\t2\t0.5\t7\n";
        let column = PColumn::new(4).unwrap();
        let rec = SiteReader::new(BufReader::new(input.as_bytes()), "in", column)
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(rec.p, 0.5);
    }

    #[test]
    fn zero_column_rejected() {
        assert!(matches!(PColumn::new(0), Err(CpvError::NotSupported(_))));
    }

    #[test]
    fn summarize_counts_and_longest() {
        let input = "#chrom\tstart\tend\nchr1\t0\t10\nchr1\t20\t120\nchr2\t5\t6\n";
        let regions: Vec<Region> = RegionReader::new(BufReader::new(input.as_bytes()), "r")
            .collect::<Result<_>>()
            .unwrap();
        let summary = summarize_regions(&regions);
        assert_eq!(
            summary,
            RegionSummary {
                count: 3,
                max_len: 100
            }
        );
    }

    #[test]
    fn summarize_empty_file() {
        let input = "# nothing here\n";
        let regions: Vec<Region> = RegionReader::new(BufReader::new(input.as_bytes()), "r")
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(summarize_regions(&regions), RegionSummary::default());
    }
}
