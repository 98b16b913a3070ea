//! Autocorrelation of p-values as a function of genomic distance, and the
//! per-region correlation matrix built from it.

use crate::libs::bed::SiteRecord;
use crate::libs::error::{CpvError, Result};
use nalgebra::DMatrix;
use std::collections::VecDeque;

/// Lags `1, 1 + step, ...` below `max_len`, plus one lag at or past
/// `max_len` so the last bin reaches the longest region.
///
/// ```
/// # use cpv::libs::acf::region_lags;
/// assert_eq!(region_lags(200, 50), vec![1, 51, 101, 151, 201]);
/// assert_eq!(region_lags(151, 50), vec![1, 51, 101, 151]);
/// assert_eq!(region_lags(10, 50), vec![1, 51]);
/// assert_eq!(region_lags(1, 50), vec![1, 51]);
/// ```
pub fn region_lags(max_len: u64, step: u64) -> Vec<u64> {
    let step = step.max(1);
    let mut lags: Vec<u64> = (1..max_len.max(2)).step_by(step as usize).collect();
    let last = *lags.last().unwrap_or(&1);
    if last < max_len || lags.len() < 2 {
        lags.push(last + step);
    }
    lags
}

/// Parses `start:end:step` into the lag list `start, start + step, ...`
/// up to and including `end`.
///
/// ```
/// # use cpv::libs::acf::parse_lag_range;
/// assert_eq!(parse_lag_range("1:200:50").unwrap(), vec![1, 51, 101, 151]);
/// assert_eq!(parse_lag_range("10:30:10").unwrap(), vec![10, 20, 30]);
/// assert!(parse_lag_range("1:200").is_err());
/// assert!(parse_lag_range("5:5:1").is_err());
/// ```
pub fn parse_lag_range(range: &str) -> Result<Vec<u64>> {
    let parts: Vec<u64> = range
        .split(':')
        .map(|s| s.trim().parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| CpvError::NotSupported(format!("invalid lag range '{}'", range)))?;
    if parts.len() != 3 || parts[2] == 0 || parts[0] == 0 {
        return Err(CpvError::NotSupported(format!(
            "lag range '{}' is not start:end:step",
            range
        )));
    }
    let lags: Vec<u64> = (parts[0]..=parts[1]).step_by(parts[2] as usize).collect();
    if lags.len() < 2 {
        return Err(CpvError::NotSupported(format!(
            "lag range '{}' gives fewer than 2 lags",
            range
        )));
    }
    Ok(lags)
}

/// One distance bin `[lag_min, lag_max)` of the ACF.
#[derive(Debug, Clone, PartialEq)]
pub struct AcfBin {
    pub lag_min: u64,
    pub lag_max: u64,
    pub correlation: f64,
    pub pairs: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcfTable {
    bins: Vec<AcfBin>,
}

impl AcfTable {
    pub fn new(bins: Vec<AcfBin>) -> Self {
        Self { bins }
    }

    pub fn bins(&self) -> &[AcfBin] {
        &self.bins
    }

    /// Correlation at distance `dist`. Distances shorter than the first lag
    /// take the first bin, distances past the last bin are uncorrelated.
    ///
    /// ```
    /// # use cpv::libs::acf::{AcfBin, AcfTable};
    /// let bin = |lag_min, lag_max, correlation| AcfBin {
    ///     lag_min,
    ///     lag_max,
    ///     correlation,
    ///     pairs: 10,
    /// };
    /// let table = AcfTable::new(vec![bin(1, 51, 0.5), bin(51, 101, 0.2)]);
    /// assert_eq!(table.correlation(0), 0.5);
    /// assert_eq!(table.correlation(50), 0.5);
    /// assert_eq!(table.correlation(51), 0.2);
    /// assert_eq!(table.correlation(101), 0.2);
    /// assert_eq!(table.correlation(102), 0.0);
    /// ```
    pub fn correlation(&self, dist: u64) -> f64 {
        let first = match self.bins.first() {
            Some(bin) => bin,
            None => return 0.0,
        };
        if dist < first.lag_min {
            return first.correlation;
        }
        let idx = self.bins.partition_point(|bin| bin.lag_min <= dist);
        match self.bins.get(idx.saturating_sub(1)) {
            Some(bin) if dist <= bin.lag_max => bin.correlation,
            _ => 0.0,
        }
    }

    /// Correlation matrix of `records`: unit diagonal, off-diagonal entries
    /// looked up by the distance between record starts.
    pub fn sigma(&self, records: &[SiteRecord]) -> DMatrix<f64> {
        let n = records.len();
        let mut sigma = DMatrix::<f64>::identity(n, n);
        for i in 0..n {
            for j in (i + 1)..n {
                let dist = records[i].start.abs_diff(records[j].start);
                let c = self.correlation(dist);
                sigma[(i, j)] = c;
                sigma[(j, i)] = c;
            }
        }
        sigma
    }
}

/// Running Pearson correlation, Welford style.
#[derive(Debug, Clone, Default)]
struct PairStats {
    n: usize,
    mean_x: f64,
    mean_y: f64,
    m2_x: f64,
    m2_y: f64,
    c_xy: f64,
}

impl PairStats {
    fn push(&mut self, x: f64, y: f64) {
        self.n += 1;
        let n = self.n as f64;
        let dx = x - self.mean_x;
        let dy = y - self.mean_y;
        self.mean_x += dx / n;
        self.mean_y += dy / n;
        self.m2_x += dx * (x - self.mean_x);
        self.m2_y += dy * (y - self.mean_y);
        self.c_xy += dx * (y - self.mean_y);
    }

    fn correlation(&self) -> f64 {
        if self.n < 2 || self.m2_x <= 0.0 || self.m2_y <= 0.0 {
            return 0.0;
        }
        (self.c_xy / (self.m2_x * self.m2_y).sqrt()).clamp(-1.0, 1.0)
    }
}

fn mlog10(p: f64) -> f64 {
    -p.max(f64::MIN_POSITIVE).log10()
}

/// Estimates the ACF of `-log10(p)` over the bins `[lags[i], lags[i + 1])`.
///
/// Every pair of records on the same chromosome whose start distance falls in
/// a bin contributes to that bin. Records must be sorted by start within each
/// chromosome.
pub fn estimate_acf<I>(records: I, lags: &[u64]) -> Result<AcfTable>
where
    I: Iterator<Item = Result<SiteRecord>>,
{
    if lags.len() < 2 || lags.windows(2).any(|w| w[0] >= w[1]) {
        return Err(CpvError::NotSupported(format!(
            "lags must be at least 2 increasing values, got {:?}",
            lags
        )));
    }
    let max_lag = lags[lags.len() - 1];
    let mut stats = vec![PairStats::default(); lags.len() - 1];

    let mut chrom = String::new();
    let mut window: VecDeque<(u64, f64)> = VecDeque::new();
    for rec in records {
        let rec = rec?;
        if rec.chrom != chrom {
            chrom = rec.chrom.clone();
            window.clear();
        }
        while let Some(&(start, _)) = window.front() {
            if rec.start.saturating_sub(start) > max_lag {
                window.pop_front();
            } else {
                break;
            }
        }

        let y = mlog10(rec.p);
        for &(start, x) in &window {
            let dist = rec.start.saturating_sub(start);
            if let Some(idx) = bin_index(lags, dist) {
                stats[idx].push(x, y);
            }
        }
        window.push_back((rec.start, y));
    }

    let bins = lags
        .windows(2)
        .zip(stats.iter())
        .map(|(w, s)| AcfBin {
            lag_min: w[0],
            lag_max: w[1],
            correlation: s.correlation(),
            pairs: s.n,
        })
        .collect();
    Ok(AcfTable::new(bins))
}

fn bin_index(lags: &[u64], dist: u64) -> Option<usize> {
    let n_bins = lags.len() - 1;
    if dist < lags[0] || dist > lags[n_bins] {
        return None;
    }
    let idx = lags.partition_point(|&l| l <= dist) - 1;
    Some(idx.min(n_bins - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rec(chrom: &str, start: u64, p: f64) -> Result<SiteRecord> {
        Ok(SiteRecord {
            chrom: chrom.to_string(),
            start,
            end: start + 1,
            p,
        })
    }

    #[test]
    fn bins_cover_lags() {
        assert_eq!(bin_index(&[1, 11, 21], 0), None);
        assert_eq!(bin_index(&[1, 11, 21], 1), Some(0));
        assert_eq!(bin_index(&[1, 11, 21], 10), Some(0));
        assert_eq!(bin_index(&[1, 11, 21], 11), Some(1));
        assert_eq!(bin_index(&[1, 11, 21], 21), Some(1));
        assert_eq!(bin_index(&[1, 11, 21], 22), None);
    }

    #[test]
    fn identical_neighbours_correlate() {
        // neighbours 5bp apart share their p-value, pairs 10bp apart do not
        let ps = [0.5, 0.01, 0.2, 0.001, 0.3, 0.05, 0.8, 0.0001];
        let mut records = vec![];
        for (i, &p) in ps.iter().enumerate() {
            let base = i as u64 * 100;
            records.push(rec("chr1", base, p));
            records.push(rec("chr1", base + 5, p));
        }
        let table = estimate_acf(records.into_iter(), &[1, 10, 200]).unwrap();

        let bins = table.bins();
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0].pairs, ps.len());
        assert_relative_eq!(bins[0].correlation, 1.0, epsilon = 1e-12);
        assert!(bins[1].pairs > 0);
        assert!(bins[1].correlation < 1.0);
    }

    #[test]
    fn chromosomes_are_separate() {
        let records = vec![rec("chr1", 100, 0.1), rec("chr2", 105, 0.1)];
        let table = estimate_acf(records.into_iter(), &[1, 51]).unwrap();
        assert_eq!(table.bins()[0].pairs, 0);
        assert_eq!(table.bins()[0].correlation, 0.0);
    }

    #[test]
    fn bad_lags_rejected() {
        assert!(estimate_acf(std::iter::empty(), &[5]).is_err());
        assert!(estimate_acf(std::iter::empty(), &[5, 5]).is_err());
    }

    #[test]
    fn sigma_from_table() {
        let table = AcfTable::new(vec![
            AcfBin {
                lag_min: 1,
                lag_max: 51,
                correlation: 0.6,
                pairs: 3,
            },
            AcfBin {
                lag_min: 51,
                lag_max: 101,
                correlation: 0.3,
                pairs: 3,
            },
        ]);
        let records: Vec<SiteRecord> = vec![
            rec("chr1", 0, 0.1),
            rec("chr1", 30, 0.2),
            rec("chr1", 90, 0.3),
            rec("chr1", 500, 0.4),
        ]
        .into_iter()
        .collect::<Result<_>>()
        .unwrap();
        let sigma = table.sigma(&records);

        assert_eq!(sigma.shape(), (4, 4));
        for i in 0..4 {
            assert_eq!(sigma[(i, i)], 1.0);
        }
        assert_eq!(sigma[(0, 1)], 0.6);
        assert_eq!(sigma[(1, 2)], 0.3);
        assert_eq!(sigma[(0, 2)], 0.3);
        assert_eq!(sigma[(2, 0)], 0.3);
        assert_eq!(sigma[(0, 3)], 0.0);
    }
}
