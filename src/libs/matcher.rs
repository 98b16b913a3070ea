//! Single forward sweep that hands every region the p-value records lying
//! inside it.

use crate::libs::bed::{Region, SiteRecord};
use crate::libs::error::{CpvError, Result};

/// A region with the records it contains, in input order. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionAssignment {
    pub region: Region,
    pub records: Vec<SiteRecord>,
}

impl RegionAssignment {
    pub fn pvalues(&self) -> Vec<f64> {
        self.records.iter().map(|rec| rec.p).collect()
    }
}

/// Merges two sorted streams. The record cursor only moves forward, so the
/// whole sweep is linear in regions plus records.
///
/// Records are skipped until one sits on the region's chromosome at or past
/// its start; records are then collected while they stay on that chromosome
/// and end inside the region.
pub struct RegionMatcher<R, S>
where
    R: Iterator<Item = Result<Region>>,
    S: Iterator<Item = Result<SiteRecord>>,
{
    regions: R,
    sites: S,
    cursor: Option<SiteRecord>,
    primed: bool,
    done: bool,
    matched: usize,
}

impl<R, S> RegionMatcher<R, S>
where
    R: Iterator<Item = Result<Region>>,
    S: Iterator<Item = Result<SiteRecord>>,
{
    pub fn new(regions: R, sites: S) -> Self {
        Self {
            regions,
            sites,
            cursor: None,
            primed: false,
            done: false,
            matched: 0,
        }
    }

    /// Number of assignments handed out so far.
    pub fn matched(&self) -> usize {
        self.matched
    }

    fn advance(&mut self) -> Result<()> {
        self.cursor = self.sites.next().transpose()?;
        Ok(())
    }

    fn assign(&mut self, region: Region) -> Result<RegionAssignment> {
        if !self.primed {
            self.advance()?;
            self.primed = true;
        }

        while let Some(cur) = &self.cursor {
            if cur.chrom != region.chrom || cur.start < region.start {
                self.advance()?;
            } else {
                break;
            }
        }

        let mut records = vec![];
        while let Some(cur) = &self.cursor {
            if cur.chrom == region.chrom && cur.end <= region.end {
                if let Some(rec) = self.cursor.take() {
                    records.push(rec);
                }
                self.advance()?;
            } else {
                break;
            }
        }

        if records.is_empty() {
            return Err(CpvError::InputContract(format!(
                "no p-values found within region [{}]; are both files sorted with the same chromosomes?",
                region.line
            )));
        }

        Ok(RegionAssignment { region, records })
    }
}

impl<R, S> Iterator for RegionMatcher<R, S>
where
    R: Iterator<Item = Result<Region>>,
    S: Iterator<Item = Result<SiteRecord>>,
{
    type Item = Result<RegionAssignment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = match self.regions.next()? {
            Ok(region) => self.assign(region),
            Err(e) => Err(e),
        };
        match result {
            Ok(assignment) => {
                self.matched += 1;
                Some(Ok(assignment))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Runs the whole sweep and checks that every one of the `expected` regions
/// received its records.
pub fn match_regions<R, S>(regions: R, sites: S, expected: usize) -> Result<Vec<RegionAssignment>>
where
    R: Iterator<Item = Result<Region>>,
    S: Iterator<Item = Result<SiteRecord>>,
{
    let assignments: Vec<RegionAssignment> =
        RegionMatcher::new(regions, sites).collect::<Result<_>>()?;

    if assignments.len() != expected {
        return Err(CpvError::InputContract(format!(
            "matched {} regions but the region file has {}",
            assignments.len(),
            expected
        )));
    }
    Ok(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(chrom: &str, start: u64, p: f64) -> Result<SiteRecord> {
        Ok(SiteRecord {
            chrom: chrom.to_string(),
            start,
            end: start + 1,
            p,
        })
    }

    fn region(chrom: &str, start: u64, end: u64) -> Result<Region> {
        Ok(Region::parse(&format!("{}\t{}\t{}", chrom, start, end)).unwrap())
    }

    fn starts(assignment: &RegionAssignment) -> Vec<u64> {
        assignment.records.iter().map(|r| r.start).collect()
    }

    #[test]
    fn sweep_assigns_contained_records() {
        let sites = vec![
            site("chr1", 5, 0.9),
            site("chr1", 10, 0.1),
            site("chr1", 20, 0.2),
            site("chr1", 40, 0.3),
            site("chr1", 60, 0.4),
            site("chr1", 61, 0.5),
            site("chr2", 10, 0.6),
            site("chr2", 15, 0.7),
        ];
        let regions = vec![
            region("chr1", 10, 30),
            region("chr1", 60, 70),
            region("chr2", 0, 20),
        ];
        let assignments = match_regions(regions.into_iter(), sites.into_iter(), 3).unwrap();

        assert_eq!(assignments.len(), 3);
        assert_eq!(starts(&assignments[0]), vec![10, 20]);
        assert_eq!(starts(&assignments[1]), vec![60, 61]);
        assert_eq!(starts(&assignments[2]), vec![10, 15]);
        assert_eq!(assignments[2].pvalues(), vec![0.6, 0.7]);
        for a in &assignments {
            assert!(a.records.iter().all(|r| r.chrom == a.region.chrom));
        }
    }

    #[test]
    fn record_ending_past_region_is_left_out() {
        let sites = vec![
            site("chr1", 10, 0.1),
            Ok(SiteRecord {
                chrom: "chr1".to_string(),
                start: 25,
                end: 35,
                p: 0.2,
            }),
        ];
        let regions = vec![region("chr1", 10, 30)];
        let assignments = match_regions(regions.into_iter(), sites.into_iter(), 1).unwrap();
        assert_eq!(starts(&assignments[0]), vec![10]);
    }

    #[test]
    fn region_without_records_is_fatal() {
        let sites = vec![site("chr1", 10, 0.1), site("chr1", 100, 0.2)];
        let regions = vec![region("chr1", 10, 20), region("chr1", 40, 50)];
        let mut matcher = RegionMatcher::new(regions.into_iter(), sites.into_iter());

        assert!(matcher.next().unwrap().is_ok());
        match matcher.next().unwrap() {
            Err(CpvError::InputContract(msg)) => assert!(msg.contains("chr1\t40\t50")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matcher.next().is_none());
        assert_eq!(matcher.matched(), 1);
    }

    #[test]
    fn missing_chromosome_is_fatal() {
        let sites = vec![site("chr1", 10, 0.1)];
        let regions = vec![region("chrX", 0, 100)];
        let result = match_regions(regions.into_iter(), sites.into_iter(), 1);
        assert!(matches!(result, Err(CpvError::InputContract(_))));
    }

    #[test]
    fn count_mismatch_is_fatal() {
        let sites = vec![site("chr1", 10, 0.1)];
        let regions = vec![region("chr1", 0, 100)];
        let result = match_regions(regions.into_iter(), sites.into_iter(), 2);
        assert!(matches!(result, Err(CpvError::InputContract(_))));
    }

    #[test]
    fn record_errors_propagate() {
        let sites = vec![
            site("chr1", 10, 0.1),
            Err(CpvError::Parse {
                file: "p.bed".to_string(),
                line: 2,
                message: "invalid".to_string(),
            }),
        ];
        let regions = vec![region("chr1", 0, 100)];
        let result = match_regions(regions.into_iter(), sites.into_iter(), 1);
        assert!(matches!(result, Err(CpvError::Parse { .. })));
    }
}
