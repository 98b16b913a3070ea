use crate::libs::bed::SiteRecord;
use crate::libs::error::{CpvError, Result};
use crossbeam::channel::{bounded, Receiver};
use indexmap::IndexMap;
use intspan::IntSpan;
use std::thread::JoinHandle;

/// Number of bases covered by the union of all record intervals.
///
/// Intervals are half-open `[start, end)` and only overlap within a
/// chromosome.
///
/// ```
/// # use cpv::libs::bed::SiteRecord;
/// # use cpv::libs::coverage::total_coverage;
/// let rec = |start, end| Ok(SiteRecord { chrom: "chr1".to_string(), start, end, p: 0.5 });
/// let total = total_coverage(vec![rec(0, 100), rec(50, 150)].into_iter()).unwrap();
/// assert_eq!(total, 150);
/// ```
pub fn total_coverage<I>(records: I) -> Result<u64>
where
    I: Iterator<Item = Result<SiteRecord>>,
{
    let mut bases_of: IndexMap<String, IntSpan> = IndexMap::new();
    for rec in records {
        let rec = rec?;
        if rec.end == rec.start {
            continue;
        }
        let lower = to_i32(rec.start + 1)?;
        let upper = to_i32(rec.end)?;
        bases_of
            .entry(rec.chrom)
            .or_insert_with(IntSpan::new)
            .add_pair(lower, upper);
    }

    Ok(bases_of
        .values()
        .map(|ints| ints.cardinality() as u64)
        .sum())
}

fn to_i32(pos: u64) -> Result<i32> {
    i32::try_from(pos).map_err(|_| {
        CpvError::NotSupported(format!("coordinate {} is beyond the i32 range", pos))
    })
}

/// Coverage computed on a background thread.
///
/// The value comes back through a one-slot channel and is received exactly
/// once by [`CoverageTask::wait`].
pub struct CoverageTask {
    receiver: Receiver<anyhow::Result<u64>>,
    handle: JoinHandle<()>,
}

impl CoverageTask {
    pub fn spawn<F>(job: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<u64> + Send + 'static,
    {
        let (sender, receiver) = bounded(1);
        let handle = std::thread::spawn(move || {
            // The receiver only goes away when the main flow already failed
            let _ = sender.send(job());
        });

        Self { receiver, handle }
    }

    /// Blocks until the background job is done.
    pub fn wait(self) -> anyhow::Result<u64> {
        let received = self.receiver.recv();
        if self.handle.join().is_err() {
            anyhow::bail!("coverage task panicked");
        }
        match received {
            Ok(total) => total,
            Err(_) => anyhow::bail!("coverage task ended without a result"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(chrom: &str, start: u64, end: u64) -> Result<SiteRecord> {
        Ok(SiteRecord {
            chrom: chrom.to_string(),
            start,
            end,
            p: 0.1,
        })
    }

    #[test]
    fn overlapping_intervals_counted_once() {
        let records = vec![rec("chr1", 0, 100), rec("chr1", 50, 150)];
        assert_eq!(total_coverage(records.into_iter()).unwrap(), 150);
    }

    #[test]
    fn chromosomes_do_not_mix() {
        let records = vec![
            rec("chr1", 0, 10),
            rec("chr1", 5, 12),
            rec("chr2", 0, 10),
            rec("chr2", 20, 21),
        ];
        assert_eq!(total_coverage(records.into_iter()).unwrap(), 12 + 10 + 1);
    }

    #[test]
    fn adjacent_and_empty_intervals() {
        let records = vec![rec("chr1", 0, 10), rec("chr1", 10, 20), rec("chr1", 30, 30)];
        assert_eq!(total_coverage(records.into_iter()).unwrap(), 20);
    }

    #[test]
    fn parse_error_propagates() {
        let records = vec![
            rec("chr1", 0, 10),
            Err(CpvError::InputContract("bad".to_string())),
        ];
        assert!(total_coverage(records.into_iter()).is_err());
    }

    #[test]
    fn task_delivers_value() {
        let task = CoverageTask::spawn(|| Ok(42));
        assert_eq!(task.wait().unwrap(), 42);
    }

    #[test]
    fn task_failure_is_fatal() {
        let task = CoverageTask::spawn(|| anyhow::bail!("unreadable"));
        assert!(task.wait().is_err());

        let task = CoverageTask::spawn(|| panic!("boom"));
        assert!(task.wait().is_err());
    }
}
