//! Region p-values: matches regions to their per-site p-values, combines them
//! with the estimated correlation and corrects for the number of windows the
//! covered genome holds.

use crate::libs::acf::{estimate_acf, region_lags, AcfTable};
use crate::libs::bed::{summarize_regions, PColumn, Region, RegionReader, SiteReader};
use crate::libs::coverage::{total_coverage, CoverageTask};
use crate::libs::error::CpvError;
use crate::libs::io::format_g;
use crate::libs::matcher::{match_regions, RegionAssignment};
use crate::libs::sidak::sidak;
use crate::libs::simulate::{
    sim_combiner, sim_truncated_product, SampleSource, SimConfig, SimMode, N_BATCHES,
};
use crate::libs::stouffer::{Combiner, StoufferLiptak};
use itertools::Itertools;

/// Above this many lags the one-off ACF pass gets slow.
const MANY_LAGS: usize = 100;

#[derive(Debug, Clone)]
pub struct RegionPOptions {
    /// Per-site p-values; read several times, so stdin is not accepted
    pub pvals: String,
    pub regions: String,
    pub column: PColumn,
    /// Distance between ACF lags
    pub step: u64,
    pub sim_mode: SimMode,
    /// Only regions with a corrected p below this are simulated
    pub sim_cutoff: f64,
    pub sim: SimConfig,
    /// Resample the observed p-values instead of drawing uniforms
    pub empirical: bool,
}

/// One output row.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedResult {
    pub line: String,
    pub p: f64,
    pub p_sidak: f64,
    pub p_sim: Option<f64>,
}

impl CombinedResult {
    /// Region line followed by the p-values with 4 significant digits.
    ///
    /// ```
    /// # use cpv::libs::pipeline::CombinedResult;
    /// let res = CombinedResult {
    ///     line: "chr1\t10\t20".to_string(),
    ///     p: 0.000123456,
    ///     p_sidak: 0.0123456,
    ///     p_sim: None,
    /// };
    /// assert_eq!(res.to_tsv(false), "chr1\t10\t20\t0.0001235\t0.01235");
    /// assert_eq!(res.to_tsv(true), "chr1\t10\t20\t0.0001235\t0.01235\tNA");
    /// ```
    pub fn to_tsv(&self, with_sim: bool) -> String {
        let mut out = format!(
            "{}\t{}\t{}",
            self.line,
            format_g(self.p, 4),
            format_g(self.p_sidak, 4)
        );
        if with_sim {
            out += "\t";
            match self.p_sim {
                Some(p) => out += &format_g(p, 4),
                None => out += "NA",
            }
        }
        out
    }
}

/// Starts a run. Input-contract problems are found here, before any result
/// is produced; the returned iterator then yields one result per region.
pub fn region_p(opts: &RegionPOptions) -> anyhow::Result<RegionResults<StoufferLiptak>> {
    region_p_with(opts, StoufferLiptak)
}

pub fn region_p_with<C: Combiner + Sync>(
    opts: &RegionPOptions,
    combiner: C,
) -> anyhow::Result<RegionResults<C>> {
    if opts.pvals == "stdin" {
        return Err(CpvError::NotSupported(
            "the p-value file is read more than once and cannot be stdin".to_string(),
        )
        .into());
    }

    // read once, so the regions may come from stdin
    let regions: Vec<Region> = RegionReader::new(crate::reader(&opts.regions)?, &opts.regions)
        .collect::<crate::libs::error::Result<_>>()?;
    let summary = summarize_regions(&regions);
    if summary.count == 0 {
        return Err(CpvError::InputContract(format!("no regions in {}", opts.regions)).into());
    }

    let coverage = {
        let pvals = opts.pvals.clone();
        let column = opts.column;
        CoverageTask::spawn(move || {
            let reader = crate::reader(&pvals)?;
            Ok(total_coverage(SiteReader::new(reader, &pvals, column))?)
        })
    };

    let assignments = match_regions(
        regions.into_iter().map(Ok),
        SiteReader::new(crate::reader(&opts.pvals)?, &opts.pvals, opts.column),
        summary.count,
    )?;
    log::info!("{} regions matched to their p-values", assignments.len());

    let acf = gen_acf(opts, summary.max_len)?;

    let pool = if opts.sim_mode != SimMode::Disabled && opts.empirical {
        let pool = SiteReader::new(crate::reader(&opts.pvals)?, &opts.pvals, opts.column)
            .map(|rec| rec.map(|r| r.p))
            .collect::<crate::libs::error::Result<Vec<f64>>>()?;
        Some(pool)
    } else {
        None
    };

    Ok(RegionResults::new(
        assignments,
        acf,
        combiner,
        coverage,
        opts.clone(),
        pool,
    ))
}

fn gen_acf(opts: &RegionPOptions, max_len: u64) -> anyhow::Result<AcfTable> {
    log::info!("calculating ACF out to: {}", max_len);
    let lags = region_lags(max_len, opts.step);
    let repr = if lags.len() > 20 {
        format!(
            "[{} ... {}]",
            lags[1..4].iter().join(", "),
            lags[lags.len() - 5..].iter().join(", ")
        )
    } else {
        format!("[{}]", lags.iter().join(", "))
    };
    log::info!("    with {} lags: {}", lags.len(), repr);
    if lags.len() > MANY_LAGS {
        log::warn!(
            "{} lags could take a long time; consider a larger step size",
            lags.len()
        );
    }

    let acf = estimate_acf(
        SiteReader::new(crate::reader(&opts.pvals)?, &opts.pvals, opts.column),
        &lags,
    )?;
    for bin in acf.bins() {
        log::debug!(
            "acf [{}, {}): {:.4} from {} pairs",
            bin.lag_min,
            bin.lag_max,
            bin.correlation,
            bin.pairs
        );
    }
    log::info!("done with one-time ACF calculation");
    Ok(acf)
}

/// Lazily combined regions, in region-file order. Stops after the first
/// error.
pub struct RegionResults<C: Combiner + Sync> {
    assignments: std::vec::IntoIter<RegionAssignment>,
    acf: AcfTable,
    combiner: C,
    coverage: Option<CoverageTask>,
    total_coverage: Option<u64>,
    opts: RegionPOptions,
    pool: Option<Vec<f64>>,
    index: usize,
    failed: bool,
}

impl<C: Combiner + Sync> RegionResults<C> {
    /// Combines already matched regions. `pool` holds the observed p-values
    /// for empirical simulations.
    pub fn new(
        assignments: Vec<RegionAssignment>,
        acf: AcfTable,
        combiner: C,
        coverage: CoverageTask,
        opts: RegionPOptions,
        pool: Option<Vec<f64>>,
    ) -> Self {
        Self {
            assignments: assignments.into_iter(),
            acf,
            combiner,
            coverage: Some(coverage),
            total_coverage: None,
            opts,
            pool,
            index: 0,
            failed: false,
        }
    }

    /// Waits for the background coverage job the first time it is needed.
    fn total_coverage(&mut self) -> anyhow::Result<u64> {
        if let Some(task) = self.coverage.take() {
            let total = task.wait()?;
            log::info!("{} bases used as coverage for sidak correction", total);
            self.total_coverage = Some(total);
        }
        self.total_coverage
            .ok_or_else(|| anyhow::anyhow!("coverage is not available"))
    }

    fn simulate(
        &self,
        assignment: &RegionAssignment,
        sigma: &nalgebra::DMatrix<f64>,
    ) -> anyhow::Result<f64> {
        let source = match &self.pool {
            Some(pool) => SampleSource::Empirical(pool),
            None => SampleSource::Uniform,
        };
        let config = SimConfig {
            seed: self
                .opts
                .sim
                .seed
                .wrapping_add((self.index * N_BATCHES) as u64),
            ..self.opts.sim
        };
        let ps = assignment.pvalues();

        let p = match self.opts.sim_mode {
            SimMode::TruncatedProduct => sim_truncated_product(sigma, &ps, &config, source)?,
            _ => sim_combiner(sigma, &ps, &config, source, &self.combiner)?,
        };
        Ok(p)
    }

    fn process(&mut self, assignment: RegionAssignment) -> anyhow::Result<CombinedResult> {
        let sigma = self.acf.sigma(&assignment.records);
        let ps = assignment.pvalues();

        let combined = self.combiner.combine(&ps, &sigma);
        if !combined.ok {
            return Err(CpvError::NumericDegeneracy(format!(
                "correlation matrix of region [{}] is unusable",
                assignment.region.line
            ))
            .into());
        }

        let coverage = self.total_coverage()?;
        let p_sidak = sidak(combined.p, assignment.region.len(), coverage);

        let p_sim = if self.opts.sim_mode != SimMode::Disabled && p_sidak < self.opts.sim_cutoff {
            Some(self.simulate(&assignment, &sigma)?)
        } else {
            None
        };

        Ok(CombinedResult {
            line: assignment.region.line,
            p: combined.p,
            p_sidak,
            p_sim,
        })
    }
}

impl<C: Combiner + Sync> Iterator for RegionResults<C> {
    type Item = anyhow::Result<CombinedResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let assignment = self.assignments.next()?;
        let result = self.process(assignment);
        self.index += 1;
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}
