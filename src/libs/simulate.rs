//! Monte-Carlo re-estimation of a region's significance.
//!
//! Synthetic p-value vectors share the region's correlation structure through
//! a normal copula: uniforms are mapped to normal quantiles, mixed with the
//! Cholesky factor of the correlation matrix and mapped back.

use crate::libs::error::{CpvError, Result};
use crate::libs::normal;
use crate::libs::stouffer::{Combiner, P_MAX};
use nalgebra::DMatrix;
use rand::distributions::Open01;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::str::FromStr;

/// Simulations always run in this many independent batches.
pub const N_BATCHES: usize = 10;

/// Diagonal loads tried, in order, when the correlation matrix does not
/// factor.
const RIDGES: [f64; 4] = [0.0, 1e-10, 1e-8, 1e-6];

/// Which statistic, if any, re-validates a region by simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimMode {
    #[default]
    Disabled,
    /// Truncated product of the p-values at or below tau
    TruncatedProduct,
    /// The combined p-value itself
    Combiner,
}

impl FromStr for SimMode {
    type Err = CpvError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(SimMode::Disabled),
            "tpm" => Ok(SimMode::TruncatedProduct),
            "slk" => Ok(SimMode::Combiner),
            _ => Err(CpvError::NotSupported(format!(
                "unknown simulation mode '{}'",
                s
            ))),
        }
    }
}

/// Where the synthetic uniforms come from before correlation is imposed.
#[derive(Debug, Clone, Copy)]
pub enum SampleSource<'a> {
    Uniform,
    /// Resampled with replacement from observed p-values
    Empirical(&'a [f64]),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimConfig {
    /// Total number of synthetic vectors
    pub draws: usize,
    /// Truncation threshold of the truncated-product statistic
    pub tau: f64,
    pub seed: u64,
}

impl SimConfig {
    pub fn new(draws: usize, tau: f64, seed: u64) -> Result<Self> {
        if draws < N_BATCHES {
            return Err(CpvError::NotSupported(format!(
                "at least {} simulations are needed, got {}",
                N_BATCHES, draws
            )));
        }
        if !(0.0..=1.0).contains(&tau) {
            return Err(CpvError::NotSupported(format!(
                "truncation threshold {} outside [0, 1]",
                tau
            )));
        }
        Ok(Self { draws, tau, seed })
    }

    fn per_batch(&self) -> usize {
        self.draws / N_BATCHES
    }
}

/// Lower Cholesky factor of `sigma`.
///
/// A matrix that is not numerically positive definite gets a growing ridge on
/// its diagonal; once every ridge failed the matrix is reported as
/// degenerate.
pub fn cholesky_factor(sigma: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = sigma.nrows();
    if n == 0 || sigma.ncols() != n {
        return Err(CpvError::NumericDegeneracy(format!(
            "correlation matrix of shape {:?} is not square and non-empty",
            sigma.shape()
        )));
    }

    for ridge in RIDGES {
        let mut loaded = sigma.clone();
        if ridge > 0.0 {
            for i in 0..n {
                loaded[(i, i)] += ridge;
            }
        }
        if let Some(chol) = loaded.cholesky() {
            if ridge > 0.0 {
                log::debug!("correlation matrix factored with ridge {:e}", ridge);
            }
            return Ok(chol.l());
        }
    }

    Err(CpvError::NumericDegeneracy(format!(
        "{}x{} correlation matrix is not positive definite after {} attempts",
        n,
        n,
        RIDGES.len()
    )))
}

/// Draws correlated, marginally uniform p-value vectors.
#[derive(Debug, Clone)]
pub struct CorrelatedSampler<'a> {
    l: DMatrix<f64>,
    source: SampleSource<'a>,
}

impl<'a> CorrelatedSampler<'a> {
    pub fn new(sigma: &DMatrix<f64>, source: SampleSource<'a>) -> Result<Self> {
        if let SampleSource::Empirical(pool) = source {
            if pool.is_empty() {
                return Err(CpvError::NotSupported(
                    "empirical sampling needs at least one observed p-value".to_string(),
                ));
            }
        }
        Ok(Self {
            l: cholesky_factor(sigma)?,
            source,
        })
    }

    /// Lower Cholesky factor used to impose the correlation.
    pub fn factor(&self) -> &DMatrix<f64> {
        &self.l
    }

    /// `n x m` matrix; every column is one synthetic vector.
    pub fn draw<R: Rng>(&self, m: usize, rng: &mut R) -> DMatrix<f64> {
        let n = self.l.nrows();
        let x = match self.source {
            SampleSource::Uniform => DMatrix::from_fn(n, m, |_, _| rng.sample::<f64, _>(Open01)),
            SampleSource::Empirical(pool) => DMatrix::from_fn(n, m, |_, _| {
                pool[rng.gen_range(0..pool.len())].clamp(f64::MIN_POSITIVE, P_MAX)
            }),
        };
        let z = x.map(normal::ppf);
        let y = &self.l * z;
        y.map(normal::cdf)
    }
}

/// Product of the p-values at or below `tau`, accumulated in log space.
/// An empty product is 1.
///
/// ```
/// # use cpv::libs::simulate::truncated_product;
/// let ps = [0.01, 0.2, 0.04, 0.9];
/// assert!((truncated_product(ps.iter().copied(), 0.05) - 0.0004).abs() < 1e-15);
/// assert_eq!(truncated_product(ps.iter().copied(), 0.0), 1.0);
/// ```
pub fn truncated_product<I: IntoIterator<Item = f64>>(pvalues: I, tau: f64) -> f64 {
    pvalues
        .into_iter()
        .filter(|&p| p <= tau)
        .map(f64::ln)
        .sum::<f64>()
        .exp()
}

fn batch_rng(seed: u64, batch: usize) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add(batch as u64))
}

/// Runs the batches in parallel; `count` returns how many columns of one
/// batch are at least as extreme as the observation. The hits are divided
/// by the requested number of draws, even when it is not a multiple of
/// [`N_BATCHES`].
fn run_batches<F>(sampler: &CorrelatedSampler, config: &SimConfig, count: F) -> Result<f64>
where
    F: Fn(&DMatrix<f64>) -> Result<usize> + Sync,
{
    let per_batch = config.per_batch();
    let counts = (0..N_BATCHES)
        .into_par_iter()
        .map(|batch| {
            let mut rng = batch_rng(config.seed, batch);
            let y = sampler.draw(per_batch, &mut rng);
            count(&y)
        })
        .collect::<Result<Vec<usize>>>()?;

    Ok(counts.iter().sum::<usize>() as f64 / config.draws as f64)
}

/// Monte-Carlo p-value of the truncated-product statistic: the share of
/// synthetic products not larger than the observed one.
pub fn sim_truncated_product(
    sigma: &DMatrix<f64>,
    pvalues: &[f64],
    config: &SimConfig,
    source: SampleSource,
) -> Result<f64> {
    let sampler = CorrelatedSampler::new(sigma, source)?;
    let w0 = truncated_product(pvalues.iter().copied(), config.tau);

    run_batches(&sampler, config, |y| {
        Ok(y.column_iter()
            .filter(|col| truncated_product(col.iter().copied(), config.tau) <= w0)
            .count())
    })
}

/// Monte-Carlo p-value of the combined p-value: the share of synthetic
/// combinations strictly smaller than the observed one.
///
/// Every synthetic combination has to succeed.
pub fn sim_combiner<C: Combiner + Sync>(
    sigma: &DMatrix<f64>,
    pvalues: &[f64],
    config: &SimConfig,
    source: SampleSource,
    combiner: &C,
) -> Result<f64> {
    let sampler = CorrelatedSampler::new(sigma, source)?;
    let observed = combiner.combine(pvalues, sigma);
    if !observed.ok {
        return Err(CpvError::NumericDegeneracy(
            "observed p-values could not be combined".to_string(),
        ));
    }
    let w0 = observed.p;

    let l = sampler.factor();
    let n = l.nrows();
    run_batches(&sampler, config, |y| {
        let mut hits = 0;
        // column-major storage: every chunk is one synthetic vector
        for ps in y.as_slice().chunks(n) {
            let combined = combiner.combine_factored(ps, l);
            if !combined.ok {
                return Err(CpvError::NumericDegeneracy(
                    "a simulated vector could not be combined".to_string(),
                ));
            }
            if combined.p < w0 {
                hits += 1;
            }
        }
        Ok(hits)
    })
}
