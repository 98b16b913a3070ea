//! Stouffer-Liptak combination of correlated one-sided p-values.

use crate::libs::normal;
use nalgebra::{DMatrix, DVector};

/// Outcome of a combination. `ok` is false when the correlation matrix could
/// not be used; `p` is meaningless then.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Combined {
    pub ok: bool,
    pub p: f64,
}

impl Combined {
    fn failed() -> Self {
        Self {
            ok: false,
            p: f64::NAN,
        }
    }
}

/// Folds several p-values with a known correlation structure into one.
pub trait Combiner {
    fn combine(&self, pvalues: &[f64], sigma: &DMatrix<f64>) -> Combined;

    /// Same as [`Combiner::combine`] with `sigma` given as its lower Cholesky
    /// factor, for callers combining many vectors under one matrix.
    fn combine_factored(&self, pvalues: &[f64], l: &DMatrix<f64>) -> Combined {
        self.combine(pvalues, &(l * l.transpose()))
    }
}

/// Largest p-value fed to the inverse normal; exactly 1 would give -inf.
pub const P_MAX: f64 = 1.0 - 9e-16;

/// Weighted z-score combination: the z-scores are decorrelated with the
/// inverse Cholesky factor of the correlation matrix before summing.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoufferLiptak;

impl Combiner for StoufferLiptak {
    fn combine(&self, pvalues: &[f64], sigma: &DMatrix<f64>) -> Combined {
        let n = pvalues.len();
        if n == 0 || sigma.shape() != (n, n) {
            return Combined::failed();
        }

        match sigma.clone().cholesky() {
            Some(chol) => self.combine_factored(pvalues, &chol.l()),
            None => Combined::failed(),
        }
    }

    fn combine_factored(&self, pvalues: &[f64], l: &DMatrix<f64>) -> Combined {
        let n = pvalues.len();
        if n == 0 || l.shape() != (n, n) {
            return Combined::failed();
        }

        let z = DVector::from_iterator(
            n,
            pvalues
                .iter()
                .map(|&p| normal::isf(p.clamp(f64::MIN_POSITIVE, P_MAX))),
        );
        let z_star = match l.solve_lower_triangular(&z) {
            Some(z_star) => z_star,
            None => return Combined::failed(),
        };

        let c = z_star.sum() / (n as f64).sqrt();
        let p = normal::sf(c);
        Combined {
            ok: true,
            p: if p.is_nan() { 1.0 } else { p },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_is_plain_stouffer() {
        let ps = [0.01, 0.2, 0.03, 0.5, 0.04];
        let res = StoufferLiptak.combine(&ps, &DMatrix::identity(5, 5));
        assert!(res.ok);

        let z: f64 = ps.iter().map(|&p| normal::isf(p)).sum::<f64>() / 5f64.sqrt();
        assert_relative_eq!(res.p, normal::sf(z), epsilon = 1e-12);
    }

    #[test]
    fn single_value_is_unchanged() {
        let res = StoufferLiptak.combine(&[0.037], &DMatrix::identity(1, 1));
        assert!(res.ok);
        assert_relative_eq!(res.p, 0.037, max_relative = 1e-9);
    }

    #[test]
    fn correlation_weakens_evidence() {
        let ps = [0.01, 0.02, 0.01, 0.03];
        let independent = StoufferLiptak.combine(&ps, &DMatrix::identity(4, 4));
        let mut sigma = DMatrix::from_element(4, 4, 0.6);
        sigma.fill_diagonal(1.0);
        let correlated = StoufferLiptak.combine(&ps, &sigma);

        assert!(correlated.ok);
        assert!(correlated.p > independent.p);
    }

    #[test]
    fn extreme_pvalues_stay_finite() {
        let res = StoufferLiptak.combine(&[0.0, 1.0, 0.5], &DMatrix::identity(3, 3));
        assert!(res.ok);
        assert!(res.p.is_finite());
        assert!((0.0..=1.0).contains(&res.p));
    }

    #[test]
    fn indefinite_matrix_fails() {
        let sigma = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let res = StoufferLiptak.combine(&[0.1, 0.2], &sigma);
        assert!(!res.ok);
    }

    #[test]
    fn factored_form_agrees() {
        let ps = [0.01, 0.02, 0.01, 0.03];
        let mut sigma = DMatrix::from_element(4, 4, 0.3);
        sigma.fill_diagonal(1.0);
        let l = sigma.clone().cholesky().unwrap().l();

        let direct = StoufferLiptak.combine(&ps, &sigma);
        let factored = StoufferLiptak.combine_factored(&ps, &l);
        assert!(factored.ok);
        assert_relative_eq!(direct.p, factored.p, max_relative = 1e-14);
        assert!(!StoufferLiptak.combine_factored(&ps, &DMatrix::identity(3, 3)).ok);
    }

    #[test]
    fn shape_mismatch_fails() {
        let res = StoufferLiptak.combine(&[0.1, 0.2], &DMatrix::identity(3, 3));
        assert!(!res.ok);
        assert!(!StoufferLiptak.combine(&[], &DMatrix::identity(0, 0)).ok);
    }
}
