//! Standard normal distribution through the complementary error function.
//!
//! `erfc` keeps full relative precision in the far tails, where p-values of
//! interest live.

use statrs::function::erf::{erfc, erfc_inv};
use std::f64::consts::SQRT_2;

/// Lower tail, `P(Z <= x)`.
///
/// ```
/// # use cpv::libs::normal::cdf;
/// assert!((cdf(0.0) - 0.5).abs() < 1e-15);
/// assert!((cdf(1.959963984540054) - 0.975).abs() < 1e-12);
/// ```
pub fn cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Upper tail, `P(Z > x)`.
pub fn sf(x: f64) -> f64 {
    0.5 * erfc(x / SQRT_2)
}

/// Inverse of [`cdf`]; `p` must lie in `[0, 1]`.
///
/// ```
/// # use cpv::libs::normal::{cdf, ppf};
/// assert!((ppf(0.975) - 1.959963984540054).abs() < 1e-9);
/// assert!((cdf(ppf(1e-20)) - 1e-20).abs() < 1e-26);
/// ```
pub fn ppf(p: f64) -> f64 {
    -SQRT_2 * erfc_inv(2.0 * p)
}

/// Inverse of [`sf`], the z-score of a one-sided p-value.
pub fn isf(p: f64) -> f64 {
    SQRT_2 * erfc_inv(2.0 * p)
}
