/// Sidak correction for `k` independent tests, `1 - (1 - p)^k` capped at 1.
///
/// Evaluated as `-expm1(k * ln(1 - p))` so that tiny p-values survive a
/// large `k`.
///
/// ```
/// # use cpv::libs::sidak::sidak_k;
/// assert_eq!(sidak_k(0.0, 12.0), 0.0);
/// assert_eq!(sidak_k(1.0, 12.0), 1.0);
/// assert!((sidak_k(0.01, 2.0) - 0.0199).abs() < 1e-12);
/// ```
pub fn sidak_k(p: f64, k: f64) -> f64 {
    if k == 0.0 {
        return 0.0;
    }
    let corrected = -(k * (-p).ln_1p()).exp_m1();
    corrected.clamp(0.0, 1.0)
}

/// Multiplicity of a region: how many windows of its length tile the
/// covered bases.
pub fn multiplicity(region_len: u64, total_coverage: u64) -> f64 {
    total_coverage as f64 / region_len as f64
}

pub fn sidak(p: f64, region_len: u64, total_coverage: u64) -> f64 {
    sidak_k(p, multiplicity(region_len, total_coverage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn bounds() {
        for k in [0.5, 1.0, 3.0, 1e6] {
            assert_eq!(sidak_k(0.0, k), 0.0);
            assert_eq!(sidak_k(1.0, k), 1.0);
        }
    }

    #[test]
    fn identity_at_one_window() {
        for p in [1e-300, 1e-10, 0.003, 0.25, 0.9] {
            assert_relative_eq!(sidak_k(p, 1.0), p, max_relative = 1e-12);
        }
    }

    #[test]
    fn monotone_in_p() {
        let mut last = 0.0;
        for i in 0..=1000 {
            let p = i as f64 / 1000.0;
            let c = sidak_k(p, 37.5);
            assert!(c >= last);
            last = c;
        }
    }

    #[test]
    fn small_p_large_k() {
        // (1 - 1e-12)^1e6 would round to 1 without the log form
        assert_relative_eq!(sidak_k(1e-12, 1e6), 1e-6, max_relative = 1e-5);
    }

    #[test]
    fn multiplicity_from_coverage() {
        assert_eq!(multiplicity(100, 10_000), 100.0);
        assert_relative_eq!(sidak(0.001, 100, 10_000), 1.0 - 0.999f64.powi(100), epsilon = 1e-12);
        assert_relative_eq!(sidak(0.2, 500, 500), 0.2, epsilon = 1e-12);
    }
}
