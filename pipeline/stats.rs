//! Descriptive statistics shared by the cleaning, transform and reporting stages.
//!
//! All estimators follow the conventions of the dataframe tooling analysts use
//! to inspect the same data: linear-interpolated quantiles, sample standard
//! deviation with Bessel's correction for skewness/kurtosis, and population
//! standard deviation for scaler statistics and fold confidence widths.

/// Arithmetic mean. Returns `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (`ddof = 0`).
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Quantile of an already sorted slice using linear interpolation between the
/// two nearest order statistics.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Quantile of an unsorted slice. NaNs must be filtered out by the caller.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile_sorted(&sorted, q)
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Adjusted Fisher-Pearson skewness (G1). Needs at least three observations;
/// a constant column has zero skew.
pub fn skewness(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 3 {
        return None;
    }
    let nf = n as f64;
    let m = mean(values)?;
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / nf;
    if m2 <= f64::EPSILON * m.abs().max(1.0) {
        return Some(0.0);
    }
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / nf;
    let g1 = m3 / m2.powf(1.5);
    Some(g1 * (nf * (nf - 1.0)).sqrt() / (nf - 2.0))
}

/// Bias-corrected excess kurtosis (G2). Needs at least four observations.
pub fn excess_kurtosis(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 4 {
        return None;
    }
    let nf = n as f64;
    let m = mean(values)?;
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / nf;
    if m2 <= f64::EPSILON * m.abs().max(1.0) {
        return Some(0.0);
    }
    let m4 = values.iter().map(|v| (v - m).powi(4)).sum::<f64>() / nf;
    let g2 = m4 / (m2 * m2) - 3.0;
    Some(((nf + 1.0) * g2 + 6.0) * (nf - 1.0) / ((nf - 2.0) * (nf - 3.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn quantiles_interpolate_between_order_statistics() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(quantile(&values, 0.25).unwrap(), 1.75, epsilon = 1e-12);
        assert_abs_diff_eq!(quantile(&values, 0.75).unwrap(), 3.25, epsilon = 1e-12);
        assert_abs_diff_eq!(median(&values).unwrap(), 2.5, epsilon = 1e-12);
        assert!(quantile(&[], 0.5).is_none());
    }

    #[test]
    fn skewness_sign_follows_the_tail() {
        let right_tailed = [1.0, 1.0, 1.0, 2.0, 2.0, 3.0, 10.0];
        let left_tailed: Vec<f64> = right_tailed.iter().map(|v| -v).collect();
        let skew = skewness(&right_tailed).unwrap();
        assert!(skew > 1.0, "expected strong right skew, got {skew}");
        assert_abs_diff_eq!(skewness(&left_tailed).unwrap(), -skew, epsilon = 1e-12);
        assert_abs_diff_eq!(skewness(&[5.0; 10]).unwrap(), 0.0);
    }

    #[test]
    fn symmetric_sample_has_zero_skew() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_abs_diff_eq!(skewness(&values).unwrap(), 0.0, epsilon = 1e-12);
        // Uniform-like samples are platykurtic.
        assert!(excess_kurtosis(&values).unwrap() < 0.0);
    }

    #[test]
    fn population_std_uses_n_denominator() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_abs_diff_eq!(population_std(&values).unwrap(), 2.0, epsilon = 1e-12);
    }
}
