//! Streaming statistics helpers
//!
//! Mean, sample standard deviation, and ordinary-least-squares slope over a
//! value series indexed by position. Used by both the window analysis and
//! the pattern detector.

/// Arithmetic mean; 0.0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (Bessel's correction); 0.0 below two samples
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Sample standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Ordinary-least-squares slope of value over sample index
pub fn ols_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();
    let denom = n * sum_x2 - sum_x.powi(2);
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denom
}

/// Consecutive deltas of a series; empty below two samples
pub fn first_differences(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std_dev() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values) - 5.0).abs() < 1e-9);
        assert!((variance(&values) - 4.571428).abs() < 0.001);
    }

    #[test]
    fn test_ols_slope_linear_series() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((ols_slope(&values) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ols_slope_flat_series() {
        let values = vec![3.0; 20];
        assert_eq!(ols_slope(&values), 0.0);
    }

    #[test]
    fn test_first_differences() {
        let values = vec![1.0, 3.0, 2.0];
        assert_eq!(first_differences(&values), vec![2.0, -1.0]);
        assert!(first_differences(&[1.0]).is_empty());
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(std_dev(&[]), 0.0);
        assert_eq!(ols_slope(&[]), 0.0);
    }

    #[test]
    fn test_acceleration_via_differences() {
        // Quadratic series: first differences are linear, so the slope of
        // the difference series is the constant second difference.
        let values: Vec<f64> = (0..10).map(|i| (i * i) as f64).collect();
        let accel = ols_slope(&first_differences(&values));
        assert!((accel - 2.0).abs() < 1e-9);
    }
}
