//! Aggregate error metrics.
//!
//! Sums run in input order so the same input always produces bit-identical
//! results.

/// MAE, MSE and R² over `(predicted, expected)` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ErrorMetrics {
    pub mae: Option<f64>,
    pub mse: Option<f64>,
    pub r2: Option<f64>,
}

/// Compute error metrics.
///
/// No pairs: everything is `None`. R² additionally needs two pairs and
/// ground truths that are not all equal.
pub fn error_metrics(pairs: &[(f64, f64)]) -> ErrorMetrics {
    if pairs.is_empty() {
        return ErrorMetrics::default();
    }
    let n = pairs.len() as f64;

    let mut abs_sum = 0.0;
    let mut sq_sum = 0.0;
    let mut expected_sum = 0.0;
    for &(predicted, expected) in pairs {
        let error = predicted - expected;
        abs_sum += error.abs();
        sq_sum += error * error;
        expected_sum += expected;
    }

    let r2 = if pairs.len() < 2 {
        None
    } else {
        let mean = expected_sum / n;
        let ss_tot: f64 = pairs
            .iter()
            .map(|&(_, expected)| (expected - mean) * (expected - mean))
            .sum();
        (ss_tot > 0.0).then(|| 1.0 - sq_sum / ss_tot)
    };

    ErrorMetrics {
        mae: Some(abs_sum / n),
        mse: Some(sq_sum / n),
        r2,
    }
}

/// `count / total`, or `None` for an empty total.
pub fn fraction(count: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| count as f64 / total as f64)
}
