// Summary statistics over frame series

/// Arithmetic mean, 0 for an empty series
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Population standard deviation, 0 for an empty series
pub fn std_dev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|x| (x - m).powi(2)).sum::<f32>() / values.len() as f32;
    variance.sqrt()
}

/// Percentile with linear interpolation between closest ranks
/// `q` is in [0, 100]
pub fn percentile(values: &[f32], q: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f32;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f32;

    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Mean, std, 20th and 80th percentile of a series
pub fn functionals(values: &[f32]) -> [f32; 4] {
    [
        mean(values),
        std_dev(values),
        percentile(values, 20.0),
        percentile(values, 80.0),
    ]
}

/// Replace NaN and infinities with 0
pub fn sanitize(values: &mut [f32]) {
    for v in values.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
}

/// Column means of a row-major matrix with `width` columns
pub fn column_means(rows: &[Vec<f32>], width: usize) -> Vec<f32> {
    let mut sums = vec![0.0; width];
    if rows.is_empty() {
        return sums;
    }

    for row in rows {
        for (sum, v) in sums.iter_mut().zip(row.iter()) {
            *sum += v;
        }
    }

    let n = rows.len() as f32;
    sums.iter_mut().for_each(|s| *s /= n);
    sums
}

/// One column of a row-major matrix (missing entries read as 0)
pub fn column(rows: &[Vec<f32>], index: usize) -> Vec<f32> {
    rows.iter()
        .map(|row| row.get(index).copied().unwrap_or(0.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&values), 5.0);
        assert!((std_dev(&values) - 2.0).abs() < 1e-6);
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(std_dev(&[]), 0.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert!((percentile(&values, 20.0) - 1.8).abs() < 1e-6);
    }

    #[test]
    fn test_sanitize() {
        let mut values = [1.0, f32::NAN, f32::INFINITY, -2.0];
        sanitize(&mut values);
        assert_eq!(values, [1.0, 0.0, 0.0, -2.0]);
    }

    #[test]
    fn test_column_helpers() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        assert_eq!(column_means(&rows, 2), vec![2.0, 3.0]);
        assert_eq!(column(&rows, 1), vec![2.0, 4.0]);
        assert_eq!(column(&rows, 5), vec![0.0, 0.0]);
    }
}
