//! Numeric helpers shared by the aggregators.

use std::collections::HashMap;

/// Round to two decimal places, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `part / total` as a percentage rounded to two decimals; `0.0` for an empty group.
pub fn rate(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(part as f64 * 100.0 / total as f64)
    }
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Percentile by linear interpolation between order statistics.
///
/// The values are sorted internally (total order, so NaN sorts last rather than panicking) and
/// the result is read at position `p / 100 * (n - 1)`, interpolating between the two bracketing
/// values. `p` is clamped to `[0, 100]`. Returns `None` for an empty slice.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;

    if lower == upper {
        return Some(sorted[lower]);
    }
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Most frequent non-empty value.
///
/// Absent and empty values are ignored; `None` when nothing remains. When several values share
/// the highest count, the one that occurs first in the input wins.
pub fn mode<'a, I>(values: I) -> Option<&'a str>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    // value -> (count, first position)
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();

    for (position, value) in values.into_iter().enumerate() {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            continue;
        };
        counts.entry(value).or_insert((0, position)).0 += 1;
    }

    counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| count_a.cmp(count_b).then(first_b.cmp(first_a)))
        .map(|(value, _)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_single_value() {
        assert_eq!(percentile(&[100.0], 95.0), Some(100.0));
    }

    #[test]
    fn test_percentile_interpolates() {
        let values: Vec<f64> = (1..=10).map(|i| i as f64 * 100.0).collect();
        // position 0.95 * 9 = 8.55, 55% of the way from 900 to 1000
        assert!((percentile(&values, 95.0).unwrap() - 955.0).abs() < 1e-9);
        assert_eq!(percentile(&values, 0.0), Some(100.0));
        assert_eq!(percentile(&values, 100.0), Some(1000.0));
        assert!((percentile(&values, 50.0).unwrap() - 550.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_is_order_independent() {
        let sorted = [100.0, 200.0, 300.0, 400.0, 500.0, 600.0, 700.0, 800.0, 900.0, 1000.0];
        let shuffled = [700.0, 100.0, 1000.0, 300.0, 900.0, 200.0, 500.0, 800.0, 400.0, 600.0];
        assert_eq!(percentile(&sorted, 95.0), percentile(&shuffled, 95.0));
    }

    #[test]
    fn test_percentile_empty_and_clamped() {
        assert_eq!(percentile(&[], 95.0), None);
        assert_eq!(percentile(&[1.0, 2.0], 150.0), Some(2.0));
        assert_eq!(percentile(&[1.0, 2.0], -3.0), Some(1.0));
    }

    #[test]
    fn test_percentile_tolerates_non_finite() {
        let values = [1.0, f64::NAN, 3.0, f64::INFINITY];
        assert!(percentile(&values, 95.0).is_some());
        assert_eq!(percentile(&[-10.0, -20.0], 0.0), Some(-20.0));
    }

    #[test]
    fn test_mode_unique_max() {
        let values = ["A", "B", "A", "C", "B", "A"];
        assert_eq!(mode(values.iter().map(|v| Some(*v))), Some("A"));
    }

    #[test]
    fn test_mode_three_way_tie_takes_first() {
        let values = ["X", "Y", "Z"];
        assert_eq!(mode(values.iter().map(|v| Some(*v))), Some("X"));
    }

    #[test]
    fn test_mode_tie_is_broken_by_first_occurrence() {
        // A reaches two occurrences first, but B occurs first overall.
        let values = ["B", "A", "A", "B"];
        assert_eq!(mode(values.iter().map(|v| Some(*v))), Some("B"));
    }

    #[test]
    fn test_mode_ignores_absent_and_empty() {
        let values = [None, Some(""), Some("TIMEOUT"), None, Some("")];
        assert_eq!(mode(values), Some("TIMEOUT"));
        assert_eq!(mode([None, Some(""), None]), None);
        assert_eq!(mode(std::iter::empty()), None);
    }

    #[test]
    fn test_rate_and_rounding() {
        assert_eq!(rate(1, 3), 33.33);
        assert_eq!(rate(2, 3), 66.67);
        assert_eq!(rate(0, 0), 0.0);
        assert_eq!(rate(5, 5), 100.0);
        assert_eq!(round2(1.005_000_1), 1.01);
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0]), Some(1.5));
    }
}
