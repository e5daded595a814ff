//! Historical consistency checks.
//!
//! Two deviations against the vendor's prior POSTED entries:
//! - category deviation from the rolling category distribution;
//! - price deviation from a time-decay weighted mean with weights
//!   `w_i = 1 / (1 + days_since_i)`.
//!
//! Pure functions over the compact history rows; the reference instant is a
//! parameter so tests pin decay exactly.

use ldk_schemas::Micros;
use ldk_store::VendorHistoryRow;

const DAY_MS: f64 = 86_400_000.0;

/// Share of history *not* in the proposed category: 0.0 when the vendor
/// always books there, 1.0 when never. Empty history scores 0 (no evidence
/// is not deviation).
pub fn category_deviation(history: &[VendorHistoryRow], category: &str) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    let same = history.iter().filter(|row| row.category == category).count();
    1.0 - (same as f64) / (history.len() as f64)
}

/// Time-decay weighted mean of historical magnitudes.
pub fn decayed_mean_amount(history: &[VendorHistoryRow], now_ms: i64) -> Option<f64> {
    if history.is_empty() {
        return None;
    }
    let mut weight_sum = 0.0;
    let mut value_sum = 0.0;
    for row in history {
        let days = ((now_ms - row.occurred_at_ms).max(0) as f64) / DAY_MS;
        let w = 1.0 / (1.0 + days);
        weight_sum += w;
        value_sum += w * (row.amount.abs().raw() as f64);
    }
    if weight_sum <= 0.0 {
        None
    } else {
        Some(value_sum / weight_sum)
    }
}

/// Relative price deviation of `amount` from the decayed mean; `None` with
/// no usable history.
pub fn price_deviation(history: &[VendorHistoryRow], amount: Micros, now_ms: i64) -> Option<f64> {
    let mean = decayed_mean_amount(history, now_ms)?;
    if mean <= 0.0 {
        return None;
    }
    Some(((amount.abs().raw() as f64) - mean).abs() / mean)
}

/// Risk points accrued from history: one point per bound exceeded.
pub fn history_risk_points(
    history: &[VendorHistoryRow],
    category: &str,
    amount: Micros,
    now_ms: i64,
    category_bound: f64,
    price_bound: f64,
) -> u32 {
    let mut points = 0;
    if category_deviation(history, category) > category_bound {
        points += 1;
    }
    if let Some(dev) = price_deviation(history, amount, now_ms) {
        if dev > price_bound {
            points += 1;
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(units: i64, category: &str, days_ago: i64, now_ms: i64) -> VendorHistoryRow {
        VendorHistoryRow {
            amount: Micros::from_units(units),
            category: category.to_string(),
            occurred_at_ms: now_ms - days_ago * 86_400_000,
        }
    }

    const NOW: i64 = 1_767_312_000_000;

    #[test]
    fn category_deviation_fractions() {
        let history = vec![
            row(-500, "6601", 1, NOW),
            row(-500, "6601", 2, NOW),
            row(-500, "6602", 3, NOW),
            row(-500, "6601", 4, NOW),
        ];
        assert!((category_deviation(&history, "6601") - 0.25).abs() < 1e-9);
        assert!((category_deviation(&history, "7777") - 1.0).abs() < 1e-9);
        assert_eq!(category_deviation(&[], "6601"), 0.0);
    }

    #[test]
    fn decay_weights_recent_entries_heavier() {
        // Yesterday (w = 1/2) at 100; 9 days ago (w = 1/10) at 1000.
        // Mean = (50 + 100) / 0.6 = 250.
        let history = vec![row(-100, "6601", 1, NOW), row(-1000, "6601", 9, NOW)];
        let mean = decayed_mean_amount(&history, NOW).unwrap();
        let expected = 250.0 * 1_000_000.0;
        assert!((mean - expected).abs() / expected < 1e-9);
    }

    #[test]
    fn price_deviation_relative_to_mean() {
        let history = vec![row(-100, "6601", 1, NOW), row(-100, "6601", 2, NOW)];
        // Mean magnitude is exactly 100 units.
        let dev = price_deviation(&history, Micros::from_units(-300), NOW).unwrap();
        assert!((dev - 2.0).abs() < 1e-9);
        let none = price_deviation(&[], Micros::from_units(-300), NOW);
        assert!(none.is_none());
    }

    #[test]
    fn risk_points_accumulate_per_bound() {
        let history = vec![row(-100, "6601", 1, NOW); 4];
        // Same category, wildly different price: one point.
        assert_eq!(
            history_risk_points(&history, "6601", Micros::from_units(-900), NOW, 0.5, 0.8),
            1
        );
        // Different category AND wild price: two points.
        assert_eq!(
            history_risk_points(&history, "7777", Micros::from_units(-900), NOW, 0.5, 0.8),
            2
        );
        // Consistent on both axes: zero points.
        assert_eq!(
            history_risk_points(&history, "6601", Micros::from_units(-105), NOW, 0.5, 0.8),
            0
        );
    }
}
