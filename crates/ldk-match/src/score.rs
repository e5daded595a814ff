//! Match scoring.
//!
//! A weighted combination of amount equality (binary within tolerance),
//! fuzzy counterparty/vendor similarity (tokenized, lowercased), temporal
//! proximity (linear decay over the window), and a multimodal group bonus.
//! Pure functions; the engine feeds them store rows.

use ldk_schemas::Micros;

/// Score weights. They sum to 1.0 before the group bonus.
///
/// Sized so an exact amount inside the window with counterparty similarity
/// of at least 0.8 always clears the 0.90 auto threshold:
/// `0.70 + 0.25 * 0.8 = 0.90`, with temporal proximity only adding.
pub const W_AMOUNT: f64 = 0.70;
pub const W_NAME: f64 = 0.25;
pub const W_TIME: f64 = 0.05;
pub const GROUP_BONUS: f64 = 0.05;

/// Normalize a party name: lowercase, split on non-alphanumeric (CJK chars
/// count as tokens), rejoin with single spaces.
pub fn normalize_name(name: &str) -> String {
    let mut tokens: Vec<String> = Vec::new();
    let mut cur = String::new();
    for ch in name.to_lowercase().chars() {
        if ch.is_alphanumeric() {
            cur.push(ch);
        } else if !cur.is_empty() {
            tokens.push(std::mem::take(&mut cur));
        }
    }
    if !cur.is_empty() {
        tokens.push(cur);
    }
    tokens.join(" ")
}

/// Fuzzy name similarity in [0, 1].
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_name(a);
    let nb = normalize_name(b);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    strsim::jaro_winkler(&na, &nb)
}

/// Binary amount score: 1.0 within tolerance, else 0.0. Statement debits
/// and their ledger entries share sign conventions, so the comparison is on
/// signed values.
pub fn amount_score(a: Micros, b: Micros, tolerance: Micros) -> f64 {
    if a.abs_diff(b) <= tolerance.abs() {
        1.0
    } else {
        0.0
    }
}

/// Linear temporal decay: 1.0 at zero distance, 0.0 at/after the window.
pub fn time_score(a_ms: i64, b_ms: i64, window_ms: i64) -> f64 {
    if window_ms <= 0 {
        return 0.0;
    }
    let dist = (a_ms - b_ms).abs();
    if dist >= window_ms {
        0.0
    } else {
        1.0 - (dist as f64) / (window_ms as f64)
    }
}

/// Combined match score.
pub fn combined_score(
    amount: f64,
    name: f64,
    time: f64,
    same_group: bool,
) -> f64 {
    let base = W_AMOUNT * amount + W_NAME * name + W_TIME * time;
    let bonus = if same_group { GROUP_BONUS } else { 0.0 };
    (base + bonus).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_tokenizes_and_lowercases() {
        assert_eq!(normalize_name("ACME, Cloud Inc."), "acme cloud inc");
        assert_eq!(normalize_name("星巴克咖啡"), "星巴克咖啡");
        assert_eq!(normalize_name("  "), "");
    }

    #[test]
    fn identical_names_score_one() {
        assert!((name_similarity("Starbucks", "starbucks") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn close_names_score_high() {
        // Statement counterparties often carry a suffix the ledger lacks.
        let s = name_similarity("Starbucks Coffee Co.", "Starbucks");
        assert!(s >= 0.8, "got {s}");
    }

    #[test]
    fn unrelated_names_score_low() {
        let s = name_similarity("Starbucks", "Landlord Property Mgmt");
        assert!(s < 0.6, "got {s}");
    }

    #[test]
    fn amount_binary_within_tolerance() {
        let t = Micros::new(10_000);
        assert_eq!(
            amount_score(Micros::from_units(-500), Micros::from_units(-500), t),
            1.0
        );
        assert_eq!(
            amount_score(
                Micros::new(-500_005_000),
                Micros::from_units(-500),
                t
            ),
            1.0
        );
        assert_eq!(
            amount_score(Micros::from_units(-500), Micros::from_units(-501), t),
            0.0
        );
    }

    #[test]
    fn time_decays_linearly() {
        let window = 7 * 86_400_000i64;
        assert_eq!(time_score(0, 0, window), 1.0);
        let halfway = time_score(0, window / 2, window);
        assert!((halfway - 0.5).abs() < 1e-9);
        assert_eq!(time_score(0, window, window), 0.0);
    }

    #[test]
    fn combined_is_capped_at_one() {
        assert!((combined_score(1.0, 1.0, 1.0, true) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn exact_amount_and_similar_name_clear_auto_threshold() {
        // Same amount, similar name, one day apart in a 7-day window.
        let score = combined_score(1.0, 0.95, 6.0 / 7.0, false);
        assert!(score >= 0.90, "got {score}");
        // Worst admissible case: similarity 0.81 at the window edge.
        let worst = combined_score(1.0, 0.81, 0.0, false);
        assert!(worst >= 0.90, "got {worst}");
        // An amount miss can never auto-match on name alone.
        let no_amount = combined_score(0.0, 1.0, 1.0, true);
        assert!(no_amount < 0.90, "got {no_amount}");
    }
}
