//! Row normalization and multimodal grouping.
//!
//! Raw statement rows become typed pending entries here: fixed-point amount
//! conversion (sign resolved from the 收/支 direction column when the amount
//! itself is unsigned), timestamp parsing across the formats the exports
//! actually use, and the mtime-window grouping that links a photo burst of
//! one purchase into a single `group_id`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use uuid::Uuid;

use ldk_schemas::{Micros, PendingSource};
use ldk_store::NewPendingEntry;

use crate::source::RawStatementRow;

/// Timestamp formats accepted from statement exports, tried in order.
const TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y年%m月%d日 %H:%M:%S",
    "%Y年%m月%d日",
];

/// Parse a statement timestamp into epoch milliseconds (UTC).
pub fn parse_occurred_at(raw: &str) -> Result<i64> {
    let trimmed = raw.trim();
    for fmt in TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt.and_utc().timestamp_millis());
        }
        // Date-only formats need a midnight time appended before
        // NaiveDateTime parsing.
        if !fmt.contains("%H") {
            if let Ok(d) = chrono::NaiveDate::parse_from_str(trimmed, fmt) {
                return Ok(d
                    .and_hms_opt(0, 0, 0)
                    .expect("midnight is always valid")
                    .and_utc()
                    .timestamp_millis());
            }
        }
    }
    Err(anyhow!("unparseable timestamp: '{trimmed}'"))
}

/// Resolve the signed amount: an explicit sign on the amount wins; otherwise
/// the direction column decides (`支出`/debit -> negative).
pub fn resolve_amount(amount_raw: &str, direction: &str) -> Result<Micros> {
    let amount = Micros::parse_decimal(amount_raw)
        .ok_or_else(|| anyhow!("unparseable amount: '{amount_raw}'"))?;

    let dir = direction.trim();
    let is_expense = dir.contains('支') || dir.eq_ignore_ascii_case("debit") || dir == "借";
    let is_income = dir.contains('收') || dir.eq_ignore_ascii_case("credit") || dir == "贷";

    Ok(if amount.is_negative() {
        amount
    } else if is_expense {
        -amount
    } else if is_income {
        amount
    } else {
        amount
    })
}

/// Normalize one raw row into a pending entry. Row-level failures return
/// `Err` with the cause; the pipeline counts them without stalling the file.
pub fn normalize_row(source: PendingSource, row: &RawStatementRow) -> Result<NewPendingEntry> {
    Ok(NewPendingEntry {
        source,
        counterparty: row.counterparty.trim().to_string(),
        amount: resolve_amount(&row.amount_raw, &row.direction)?,
        occurred_at_ms: parse_occurred_at(&row.occurred_at_raw)?,
        description: row.description.trim().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Multimodal grouping
// ---------------------------------------------------------------------------

/// Assign a shared `group_id` to invoice captures whose modification times
/// cluster within `window_ms` and that live in the same directory. Files
/// outside any cluster get no group id.
pub fn assign_groups(
    files: &[(PathBuf, i64)],
    window_ms: i64,
) -> HashMap<PathBuf, Option<String>> {
    let mut sorted: Vec<&(PathBuf, i64)> = files.iter().collect();
    sorted.sort_by_key(|(path, mtime)| (parent_of(path), *mtime));

    let mut out: HashMap<PathBuf, Option<String>> = HashMap::new();
    let mut cluster: Vec<&PathBuf> = Vec::new();
    let mut cluster_dir: Option<PathBuf> = None;
    let mut cluster_last_ms = 0i64;

    let mut flush = |cluster: &mut Vec<&PathBuf>, out: &mut HashMap<PathBuf, Option<String>>| {
        if cluster.len() >= 2 {
            let group_id = format!("grp-{}", Uuid::new_v4());
            for path in cluster.iter() {
                out.insert((*path).clone(), Some(group_id.clone()));
            }
        } else {
            for path in cluster.iter() {
                out.insert((*path).clone(), None);
            }
        }
        cluster.clear();
    };

    for (path, mtime) in sorted {
        let dir = parent_of(path);
        let same_cluster = cluster_dir.as_ref() == Some(&dir)
            && (*mtime - cluster_last_ms).abs() <= window_ms
            && !cluster.is_empty();
        if !same_cluster {
            flush(&mut cluster, &mut out);
            cluster_dir = Some(dir);
        }
        cluster.push(path);
        cluster_last_ms = *mtime;
    }
    flush(&mut cluster, &mut out);

    out
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_formats_parse() {
        assert!(parse_occurred_at("2026-01-02 09:15:00").is_ok());
        assert!(parse_occurred_at("2026/01/02 09:15:00").is_ok());
        assert!(parse_occurred_at("2026-01-02").is_ok());
        assert!(parse_occurred_at("2026年01月02日").is_ok());
        assert!(parse_occurred_at("not a date").is_err());
    }

    #[test]
    fn date_only_is_midnight_utc() {
        let ms = parse_occurred_at("2026-01-02").unwrap();
        assert_eq!(ms % 86_400_000, 0);
    }

    #[test]
    fn direction_resolves_unsigned_amounts() {
        assert_eq!(
            resolve_amount("500.00", "支出").unwrap(),
            Micros::from_units(-500)
        );
        assert_eq!(
            resolve_amount("500.00", "收入").unwrap(),
            Micros::from_units(500)
        );
        // Already-signed amounts keep their sign regardless of direction.
        assert_eq!(
            resolve_amount("-500.00", "收入").unwrap(),
            Micros::from_units(-500)
        );
        // No direction: taken as-is.
        assert_eq!(
            resolve_amount("¥4,980.00", "").unwrap(),
            Micros::from_units(4_980)
        );
    }

    #[test]
    fn grouping_clusters_same_dir_within_window() {
        let base = 1_700_000_000_000i64;
        let files = vec![
            (PathBuf::from("inbox/a/receipt-1.jpg"), base),
            (PathBuf::from("inbox/a/receipt-2.jpg"), base + 30_000),
            (PathBuf::from("inbox/a/receipt-3.jpg"), base + 55_000),
            // Different directory, same instant: not grouped with the above.
            (PathBuf::from("inbox/b/other.jpg"), base + 10_000),
            // Same directory but outside the window.
            (PathBuf::from("inbox/a/late.jpg"), base + 300_000),
        ];
        let groups = assign_groups(&files, 60_000);

        let g1 = groups[&PathBuf::from("inbox/a/receipt-1.jpg")].clone().unwrap();
        assert_eq!(
            groups[&PathBuf::from("inbox/a/receipt-2.jpg")].as_deref(),
            Some(g1.as_str())
        );
        assert_eq!(
            groups[&PathBuf::from("inbox/a/receipt-3.jpg")].as_deref(),
            Some(g1.as_str())
        );
        assert_eq!(groups[&PathBuf::from("inbox/b/other.jpg")], None);
        assert_eq!(groups[&PathBuf::from("inbox/a/late.jpg")], None);
    }

    #[test]
    fn chained_cluster_uses_gap_to_previous_file() {
        // 40s gaps chain within a 60s window even though first-to-last
        // exceeds it.
        let base = 0i64;
        let files = vec![
            (PathBuf::from("d/x1.jpg"), base),
            (PathBuf::from("d/x2.jpg"), base + 40_000),
            (PathBuf::from("d/x3.jpg"), base + 80_000),
        ];
        let groups = assign_groups(&files, 60_000);
        let g = groups[&PathBuf::from("d/x1.jpg")].clone().unwrap();
        assert_eq!(groups[&PathBuf::from("d/x3.jpg")].as_deref(), Some(g.as_str()));
    }
}
