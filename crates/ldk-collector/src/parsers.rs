//! Concrete statement parsers.
//!
//! All tabular sources share one extraction core: locate the header row by
//! its known column names (exports carry preamble lines before the header),
//! build a case-insensitive column index, and walk the data rows. CSV field
//! splitting handles double-quoted fields with `""` escapes — enough for
//! every statement export seen in practice, without pulling row data through
//! an intermediate allocation per field more than once.

use std::collections::HashMap;

use calamine::{open_workbook_auto, Data, Reader};

use ldk_schemas::PendingSource;

use crate::source::{ParseError, ParserInput, RawStatementRow, StatementParser};

// ---------------------------------------------------------------------------
// CSV primitives
// ---------------------------------------------------------------------------

/// Split one CSV line honoring double-quoted fields and `""` escapes.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    cur.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut cur));
            }
            _ => cur.push(ch),
        }
    }
    fields.push(cur);
    fields.iter().map(|f| f.trim().to_string()).collect()
}

/// Column candidate sets: the first present candidate wins.
struct Columns {
    time: &'static [&'static str],
    counterparty: &'static [&'static str],
    amount: &'static [&'static str],
    direction: &'static [&'static str],
    description: &'static [&'static str],
}

const ALIPAY_COLUMNS: Columns = Columns {
    time: &["交易时间", "发生时间", "付款时间"],
    counterparty: &["交易对方", "对方名称"],
    amount: &["金额", "金额（元）", "金额(元)"],
    direction: &["收/支", "收支"],
    description: &["商品说明", "商品名称", "备注"],
};

const WECHAT_COLUMNS: Columns = Columns {
    time: &["交易时间"],
    counterparty: &["交易对方"],
    amount: &["金额(元)", "金额（元）", "金额"],
    direction: &["收/支"],
    description: &["商品", "备注"],
};

const BANK_COLUMNS: Columns = Columns {
    time: &["交易日期", "日期", "时间", "date", "transaction date", "time"],
    counterparty: &["对方户名", "对方名称", "交易对方", "payee", "counterparty", "name"],
    amount: &["交易金额", "金额", "amount"],
    direction: &["借贷", "收/支", "direction"],
    description: &["摘要", "备注", "用途", "memo", "description", "narrative"],
};

/// Build a lowercased column-name -> index map from a header row.
fn index_header(header: &[String]) -> HashMap<String, usize> {
    header
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim().to_lowercase(), i))
        .collect()
}

fn find_column(
    idx: &HashMap<String, usize>,
    candidates: &[&'static str],
) -> Option<usize> {
    candidates
        .iter()
        .find_map(|c| idx.get(&c.to_lowercase()).copied())
}

/// Extract raw rows from an already-tabular representation.
///
/// `marker` is the column whose presence identifies the header row (e.g.
/// `业务流水号` for Alipay); pass `None` to accept the first row where the
/// amount column resolves.
fn extract_rows(
    table: &[Vec<String>],
    marker: Option<&str>,
    cols: &Columns,
) -> Result<Vec<RawStatementRow>, ParseError> {
    // 1) Find the header row.
    let mut header_at = None;
    for (i, row) in table.iter().enumerate() {
        let matches_marker = match marker {
            Some(m) => row.iter().any(|cell| cell.contains(m)),
            None => {
                let idx = index_header(row);
                find_column(&idx, cols.amount).is_some() && find_column(&idx, cols.time).is_some()
            }
        };
        if matches_marker {
            header_at = Some(i);
            break;
        }
    }
    let header_at =
        header_at.ok_or_else(|| ParseError::Structure("no header row found".to_string()))?;

    let idx = index_header(&table[header_at]);
    let time_i = find_column(&idx, cols.time).ok_or(ParseError::MissingColumn("time"))?;
    let amount_i = find_column(&idx, cols.amount).ok_or(ParseError::MissingColumn("amount"))?;
    let party_i = find_column(&idx, cols.counterparty);
    let dir_i = find_column(&idx, cols.direction);
    let desc_i = find_column(&idx, cols.description);

    let get = |row: &[String], i: usize| row.get(i).cloned().unwrap_or_default();

    // 2) Walk the data rows. Blank / footer rows (no amount) are skipped.
    let mut out = Vec::new();
    for row in table.iter().skip(header_at + 1) {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let amount_raw = get(row, amount_i);
        if amount_raw.trim().is_empty() {
            continue;
        }
        out.push(RawStatementRow {
            counterparty: party_i.map(|i| get(row, i)).unwrap_or_default(),
            amount_raw,
            direction: dir_i.map(|i| get(row, i)).unwrap_or_default(),
            occurred_at_raw: get(row, time_i),
            description: desc_i.map(|i| get(row, i)).unwrap_or_default(),
        });
    }
    Ok(out)
}

fn text_to_table(text: &str) -> Vec<Vec<String>> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(split_csv_line)
        .collect()
}

// ---------------------------------------------------------------------------
// Alipay / WeChat / generic bank CSV
// ---------------------------------------------------------------------------

/// Alipay business export (identified by `业务流水号`).
pub struct AlipayParser;

impl StatementParser for AlipayParser {
    fn name(&self) -> &'static str {
        "alipay"
    }
    fn source(&self) -> PendingSource {
        PendingSource::Alipay
    }
    fn parse(&self, input: &ParserInput<'_>) -> Result<Vec<RawStatementRow>, ParseError> {
        let ParserInput::Text(text) = input else {
            return Err(ParseError::WrongInput { expected: "text" });
        };
        extract_rows(&text_to_table(text), Some("业务流水号"), &ALIPAY_COLUMNS)
    }
}

/// WeChat Pay export (identified by `交易单号`).
pub struct WechatParser;

impl StatementParser for WechatParser {
    fn name(&self) -> &'static str {
        "wechat"
    }
    fn source(&self) -> PendingSource {
        PendingSource::Wechat
    }
    fn parse(&self, input: &ParserInput<'_>) -> Result<Vec<RawStatementRow>, ParseError> {
        let ParserInput::Text(text) = input else {
            return Err(ParseError::WrongInput { expected: "text" });
        };
        extract_rows(&text_to_table(text), Some("交易单号"), &WECHAT_COLUMNS)
    }
}

/// Generic bank CSV: header located by resolvable amount+time columns.
pub struct BankCsvParser;

impl StatementParser for BankCsvParser {
    fn name(&self) -> &'static str {
        "bank_csv"
    }
    fn source(&self) -> PendingSource {
        PendingSource::Bank
    }
    fn parse(&self, input: &ParserInput<'_>) -> Result<Vec<RawStatementRow>, ParseError> {
        let ParserInput::Text(text) = input else {
            return Err(ParseError::WrongInput { expected: "text" });
        };
        extract_rows(&text_to_table(text), None, &BANK_COLUMNS)
    }
}

// ---------------------------------------------------------------------------
// Bank XLSX
// ---------------------------------------------------------------------------

/// Bank workbook export: first sheet, cells stringified, then the same
/// extraction core as the CSV path.
pub struct BankXlsxParser;

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Float(f) => {
            // Whole floats print without a trailing ".0" so integer amounts
            // and ids round-trip.
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                format!("{f}")
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR:{e:?}"),
        Data::Empty => String::new(),
    }
}

impl StatementParser for BankXlsxParser {
    fn name(&self) -> &'static str {
        "bank_xlsx"
    }
    fn source(&self) -> PendingSource {
        PendingSource::Bank
    }
    fn parse(&self, input: &ParserInput<'_>) -> Result<Vec<RawStatementRow>, ParseError> {
        let ParserInput::Workbook(path) = input else {
            return Err(ParseError::WrongInput { expected: "workbook" });
        };

        let mut workbook =
            open_workbook_auto(path).map_err(|e| ParseError::Workbook(e.to_string()))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| ParseError::Workbook("workbook has no sheets".to_string()))?
            .map_err(|e| ParseError::Workbook(e.to_string()))?;

        let table: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();
        extract_rows(&table, None, &BANK_COLUMNS)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_handles_quotes_and_escapes() {
        assert_eq!(split_csv_line("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(
            split_csv_line(r#""ACME, Inc.",500.00,"said ""hi""""#),
            vec!["ACME, Inc.", "500.00", r#"said "hi""#]
        );
        assert_eq!(split_csv_line(""), vec![""]);
    }

    const ALIPAY_SAMPLE: &str = "\
支付宝业务明细查询\n\
账号:xxx@example.com\n\
业务流水号,交易时间,交易对方,金额,收/支,商品说明\n\
2026010200001,2026-01-02 09:15:00,Starbucks,500.00,支出,拿铁 x2\n\
2026010200002,2026-01-02 14:30:00,ACME Cloud Inc.,4980.00,支出,云服务年费\n\
----- 汇总 -----,,,,,\n";

    #[test]
    fn alipay_parses_rows_past_preamble_and_footer() {
        let rows = AlipayParser
            .parse(&ParserInput::Text(ALIPAY_SAMPLE))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].counterparty, "Starbucks");
        assert_eq!(rows[0].amount_raw, "500.00");
        assert_eq!(rows[0].direction, "支出");
        assert_eq!(rows[1].counterparty, "ACME Cloud Inc.");
        assert_eq!(rows[1].amount_raw, "4980.00");
    }

    #[test]
    fn alipay_refuses_workbook_input() {
        let err = AlipayParser
            .parse(&ParserInput::Workbook(std::path::Path::new("x.xlsx")))
            .unwrap_err();
        assert!(matches!(err, ParseError::WrongInput { .. }));
    }

    #[test]
    fn wechat_parses_its_header() {
        let sample = "\
微信支付账单\n\
交易单号,交易时间,交易对方,金额(元),收/支,商品\n\
420001,2026-01-03 10:00:00,滴滴出行,¥35.50,支出,行程\n";
        let rows = WechatParser.parse(&ParserInput::Text(sample)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].counterparty, "滴滴出行");
        assert_eq!(rows[0].amount_raw, "¥35.50");
    }

    #[test]
    fn bank_csv_header_found_without_marker() {
        let sample = "\
date,payee,amount,memo\n\
2026-01-02,Starbucks,-500.00,coffee\n\
2026-01-03,Landlord,-12000.00,rent\n";
        let rows = BankCsvParser.parse(&ParserInput::Text(sample)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].occurred_at_raw, "2026-01-02");
        assert_eq!(rows[1].amount_raw, "-12000.00");
    }

    #[test]
    fn structure_error_when_no_header() {
        let err = BankCsvParser
            .parse(&ParserInput::Text("nothing,tabular,here\n1,2,3\n"))
            .unwrap_err();
        assert!(matches!(err, ParseError::Structure(_)));
    }

    #[test]
    fn rows_without_amount_skipped() {
        let sample = "\
date,payee,amount,memo\n\
2026-01-02,Starbucks,-500.00,coffee\n\
2026-01-03,Empty,,no amount\n";
        let rows = BankCsvParser.parse(&ParserInput::Text(sample)).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn cell_stringification() {
        assert_eq!(cell_to_string(&Data::String("x".into())), "x");
        assert_eq!(cell_to_string(&Data::Float(4980.0)), "4980");
        assert_eq!(cell_to_string(&Data::Float(12.5)), "12.5");
        assert_eq!(cell_to_string(&Data::Int(7)), "7");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }
}
