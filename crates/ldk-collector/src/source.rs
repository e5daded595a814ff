//! Parser boundary for statement ingestion.
//!
//! This module defines **only** the raw row type, the parser trait, and the
//! parse error. No concrete parser implementations, no encoding logic, no
//! normalization to micros, and no persistence belong here.

use std::fmt;
use std::path::Path;

use ldk_schemas::PendingSource;

// ---------------------------------------------------------------------------
// Raw statement row
// ---------------------------------------------------------------------------

/// A single statement line as extracted verbatim from a source file.
///
/// Amounts and timestamps are kept as strings so the pipeline can apply the
/// canonical fixed-point conversion deterministically, with no
/// floating-point introduced at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatementRow {
    /// Counterparty exactly as exported (e.g. `"星巴克咖啡"`).
    pub counterparty: String,
    /// Amount as a decimal string, possibly with currency glyphs and a
    /// direction implied by `direction`.
    pub amount_raw: String,
    /// `"收入"` / `"支出"` / empty when the amount is already signed.
    pub direction: String,
    /// Timestamp string in the source's format.
    pub occurred_at_raw: String,
    /// Free-text memo / product description.
    pub description: String,
}

// ---------------------------------------------------------------------------
// Parser input
// ---------------------------------------------------------------------------

/// Input handed to a parser: decoded text for CSV-like sources, or a file
/// path for binary workbooks.
pub enum ParserInput<'a> {
    Text(&'a str),
    Workbook(&'a Path),
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced by statement parsing.
#[derive(Debug)]
pub enum ParseError {
    /// The file-level structure is unusable (no header row, binary junk).
    Structure(String),
    /// A required column could not be located in the header.
    MissingColumn(&'static str),
    /// The input variant does not fit this parser (text vs workbook).
    WrongInput { expected: &'static str },
    /// Workbook decode failure.
    Workbook(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Structure(msg) => write!(f, "statement structure error: {msg}"),
            ParseError::MissingColumn(col) => {
                write!(f, "statement missing required column: '{col}'")
            }
            ParseError::WrongInput { expected } => {
                write!(f, "parser expects {expected} input")
            }
            ParseError::Workbook(msg) => write!(f, "workbook decode error: {msg}"),
        }
    }
}

impl std::error::Error for ParseError {}

// ---------------------------------------------------------------------------
// Parser trait
// ---------------------------------------------------------------------------

/// Statement parser contract.
///
/// Implementations must be object-safe (`Box<dyn StatementParser>`) and
/// `Send + Sync` so the registry can be shared across the parse pool.
pub trait StatementParser: Send + Sync {
    /// Registry key (e.g. `"alipay"`). Unique within the registry.
    fn name(&self) -> &'static str;

    /// Which pending-entry source this parser produces.
    fn source(&self) -> PendingSource;

    /// Extract raw rows. Row-level oddities (bad dates, bad amounts) are the
    /// normalizer's concern; only structural failures error here.
    fn parse(&self, input: &ParserInput<'_>) -> Result<Vec<RawStatementRow>, ParseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockParser;

    impl StatementParser for MockParser {
        fn name(&self) -> &'static str {
            "mock"
        }
        fn source(&self) -> PendingSource {
            PendingSource::Bank
        }
        fn parse(&self, input: &ParserInput<'_>) -> Result<Vec<RawStatementRow>, ParseError> {
            match input {
                ParserInput::Text(_) => Ok(vec![]),
                ParserInput::Workbook(_) => Err(ParseError::WrongInput { expected: "text" }),
            }
        }
    }

    #[test]
    fn parser_is_object_safe_via_box() {
        let p: Box<dyn StatementParser> = Box::new(MockParser);
        assert_eq!(p.name(), "mock");
        assert!(p.parse(&ParserInput::Text("")).unwrap().is_empty());
    }

    #[test]
    fn error_display() {
        assert!(ParseError::MissingColumn("金额").to_string().contains("金额"));
        assert!(ParseError::WrongInput { expected: "text" }
            .to_string()
            .contains("text"));
    }
}
