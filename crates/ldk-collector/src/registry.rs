//! Parser registry — catalogue of available statement parsers.
//!
//! Parsers register by name at start-up; the header sniff selects one by
//! name at parse time. New bank formats plug in by adding a parser and a
//! registration line — the pipeline itself never changes. Insertion order is
//! preserved in `list()` output for deterministic diagnostics.

use std::collections::HashMap;
use std::sync::Arc;

use crate::parsers::{AlipayParser, BankCsvParser, BankXlsxParser, WechatParser};
use crate::source::StatementParser;

/// Errors returned by registry operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateName { name: String },
    UnknownParser { name: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateName { name } => {
                write!(f, "parser already registered: {name}")
            }
            RegistryError::UnknownParser { name } => write!(f, "no such parser: {name}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Name-keyed parser catalogue, shared read-only across the parse pool.
pub struct ParserRegistry {
    by_name: HashMap<&'static str, Arc<dyn StatementParser>>,
    order: Vec<&'static str>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Registry preloaded with the built-in parsers.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        for parser in [
            Arc::new(AlipayParser) as Arc<dyn StatementParser>,
            Arc::new(WechatParser),
            Arc::new(BankCsvParser),
            Arc::new(BankXlsxParser),
        ] {
            reg.register(parser).expect("builtin names are unique");
        }
        reg
    }

    pub fn register(&mut self, parser: Arc<dyn StatementParser>) -> Result<(), RegistryError> {
        let name = parser.name();
        if self.by_name.contains_key(name) {
            return Err(RegistryError::DuplicateName {
                name: name.to_string(),
            });
        }
        self.by_name.insert(name, parser);
        self.order.push(name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn StatementParser>, RegistryError> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownParser {
                name: name.to_string(),
            })
    }

    /// Registered parser names in registration order.
    pub fn list(&self) -> &[&'static str] {
        &self.order
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ParseError, ParserInput, RawStatementRow};
    use ldk_schemas::PendingSource;

    #[test]
    fn builtins_registered_in_order() {
        let reg = ParserRegistry::with_builtins();
        assert_eq!(reg.list(), &["alipay", "wechat", "bank_csv", "bank_xlsx"]);
        assert!(reg.get("alipay").is_ok());
        assert!(reg.get("nope").is_err());
    }

    struct CustomParser;
    impl StatementParser for CustomParser {
        fn name(&self) -> &'static str {
            "custom_bank"
        }
        fn source(&self) -> PendingSource {
            PendingSource::Bank
        }
        fn parse(&self, _: &ParserInput<'_>) -> Result<Vec<RawStatementRow>, ParseError> {
            Ok(vec![])
        }
    }

    #[test]
    fn new_parser_plugs_in_by_name() {
        let mut reg = ParserRegistry::with_builtins();
        reg.register(Arc::new(CustomParser)).unwrap();
        assert!(reg.get("custom_bank").is_ok());

        let err = reg.register(Arc::new(CustomParser)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName { .. }));
    }
}
