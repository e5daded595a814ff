//! Sensitive-substring redaction.
//!
//! Categories are matched in a fixed order (longest / most specific first)
//! so an 18-digit citizen id is never half-eaten by the bank-card pattern.
//! The `regex` crate has no lookaround, so digit-run boundaries are encoded
//! as explicit `(^|[^0-9])…([^0-9]|$)` capture groups and the replacement
//! closure re-emits the boundary characters.

use std::collections::BTreeMap;

use regex::Regex;

/// Result of one sanitization pass.
#[derive(Clone, Debug)]
pub struct Sanitized {
    pub text: String,
    /// Redaction counts keyed by category label. Only these counts may be
    /// logged; never the matched values.
    pub redactions: BTreeMap<String, usize>,
}

impl Sanitized {
    pub fn total(&self) -> usize {
        self.redactions.values().sum()
    }
}

/// One redaction rule.
struct Rule {
    category: &'static str,
    pattern: Regex,
    /// Index of the capture group carrying the sensitive value.
    value_group: usize,
    /// Optional post-match validation (e.g. Luhn for card numbers).
    validate: Option<fn(&str) -> bool>,
}

/// The redaction engine. Construction compiles the pattern set once;
/// clone-free sharing via `Arc` is the intended usage.
pub struct PrivacyGuard {
    rules: Vec<Rule>,
}

impl Default for PrivacyGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivacyGuard {
    pub fn new() -> Self {
        // Order matters: specific and long patterns first.
        let rules = vec![
            Rule {
                category: "api_key",
                pattern: Regex::new(r"\b(sk-[A-Za-z0-9]{16,}|AKIA[0-9A-Z]{16})\b")
                    .expect("static regex must compile"),
                value_group: 1,
                validate: None,
            },
            Rule {
                category: "email",
                pattern: Regex::new(r"\b([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})\b")
                    .expect("static regex must compile"),
                value_group: 1,
                validate: None,
            },
            Rule {
                // Mainland citizen id: 17 digits + digit/X check character.
                category: "cn_id",
                pattern: Regex::new(r"(^|[^0-9A-Za-z])([1-9][0-9]{16}[0-9Xx])([^0-9A-Za-z]|$)")
                    .expect("static regex must compile"),
                value_group: 2,
                validate: None,
            },
            Rule {
                // Unified social credit code: 18 chars, digits + uppercase.
                category: "tax_id",
                pattern: Regex::new(r"(^|[^0-9A-Z])([159Y][0-9]{1}[0-9A-HJ-NPQRTUWXY]{16})([^0-9A-Z]|$)")
                    .expect("static regex must compile"),
                value_group: 2,
                validate: None,
            },
            Rule {
                // Card numbers 13-19 digits, Luhn-verified to avoid eating
                // arbitrary long digit runs (order ids, timestamps).
                category: "bank_card",
                pattern: Regex::new(r"(^|[^0-9])([0-9]{13,19})([^0-9]|$)")
                    .expect("static regex must compile"),
                value_group: 2,
                validate: Some(luhn_ok),
            },
            Rule {
                category: "cn_phone",
                pattern: Regex::new(r"(^|[^0-9])(1[3-9][0-9]{9})([^0-9]|$)")
                    .expect("static regex must compile"),
                value_group: 2,
                validate: None,
            },
        ];
        Self { rules }
    }

    /// Redact every sensitive substring, returning the cleaned text plus
    /// per-category counts.
    pub fn sanitize(&self, input: &str) -> Sanitized {
        let mut text = input.to_string();
        let mut redactions: BTreeMap<String, usize> = BTreeMap::new();

        for rule in &self.rules {
            // Repeat until fixpoint: boundary groups overlap between two
            // adjacent matches, so a single replace_all pass can miss the
            // second of back-to-back values.
            loop {
                let mut hits = 0usize;
                let replaced = rule
                    .pattern
                    .replace_all(&text, |caps: &regex::Captures<'_>| {
                        let value = caps.get(rule.value_group).map(|m| m.as_str()).unwrap_or("");
                        if let Some(validate) = rule.validate {
                            if !validate(value) {
                                return caps
                                    .get(0)
                                    .map(|m| m.as_str().to_string())
                                    .unwrap_or_default();
                            }
                        }
                        hits += 1;
                        let mut out = String::new();
                        // Re-emit boundary groups around the marker.
                        if rule.value_group > 1 {
                            if let Some(pre) = caps.get(1) {
                                out.push_str(pre.as_str());
                            }
                        }
                        out.push_str(&format!("[{}]", rule.category.to_ascii_uppercase()));
                        if rule.value_group > 1 {
                            if let Some(post) = caps.get(3) {
                                out.push_str(post.as_str());
                            }
                        }
                        out
                    })
                    .into_owned();
                text = replaced;
                if hits == 0 {
                    break;
                }
                *redactions.entry(rule.category.to_string()).or_insert(0) += hits;
            }
        }

        Sanitized { text, redactions }
    }

    /// `true` when a pass over `input` would redact nothing — used by tests
    /// and the proxy's post-sanitization assertion.
    pub fn is_clean(&self, input: &str) -> bool {
        self.sanitize(input).total() == 0
    }
}

/// Luhn checksum used to validate candidate card numbers.
fn luhn_ok(digits: &str) -> bool {
    let mut sum = 0u32;
    let mut double = false;
    for ch in digits.chars().rev() {
        let Some(d) = ch.to_digit(10) else {
            return false;
        };
        let mut d = d;
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> PrivacyGuard {
        PrivacyGuard::new()
    }

    #[test]
    fn phone_redacted_with_boundaries() {
        let s = guard().sanitize("联系电话 13800138000，请回电");
        assert!(!s.text.contains("13800138000"));
        assert!(s.text.contains("[CN_PHONE]"));
        assert_eq!(s.redactions.get("cn_phone"), Some(&1));
    }

    #[test]
    fn phone_inside_longer_digit_run_not_redacted() {
        // 22-digit order number containing a phone-shaped substring.
        let input = "订单号 9913800138000123456789 正常";
        let s = guard().sanitize(input);
        assert_eq!(s.redactions.get("cn_phone"), None);
        assert!(s.text.contains("9913800138000123456789"));
    }

    #[test]
    fn email_redacted() {
        let s = guard().sanitize("contact: zhang.wei@example.com.cn please");
        assert!(!s.text.contains("zhang.wei"));
        assert!(s.text.contains("[EMAIL]"));
    }

    #[test]
    fn citizen_id_redacted() {
        let s = guard().sanitize("身份证 11010519491231002X 已核验");
        assert!(!s.text.contains("11010519491231002X"));
        assert!(s.text.contains("[CN_ID]"));
    }

    #[test]
    fn bank_card_redacted_only_when_luhn_passes() {
        // 4111111111111111 passes Luhn; 4111111111111112 does not.
        let good = guard().sanitize("card 4111111111111111 on file");
        assert!(good.text.contains("[BANK_CARD]"));

        let bad = guard().sanitize("ref 4111111111111112 is an order id");
        assert_eq!(bad.redactions.get("bank_card"), None);
        assert!(bad.text.contains("4111111111111112"));
    }

    #[test]
    fn api_key_redacted() {
        let s = guard().sanitize("auth with sk-abcDEF1234567890abcd now");
        assert!(s.text.contains("[API_KEY]"));
        assert!(!s.text.contains("sk-abcDEF1234567890abcd"));
    }

    #[test]
    fn back_to_back_values_all_redacted() {
        let s = guard().sanitize("13800138000 13900139000");
        assert_eq!(s.redactions.get("cn_phone"), Some(&2));
        assert!(!s.text.contains("138"));
    }

    #[test]
    fn double_sanitize_is_idempotent() {
        let g = guard();
        let once = g.sanitize("电话 13800138000");
        let twice = g.sanitize(&once.text);
        assert_eq!(twice.total(), 0);
        assert_eq!(once.text, twice.text);
    }

    #[test]
    fn clean_text_untouched() {
        let g = guard();
        let input = "星巴克 咖啡 -500.00 2026-01-02";
        let s = g.sanitize(input);
        assert_eq!(s.text, input);
        assert_eq!(s.total(), 0);
        assert!(g.is_clean(input));
    }

    #[test]
    fn luhn_checksum() {
        assert!(luhn_ok("4111111111111111"));
        assert!(!luhn_ok("4111111111111112"));
        assert!(luhn_ok("6212262502901234560")); // 19-digit UnionPay-style
    }
}
