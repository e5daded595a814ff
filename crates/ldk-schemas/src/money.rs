//! Fixed-point money type.
//!
//! # Motivation
//!
//! All monetary values in this system use a 1e-6 (micros) fixed-point
//! representation stored as `i64`. Statement files carry decimal strings at
//! scale 2; aggregation and scoring happen at scale 6. Using raw `i64` for
//! money is error-prone: it allows accidental arithmetic with unrelated
//! integers (row ids, day counters) without any compile-time signal, so the
//! raw value is wrapped in a newtype.
//!
//! # Scale
//!
//! 1 CNY = 1_000_000 Micros. Non-monetary quantities (row counts, ids,
//! attempt counters) remain plain `i64`/`u64` and are never implicitly
//! convertible.
//!
//! # Parsing
//!
//! [`Micros::parse_decimal`] accepts the amount formats that appear in real
//! statement exports: currency glyphs (`¥`, `￥`, `$`, trailing `元`),
//! thousands separators, full-width digits, and a leading sign. There is no
//! floating-point step anywhere on the parse path.

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Micros newtype
// ---------------------------------------------------------------------------

/// A fixed-point monetary amount at 1e-6 scale (micros).
///
/// 1 CNY = `Micros(1_000_000)`.
///
/// There is intentionally no `From<i64>` implementation — callers must be
/// deliberate about when a raw integer represents a monetary amount. Use
/// [`Micros::new`] to construct and [`Micros::raw`] to cross layer boundaries
/// that require raw integers (the store persists `amount_micros` columns).
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Micros(i64);

/// Micros per whole currency unit.
pub const MICROS_PER_UNIT: i64 = 1_000_000;

impl Micros {
    /// Zero monetary amount.
    pub const ZERO: Micros = Micros(0);

    /// Construct a `Micros` from a raw `i64` at 1e-6 scale.
    #[inline]
    pub const fn new(raw: i64) -> Self {
        Micros(raw)
    }

    /// Construct from whole currency units (e.g. `Micros::from_units(500)` = ¥500.00).
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Micros(units * MICROS_PER_UNIT)
    }

    /// Extract the underlying raw `i64`.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Absolute value. `i64::MIN` saturates.
    #[inline]
    pub fn abs(self) -> Micros {
        Micros(self.0.saturating_abs())
    }

    /// Sign: `1`, `0`, or `-1` as a plain integer (not a Micros value).
    #[inline]
    pub fn signum(self) -> i64 {
        self.0.signum()
    }

    /// `true` if this amount is strictly negative.
    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Saturating addition.
    #[inline]
    pub fn saturating_add(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_add(rhs.0))
    }

    /// Absolute difference between two amounts.
    #[inline]
    pub fn abs_diff(self, rhs: Micros) -> Micros {
        Micros((self.0 - rhs.0).saturating_abs())
    }

    /// Parse a decimal amount string into micros.
    ///
    /// Handles the formats seen in Alipay/WeChat/bank exports:
    /// - currency glyphs: `¥`, `￥`, `$`, trailing `元`
    /// - thousands separators: `,` and full-width `，`
    /// - full-width digits and full-width sign characters
    /// - a leading `+`/`-`, or parentheses for negatives (`(500.00)`)
    /// - up to six fractional digits; more are rejected, not rounded
    ///
    /// Returns `None` for anything that is not a plain decimal number after
    /// stripping, including empty strings and overflow.
    pub fn parse_decimal(input: &str) -> Option<Micros> {
        let mut cleaned = String::with_capacity(input.len());
        let mut negative = false;
        let mut paren = false;

        for ch in input.trim().chars() {
            match ch {
                '¥' | '￥' | '$' | '元' | ',' | '，' | ' ' | '\u{3000}' => continue,
                '(' => {
                    paren = true;
                }
                ')' => {}
                '-' | '－' => {
                    // A sign is only legal before any digit.
                    if !cleaned.is_empty() {
                        return None;
                    }
                    negative = true;
                }
                '+' | '＋' => {
                    if !cleaned.is_empty() {
                        return None;
                    }
                }
                '0'..='9' => cleaned.push(ch),
                '．' | '.' => cleaned.push('.'),
                // Full-width digits map onto their ASCII counterparts.
                '０'..='９' => {
                    let digit = (ch as u32) - ('０' as u32) + ('0' as u32);
                    cleaned.push(char::from_u32(digit)?);
                }
                _ => return None,
            }
        }

        if paren {
            negative = true;
        }
        if cleaned.is_empty() {
            return None;
        }

        let (int_part, frac_part) = match cleaned.split_once('.') {
            Some((i, f)) => (i, f),
            None => (cleaned.as_str(), ""),
        };
        if frac_part.len() > 6 || frac_part.contains('.') {
            return None;
        }

        let int_val: i64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().ok()?
        };

        // Right-pad the fraction to six digits: "5" -> 500000 micros.
        let mut frac_val: i64 = 0;
        for (i, ch) in frac_part.chars().enumerate() {
            let d = ch.to_digit(10)? as i64;
            frac_val += d * 10_i64.pow(5 - i as u32);
        }

        let magnitude = int_val
            .checked_mul(MICROS_PER_UNIT)?
            .checked_add(frac_val)?;
        Some(Micros(if negative { -magnitude } else { magnitude }))
    }
}

// ---------------------------------------------------------------------------
// Arithmetic operators (closed over Micros)
// ---------------------------------------------------------------------------

impl Add for Micros {
    type Output = Micros;
    #[inline]
    fn add(self, rhs: Micros) -> Micros {
        Micros(self.0 + rhs.0)
    }
}

impl Sub for Micros {
    type Output = Micros;
    #[inline]
    fn sub(self, rhs: Micros) -> Micros {
        Micros(self.0 - rhs.0)
    }
}

impl Neg for Micros {
    type Output = Micros;
    #[inline]
    fn neg(self) -> Micros {
        Micros(-self.0)
    }
}

impl AddAssign for Micros {
    #[inline]
    fn add_assign(&mut self, rhs: Micros) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Micros {
    #[inline]
    fn sub_assign(&mut self, rhs: Micros) {
        self.0 -= rhs.0;
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl std::fmt::Display for Micros {
    /// Scale-2 display for user-facing surfaces; truncation, never rounding.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let units = self.0 / MICROS_PER_UNIT;
        let cents = ((self.0 % MICROS_PER_UNIT).abs()) / 10_000;
        if self.0 < 0 && units == 0 {
            write!(f, "-{units}.{cents:02}")
        } else {
            write!(f, "{units}.{cents:02}")
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
