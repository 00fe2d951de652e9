//! Exact decimal arithmetic and currency-tagged amounts
//!
//! All money and share quantities are `rust_decimal::Decimal`. Division rounds
//! half-to-even at [`DIVISION_SCALE`] fractional digits; every other operation is
//! exact. Amounts in different currencies never mix except through
//! [`Money::convert`] with an explicit exchange rate.

use rust_decimal::prelude::Signed;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Fractional digits kept by division.
pub const DIVISION_SCALE: u32 = 12;

/// Divide with banker's rounding at [`DIVISION_SCALE`] digits.
pub fn div_round(numerator: Decimal, denominator: Decimal) -> Result<Decimal> {
    if denominator.is_zero() {
        return Err(Error::Internal(format!(
            "division of {} by zero",
            numerator
        )));
    }
    numerator
        .checked_div(denominator)
        .map(round_money)
        .ok_or_else(|| Error::Internal(format!("overflow dividing {} by {}", numerator, denominator)))
}

/// Round a derived amount to [`DIVISION_SCALE`] digits, half-to-even.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DIVISION_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Canonical form used for comparisons and storage (no trailing zeros).
pub fn canonical(value: Decimal) -> Decimal {
    value.normalize()
}

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub const USD: Currency = Currency(*b"USD");
    pub const EUR: Currency = Currency(*b"EUR");

    pub fn as_str(&self) -> &str {
        // Constructed only from validated ASCII uppercase letters.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for Currency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let code = s.trim().to_ascii_uppercase();
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(Error::validation(format!("invalid currency code '{}'", s)));
        }
        Ok(Currency([bytes[0], bytes[1], bytes[2]]))
    }
}

impl TryFrom<String> for Currency {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::USD
    }
}

/// A decimal amount tagged with its currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    fn same_currency(&self, other: &Money) -> Result<()> {
        if self.currency != other.currency {
            return Err(Error::validation(format!(
                "cannot combine {} with {} without an exchange rate",
                self.currency, other.currency
            )));
        }
        Ok(())
    }

    pub fn add(&self, other: &Money) -> Result<Money> {
        self.same_currency(other)?;
        Ok(Money::new(self.amount + other.amount, self.currency))
    }

    pub fn sub(&self, other: &Money) -> Result<Money> {
        self.same_currency(other)?;
        Ok(Money::new(self.amount - other.amount, self.currency))
    }

    pub fn mul(&self, factor: Decimal) -> Money {
        Money::new(self.amount * factor, self.currency)
    }

    pub fn div(&self, divisor: Decimal) -> Result<Money> {
        Ok(Money::new(div_round(self.amount, divisor)?, self.currency))
    }

    pub fn neg(&self) -> Money {
        Money::new(-self.amount, self.currency)
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// -1, 0 or 1
    pub fn signum(&self) -> Decimal {
        self.amount.signum()
    }

    /// Compare two amounts of the same currency.
    pub fn cmp_amount(&self, other: &Money) -> Result<std::cmp::Ordering> {
        self.same_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    /// Convert into `to` using `rate` units of `to` per unit of `self.currency`.
    pub fn convert(&self, rate: Decimal, to: Currency) -> Result<Money> {
        if self.currency == to {
            return Ok(*self);
        }
        if rate <= Decimal::ZERO {
            return Err(Error::validation(format!(
                "exchange rate {} -> {} must be positive, got {}",
                self.currency, to, rate
            )));
        }
        Ok(Money::new(self.amount * rate, to))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount.round_dp(2), self.currency)
    }
}
