//! Utility functions for formatting and common operations
//!
//! Formatting helpers give the CLI one consistent display of amounts,
//! quantities and percentages.

pub mod cancel;

use rust_decimal::Decimal;

use crate::money::Currency;

/// Core formatting function with full control over output.
///
/// Rounds to `places` (banker's rounding), groups thousands with `,` and
/// right-aligns to `width` (0 for no padding).
///
/// # Examples
/// ```
/// use lotbook::utils::format_decimal_with_width;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(format_decimal_with_width(dec!(1234.5), 2, 0), "1,234.50");
/// assert_eq!(format_decimal_with_width(dec!(1234), 2, 12), "    1,234.00");
/// ```
pub fn format_decimal_with_width(value: Decimal, places: u32, width: usize) -> String {
    let rounded = value.round_dp(places);
    let is_negative = rounded < Decimal::ZERO;
    let formatted = format!("{:.*}", places as usize, rounded.abs());
    let (integer_part, fraction) = match formatted.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (formatted.clone(), None),
    };

    let grouped: String = integer_part
        .chars()
        .rev()
        .enumerate()
        .flat_map(|(i, c)| {
            if i > 0 && i % 3 == 0 {
                vec![',', c]
            } else {
                vec![c]
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    let sign = if is_negative { "-" } else { "" };
    let result = match fraction {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    };

    if width > 0 && result.len() < width {
        format!("{:>width$}", result, width = width)
    } else {
        result
    }
}

// ============ Convenience functions ============

/// Two decimal places: "1,234.56"
pub fn format_amount(value: Decimal) -> String {
    format_decimal_with_width(value, 2, 0)
}

/// Amount followed by its currency code: "1,234.56 USD"
///
/// # Examples
/// ```
/// use lotbook::money::Currency;
/// use lotbook::utils::format_money;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(format_money(dec!(-500), Currency::USD), "-500.00 USD");
/// ```
pub fn format_money(value: Decimal, currency: Currency) -> String {
    format!("{} {}", format_amount(value), currency)
}

/// Share quantities keep their significant fractional digits: "1,234.5"
pub fn format_quantity(value: Decimal) -> String {
    let normalized = value.normalize();
    format_decimal_with_width(normalized, normalized.scale(), 0)
}

/// Percentage already scaled by 100: "12.34%"
pub fn format_pct(value: Decimal) -> String {
    format!("{}%", format_decimal_with_width(value, 2, 0))
}

/// Fraction rendered as a percentage: 0.1645 -> "16.45%"
pub fn format_ratio_pct(value: Decimal) -> String {
    format_pct(value * Decimal::ONE_HUNDRED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_amount_basic() {
        assert_eq!(format_amount(dec!(1234.56)), "1,234.56");
        assert_eq!(format_amount(dec!(0.99)), "0.99");
        assert_eq!(format_amount(dec!(1000000)), "1,000,000.00");
        assert_eq!(format_amount(dec!(0)), "0.00");
    }

    #[test]
    fn test_format_amount_negative() {
        assert_eq!(format_amount(dec!(-1234.56)), "-1,234.56");
        assert_eq!(format_amount(dec!(-0.01)), "-0.01");
    }

    #[test]
    fn test_format_with_width() {
        let result = format_decimal_with_width(dec!(100), 2, 10);
        assert_eq!(result, "    100.00");
        // Already wider than requested
        assert_eq!(format_decimal_with_width(dec!(1000000), 2, 5), "1,000,000.00");
    }

    #[test]
    fn test_format_quantity_and_pct() {
        assert_eq!(format_quantity(dec!(1234.500)), "1,234.5");
        assert_eq!(format_quantity(dec!(400)), "400");
        assert_eq!(format_pct(dec!(12.345678)), "12.35%");
        assert_eq!(format_ratio_pct(dec!(0.1645)), "16.45%");
        assert_eq!(format_money(dec!(1805), Currency::EUR), "1,805.00 EUR");
    }
}
