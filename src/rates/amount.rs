//! Human-readable amounts.
//!
//! Native amounts are integer satoshis rendered in BCH with the fractional
//! part split into groups of three digits and trailing zero groups dropped:
//! `9_800_000` → `0.098 BCH`, `123_456_789` → `1.234 567 89 BCH`.
//! Fiat amounts divide by the current rate and use the currency's symbol and
//! decimal places: `$24.50`.

use {
    super::{currencies::CurrencyTable, exchange_rate::ExchangeRate},
    std::sync::Arc,
    thiserror::Error,
};

pub const NATIVE_UNIT: &str = "BCH";

const SATS_PER_COIN: u64 = 100_000_000;

/// Separator between fractional digit groups (no-break space).
const GROUP_SEPARATOR: &str = "\u{a0}";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("unknown currency: {0}")]
    UnknownCurrency(String),
}

/// `satoshis` as a grouped decimal coin amount, without unit.
pub fn native_amount(satoshis: u64) -> String {
    let whole = group_thousands(&(satoshis / SATS_PER_COIN).to_string());
    let fraction = format!("{:08}", satoshis % SATS_PER_COIN);

    let mut groups = vec![&fraction[0..3], &fraction[3..6], &fraction[6..8]];
    while groups.last().is_some_and(|group| group.bytes().all(|b| b == b'0')) {
        groups.pop();
    }

    if groups.is_empty() {
        whole
    } else {
        format!("{}.{}", whole, groups.join(GROUP_SEPARATOR))
    }
}

/// `satoshis` as a coin amount with unit, e.g. `0.098 BCH`.
pub fn format_native(satoshis: u64) -> String {
    format!("{} {}", native_amount(satoshis), NATIVE_UNIT)
}

/// Insert `,` every three digits in the integer part of a plain decimal
/// string such as `"1234567.89"`.
fn group_thousands(number: &str) -> String {
    let (integer, fraction) = match number.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (number, None),
    };

    let mut grouped = String::with_capacity(number.len() + integer.len() / 3);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(fraction);
    }
    grouped
}

/// Converts satoshi amounts into fiat strings using the live rate source and
/// the currency metadata table.
#[derive(Clone)]
pub struct AmountFormatter {
    rates: Arc<dyn ExchangeRate>,
    currencies: Arc<CurrencyTable>,
}

impl AmountFormatter {
    pub fn new(rates: Arc<dyn ExchangeRate>, currencies: Arc<CurrencyTable>) -> Self {
        Self { rates, currencies }
    }

    pub fn currencies(&self) -> &CurrencyTable {
        &self.currencies
    }

    /// Fiat value of `satoshis` in `currency` plus the decimal places to show.
    fn fiat_value(&self, satoshis: u64, currency: &str) -> Result<(f64, usize, &'static str), FormatError> {
        let unknown = || FormatError::UnknownCurrency(currency.to_string());

        let info = self.currencies.get(currency).ok_or_else(unknown)?;
        let sats_per_unit = self
            .rates
            .rate_for(currency)
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .ok_or_else(unknown)?;

        Ok((satoshis as f64 / sats_per_unit, info.decimal_places, info.symbol))
    }

    /// Display form with symbol prefix and thousands separators, e.g. `$1,024.50`.
    pub fn format_fiat(&self, satoshis: u64, currency: &str) -> Result<String, FormatError> {
        let (value, decimals, symbol) = self.fiat_value(satoshis, currency)?;
        Ok(format!("{}{}", symbol, group_thousands(&format!("{:.*}", decimals, value))))
    }

    /// Spoken form, e.g. `24.50 $`.
    pub fn format_fiat_speech(&self, satoshis: u64, currency: &str) -> Result<String, FormatError> {
        let (value, decimals, symbol) = self.fiat_value(satoshis, currency)?;
        Ok(format!("{:.*} {}", decimals, value, symbol))
    }
}
