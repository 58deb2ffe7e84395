//! Amount formatting and the fiat rate/metadata sources it depends on.

pub mod amount;
pub mod currencies;
pub mod exchange_rate;

pub use amount::{format_native, native_amount, AmountFormatter, FormatError};
pub use currencies::{CurrencyInfo, CurrencyTable};
pub use exchange_rate::{CoinbaseRates, ExchangeRate, FixedRates};
