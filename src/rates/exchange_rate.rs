//! Fiat exchange rates, expressed as satoshis per major currency unit.
//!
//! ## Sources
//!
//! - [`FixedRates`] - static table, for offline runs and tests
//! - [`CoinbaseRates`] - polled from the Coinbase exchange-rate API
//!
//! Endpoint: https://api.coinbase.com/v2/exchange-rates?currency=BCH
//! Returns: `{"data": {"currency": "BCH", "rates": {"USD": "250.12", ...}}}`
//! where each rate is fiat units per 1 BCH.

use {
    serde::Deserialize,
    std::{
        collections::HashMap,
        sync::{PoisonError, RwLock},
        time::Duration,
    },
    thiserror::Error,
    tokio::{sync::watch, time::interval},
};

pub const SATS_PER_COIN: f64 = 100_000_000.0;

pub const COINBASE_RATES_URL: &str = "https://api.coinbase.com/v2/exchange-rates?currency=BCH";

/// Capability shared by every rate source.
pub trait ExchangeRate: Send + Sync {
    /// Satoshis per major unit of `currency`, if the source has a rate for it.
    fn rate_for(&self, currency: &str) -> Option<f64>;

    /// Codes the source currently has rates for.
    fn currencies(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct FixedRates {
    rates: HashMap<String, f64>,
}

impl FixedRates {
    pub fn new<I, S>(rates: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            rates: rates.into_iter().map(|(code, rate)| (code.into(), rate)).collect(),
        }
    }
}

impl Default for FixedRates {
    fn default() -> Self {
        Self::new([("EUR", 861_474.0), ("JPY", 6_765.0)])
    }
}

impl ExchangeRate for FixedRates {
    fn rate_for(&self, currency: &str) -> Option<f64> {
        self.rates.get(currency).copied()
    }

    fn currencies(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.rates.keys().cloned().collect();
        codes.sort();
        codes
    }
}

#[derive(Debug, Error)]
pub enum RateFetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rate API returned status {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Deserialize)]
struct CoinbaseResponse {
    data: CoinbaseRatesData,
}

#[derive(Debug, Deserialize)]
struct CoinbaseRatesData {
    rates: HashMap<String, String>,
}

/// Live rates, refreshed by [`CoinbaseRates::poll`].
///
/// Until the first successful fetch every lookup misses. A failed fetch keeps
/// the previous table.
pub struct CoinbaseRates {
    url: String,
    client: reqwest::Client,
    latest: RwLock<HashMap<String, f64>>,
}

impl CoinbaseRates {
    pub fn new() -> Result<Self, RateFetchError> {
        Self::with_url(COINBASE_RATES_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self, RateFetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            url: url.into(),
            client,
            latest: RwLock::new(HashMap::new()),
        })
    }

    /// Fetch once and replace the table. Returns the number of rates loaded.
    pub async fn refresh(&self) -> Result<usize, RateFetchError> {
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(RateFetchError::Status(response.status()));
        }

        let body: CoinbaseResponse = response.json().await?;
        let rates = parse_rates(&body.data.rates);
        let count = rates.len();

        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = rates;
        Ok(count)
    }

    /// Refresh every `period` until `shutdown` flips to true.
    pub async fn poll(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        log::info!("💱 Starting exchange-rate polling (interval: {}s)", period.as_secs());

        let mut timer = interval(period);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.refresh().await {
                        Ok(count) => log::debug!("Loaded {} exchange rates", count),
                        Err(e) => log::warn!("Exchange-rate refresh failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        log::info!("Exchange-rate polling stopped");
    }
}

impl ExchangeRate for CoinbaseRates {
    fn rate_for(&self, currency: &str) -> Option<f64> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(currency)
            .copied()
    }

    fn currencies(&self) -> Vec<String> {
        let mut codes: Vec<String> = self
            .latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        codes.sort();
        codes
    }
}

/// Convert "fiat per coin" strings into satoshis per fiat unit, dropping
/// anything unparsable or non-positive.
fn parse_rates(raw: &HashMap<String, String>) -> HashMap<String, f64> {
    raw.iter()
        .filter_map(|(code, rate)| {
            let per_coin: f64 = rate.parse().ok()?;
            if !per_coin.is_finite() || per_coin <= 0.0 {
                return None;
            }
            Some((code.clone(), SATS_PER_COIN / per_coin))
        })
        .collect()
}
