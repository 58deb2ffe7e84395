//! Application context: the single owner of every piece of shared state.
//!
//! Built once at startup (loading the address set from its store) and torn
//! down once at shutdown (final save). Handlers, the supervisor and the
//! dispatcher all hold `Arc`s into it instead of reaching for globals.

use {
    crate::{
        address_set::AddressSet,
        config::{RateSource, RuntimeConfig},
        dispatcher::TxDispatcher,
        notifier::{Notifier, NotifierError, OneSignalNotifier},
        persistence::{AddressStore, JsonFileStore},
        rates::{
            amount::AmountFormatter,
            currencies::CurrencyTable,
            exchange_rate::{CoinbaseRates, ExchangeRate, FixedRates, RateFetchError},
        },
        speech::{GoogleTts, ListenerRegistry, SpeechAnnouncer, SpeechError, SpeechSynthesizer},
    },
    std::{path::PathBuf, sync::Arc},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("notifier setup failed: {0}")]
    Notifier(#[from] NotifierError),
    #[error("speech setup failed: {0}")]
    Speech(#[from] SpeechError),
    #[error("exchange-rate setup failed: {0}")]
    Rates(#[from] RateFetchError),
}

/// Collaborators an [`AppContext`] is assembled from.
pub struct ContextParts {
    pub app_id: String,
    pub store: Arc<dyn AddressStore>,
    pub rates: Arc<dyn ExchangeRate>,
    pub notifier: Arc<dyn Notifier>,
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    pub explorer_tx_url: String,
    pub speech_dir: PathBuf,
}

pub struct AppContext {
    pub app_id: String,
    pub addresses: Arc<AddressSet>,
    pub currencies: Arc<CurrencyTable>,
    pub listeners: Arc<ListenerRegistry>,
    pub dispatcher: Arc<TxDispatcher>,
    pub speech_dir: PathBuf,
    live_rates: Option<Arc<CoinbaseRates>>,
}

impl AppContext {
    pub fn new(parts: ContextParts) -> Self {
        let addresses = Arc::new(AddressSet::load(parts.store));
        let currencies = Arc::new(CurrencyTable::builtin());
        let listeners = Arc::new(ListenerRegistry::new());
        let formatter = AmountFormatter::new(parts.rates, currencies.clone());

        let mut dispatcher = TxDispatcher::new(
            addresses.clone(),
            formatter,
            parts.notifier,
            parts.explorer_tx_url,
        );
        if let Some(synthesizer) = parts.synthesizer {
            dispatcher = dispatcher.with_speech(Arc::new(SpeechAnnouncer::new(synthesizer, listeners.clone())));
        }

        Self {
            app_id: parts.app_id,
            addresses,
            currencies,
            listeners,
            dispatcher: Arc::new(dispatcher),
            speech_dir: parts.speech_dir,
            live_rates: None,
        }
    }

    /// Production wiring: JSON file store, OneSignal, configured rate source
    /// and Google TTS when a key is present.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, ContextError> {
        let store: Arc<dyn AddressStore> = Arc::new(JsonFileStore::new(&config.addresses_path));
        let notifier: Arc<dyn Notifier> = Arc::new(OneSignalNotifier::new(
            config.onesignal_app_id.clone(),
            config.onesignal_app_key.clone(),
        )?);

        let (rates, live_rates) = match config.rate_source {
            RateSource::Coinbase => {
                let coinbase = Arc::new(CoinbaseRates::new()?);
                (coinbase.clone() as Arc<dyn ExchangeRate>, Some(coinbase))
            }
            RateSource::Fixed => (Arc::new(FixedRates::default()) as Arc<dyn ExchangeRate>, None),
        };

        let synthesizer: Option<Arc<dyn SpeechSynthesizer>> = match &config.google_tts_api_key {
            Some(key) => {
                let tts = GoogleTts::new(key.clone(), &config.speech_path)?;
                Some(Arc::new(tts) as Arc<dyn SpeechSynthesizer>)
            }
            None => {
                log::info!("GOOGLE_TTS_API_KEY not set, speech announcements disabled");
                None
            }
        };

        let mut context = Self::new(ContextParts {
            app_id: config.onesignal_app_id.clone(),
            store,
            rates,
            notifier,
            synthesizer,
            explorer_tx_url: config.explorer_tx_url.clone(),
            speech_dir: config.speech_path.clone(),
        });
        context.live_rates = live_rates;
        Ok(context)
    }

    /// Rate source that needs polling, if the configured one is live.
    pub fn live_rates(&self) -> Option<Arc<CoinbaseRates>> {
        self.live_rates.clone()
    }

    /// Final save of the address set.
    pub fn shutdown(&self) {
        match self.addresses.persist() {
            Ok(()) => log::info!("💾 Saved {} subscribed addresses", self.addresses.len()),
            Err(e) => log::error!("Final save of subscribed addresses failed: {}", e),
        }
    }
}
