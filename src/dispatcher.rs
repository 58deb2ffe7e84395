//! Turns decoded transactions into per-address payment alerts.
//!
//! For each transaction: sum the outputs paying each currently subscribed
//! address, then send one push notification per paid address, formatted in
//! that address's currency, and announce it by speech if a listener page is
//! open. Membership is checked at dispatch time, so the feed filter is only a
//! pre-filter.

use {
    crate::{
        address_set::{Address, AddressSet, DEFAULT_CURRENCY},
        feed_core::{decoder::Tx, supervisor::EpochTx},
        notifier::Notifier,
        rates::amount::{format_native, AmountFormatter},
        speech::SpeechAnnouncer,
    },
    std::{
        collections::{HashMap, HashSet, VecDeque},
        sync::Arc,
    },
    tokio::sync::mpsc,
};

pub const DEFAULT_EXPLORER_TX_URL: &str = "https://explorer.bitcoin.com/bch/tx/";

/// Total paid to one subscribed address by one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub address: Address,
    pub amount: u64,
}

/// Per-address totals for outputs paying subscribed addresses, in order of
/// each address's first appearance in the output list.
pub fn payments_to(tx: &Tx, addresses: &AddressSet) -> Vec<Payment> {
    let mut order: Vec<Address> = Vec::new();
    let mut totals: HashMap<Address, u64> = HashMap::new();

    for output in &tx.outputs {
        let Some(address) = &output.address else {
            continue;
        };
        if !addresses.contains(address) {
            continue;
        }
        let total = totals.entry(address.clone()).or_insert_with(|| {
            order.push(address.clone());
            0
        });
        *total = total.saturating_add(output.amount);
    }

    order
        .into_iter()
        .map(|address| {
            let amount = totals.get(&address).copied().unwrap_or_default();
            Payment { address, amount }
        })
        .collect()
}

pub struct TxDispatcher {
    addresses: Arc<AddressSet>,
    formatter: AmountFormatter,
    notifier: Arc<dyn Notifier>,
    speech: Option<Arc<SpeechAnnouncer>>,
    explorer_tx_url: String,
}

impl TxDispatcher {
    pub fn new(
        addresses: Arc<AddressSet>,
        formatter: AmountFormatter,
        notifier: Arc<dyn Notifier>,
        explorer_tx_url: impl Into<String>,
    ) -> Self {
        Self {
            addresses,
            formatter,
            notifier,
            speech: None,
            explorer_tx_url: explorer_tx_url.into(),
        }
    }

    pub fn with_speech(mut self, speech: Arc<SpeechAnnouncer>) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Alert every subscribed address paid by `tx`. Notification failures are
    /// logged and do not stop the remaining alerts.
    pub async fn dispatch(&self, tx: &Tx) -> Vec<Payment> {
        let payments = payments_to(tx, &self.addresses);
        if payments.is_empty() {
            log::debug!("Transaction {} pays no subscribed address", tx.hash);
            return payments;
        }

        let link_url = format!("{}{}", self.explorer_tx_url, tx.hash);

        for payment in &payments {
            let currency = self
                .addresses
                .get(&payment.address)
                .map(|entry| entry.currency)
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
            let native = format_native(payment.amount);

            let message = match self.formatter.format_fiat(payment.amount, &currency) {
                Ok(fiat) => format!("Received {} ({})", fiat, native),
                Err(e) => {
                    log::warn!("⚠️  No fiat amount for {}: {}", payment.address, e);
                    format!("Received {}", native)
                }
            };

            log::info!("💸 {} received {} in {}", payment.address, native, tx.hash);

            if let Some(speech) = &self.speech {
                let spoken = match self.formatter.format_fiat_speech(payment.amount, &currency) {
                    Ok(fiat) => format!("Received {}", fiat),
                    Err(_) => format!("Received {}", native),
                };
                speech.announce(&payment.address, spoken);
            }

            if let Err(e) = self.notifier.send(&payment.address, &message, &link_url).await {
                log::warn!("❌ Notification to {} failed: {}", payment.address, e);
            }
        }

        payments
    }
}

/// Bounded memory of recently dispatched transaction hashes.
#[derive(Debug)]
pub struct RecentHashes {
    capacity: usize,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl RecentHashes {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns false if `hash` was already seen within the window.
    pub fn insert(&mut self, hash: &str) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if self.seen.contains(hash) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(hash.to_string());
        self.order.push_back(hash.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Dispatch transactions one at a time in arrival order until every sender is
/// gone and the queue is empty. A transaction redelivered by an overlapping
/// connection is dispatched once. Returns how many transactions were handled.
pub async fn run_dispatch_loop(
    mut rx: mpsc::Receiver<EpochTx>,
    dispatcher: Arc<TxDispatcher>,
    dedup_window: usize,
) -> u64 {
    let mut recent = RecentHashes::new(dedup_window);
    let mut handled = 0u64;

    log::info!("🚀 Dispatch loop started");

    while let Some(EpochTx { epoch, tx }) = rx.recv().await {
        if !recent.insert(&tx.hash) {
            log::debug!("Skipping duplicate transaction {} (epoch {})", tx.hash, epoch);
            continue;
        }
        dispatcher.dispatch(&tx).await;
        handled += 1;
    }

    log::info!("✅ Dispatch loop stopped after {} transactions", handled);
    handled
}
