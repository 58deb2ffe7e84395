//! Integration tests for the feed supervisor and dispatch loop.
//!
//! A scripted in-memory feed source hands out one channel-backed stream per
//! connection attempt and records every query it was opened with; a
//! recording notifier captures what would have been pushed.

#[cfg(test)]
mod feed_supervisor_tests {
    use {
        async_trait::async_trait,
        cashwatch::{
            address_set::{Address, AddressSet},
            dispatcher::TxDispatcher,
            feed_core::{
                spawn_supervisor, ConnectionError, FeedEvent, FeedQuery, FeedSource, FeedStream,
                StreamError, SupervisorConfig, SupervisorHandle, SupervisorState, Tx, TxOutput,
            },
            notifier::{Notifier, NotifierError},
            persistence::MemoryStore,
            rates::{AmountFormatter, CurrencyTable, FixedRates},
        },
        futures::stream,
        std::{
            collections::VecDeque,
            sync::{Arc, Mutex},
            time::Duration,
        },
        tokio::sync::mpsc,
    };

    const ADDR_A: &str = "qz4v8lrnv786e42n7xg0czpelp439aytusray7cnh4";
    const ADDR_B: &str = "pqhysjvvw7r3grxev3gq5ew3m806wthdd5lqpmma3l";

    type FeedSender = mpsc::UnboundedSender<Result<FeedEvent, StreamError>>;
    type FeedReceiver = mpsc::UnboundedReceiver<Result<FeedEvent, StreamError>>;

    #[derive(Default)]
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<FeedReceiver, ConnectionError>>>,
        queries: Mutex<Vec<FeedQuery>>,
    }

    impl ScriptedSource {
        fn push_connection(&self) -> FeedSender {
            let (sender, receiver) = mpsc::unbounded_channel();
            self.script.lock().unwrap().push_back(Ok(receiver));
            sender
        }

        fn push_failure(&self, error: ConnectionError) {
            self.script.lock().unwrap().push_back(Err(error));
        }

        fn queries(&self) -> Vec<FeedQuery> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedSource {
        async fn open(&self, query: &FeedQuery) -> Result<FeedStream, ConnectionError> {
            self.queries.lock().unwrap().push(query.clone());
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(receiver)) => Ok(Box::pin(stream::unfold(receiver, |mut receiver| async move {
                    receiver.recv().await.map(|item| (item, receiver))
                }))),
                Some(Err(e)) => Err(e),
                // Script exhausted: a connection that never delivers anything
                None => Ok(Box::pin(stream::pending::<Result<FeedEvent, StreamError>>())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<(String, String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, target: &Address, message: &str, link_url: &str) -> Result<(), NotifierError> {
            self.sent
                .lock()
                .unwrap()
                .push((target.to_string(), message.to_string(), link_url.to_string()));
            Ok(())
        }
    }

    struct Harness {
        source: Arc<ScriptedSource>,
        addresses: Arc<AddressSet>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Harness {
        fn new(subscribed: &[&str]) -> Self {
            let addresses = Arc::new(AddressSet::load(Arc::new(MemoryStore::default())));
            for payload in subscribed {
                addresses.subscribe(addr(payload));
            }
            Self {
                source: Arc::new(ScriptedSource::default()),
                addresses,
                notifier: Arc::new(RecordingNotifier::default()),
            }
        }

        fn start(&self) -> SupervisorHandle {
            // 250 USD / BCH
            let formatter = AmountFormatter::new(
                Arc::new(FixedRates::new([("USD", 400_000.0)])),
                Arc::new(CurrencyTable::builtin()),
            );
            let dispatcher = TxDispatcher::new(
                self.addresses.clone(),
                formatter,
                self.notifier.clone(),
                "https://explorer.example/tx/",
            );
            let config = SupervisorConfig {
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(40),
                ..SupervisorConfig::default()
            };
            spawn_supervisor(self.source.clone(), self.addresses.clone(), Arc::new(dispatcher), config)
        }
    }

    fn addr(payload: &str) -> Address {
        Address::parse(payload).unwrap()
    }

    fn tx(hash: &str, outputs: &[(u64, &str)]) -> Tx {
        Tx {
            hash: hash.to_string(),
            outputs: outputs
                .iter()
                .map(|(amount, payload)| TxOutput {
                    amount: *amount,
                    address: Some(addr(payload)),
                })
                .collect(),
        }
    }

    fn batch(txs: Vec<Tx>) -> Result<FeedEvent, StreamError> {
        Ok(FeedEvent::Transactions(txs))
    }

    async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {}", what);
    }

    #[tokio::test]
    async fn test_dispatch_only_subscribed_outputs() {
        // Test: {A: USD}, h1 pays A 9_800_000 and B 500 → only A is notified
        let harness = Harness::new(&[ADDR_A]);
        let feed = harness.source.push_connection();
        let handle = harness.start();
        let stats = handle.stats();

        wait_until("first connection", || stats.connections_opened() == 1).await;
        assert_eq!(handle.state(), SupervisorState::Streaming);

        feed.send(Ok(FeedEvent::Opened)).unwrap();
        feed.send(batch(vec![tx("h1", &[(9_800_000, ADDR_A), (500, ADDR_B)])])).unwrap();

        let notifier = harness.notifier.clone();
        wait_until("notification", || notifier.sent().len() == 1).await;

        assert_eq!(
            harness.notifier.sent(),
            vec![(
                format!("bitcoincash:{}", ADDR_A),
                "Received $24.50 (0.098 BCH)".to_string(),
                "https://explorer.example/tx/h1".to_string(),
            )]
        );

        assert_eq!(handle.shutdown().await, 1);
    }

    #[tokio::test]
    async fn test_new_subscription_forces_single_reconnect_without_loss() {
        // Test: Subscribing B while streaming reconnects once with B in the
        // query; a payment to B buffered on the old stream is still
        // dispatched exactly once, even when the new stream repeats it
        let harness = Harness::new(&[ADDR_A]);
        let old_feed = harness.source.push_connection();
        let new_feed = harness.source.push_connection();
        let handle = harness.start();
        let stats = handle.stats();

        wait_until("first connection", || stats.connections_opened() == 1).await;

        harness.addresses.subscribe(addr(ADDR_B));
        old_feed.send(batch(vec![tx("h2", &[(1_000, ADDR_B)])])).unwrap();

        wait_until("reconnect", || stats.connections_opened() == 2).await;

        new_feed.send(batch(vec![tx("h2", &[(1_000, ADDR_B)])])).unwrap();
        new_feed.send(batch(vec![tx("h3", &[(2_000, ADDR_B)])])).unwrap();

        let notifier = harness.notifier.clone();
        wait_until("both payments", || notifier.sent().len() == 2).await;

        let links: Vec<String> = harness.notifier.sent().into_iter().map(|(_, _, link)| link).collect();
        assert_eq!(
            links,
            vec!["https://explorer.example/tx/h2", "https://explorer.example/tx/h3"]
        );

        let queries = harness.source.queries();
        assert_eq!(queries.len(), 2);
        assert!(!queries[0].addresses().contains(&addr(ADDR_B)));
        assert!(queries[1].addresses().contains(&addr(ADDR_A)));
        assert!(queries[1].addresses().contains(&addr(ADDR_B)));
        assert_eq!(stats.forced_reconnects(), 1);

        handle.shutdown().await;
        assert_eq!(harness.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_currency_change_keeps_connection() {
        // Test: Updating an existing subscription does not change the query
        let harness = Harness::new(&[ADDR_A]);
        let _feed = harness.source.push_connection();
        let handle = harness.start();
        let stats = handle.stats();

        wait_until("first connection", || stats.connections_opened() == 1).await;
        harness.addresses.set_currency(addr(ADDR_A), "EUR");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.forced_reconnects(), 0);
        assert_eq!(harness.source.queries().len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_connection_error_is_retried() {
        // Test: A failed open backs off and tries again
        let harness = Harness::new(&[ADDR_A]);
        harness.source.push_failure(ConnectionError::Status(503));
        harness.source.push_failure(ConnectionError::Transport("refused".to_string()));
        let feed = harness.source.push_connection();
        let handle = harness.start();
        let stats = handle.stats();

        wait_until("connection after failures", || stats.connections_opened() == 1).await;
        assert_eq!(stats.connection_failures(), 2);

        feed.send(batch(vec![tx("h1", &[(100, ADDR_A)])])).unwrap();
        let notifier = harness.notifier.clone();
        wait_until("notification", || notifier.sent().len() == 1).await;

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_stream_failure_reconnects() {
        // Test: A transport fault mid-stream leads to a fresh connection
        let harness = Harness::new(&[ADDR_A]);
        let old_feed = harness.source.push_connection();
        let new_feed = harness.source.push_connection();
        let handle = harness.start();
        let stats = handle.stats();

        wait_until("first connection", || stats.connections_opened() == 1).await;
        old_feed
            .send(Err(StreamError::Transport("connection reset".to_string())))
            .unwrap();

        wait_until("reconnect", || stats.connections_opened() == 2).await;
        assert_eq!(stats.stream_failures(), 1);
        assert_eq!(stats.forced_reconnects(), 0);

        new_feed.send(batch(vec![tx("h1", &[(100, ADDR_A)])])).unwrap();
        let notifier = harness.notifier.clone();
        wait_until("notification", || notifier.sent().len() == 1).await;

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_messages_do_not_drop_connection() {
        // Test: Unknown and malformed messages are skipped, stream stays up
        let harness = Harness::new(&[ADDR_A]);
        let feed = harness.source.push_connection();
        let handle = harness.start();
        let stats = handle.stats();

        wait_until("first connection", || stats.connections_opened() == 1).await;
        feed.send(Ok(FeedEvent::Unrecognized {
            kind: "block".to_string(),
        }))
        .unwrap();
        feed.send(Ok(FeedEvent::Malformed {
            reason: "not json".to_string(),
        }))
        .unwrap();
        feed.send(batch(vec![tx("h1", &[(100, ADDR_A)])])).unwrap();

        let notifier = harness.notifier.clone();
        wait_until("notification", || notifier.sent().len() == 1).await;
        assert_eq!(stats.connections_opened(), 1);
        assert_eq!(stats.stream_failures(), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_set_waits_for_first_subscription() {
        // Test: No connection is opened until there is something to watch
        let harness = Harness::new(&[]);
        let _feed = harness.source.push_connection();
        let handle = harness.start();
        let stats = handle.stats();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(harness.source.queries().is_empty());
        assert_eq!(handle.state(), SupervisorState::Disconnected);

        harness.addresses.subscribe(addr(ADDR_A));
        wait_until("first connection", || stats.connections_opened() == 1).await;

        let queries = harness.source.queries();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].addresses().contains(&addr(ADDR_A)));
        assert_eq!(stats.forced_reconnects(), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_finishes_buffered_transactions() {
        // Test: Transactions already delivered by the feed are dispatched
        // before shutdown returns
        let harness = Harness::new(&[ADDR_A]);
        let feed = harness.source.push_connection();
        let handle = harness.start();
        let stats = handle.stats();

        wait_until("first connection", || stats.connections_opened() == 1).await;

        feed.send(batch(vec![tx("h1", &[(100, ADDR_A)]), tx("h2", &[(200, ADDR_A)])]))
            .unwrap();
        feed.send(batch(vec![tx("h3", &[(300, ADDR_A)])])).unwrap();

        let dispatched = handle.shutdown().await;

        assert_eq!(dispatched, 3);
        let links: Vec<String> = harness.notifier.sent().into_iter().map(|(_, _, link)| link).collect();
        assert_eq!(
            links,
            vec![
                "https://explorer.example/tx/h1",
                "https://explorer.example/tx/h2",
                "https://explorer.example/tx/h3",
            ]
        );
    }
}
