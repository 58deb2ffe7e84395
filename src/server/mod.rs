//! HTTP surface: subscription pages, currency selection, live listener
//! websockets and synthesized speech files.
//!
//! ## Routes
//!
//! - `GET /` scan page
//! - `GET /{address}` subscribe (default currency) and show the page
//! - `GET /select-currency/{address}` currency picker
//! - `GET /select-currency/{address}/{currency}` set currency, show picker
//! - `GET /listen-tx/{address}` websocket; receives speech file paths
//! - `GET /speech/{file}` synthesized audio
//!
//! Subscribing a new address is what makes the feed supervisor reconnect.

pub mod pages;

use {
    crate::{
        address_set::{Address, Subscription},
        context::AppContext,
        speech::ListenerSession,
    },
    axum::{
        extract::{
            ws::{Message, WebSocket, WebSocketUpgrade},
            Path, State,
        },
        http::{header, StatusCode},
        response::{Html, IntoResponse, Response},
        routing::get,
        Router,
    },
    futures::{SinkExt, StreamExt},
    std::{future::Future, sync::Arc},
    thiserror::Error,
    tokio::net::TcpListener,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),
    #[error("Not found")]
    NotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::InvalidAddress(_) | ApiError::UnknownCurrency(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
        };
        (status, self.to_string()).into_response()
    }
}

pub fn router(context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(scan))
        .route("/select-currency/:address", get(select_currency))
        .route("/select-currency/:address/:currency", get(set_currency))
        .route("/listen-tx/:address", get(listen_tx))
        .route("/speech/:file", get(speech_file))
        .route("/:address", get(subscribe))
        .with_state(context)
}

/// Serve until `shutdown` resolves, then finish in-flight requests.
pub async fn serve<F>(listener: TcpListener, context: Arc<AppContext>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("🌐 HTTP surface listening on http://{}", addr);
    }
    axum::serve(listener, router(context))
        .with_graceful_shutdown(shutdown)
        .await
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    Address::parse(raw).map_err(|e| {
        log::debug!("Rejected address {}: {}", raw, e);
        ApiError::InvalidAddress(raw.to_string())
    })
}

async fn scan() -> Html<String> {
    Html(pages::scan_page())
}

async fn subscribe(
    State(context): State<Arc<AppContext>>,
    Path(raw): Path<String>,
) -> Result<Html<String>, ApiError> {
    let address = parse_address(&raw)?;

    if context.addresses.subscribe(address.clone()) == Subscription::Added {
        log::info!("➕ New subscription: {}", address);
    }

    let currency = context
        .addresses
        .get(&address)
        .map(|entry| entry.currency)
        .unwrap_or_else(|| crate::address_set::DEFAULT_CURRENCY.to_string());

    Ok(Html(pages::subscribe_page(&address, &context.app_id, &currency)))
}

async fn select_currency(
    State(context): State<Arc<AppContext>>,
    Path(raw): Path<String>,
) -> Result<Html<String>, ApiError> {
    let address = parse_address(&raw)?;
    let selected = context.addresses.get(&address).map(|entry| entry.currency);

    Ok(Html(pages::select_currency_page(
        &address,
        selected.as_deref(),
        &context.currencies,
    )))
}

async fn set_currency(
    State(context): State<Arc<AppContext>>,
    Path((raw, currency)): Path<(String, String)>,
) -> Result<Html<String>, ApiError> {
    let address = parse_address(&raw)?;
    let currency = currency.to_ascii_uppercase();
    if !context.currencies.is_known(&currency) {
        return Err(ApiError::UnknownCurrency(currency));
    }

    if context.addresses.set_currency(address.clone(), &currency) {
        log::info!("➕ New subscription: {}", address);
    }
    log::info!("💱 {} now uses {}", address, currency);

    Ok(Html(pages::select_currency_page(
        &address,
        Some(&currency),
        &context.currencies,
    )))
}

async fn listen_tx(
    ws: WebSocketUpgrade,
    State(context): State<Arc<AppContext>>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let address = parse_address(&raw)?;
    Ok(ws.on_upgrade(move |socket| listen_session(socket, context, address)))
}

async fn listen_session(socket: WebSocket, context: Arc<AppContext>, address: Address) {
    let ListenerSession { id, mut receiver } = context.listeners.register(&address);
    let (mut sender, mut incoming) = socket.split();

    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Some(path) => {
                    if sender.send(Message::Text(path)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = incoming.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }

    context.listeners.unregister(&address, &id);
}

/// Only bare `<alphanumeric>.mp3` names are served.
fn is_speech_file_name(name: &str) -> bool {
    name.strip_suffix(".mp3")
        .is_some_and(|stem| !stem.is_empty() && stem.chars().all(|c| c.is_ascii_alphanumeric()))
}

async fn speech_file(
    State(context): State<Arc<AppContext>>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    if !is_speech_file_name(&file) {
        return Err(ApiError::NotFound);
    }

    let audio = tokio::fs::read(context.speech_dir.join(&file))
        .await
        .map_err(|_| ApiError::NotFound)?;

    Ok((
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        audio,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            context::ContextParts,
            notifier::{Notifier, NotifierError},
            persistence::MemoryStore,
            rates::exchange_rate::FixedRates,
        },
        async_trait::async_trait,
        std::path::PathBuf,
    };

    const ADDR: &str = "qz4v8lrnv786e42n7xg0czpelp439aytusray7cnh4";

    struct NoopNotifier;

    #[async_trait]
    impl Notifier for NoopNotifier {
        async fn send(&self, _: &Address, _: &str, _: &str) -> Result<(), NotifierError> {
            Ok(())
        }
    }

    fn context(speech_dir: PathBuf) -> Arc<AppContext> {
        Arc::new(AppContext::new(ContextParts {
            app_id: "app-123".to_string(),
            store: Arc::new(MemoryStore::default()),
            rates: Arc::new(FixedRates::default()),
            notifier: Arc::new(NoopNotifier),
            synthesizer: None,
            explorer_tx_url: "https://explorer.example/tx/".to_string(),
            speech_dir,
        }))
    }

    #[tokio::test]
    async fn test_subscribe_adds_address_once() {
        let context = context(PathBuf::from("speech"));
        let changes = context.addresses.changes();

        let page = subscribe(State(context.clone()), Path(ADDR.to_string())).await.unwrap();
        subscribe(State(context.clone()), Path(format!("bitcoincash:{}", ADDR.to_uppercase())))
            .await
            .unwrap();

        assert!(page.0.contains("app-123"));
        assert_eq!(context.addresses.len(), 1);
        assert_eq!(*changes.borrow(), 1);
    }

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        let context = context(PathBuf::from("speech"));

        let result = subscribe(State(context.clone()), Path("1BoatSLRHtKNngkdXEeobR76b53LETtpyT".to_string())).await;

        let Err(error) = result else {
            panic!("expected invalid address");
        };
        assert_eq!(error.to_string(), "Invalid address: 1BoatSLRHtKNngkdXEeobR76b53LETtpyT");
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
        assert!(context.addresses.is_empty());
    }

    #[tokio::test]
    async fn test_set_currency_requires_known_code() {
        let context = context(PathBuf::from("speech"));
        let address = Address::parse(ADDR).unwrap();

        set_currency(State(context.clone()), Path((ADDR.to_string(), "jpy".to_string())))
            .await
            .unwrap();
        assert_eq!(context.addresses.get(&address).unwrap().currency, "JPY");

        let result = set_currency(State(context.clone()), Path((ADDR.to_string(), "XYZ".to_string()))).await;
        assert!(matches!(result, Err(ApiError::UnknownCurrency(_))));
        assert_eq!(context.addresses.get(&address).unwrap().currency, "JPY");
    }

    #[tokio::test]
    async fn test_speech_file_served_and_names_checked() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc123.mp3"), b"ID3").unwrap();
        let context = context(dir.path().to_path_buf());

        let response = speech_file(State(context.clone()), Path("abc123.mp3".to_string()))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");

        assert!(matches!(
            speech_file(State(context.clone()), Path("missing.mp3".to_string())).await,
            Err(ApiError::NotFound)
        ));
        assert!(!is_speech_file_name("../secret.mp3"));
        assert!(!is_speech_file_name(".mp3"));
        assert!(!is_speech_file_name("abc.wav"));
    }
}
