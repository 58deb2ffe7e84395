//! Spoken payment announcements for open listener pages.
//!
//! A browser page listening on `/listen-tx/{address}` registers a session in
//! the [`ListenerRegistry`]. When a payment to that address is dispatched and
//! at least one session is live, the announcement text is synthesized to an
//! MP3 under the speech directory and the file's public path is pushed to
//! every session for that address.

use {
    crate::address_set::Address,
    async_trait::async_trait,
    base64::{engine::general_purpose::STANDARD, Engine as _},
    serde::Deserialize,
    serde_json::json,
    std::{
        collections::HashMap,
        path::{Path, PathBuf},
        sync::{Arc, Mutex, PoisonError},
        time::Duration,
    },
    thiserror::Error,
    tokio::sync::mpsc,
};

pub const GOOGLE_TTS_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

/// URL prefix under which synthesized files are served.
pub const SPEECH_ROUTE_PREFIX: &str = "/speech";

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("speech service returned status {0}")]
    Status(u16),
    #[error("speech service returned invalid audio: {0}")]
    InvalidAudio(String),
    #[error("failed to write speech file: {0}")]
    Io(#[from] std::io::Error),
}

/// A registered listener page. Messages are public paths of MP3 files.
pub struct ListenerSession {
    pub id: String,
    pub receiver: mpsc::UnboundedReceiver<String>,
}

type Sessions = HashMap<Address, HashMap<String, mpsc::UnboundedSender<String>>>;

#[derive(Default)]
pub struct ListenerRegistry {
    sessions: Mutex<Sessions>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: &Address) -> ListenerSession {
        let id = hex::encode(rand::random::<[u8; 16]>());
        let (sender, receiver) = mpsc::unbounded_channel();

        self.lock()
            .entry(address.clone())
            .or_default()
            .insert(id.clone(), sender);
        log::info!("🔊 Listener {} registered for {}", id, address);

        ListenerSession { id, receiver }
    }

    pub fn unregister(&self, address: &Address, id: &str) {
        let mut sessions = self.lock();
        if let Some(by_id) = sessions.get_mut(address) {
            by_id.remove(id);
            if by_id.is_empty() {
                sessions.remove(address);
            }
        }
        log::info!("Listener {} for {} closed", id, address);
    }

    pub fn has_listeners(&self, address: &Address) -> bool {
        self.lock().get(address).is_some_and(|by_id| !by_id.is_empty())
    }

    pub fn listener_count(&self, address: &Address) -> usize {
        self.lock().get(address).map_or(0, HashMap::len)
    }

    /// Push `message` to every live session for `address`, pruning sessions
    /// whose page has gone away. Returns how many sessions received it.
    pub fn broadcast(&self, address: &Address, message: &str) -> usize {
        let mut sessions = self.lock();
        let Some(by_id) = sessions.get_mut(address) else {
            return 0;
        };

        by_id.retain(|_, sender| sender.send(message.to_string()).is_ok());
        let delivered = by_id.len();
        if by_id.is_empty() {
            sessions.remove(address);
        }
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Turns text into an audio file and returns the path it is served under.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, handle_id: &str, text: &str) -> Result<String, SpeechError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

/// Google Cloud text-to-speech (en-US, neutral voice, MP3).
pub struct GoogleTts {
    api_key: String,
    output_dir: PathBuf,
    client: reqwest::Client,
}

impl GoogleTts {
    pub fn new(api_key: impl Into<String>, output_dir: impl Into<PathBuf>) -> Result<Self, SpeechError> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            api_key: api_key.into(),
            output_dir,
            client,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTts {
    async fn synthesize(&self, handle_id: &str, text: &str) -> Result<String, SpeechError> {
        let body = json!({
            "input": {"text": text},
            "voice": {"languageCode": "en-US", "ssmlGender": "NEUTRAL"},
            "audioConfig": {"audioEncoding": "MP3"}
        });

        let response = self
            .client
            .post(GOOGLE_TTS_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SpeechError::Status(response.status().as_u16()));
        }

        let synthesized: SynthesizeResponse = response.json().await?;
        let audio = STANDARD
            .decode(synthesized.audio_content)
            .map_err(|e| SpeechError::InvalidAudio(e.to_string()))?;

        let file_name = speech_file_name(handle_id);
        tokio::fs::write(self.output_dir.join(&file_name), audio).await?;

        Ok(format!("{}/{}", SPEECH_ROUTE_PREFIX, file_name))
    }
}

pub fn speech_file_name(handle_id: &str) -> String {
    format!("{}.mp3", handle_id)
}

/// Address payload plus a random suffix; alphanumeric like every served file.
fn announcement_handle(address: &Address) -> String {
    format!("{}{}", address.payload(), hex::encode(rand::random::<[u8; 6]>()))
}

/// Synthesizes announcements for addresses that have a listener open.
pub struct SpeechAnnouncer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    listeners: Arc<ListenerRegistry>,
}

impl SpeechAnnouncer {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, listeners: Arc<ListenerRegistry>) -> Self {
        Self {
            synthesizer,
            listeners,
        }
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    /// Announce in the background so a slow synthesis never holds up
    /// dispatch of later transactions.
    pub fn announce(self: &Arc<Self>, address: &Address, text: String) {
        if !self.listeners.has_listeners(address) {
            return;
        }

        let announcer = Arc::clone(self);
        let address = address.clone();
        tokio::spawn(async move {
            if let Err(e) = announcer.announce_now(&address, &text).await {
                log::warn!("⚠️  Speech for {} failed: {}", address, e);
            }
        });
    }

    /// Synthesize and push to listeners. Returns how many sessions got it.
    ///
    /// Every announcement gets its own file, so back-to-back payments to one
    /// address never overwrite a clip a page is about to play.
    pub async fn announce_now(&self, address: &Address, text: &str) -> Result<usize, SpeechError> {
        let handle_id = announcement_handle(address);
        let path = self.synthesizer.synthesize(&handle_id, text).await?;
        let delivered = self.listeners.broadcast(address, &path);
        log::debug!("🔊 Speech {} pushed to {} listeners of {}", path, delivered, address);
        Ok(delivered)
    }
}
