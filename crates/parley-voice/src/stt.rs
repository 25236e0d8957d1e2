//! Live speech-to-text feed.
//!
//! The vendor connection is exposed as a pair: a [`TranscriptionConnection`]
//! for sending audio and close signals, and a channel of
//! [`TranscriptEvent`]s the session consumes alongside everything else.

use crate::config::TranscriptionConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parley_types::{LiveOptions, TranscriptEvent, TranscriptFragment};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use url::Url;

/// Buffered transcript events before the socket reader applies backpressure.
const TRANSCRIPT_EVENT_CAPACITY: usize = 256;

/// Buffered audio chunks between the input source and the socket writer.
const AUDIO_CHUNK_CAPACITY: usize = 64;

/// How long `finish` waits for the connection task to wind down.
const FINISH_TIMEOUT: Duration = Duration::from_secs(5);

const CLOSE_STREAM_FRAME: &str = r#"{"type":"CloseStream"}"#;
const KEEPALIVE_FRAME: &str = r#"{"type":"KeepAlive"}"#;

/// An open live transcription connection plus its event feed.
pub struct LiveTranscription {
    pub connection: Box<dyn TranscriptionConnection>,
    pub events: mpsc::Receiver<TranscriptEvent>,
}

/// Starts live transcription connections.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn start(&self, options: &LiveOptions) -> Result<LiveTranscription, VoiceError>;
}

/// Control surface of one live transcription connection.
#[async_trait]
pub trait TranscriptionConnection: Send {
    /// Sender that forwards raw audio chunks to the vendor.
    fn audio_sink(&self) -> mpsc::Sender<Vec<u8>>;

    /// Asks the vendor to flush and close the stream.
    async fn send_close(&mut self) -> Result<(), VoiceError>;

    /// Closes the socket and waits for the connection task to exit.
    async fn finish(&mut self) -> Result<(), VoiceError>;
}

/// Deepgram live transcription over a websocket.
#[derive(Debug, Clone)]
pub struct DeepgramTranscriber {
    config: TranscriptionConfig,
}

impl DeepgramTranscriber {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self { config }
    }
}

/// Builds the listen URL with decoding parameters as query pairs.
pub fn build_listen_url(base: &str, options: &LiveOptions) -> Result<Url, VoiceError> {
    let mut url = Url::parse(base)
        .map_err(|e| VoiceError::Config(format!("invalid transcription url {}: {}", base, e)))?;

    url.query_pairs_mut()
        .append_pair("model", &options.model)
        .append_pair("language", &options.language)
        .append_pair("encoding", &options.encoding)
        .append_pair("channels", &options.channels.to_string())
        .append_pair("sample_rate", &options.sample_rate.to_string())
        .append_pair("punctuate", &options.punctuate.to_string())
        .append_pair("endpointing", &options.endpointing.to_string());

    Ok(url)
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    async fn start(&self, options: &LiveOptions) -> Result<LiveTranscription, VoiceError> {
        if self.config.api_key.is_empty() {
            return Err(VoiceError::Config(
                "transcription api_key is not configured (set DEEPGRAM_API_KEY)".to_string(),
            ));
        }

        let url = build_listen_url(&self.config.url, options)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::Transcription(format!("invalid request: {}", e)))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.config.api_key))
            .map_err(|e| VoiceError::Config(format!("invalid api key header: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| VoiceError::Transcription(format!("Could not open socket: {}", e)))?;

        info!(
            model = %options.model,
            language = %options.language,
            sample_rate = options.sample_rate,
            "live transcription connection opened"
        );

        let (events_tx, events_rx) = mpsc::channel(TRANSCRIPT_EVENT_CAPACITY);
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_CHUNK_CAPACITY);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let keepalive = self
            .config
            .keepalive
            .then(|| Duration::from_secs(self.config.keepalive_interval_secs.max(1)));

        let task = tokio::spawn(run_connection(
            socket, audio_rx, control_rx, events_tx, keepalive,
        ));

        Ok(LiveTranscription {
            connection: Box::new(DeepgramConnection {
                audio_tx,
                control_tx,
                task: Some(task),
                close_sent: false,
            }),
            events: events_rx,
        })
    }
}

#[derive(Debug)]
enum Control {
    CloseStream,
    Finish,
}

struct DeepgramConnection {
    audio_tx: mpsc::Sender<Vec<u8>>,
    control_tx: mpsc::UnboundedSender<Control>,
    task: Option<JoinHandle<()>>,
    close_sent: bool,
}

#[async_trait]
impl TranscriptionConnection for DeepgramConnection {
    fn audio_sink(&self) -> mpsc::Sender<Vec<u8>> {
        self.audio_tx.clone()
    }

    async fn send_close(&mut self) -> Result<(), VoiceError> {
        if self.close_sent {
            return Ok(());
        }
        self.close_sent = true;
        self.control_tx
            .send(Control::CloseStream)
            .map_err(|_| VoiceError::Transcription("connection already closed".to_string()))
    }

    async fn finish(&mut self) -> Result<(), VoiceError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        // The task may already have exited on its own; that is not an error.
        let _ = self.control_tx.send(Control::Finish);

        match tokio::time::timeout(FINISH_TIMEOUT, task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(VoiceError::Transcription(format!(
                "connection task failed: {}",
                e
            ))),
            Err(_) => Err(VoiceError::Transcription(format!(
                "connection did not close within {} seconds",
                FINISH_TIMEOUT.as_secs()
            ))),
        }
    }
}

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn run_connection(
    socket: Socket,
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    events_tx: mpsc::Sender<TranscriptEvent>,
    keepalive: Option<Duration>,
) {
    let (mut sink, mut stream) = socket.split();
    let period = keepalive.unwrap_or(Duration::from_secs(3600));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut closing = false;

    loop {
        tokio::select! {
            Some(chunk) = audio_rx.recv(), if !closing => {
                if let Err(e) = sink.send(Message::Binary(chunk)).await {
                    let _ = events_tx.send(TranscriptEvent::Error(e.to_string())).await;
                    break;
                }
            }
            control = control_rx.recv() => match control {
                Some(Control::CloseStream) => {
                    closing = true;
                    if let Err(e) = sink.send(Message::Text(CLOSE_STREAM_FRAME.to_string())).await {
                        warn!("failed to send CloseStream: {}", e);
                    }
                }
                Some(Control::Finish) | None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            _ = ticker.tick(), if keepalive.is_some() && !closing => {
                if let Err(e) = sink.send(Message::Text(KEEPALIVE_FRAME.to_string())).await {
                    warn!("failed to send keepalive: {}", e);
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = parse_vendor_message(&text) {
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("transcription socket closed by vendor: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events_tx.send(TranscriptEvent::Error(e.to_string())).await;
                    break;
                }
                None => break,
            },
        }
    }

    debug!("transcription connection task exited");
}

#[derive(Debug, Deserialize)]
struct VendorMessage {
    #[serde(rename = "type")]
    kind: String,
    channel: Option<VendorChannel>,
    #[serde(default)]
    speech_final: bool,
    description: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VendorChannel {
    alternatives: Vec<VendorAlternative>,
}

#[derive(Debug, Deserialize)]
struct VendorAlternative {
    transcript: String,
}

/// Maps one vendor text frame to a transcript event.
///
/// `Results` frames become fragments keyed on `speech_final`; `Error` frames
/// become error events. Everything else is ignored.
pub fn parse_vendor_message(text: &str) -> Option<TranscriptEvent> {
    let message: VendorMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("unparseable transcription frame: {}", e);
            return None;
        }
    };

    match message.kind.as_str() {
        "Results" => {
            let transcript = message
                .channel?
                .alternatives
                .into_iter()
                .next()?
                .transcript;
            Some(TranscriptEvent::Fragment(TranscriptFragment::new(
                transcript,
                message.speech_final,
            )))
        }
        "Error" => Some(TranscriptEvent::Error(
            message
                .description
                .or(message.message)
                .unwrap_or_else(|| "unknown transcription error".to_string()),
        )),
        other => {
            debug!(kind = other, "ignoring transcription frame");
            None
        }
    }
}
