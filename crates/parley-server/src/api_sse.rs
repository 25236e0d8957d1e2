//! SSE transcript stream handler.

use crate::api::ApiError;
use crate::session::{ClientTransport, SessionStream, TransportClosed};
use crate::AppState;
use async_trait::async_trait;
use axum::{
    extract::{Extension, Query},
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
};
use futures_util::Stream;
use parley_types::{OutboundMessage, SessionIdentity};
use serde::Deserialize;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

/// Events buffered between a session and the HTTP response body.
const SSE_BUFFER: usize = 32;

/// Query parameters for `GET /stream`.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

impl StreamParams {
    fn identity(self) -> Result<SessionIdentity, ApiError> {
        let session_id = required(self.session_id, "session_id")?;
        let user_id = required(self.user_id, "user_id")?;
        Ok(SessionIdentity::new(session_id, user_id))
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::BadRequest(format!("{} is required", name))),
    }
}

/// Builds the SSE event for one outbound message.
pub fn sse_event(message: &OutboundMessage) -> Event {
    Event::default()
        .event(message.role().as_str())
        .data(message.data_json().to_string())
}

/// Delivers session messages into an SSE response body.
///
/// The client is considered gone once axum drops the response stream.
pub struct SseTransport {
    tx: mpsc::Sender<Result<Event, Infallible>>,
}

impl SseTransport {
    pub fn new(tx: mpsc::Sender<Result<Event, Infallible>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ClientTransport for SseTransport {
    async fn emit(&mut self, message: &OutboundMessage) -> Result<(), TransportClosed> {
        self.tx
            .send(Ok(sse_event(message)))
            .await
            .map_err(|_| TransportClosed)
    }

    fn is_disconnected(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handler for `GET /stream?session_id=..&user_id=..`.
///
/// Starts a session for the caller and streams its messages as `user`,
/// `agent` and `error` events until either side closes.
pub async fn get_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let identity = params.identity()?;
    let connection_id = uuid::Uuid::new_v4();

    let (tx, rx) = mpsc::channel(SSE_BUFFER);
    let session = SessionStream::new(
        identity.clone(),
        state.collaborators.clone(),
        state.settings.clone(),
    )
    .with_shutdown(state.shutdown.clone());

    let span = tracing::info_span!(
        "session",
        session_id = %identity.session_id,
        user_id = %identity.user_id,
        %connection_id,
    );
    tokio::spawn(session.run(SseTransport::new(tx)).instrument(span));

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}
