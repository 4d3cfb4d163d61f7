//! One live WebSocket session with the automation backend.
//!
//! [`SessionInitiator`] opens the connection and sends the single `start`
//! command; [`ChallengeRelay`] then owns the session (by `&mut`) and answers
//! code requests until it closes.

mod events;
mod relay;


pub use events::{CloseReason, SessionEvent, SessionReport};
pub use relay::{ChallengeRelay, RelayState};

use crate::config::Config;
use crate::credentials::CredentialSet;
use crate::error::{Error, Result};
use crate::protocol::{Command, Event};
use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Close code the backend uses when it cannot make sense of a frame.
pub const PROTOCOL_ERROR_CLOSE: u16 = 1002;

/// WebSocket stream produced by [`SessionInitiator`].
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Any duplex stream of WebSocket messages a session can run over.
pub trait FrameStream:
    Stream<Item = std::result::Result<Message, tungstenite::Error>>
    + Sink<Message, Error = tungstenite::Error>
    + Unpin
    + Send
{
}

impl<T> FrameStream for T where
    T: Stream<Item = std::result::Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin
        + Send
{
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
    Failed,
}

pub struct Session<S> {
    pub id: String,
    /// Cancelling this closes the session and aborts any pending code prompt.
    pub abort_token: CancellationToken,
    pub started_at: DateTime<Utc>,
    stream: S,
    state: SessionState,
    peer_close: Option<(u16, String)>,
}

impl<S: FrameStream> Session<S> {
    /// Run the opening handshake over an already connected stream: send the
    /// one `start` command and wait for it to be flushed.
    pub async fn establish(stream: S, params: &CredentialSet) -> Result<Self> {
        params.validate()?;

        let mut session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            abort_token: CancellationToken::new(),
            started_at: Utc::now(),
            stream,
            state: SessionState::Open,
            peer_close: None,
        };

        session.send(&Command::Start(params.clone())).await?;
        tracing::info!(session_id = %session.id, "Start command sent");
        Ok(session)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Write one command and flush it.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        if self.state != SessionState::Open {
            return Err(Error::Connection(tungstenite::Error::AlreadyClosed));
        }

        let text = command.encode()?;
        tracing::debug!(session_id = %self.id, kind = command.kind(), "Sending command");

        if let Err(e) = self.stream.send(Message::text(text)).await {
            self.state = SessionState::Failed;
            return Err(e.into());
        }
        Ok(())
    }

    /// Next event from the backend, or `None` once the connection has closed.
    ///
    /// Cancel-safe: the only await point is the underlying stream read.
    pub async fn next_event(&mut self) -> Result<Option<Event>> {
        if self.state != SessionState::Open {
            return Ok(None);
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!(session_id = %self.id, "Received frame: {}", text.as_str());
                    return Event::decode(text.as_str()).map(Some);
                }
                Some(Ok(Message::Close(frame))) => {
                    self.peer_close = frame.map(|f| (u16::from(f.code), f.reason.to_string()));
                    self.state = SessionState::Closed;
                    tracing::info!(session_id = %self.id, close = ?self.peer_close, "Backend closed the session");
                    return Ok(None);
                }
                // Binary, ping and pong frames carry nothing for us.
                Some(Ok(_)) => {}
                Some(Err(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                ))
                | None => {
                    self.state = SessionState::Closed;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.state = SessionState::Failed;
                    tracing::warn!(session_id = %self.id, "Connection dropped: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    /// Close from our side. Also flushes our reply to a close from the backend.
    pub async fn close(&mut self) {
        if self.state == SessionState::Failed {
            return;
        }
        let _ = self.stream.close().await;
        if self.state == SessionState::Open {
            tracing::debug!(session_id = %self.id, "Session closed by client");
        }
        self.state = SessionState::Closed;
    }

    /// Close code and reason the backend sent, if it sent a close frame.
    #[must_use]
    pub fn backend_close(&self) -> CloseReason {
        match &self.peer_close {
            Some((code, reason)) => CloseReason::Backend {
                code: Some(*code),
                reason: (!reason.is_empty()).then(|| reason.clone()),
            },
            None => CloseReason::Backend {
                code: None,
                reason: None,
            },
        }
    }
}

/// Opens sessions against the backend's WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct SessionInitiator {
    endpoint: Url,
    connect_timeout: Duration,
}

impl SessionInitiator {
    #[must_use]
    pub fn new(endpoint: Url, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.ws_endpoint()?, config.connect_timeout()))
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Connect and send the `start` command. One attempt, no retry.
    pub async fn start_session(&self, params: &CredentialSet) -> Result<Session<WsStream>> {
        params.validate()?;

        tracing::debug!(endpoint = %self.endpoint, "Opening session");
        let (stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.endpoint.as_str()))
                .await
                .map_err(|_| Error::ConnectTimeout(self.connect_timeout))??;

        Session::establish(stream, params).await
    }
}
