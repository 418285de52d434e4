use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use strum::Display;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::models::message::{ChannelMessage, HeartbeatReply};
use crate::models::telemetry::TelemetryDelta;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An in-flight handshake started by [`TelemetryChannel::start_connect`].
pub type ConnectAttempt = Pin<Box<dyn Future<Output = Result<Socket, ChannelError>> + Send>>;

/// Connection state of the telemetry channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
    Errored,
}

/// Whether the connection is still usable after a frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to open telemetry channel: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("Timed out opening telemetry channel")]
    ConnectTimeout,

    #[error("Telemetry channel transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("Failed to encode heartbeat reply: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One persistent streaming connection.
///
/// Frames are handed over one at a time in arrival order; nothing is buffered
/// or reordered here. The owner decides when to reconnect.
pub struct TelemetryChannel {
    url: String,
    socket: Option<Socket>,
    state: watch::Sender<ChannelState>,
}

impl TelemetryChannel {
    pub fn new(url: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ChannelState::Closed);
        Self {
            url: url.into(),
            socket: None,
            state,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Open the connection, replacing any previous one.
    pub async fn connect(&mut self) -> Result<(), ChannelError> {
        let attempt = self.start_connect();
        let result = attempt.await;
        self.finish_connect(result)
    }

    /// Begin a connection attempt that does not borrow the channel, so the
    /// owner can keep serving other work while the handshake runs. Hand the
    /// outcome to [`finish_connect`](Self::finish_connect).
    pub fn start_connect(&mut self) -> ConnectAttempt {
        self.socket = None;
        self.set_state(ChannelState::Connecting);

        let url = self.url.clone();
        Box::pin(async move {
            let handshake = tokio_tungstenite::connect_async(url.as_str());
            match tokio::time::timeout(CONNECT_TIMEOUT, handshake).await {
                Ok(Ok((socket, _response))) => Ok(socket),
                Ok(Err(e)) => Err(ChannelError::Connect(e)),
                Err(_) => Err(ChannelError::ConnectTimeout),
            }
        })
    }

    pub fn finish_connect(
        &mut self,
        result: Result<Socket, ChannelError>,
    ) -> Result<(), ChannelError> {
        match result {
            Ok(socket) => {
                self.socket = Some(socket);
                self.set_state(ChannelState::Open);
                Ok(())
            }
            Err(e) => {
                self.set_state(ChannelState::Errored);
                Err(e)
            }
        }
    }

    /// Wait for the next frame. Never resolves while the channel is not open.
    ///
    /// Cancel-safe, so it can sit in a `select!` next to other sources.
    pub async fn recv(&mut self) -> Option<Result<Message, tungstenite::Error>> {
        match self.socket.as_mut() {
            Some(socket) => socket.next().await,
            None => std::future::pending().await,
        }
    }

    /// Handle one frame from [`recv`](Self::recv).
    ///
    /// Heartbeat pings are answered on the spot; telemetry deltas are passed
    /// to `on_delta` synchronously. Undecodable frames are logged and skipped.
    pub async fn dispatch<F>(
        &mut self,
        frame: Option<Result<Message, tungstenite::Error>>,
        mut on_delta: F,
    ) -> Result<Dispatch, ChannelError>
    where
        F: FnMut(TelemetryDelta),
    {
        let message = match frame {
            None => {
                info!("Telemetry channel ended by peer");
                self.mark_closed(ChannelState::Closed);
                return Ok(Dispatch::Closed);
            }
            Some(Err(e)) => {
                self.mark_closed(ChannelState::Errored);
                return Err(ChannelError::Transport(e));
            }
            Some(Ok(message)) => message,
        };

        let text = match &message {
            Message::Text(text) => text.as_str(),
            Message::Binary(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!(len = bytes.len(), "Ignoring non-UTF-8 binary frame");
                    return Ok(Dispatch::Continue);
                }
            },
            Message::Close(frame) => {
                info!(reason = ?frame, "Telemetry channel closed by server");
                self.mark_closed(ChannelState::Closed);
                return Ok(Dispatch::Closed);
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                return Ok(Dispatch::Continue);
            }
        };

        match ChannelMessage::decode(text) {
            Ok(ChannelMessage::Heartbeat) => {
                self.send_pong().await?;
            }
            Ok(ChannelMessage::Delta(delta)) => on_delta(delta),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable telemetry frame");
            }
        }
        Ok(Dispatch::Continue)
    }

    /// Close the connection politely. Errors are irrelevant at this point.
    pub async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).await {
                debug!(error = %e, "Error while closing telemetry channel");
            }
        }
        self.set_state(ChannelState::Closed);
    }

    async fn send_pong(&mut self) -> Result<(), ChannelError> {
        let reply = serde_json::to_string(&HeartbeatReply::pong())?;
        let Some(socket) = self.socket.as_mut() else {
            return Ok(());
        };

        if let Err(e) = socket.send(Message::text(reply)).await {
            self.mark_closed(ChannelState::Errored);
            return Err(ChannelError::Transport(e));
        }
        debug!("Answered heartbeat");
        Ok(())
    }

    fn mark_closed(&mut self, state: ChannelState) {
        self.socket = None;
        self.set_state(state);
    }

    fn set_state(&self, state: ChannelState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, url = %self.url, "Telemetry channel state changed");
        }
    }
}
