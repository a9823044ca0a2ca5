// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::codec::PacketCodec;
use super::connection::TransportWriter;
use super::frame::encode_frame;
use super::handler::HandlerInner;
use super::packet::{OutgoingPacket, SessionKeys};
use crate::service::ShutdownNotifier;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Initialized,
    Connecting,
    Established,
    Closed,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateKind::Initialized => "initialized",
            StateKind::Connecting => "connecting",
            StateKind::Established => "established",
            StateKind::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a handler reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// closed by the local side without an error
    Graceful,
    /// the peer hung up
    RemoteClosed,
    Explicit(String),
    Transport(String),
    Handshake(String),
    HeartbeatFailed(String),
    /// the handler was dropped without being closed
    Dropped,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Graceful => f.write_str("closed gracefully"),
            CloseReason::RemoteClosed => f.write_str("closed by remote"),
            CloseReason::Explicit(cause) => write!(f, "closed explicitly: {}", cause),
            CloseReason::Transport(cause) => write!(f, "transport error: {}", cause),
            CloseReason::Handshake(cause) => write!(f, "key exchange failed: {}", cause),
            CloseReason::HeartbeatFailed(cause) => write!(f, "heartbeat failed: {}", cause),
            CloseReason::Dropped => f.write_str("handler dropped"),
        }
    }
}

/// Read-only view of the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStateSnapshot {
    pub kind: StateKind,
    pub close_reason: Option<CloseReason>,
}

/// The single connection attempt every `resume_connection` caller awaits while connecting.
pub(crate) type ConnectAttempt = Shared<BoxFuture<'static, Result<(), CloseReason>>>;

pub(crate) enum ConnectionState {
    Initialized(StateInitialized),
    Connecting(StateConnecting),
    Established(StateEstablished),
    Closed(StateClosed),
}

impl ConnectionState {
    pub(crate) fn behavior(&self) -> &dyn StateBehavior {
        match self {
            ConnectionState::Initialized(state) => state,
            ConnectionState::Connecting(state) => state,
            ConnectionState::Established(state) => state,
            ConnectionState::Closed(state) => state,
        }
    }

    pub(crate) fn kind(&self) -> StateKind {
        self.behavior().kind()
    }

    pub(crate) fn snapshot(&self) -> ConnectionStateSnapshot {
        ConnectionStateSnapshot {
            kind: self.kind(),
            close_reason: match self {
                ConnectionState::Closed(state) => Some(state.reason.clone()),
                _ => None,
            },
        }
    }
}

/// What a state does with the operations the handler routes through it.
///
/// The defaults refuse packet I/O; only `StateEstablished` carries a transport.
#[async_trait]
pub(crate) trait StateBehavior: Send + Sync {
    fn kind(&self) -> StateKind;

    /// The error packet I/O gets in this state.
    fn unavailable(&self) -> AppError {
        AppError::NotConnected(self.kind())
    }

    fn encode_packet(&self, _codec: &dyn PacketCodec, _packet: &OutgoingPacket) -> AppResult<Bytes> {
        Err(self.unavailable())
    }

    async fn send_packet_impl(&self, _frame: Bytes) -> AppResult<()> {
        Err(self.unavailable())
    }

    async fn resume_connection(&self, handler: &Arc<HandlerInner>) -> AppResult<()>;

    /// Releases whatever the state owns once it was replaced by `Closed`.
    fn on_close(&self, _reason: &CloseReason) {}
}

pub(crate) struct StateInitialized;

#[async_trait]
impl StateBehavior for StateInitialized {
    fn kind(&self) -> StateKind {
        StateKind::Initialized
    }

    async fn resume_connection(&self, handler: &Arc<HandlerInner>) -> AppResult<()> {
        // another caller may have moved on between our read of the state and this call
        match handler.start_connecting()? {
            Some(attempt) => attempt.await.map_err(AppError::Closed),
            None => Ok(()),
        }
    }
}

pub(crate) struct StateConnecting {
    pub(crate) attempt: ConnectAttempt,
    /// Tells the attempt to give up.
    pub(crate) cancel: ShutdownNotifier,
}

#[async_trait]
impl StateBehavior for StateConnecting {
    fn kind(&self) -> StateKind {
        StateKind::Connecting
    }

    async fn resume_connection(&self, _handler: &Arc<HandlerInner>) -> AppResult<()> {
        self.attempt.clone().await.map_err(AppError::Closed)
    }

    fn on_close(&self, reason: &CloseReason) {
        debug!(%reason, "cancelling connect attempt");
        self.cancel.notify();
    }
}

pub(crate) type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn TransportWriter>>>;

pub(crate) struct StateEstablished {
    writer: SharedWriter,
    session: Arc<SessionKeys>,
    /// Stops the reader, dispatcher and heartbeat tasks of this connection.
    tasks: ShutdownNotifier,
    released: Mutex<Option<CloseReason>>,
}

impl StateEstablished {
    pub(crate) fn new(
        writer: SharedWriter,
        session: Arc<SessionKeys>,
        tasks: ShutdownNotifier,
    ) -> StateEstablished {
        StateEstablished {
            writer,
            session,
            tasks,
            released: Mutex::new(None),
        }
    }
}

#[async_trait]
impl StateBehavior for StateEstablished {
    fn kind(&self) -> StateKind {
        StateKind::Established
    }

    fn encode_packet(&self, codec: &dyn PacketCodec, packet: &OutgoingPacket) -> AppResult<Bytes> {
        let body = codec.encode(&self.session, packet)?;
        encode_frame(&body)
    }

    async fn send_packet_impl(&self, frame: Bytes) -> AppResult<()> {
        let mut writer = self.writer.lock().await;
        // a sender holding this state may get here after the handler closed
        let released = self.released.lock().clone();
        if let Some(reason) = released {
            return Err(AppError::Closed(reason));
        }
        writer.write(frame).await
    }

    async fn resume_connection(&self, _handler: &Arc<HandlerInner>) -> AppResult<()> {
        Ok(())
    }

    fn on_close(&self, reason: &CloseReason) {
        *self.released.lock() = Some(reason.clone());
        self.tasks.notify();
        release_writer(self.writer.clone());
    }
}

/// Closes the writer in the background; without a runtime the writer is just dropped.
pub(crate) fn release_writer(writer: SharedWriter) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                if let Err(e) = writer.lock().await.close().await {
                    debug!("closing transport writer: {}", e);
                }
            });
        }
        Err(_) => warn!("no runtime to close the transport writer on, dropping it"),
    }
}

pub(crate) struct StateClosed {
    pub(crate) reason: CloseReason,
}

#[async_trait]
impl StateBehavior for StateClosed {
    fn kind(&self) -> StateKind {
        StateKind::Closed
    }

    fn unavailable(&self) -> AppError {
        AppError::Closed(self.reason.clone())
    }

    async fn resume_connection(&self, _handler: &Arc<HandlerInner>) -> AppResult<()> {
        Err(self.unavailable())
    }
}
