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


use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use super::codec::{BasicPacketCodec, PacketCodec};
use super::connection::{Connector, TcpConnector, TransportHalves, TransportReader};
use super::correlator::RequestCorrelator;
use super::frame::FrameSplitter;
use super::heartbeat::run_heartbeat;
use super::key_exchange::{KeyExchange, PlainKeyExchange};
use super::observer::StateObserver;
use super::packet::{IncomingFrame, OutgoingPacket, SessionKeys};
use super::state::{
    release_writer, CloseReason, ConnectAttempt, ConnectionState, ConnectionStateSnapshot,
    SharedWriter, StateClosed, StateConnecting, StateEstablished, StateInitialized, StateKind,
};
use crate::notice::{
    default_notice_pipeline, NoticeEvent, NoticeInput, NoticePipeline, KEY_SELF_UIN,
    KEY_SOURCE_COMMAND,
};
use crate::pipeline::AttributeMap;
use crate::service::{ClientConfig, Shutdown, ShutdownNotifier};
use crate::{AppError, AppResult};

/// Entry point of the protocol engine: one logical connection, its requests and its pushes.
///
/// The handler is explicitly constructed and owned. Dropping it closes the connection with
/// `CloseReason::Dropped`; share it behind an `Arc` when several tasks need it.
pub struct NetworkHandler {
    inner: Arc<HandlerInner>,
}

pub struct NetworkHandlerBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    codec: Arc<dyn PacketCodec>,
    key_exchange: Arc<dyn KeyExchange>,
    observers: Vec<Arc<dyn StateObserver>>,
    pipeline: Option<Arc<NoticePipeline>>,
    attributes: AttributeMap,
}

impl NetworkHandlerBuilder {
    /// Defaults to a TCP transport to `config.network.server_addr`.
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn codec(mut self, codec: impl PacketCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn key_exchange(mut self, key_exchange: impl KeyExchange + 'static) -> Self {
        self.key_exchange = Arc::new(key_exchange);
        self
    }

    pub fn observer(mut self, observer: impl StateObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Defaults to `default_notice_pipeline` built from `config.pipeline`.
    pub fn pipeline(mut self, pipeline: Arc<NoticePipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn self_uin(mut self, uin: u64) -> Self {
        self.attributes = self.attributes.with(KEY_SELF_UIN, uin);
        self
    }

    pub fn build(self) -> AppResult<NetworkHandler> {
        self.config.validate()?;
        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(TcpConnector::new(
                self.config.network.server_addr.clone(),
                self.config.network.read_buffer_size,
            ))
        });
        let pipeline = self
            .pipeline
            .unwrap_or_else(|| Arc::new(default_notice_pipeline(self.config.pipeline.clone())));
        let (state_tx, _) = watch::channel(StateKind::Initialized);
        let (events, _) = broadcast::channel(self.config.network.event_channel_capacity);

        let inner = HandlerInner {
            config: self.config,
            connector,
            codec: self.codec,
            key_exchange: self.key_exchange,
            pipeline,
            attributes: self.attributes,
            state: RwLock::new(Arc::new(ConnectionState::Initialized(StateInitialized))),
            correlator: RequestCorrelator::new(),
            observers: self.observers,
            state_tx,
            events,
        };
        Ok(NetworkHandler {
            inner: Arc::new(inner),
        })
    }
}

impl NetworkHandler {
    pub fn builder(config: ClientConfig) -> NetworkHandlerBuilder {
        NetworkHandlerBuilder {
            config,
            connector: None,
            codec: Arc::new(BasicPacketCodec),
            key_exchange: Arc::new(PlainKeyExchange),
            observers: Vec::new(),
            pipeline: None,
            attributes: AttributeMap::new(),
        }
    }

    /// Connects if needed and waits until the connection is established.
    pub async fn connect(&self) -> AppResult<()> {
        self.resume_connection().await
    }

    /// Starts connecting from `Initialized`, joins the attempt already running while
    /// `Connecting`, returns at once when `Established` and fails once `Closed`.
    pub async fn resume_connection(&self) -> AppResult<()> {
        let state = self.inner.current();
        state.behavior().resume_connection(&self.inner).await
    }

    /// Fire and forget. Fails with `NotConnected` unless established, nothing is queued.
    pub async fn send(&self, packet: OutgoingPacket) -> AppResult<()> {
        self.inner.send(packet).await
    }

    /// Sends `packet` and waits for the reply carrying its sequence number, resending the same
    /// bytes up to `retries` times when `timeout` elapses.
    pub async fn send_and_expect(
        &self,
        packet: OutgoingPacket,
        timeout: Duration,
        retries: u32,
    ) -> AppResult<IncomingFrame> {
        self.inner.send_and_expect(packet, timeout, retries).await
    }

    /// `send_and_expect` with the configured default timeout and retries.
    pub async fn request(&self, packet: OutgoingPacket) -> AppResult<IncomingFrame> {
        let request = &self.inner.config.request;
        self.inner
            .send_and_expect(packet, request.default_timeout(), request.default_retries)
            .await
    }

    /// Moves to `Closed` from any state. Returns false when already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.inner.close(reason)
    }

    pub fn state(&self) -> ConnectionStateSnapshot {
        self.inner.current().snapshot()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<StateKind> {
        self.inner.state_tx.subscribe()
    }

    /// Events decoded from pushes. Slow subscribers lag and lose the oldest events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<NoticeEvent> {
        self.inner.events.subscribe()
    }

    /// The notice pipeline, processors may be registered at any time.
    pub fn pipeline(&self) -> &Arc<NoticePipeline> {
        &self.inner.pipeline
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl Drop for NetworkHandler {
    fn drop(&mut self) {
        self.inner.close(CloseReason::Dropped);
    }
}

pub(crate) struct HandlerInner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn PacketCodec>,
    key_exchange: Arc<dyn KeyExchange>,
    pipeline: Arc<NoticePipeline>,
    attributes: AttributeMap,
    state: RwLock<Arc<ConnectionState>>,
    correlator: RequestCorrelator,
    observers: Vec<Arc<dyn StateObserver>>,
    state_tx: watch::Sender<StateKind>,
    events: broadcast::Sender<NoticeEvent>,
}

impl HandlerInner {
    fn current(&self) -> Arc<ConnectionState> {
        self.state.read().clone()
    }

    fn close_reason(&self) -> Option<CloseReason> {
        match &**self.state.read() {
            ConnectionState::Closed(closed) => Some(closed.reason.clone()),
            _ => None,
        }
    }

    async fn send(&self, packet: OutgoingPacket) -> AppResult<()> {
        let state = self.current();
        let frame = state.behavior().encode_packet(self.codec.as_ref(), &packet)?;
        trace!(command = %packet.command, sequence = ?packet.sequence, "send");
        self.send_frame(&state, frame).await
    }

    pub(crate) async fn send_and_expect(
        &self,
        packet: OutgoingPacket,
        timeout: Duration,
        retries: u32,
    ) -> AppResult<IncomingFrame> {
        let state = self.current();
        let state: &ConnectionState = &state;
        let codec: &dyn PacketCodec = self.codec.as_ref();
        let command = packet.command.clone();
        self.correlator
            .send_and_expect(
                &command,
                timeout,
                retries,
                move |sequence| state.behavior().encode_packet(codec, &packet.with_sequence(sequence)),
                move |frame| self.send_frame(state, frame),
            )
            .await
    }

    /// A failing transport takes the whole connection down.
    async fn send_frame(&self, state: &ConnectionState, frame: Bytes) -> AppResult<()> {
        match state.behavior().send_packet_impl(frame).await {
            Err(error @ (AppError::Transport(_) | AppError::IoError(_))) => {
                let reason = CloseReason::Transport(error.to_string());
                warn!(%reason, "send failed");
                self.close(reason.clone());
                Err(AppError::Closed(self.close_reason().unwrap_or(reason)))
            }
            result => result,
        }
    }

    /// `Initialized` -> `Connecting`. Returns the attempt to await, `None` when already
    /// established.
    pub(crate) fn start_connecting(self: &Arc<Self>) -> AppResult<Option<ConnectAttempt>> {
        let attempt = {
            let mut state = self.state.write();
            match &**state {
                ConnectionState::Initialized(_) => {}
                ConnectionState::Connecting(connecting) => {
                    return Ok(Some(connecting.attempt.clone()))
                }
                ConnectionState::Established(_) => return Ok(None),
                ConnectionState::Closed(closed) => {
                    return Err(AppError::Closed(closed.reason.clone()))
                }
            }

            let cancel = ShutdownNotifier::new();
            let task = tokio::spawn(Arc::clone(self).establish(cancel.subscribe()));
            let attempt: ConnectAttempt = async move {
                match task.await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(CloseReason::Transport(format!("connect task failed: {}", e))),
                }
            }
            .boxed()
            .shared();
            *state = Arc::new(ConnectionState::Connecting(StateConnecting {
                attempt: attempt.clone(),
                cancel,
            }));
            attempt
        };
        info!(addr = %self.config.network.server_addr, "connecting");
        self.state_changed(StateKind::Initialized, snapshot_of(StateKind::Connecting));
        Ok(Some(attempt))
    }

    async fn establish(self: Arc<Self>, mut cancel: Shutdown) -> Result<(), CloseReason> {
        let connect_timeout = self.config.network.connect_timeout();
        let outcome = tokio::select! {
            outcome = tokio::time::timeout(connect_timeout, self.open_session()) => match outcome {
                Ok(outcome) => outcome,
                Err(_) => Err(CloseReason::Transport(format!(
                    "connect timed out after {:?}",
                    connect_timeout
                ))),
            },
            _ = cancel.recv() => {
                return Err(self
                    .close_reason()
                    .unwrap_or_else(|| CloseReason::Explicit("connect attempt cancelled".to_string())));
            }
        };

        match outcome {
            Ok((halves, session)) => self.enter_established(halves, session),
            Err(reason) => {
                warn!(%reason, "connect attempt failed");
                self.close(reason.clone());
                Err(self.close_reason().unwrap_or(reason))
            }
        }
    }

    async fn open_session(&self) -> Result<(TransportHalves, SessionKeys), CloseReason> {
        let mut halves = self
            .connector
            .connect()
            .await
            .map_err(|e| CloseReason::Transport(e.to_string()))?;
        let session = self
            .key_exchange
            .exchange(halves.reader.as_mut(), halves.writer.as_mut())
            .await
            .map_err(|e| CloseReason::Handshake(e.to_string()))?;
        Ok((halves, session))
    }

    /// `Connecting` -> `Established`, then starts the connection's tasks.
    fn enter_established(
        self: &Arc<Self>,
        halves: TransportHalves,
        session: SessionKeys,
    ) -> Result<(), CloseReason> {
        let TransportHalves { reader, writer } = halves;
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));
        let session = Arc::new(session);

        // listeners first, a close racing this transition must still reach them
        let tasks = ShutdownNotifier::new();
        let reader_shutdown = tasks.subscribe();
        let dispatch_shutdown = tasks.subscribe();
        let heartbeat_shutdown = tasks.subscribe();
        let established = StateEstablished::new(writer.clone(), session.clone(), tasks);

        {
            let mut state = self.state.write();
            if state.kind() != StateKind::Connecting {
                drop(state);
                release_writer(writer);
                return Err(self
                    .close_reason()
                    .unwrap_or_else(|| CloseReason::Explicit("connect attempt superseded".to_string())));
            }
            *state = Arc::new(ConnectionState::Established(established));
        }
        info!(addr = %self.config.network.server_addr, "connection established");
        self.state_changed(StateKind::Connecting, snapshot_of(StateKind::Established));

        let (frames_tx, frames_rx) = mpsc::channel(self.config.network.dispatch_queue_capacity);
        tokio::spawn(Arc::clone(self).read_loop(reader, session, frames_tx, reader_shutdown));
        tokio::spawn(Arc::clone(self).dispatch_loop(frames_rx, dispatch_shutdown));
        match self.config.heartbeat.period() {
            Some(period) => {
                tokio::spawn(run_heartbeat(
                    Arc::clone(self),
                    self.config.heartbeat.clone(),
                    period,
                    heartbeat_shutdown,
                ));
            }
            None => debug!("heartbeat disabled"),
        }
        Ok(())
    }

    /// The only way into `Closed`. Releases what the old state owned, fails every pending
    /// request and notifies observers. Returns false when already closed.
    pub(crate) fn close(&self, reason: CloseReason) -> bool {
        let previous = {
            let mut state = self.state.write();
            if state.kind() == StateKind::Closed {
                return false;
            }
            std::mem::replace(
                &mut *state,
                Arc::new(ConnectionState::Closed(StateClosed {
                    reason: reason.clone(),
                })),
            )
        };
        info!(from = %previous.kind(), %reason, "network handler closed");
        previous.behavior().on_close(&reason);
        self.correlator.fail_all(&reason);
        self.state_changed(
            previous.kind(),
            ConnectionStateSnapshot {
                kind: StateKind::Closed,
                close_reason: Some(reason),
            },
        );
        true
    }

    fn is_closed(&self) -> bool {
        self.state.read().kind() == StateKind::Closed
    }

    fn state_changed(&self, from: StateKind, to: ConnectionStateSnapshot) {
        self.state_tx.send_replace(to.kind);
        for observer in &self.observers {
            observer.state_changed(from, &to);
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        mut reader: Box<dyn TransportReader>,
        session: Arc<SessionKeys>,
        frames: mpsc::Sender<IncomingFrame>,
        mut shutdown: Shutdown,
    ) {
        let mut splitter = FrameSplitter::new(
            self.config.network.max_frame_size,
            self.config.network.read_buffer_size,
        );
        let reason = loop {
            let chunk = tokio::select! {
                biased;
                _ = shutdown.recv() => return,
                chunk = reader.read_chunk() => chunk,
            };
            match chunk {
                Ok(Some(chunk)) => splitter.extend(&chunk),
                Ok(None) if splitter.buffered() == 0 => break CloseReason::RemoteClosed,
                Ok(None) => {
                    break CloseReason::Transport(format!(
                        "connection closed by remote with {} bytes of an unfinished frame",
                        splitter.buffered()
                    ))
                }
                Err(e) => break CloseReason::Transport(e.to_string()),
            }
            if let Err(reason) = self.drain_frames(&mut splitter, &session, &frames).await {
                break reason;
            }
        };
        self.close(reason);
    }

    /// Routes every complete frame: replies to the correlator, everything else to the
    /// dispatcher, undecodable frames nowhere.
    async fn drain_frames(
        &self,
        splitter: &mut FrameSplitter,
        session: &SessionKeys,
        frames: &mpsc::Sender<IncomingFrame>,
    ) -> Result<(), CloseReason> {
        loop {
            let body = match splitter.next_frame() {
                Ok(Some(body)) => body,
                Ok(None) => return Ok(()),
                Err(e) => return Err(CloseReason::Transport(e.to_string())),
            };
            let frame = match self.codec.decode(session, body) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("dropping undecodable frame: {}", e);
                    continue;
                }
            };
            trace!(command = %frame.command, sequence = ?frame.sequence, "frame received");
            if let Some(frame) = self.correlator.complete(frame) {
                if frames.send(frame).await.is_err() {
                    // dispatcher already stopped, the connection is going down
                    return Ok(());
                }
            }
        }
    }

    async fn dispatch_loop(
        self: Arc<Self>,
        mut frames: mpsc::Receiver<IncomingFrame>,
        mut shutdown: Shutdown,
    ) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.recv() => return,
                frame = frames.recv() => match frame {
                    Some(frame) => frame,
                    None => return,
                },
            };
            // 关闭后队列里剩下的帧直接丢弃，只有已经在跑的处理器可以跑完
            if self.is_closed() {
                trace!(command = %frame.command, "dropping queued frame after close");
                return;
            }
            self.dispatch(frame).await;
        }
    }

    async fn dispatch(&self, frame: IncomingFrame) {
        let command = frame.command.clone();
        let attributes = self
            .attributes
            .clone()
            .with(KEY_SOURCE_COMMAND, command.clone());
        match self
            .pipeline
            .process(NoticeInput::Frame(frame), attributes)
            .await
        {
            Ok(result) => {
                if !result.is_consumed {
                    debug!(%command, "unrecognized frame");
                }
                for event in result.collected {
                    trace!(?event, "notice event");
                    // no subscriber is fine
                    let _ = self.events.send(event);
                }
            }
            Err(e) => error!(%command, "notice pipeline failed: {}", e),
        }
    }
}

fn snapshot_of(kind: StateKind) -> ConnectionStateSnapshot {
    ConnectionStateSnapshot {
        kind,
        close_reason: None,
    }
}
