#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use imwire::network::{
    encode_frame, stream_halves, BasicPacketCodec, Connector, FrameSplitter, IncomingFrame,
    OutgoingPacket, PacketCodec, SessionKeys, TransportHalves,
};
use imwire::{setup_local_tracing, AppError, AppResult, ClientConfig};
use rstest::fixture;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::sync::{mpsc, Semaphore};

/// Small timeouts, no heartbeat unless a test turns it on.
#[fixture]
pub fn config() -> ClientConfig {
    // a previous test of this binary may have installed it already
    let _ = setup_local_tracing();
    let mut config = ClientConfig::default();
    config.network.connect_timeout_ms = 1_000;
    config.network.max_frame_size = 64 * 1024;
    config.heartbeat.period_ms = 0;
    config.request.default_timeout_ms = 1_000;
    config.request.default_retries = 0;
    config
}

/// Hands the server end of every in-memory connection to the test. Connecting can be held back
/// until the test releases a permit.
#[derive(Clone)]
pub struct DuplexConnector {
    servers: mpsc::UnboundedSender<DuplexStream>,
    connects: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
}

impl DuplexConnector {
    pub fn new() -> (DuplexConnector, mpsc::UnboundedReceiver<DuplexStream>) {
        let (servers, accepted) = mpsc::unbounded_channel();
        let connector = DuplexConnector {
            servers,
            connects: Arc::new(AtomicUsize::new(0)),
            gate: None,
        };
        (connector, accepted)
    }

    pub fn gated(gate: Arc<Semaphore>) -> (DuplexConnector, mpsc::UnboundedReceiver<DuplexStream>) {
        let (mut connector, accepted) = DuplexConnector::new();
        connector.gate = Some(gate);
        (connector, accepted)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self) -> AppResult<TransportHalves> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| AppError::Transport("gate closed".to_string()))?;
            permit.forget();
        }
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.servers
            .send(server)
            .map_err(|_| AppError::Transport("no test server listening".to_string()))?;
        Ok(stream_halves(client, 4 * 1024))
    }
}

/// The remote end of one connection, speaking the basic codec.
pub struct TestServer {
    halves: TransportHalves,
    splitter: FrameSplitter,
    codec: BasicPacketCodec,
}

impl TestServer {
    pub fn new<S>(stream: S) -> TestServer
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        TestServer {
            halves: stream_halves(stream, 4 * 1024),
            splitter: FrameSplitter::new(64 * 1024, 4 * 1024),
            codec: BasicPacketCodec,
        }
    }

    pub async fn accept(accepted: &mut mpsc::UnboundedReceiver<DuplexStream>) -> TestServer {
        TestServer::new(accepted.recv().await.expect("client never connected"))
    }

    /// Next frame from the client, `None` once it hung up.
    pub async fn next_frame(&mut self) -> Option<IncomingFrame> {
        loop {
            if let Some(body) = self.splitter.next_frame().expect("client sent a broken stream") {
                return Some(
                    self.codec
                        .decode(&SessionKeys::default(), body)
                        .expect("client sent an undecodable frame"),
                );
            }
            match self.halves.reader.read_chunk().await {
                Ok(Some(chunk)) => self.splitter.extend(&chunk),
                _ => return None,
            }
        }
    }

    pub async fn send(&mut self, command: &str, sequence: Option<u32>, payload: Bytes) {
        let mut packet = OutgoingPacket::new(command, payload);
        packet.sequence = sequence;
        let body = self
            .codec
            .encode(&SessionKeys::default(), &packet)
            .expect("encode");
        self.send_raw(encode_frame(&body).expect("frame")).await;
    }

    pub async fn send_raw(&mut self, bytes: Bytes) {
        self.halves.writer.write(bytes).await.expect("write to client");
    }

    /// Answers `frame` with the same command and sequence number.
    pub async fn reply(&mut self, frame: &IncomingFrame, payload: Bytes) {
        self.send(&frame.command, frame.sequence, payload).await;
    }

    pub async fn hang_up(mut self) {
        let _ = self.halves.writer.close().await;
    }
}

/// `OnlinePush.ReqPush` payload carrying one group mute notice.
pub fn mute_push(group_code: u32, operator: u32, target: u32, seconds: i32) -> Bytes {
    let mut notice = BytesMut::new();
    notice.put_u32(group_code);
    notice.put_u8(0x0c);
    notice.put_u8(0);
    notice.put_u32(operator);
    notice.put_u32(1_700_000_000);
    notice.put_u16(0);
    notice.put_u32(target);
    notice.put_i32(seconds);

    let mut payload = BytesMut::new();
    payload.put_u16(1);
    payload.put_u16(732);
    payload.put_u32(notice.len() as u32);
    payload.put_slice(&notice);
    payload.freeze()
}
