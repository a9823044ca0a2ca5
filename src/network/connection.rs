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


use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::debug;

use crate::AppResult;

/// Inbound half of a byte-oriented duplex connection.
#[async_trait]
pub trait TransportReader: Send {
    /// Next chunk as delivered by the peer, `None` once the peer closed its side.
    async fn read_chunk(&mut self) -> AppResult<Option<Bytes>>;
}

/// Outbound half of a byte-oriented duplex connection.
#[async_trait]
pub trait TransportWriter: Send {
    /// Writes and flushes the whole buffer.
    async fn write(&mut self, bytes: Bytes) -> AppResult<()>;

    async fn close(&mut self) -> AppResult<()>;
}

pub struct TransportHalves {
    pub reader: Box<dyn TransportReader>,
    pub writer: Box<dyn TransportWriter>,
}

/// Opens a fresh transport for every connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> AppResult<TransportHalves>;
}

/// Reads any tokio byte stream in chunks of at most `read_buffer_size`.
#[derive(Debug)]
pub struct StreamReader<R> {
    inner: R,
    buffer: BytesMut,
    read_buffer_size: usize,
}

impl<R> StreamReader<R> {
    pub fn new(inner: R, read_buffer_size: usize) -> StreamReader<R> {
        StreamReader {
            inner,
            buffer: BytesMut::with_capacity(read_buffer_size),
            read_buffer_size,
        }
    }
}

#[async_trait]
impl<R> TransportReader for StreamReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_chunk(&mut self) -> AppResult<Option<Bytes>> {
        self.buffer.reserve(self.read_buffer_size);
        if 0 == self.inner.read_buf(&mut self.buffer).await? {
            return Ok(None);
        }
        Ok(Some(self.buffer.split().freeze()))
    }
}

/// Writes to any tokio byte stream through a `BufWriter`, flushing after every packet.
#[derive(Debug)]
pub struct StreamWriter<W: AsyncWrite> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite> StreamWriter<W> {
    pub fn new(inner: W) -> StreamWriter<W> {
        StreamWriter {
            inner: BufWriter::new(inner),
        }
    }
}

#[async_trait]
impl<W> TransportWriter for StreamWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, bytes: Bytes) -> AppResult<()> {
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Splits any duplex stream into transport halves.
pub fn stream_halves<S>(stream: S, read_buffer_size: usize) -> TransportHalves
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    TransportHalves {
        reader: Box::new(StreamReader::new(reader, read_buffer_size)),
        writer: Box::new(StreamWriter::new(writer)),
    }
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    read_buffer_size: usize,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>, read_buffer_size: usize) -> TcpConnector {
        TcpConnector {
            addr: addr.into(),
            read_buffer_size,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> AppResult<TransportHalves> {
        let socket = TcpStream::connect(&self.addr).await?;
        socket.set_nodelay(true)?;
        debug!(addr = %self.addr, local = ?socket.local_addr().ok(), "tcp connected");
        let (reader, writer) = socket.into_split();
        Ok(TransportHalves {
            reader: Box::new(StreamReader::new(reader, self.read_buffer_size)),
            writer: Box::new(StreamWriter::new(writer)),
        })
    }
}
