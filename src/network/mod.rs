//! Network Module Implementation
//!
//! The client side protocol engine: one logical connection, the requests sent over it and the
//! frames pushed back by the server.
//!
//! # Architecture
//!
//! The module is built on tokio's async I/O primitives and consists of:
//! - Transport halves and connectors for raw byte I/O
//! - Frame splitting and the packet codec for turning bytes into frames and back
//! - The connection state machine, one state object per lifecycle stage
//! - The request correlator matching replies to requests by sequence number
//! - `NetworkHandler`, the facade upper layers talk to
//!
//! # Frame journey
//!
//! transport bytes -> `FrameSplitter` -> `PacketCodec::decode` -> correlator (a reply somebody
//! waits for) or the notice pipeline (everything else). An undecodable frame is dropped, a
//! broken stream closes the connection.

pub use codec::{BasicPacketCodec, PacketCodec};
pub use connection::{
    stream_halves, Connector, StreamReader, StreamWriter, TcpConnector, TransportHalves,
    TransportReader, TransportWriter,
};
pub use correlator::RequestCorrelator;
pub use frame::{encode_frame, FrameSplitter, LENGTH_FIELD_SIZE};
pub use handler::{NetworkHandler, NetworkHandlerBuilder};
pub use key_exchange::{KeyExchange, PlainKeyExchange};
pub use observer::{LoggingStateObserver, StateObserver};
pub use packet::{IncomingFrame, OutgoingPacket, SessionKeys};
pub use state::{CloseReason, ConnectionStateSnapshot, StateKind};

mod codec;
mod connection;
mod correlator;
mod frame;
mod handler;
mod heartbeat;
mod key_exchange;
mod observer;
mod packet;
mod state;
