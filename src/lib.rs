pub mod network;
pub mod notice;
pub mod pipeline;
pub mod service;

pub use network::{
    CloseReason, ConnectionStateSnapshot, IncomingFrame, NetworkHandler, OutgoingPacket,
    StateKind,
};
pub use notice::{default_notice_pipeline, NoticeEvent, NoticeInput};
pub use pipeline::{AttributeMap, ProcessorPipeline};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, ClientConfig, Shutdown,
};
