//! Notice decoding
//!
//! Server pushes arrive as `OnlinePush.ReqPush` frames wrapping a list of typed messages, some of
//! which wrap group (732) or system (528) notices in turn. Every layer has its own processor that
//! decodes just that layer and hands the inner value back to the pipeline with `process_also`.
//!
//! Inner bodies are big-endian:
//!
//! ```text
//! ReqPush payload : count: u16, then per message  msg_type: u16 | body_len: u32 | body
//! 732 body        : group_code: u32 | kind: u8 | reserved: u8 | notice body
//! 528 body        : sub_type: u32 | notice body
//! ```

use std::sync::Arc;

use bytes::{Buf, Bytes};

use crate::network::IncomingFrame;
use crate::pipeline::{PipelineConfig, ProcessorPipeline, TypeKey};
use crate::{AppError, AppResult};

pub use friend::{FriendNoticeProcessor, IgnoredSysNotifyProcessor};
pub use group::{GroupAnonymousChatProcessor, GroupMuteProcessor};
pub use online_push::{GroupNotifyDecoder, OnlinePushDecoder, SysNotifyDecoder};

mod friend;
mod group;
mod online_push;

pub const COMMAND_ONLINE_PUSH: &str = "OnlinePush.ReqPush";
pub const MSG_TYPE_GROUP_NOTIFY: u16 = 732;
pub const MSG_TYPE_SYS_NOTIFY: u16 = 528;

/// Account the client is logged in as, notices caused by it are usually not reported back.
pub const KEY_SELF_UIN: TypeKey<u64> = TypeKey::new("self_uin");
/// Command of the frame a notice was decoded from.
pub const KEY_SOURCE_COMMAND: TypeKey<String> = TypeKey::new("source_command");

pub type NoticePipeline = ProcessorPipeline<NoticeInput, NoticeEvent>;

#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub msg_type: u16,
    pub body: Bytes,
}

/// Everything the notice pipeline is fed with: raw frames and the layers decoded from them.
#[derive(Debug, Clone, PartialEq)]
pub enum NoticeInput {
    Frame(IncomingFrame),
    OnlinePush(PushMessage),
    GroupNotify {
        group_code: u64,
        kind: u8,
        body: Bytes,
    },
    SysNotify {
        sub_type: u32,
        body: Bytes,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeEvent {
    MemberMuted {
        group_code: u64,
        operator: u64,
        target: u64,
        duration_seconds: u32,
    },
    MemberUnmuted {
        group_code: u64,
        operator: u64,
        target: u64,
    },
    GroupMuteAll {
        group_code: u64,
        operator: u64,
        enabled: bool,
    },
    AnonymousChatChanged {
        group_code: u64,
        operator: u64,
        enabled: bool,
    },
    FriendAdded {
        uin: u64,
        nick: String,
    },
    FriendRecall {
        operator: u64,
        message_id: u32,
        time: u32,
    },
}

/// Every notice processor, in the order the client runs them.
pub fn default_notice_pipeline(config: PipelineConfig) -> NoticePipeline {
    let pipeline = NoticePipeline::new("notice", config);
    pipeline.register(Arc::new(OnlinePushDecoder));
    pipeline.register(Arc::new(GroupNotifyDecoder));
    pipeline.register(Arc::new(SysNotifyDecoder));
    pipeline.register(Arc::new(GroupMuteProcessor));
    pipeline.register(Arc::new(GroupAnonymousChatProcessor));
    pipeline.register(Arc::new(FriendNoticeProcessor));
    pipeline.register(Arc::new(IgnoredSysNotifyProcessor));
    pipeline
}

pub(crate) fn ensure_remaining(body: &Bytes, needed: usize, what: &str) -> AppResult<()> {
    if body.remaining() < needed {
        return Err(AppError::MalformedFrame(format!(
            "{} needs {} bytes, {} left",
            what,
            needed,
            body.remaining()
        )));
    }
    Ok(())
}
