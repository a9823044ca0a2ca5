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
use bytes::Buf;
use tracing::debug;

use super::{
    ensure_remaining, NoticeEvent, NoticeInput, PushMessage, COMMAND_ONLINE_PUSH,
    MSG_TYPE_GROUP_NOTIFY, MSG_TYPE_SYS_NOTIFY,
};
use crate::pipeline::{AttributeMap, ProcessingContext, Processor};
use crate::AppResult;

type Context<'p> = ProcessingContext<'p, NoticeInput, NoticeEvent>;

/// Splits an `OnlinePush.ReqPush` frame into its push messages.
pub struct OnlinePushDecoder;

#[async_trait]
impl Processor<NoticeInput, NoticeEvent> for OnlinePushDecoder {
    fn name(&self) -> &str {
        "online_push"
    }

    async fn process(&self, context: &mut Context<'_>, data: &NoticeInput) -> AppResult<()> {
        let NoticeInput::Frame(frame) = data else {
            return Ok(());
        };
        if frame.command != COMMAND_ONLINE_PUSH {
            return Ok(());
        }
        context.mark_consumed(self.name());

        let mut payload = frame.payload.clone();
        ensure_remaining(&payload, 2, "push message count")?;
        let count = payload.get_u16();
        for index in 0..count {
            ensure_remaining(&payload, 6, "push message header")?;
            let msg_type = payload.get_u16();
            let body_len = payload.get_u32() as usize;
            ensure_remaining(&payload, body_len, "push message body")?;
            let body = payload.split_to(body_len);

            let nested = context
                .process_also(
                    NoticeInput::OnlinePush(PushMessage { msg_type, body }),
                    AttributeMap::new(),
                )
                .await?;
            if !nested.is_consumed {
                debug!(msg_type, index, "unknown push message type");
            }
        }
        Ok(())
    }
}

/// Group notices, push message type 732.
pub struct GroupNotifyDecoder;

#[async_trait]
impl Processor<NoticeInput, NoticeEvent> for GroupNotifyDecoder {
    fn name(&self) -> &str {
        "group_notify"
    }

    async fn process(&self, context: &mut Context<'_>, data: &NoticeInput) -> AppResult<()> {
        let NoticeInput::OnlinePush(message) = data else {
            return Ok(());
        };
        if message.msg_type != MSG_TYPE_GROUP_NOTIFY {
            return Ok(());
        }
        context.mark_consumed(self.name());

        let mut body = message.body.clone();
        ensure_remaining(&body, 6, "group notice header")?;
        let group_code = body.get_u32() as u64;
        let kind = body.get_u8();
        body.advance(1);

        let nested = context
            .process_also(
                NoticeInput::GroupNotify {
                    group_code,
                    kind,
                    body,
                },
                AttributeMap::new(),
            )
            .await?;
        if !nested.is_consumed {
            debug!(group_code, "unknown group 732 type 0x{:02x}", kind);
        }
        Ok(())
    }
}

/// System notices, push message type 528.
pub struct SysNotifyDecoder;

#[async_trait]
impl Processor<NoticeInput, NoticeEvent> for SysNotifyDecoder {
    fn name(&self) -> &str {
        "sys_notify"
    }

    async fn process(&self, context: &mut Context<'_>, data: &NoticeInput) -> AppResult<()> {
        let NoticeInput::OnlinePush(message) = data else {
            return Ok(());
        };
        if message.msg_type != MSG_TYPE_SYS_NOTIFY {
            return Ok(());
        }
        context.mark_consumed(self.name());

        let mut body = message.body.clone();
        ensure_remaining(&body, 4, "system notice header")?;
        let sub_type = body.get_u32();

        let nested = context
            .process_also(NoticeInput::SysNotify { sub_type, body }, AttributeMap::new())
            .await?;
        if !nested.is_consumed {
            debug!("unknown 528 type 0x{:x}", sub_type);
        }
        Ok(())
    }
}
