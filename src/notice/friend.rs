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
use tracing::trace;

use super::{ensure_remaining, NoticeEvent, NoticeInput, KEY_SELF_UIN};
use crate::pipeline::{ProcessingContext, Processor};
use crate::{AppError, AppResult};

const SUB_TYPE_FRIEND_RECALL: u32 = 0x8a;
const SUB_TYPE_FRIEND_ADDED: u32 = 0xb3;

/// Friend notices carried by 528.
///
/// ```text
/// 0xB3 friend added : uin: u64 | nick_len: u16 | nick: utf8
/// 0x8A friend recall: count: u16, then per entry  from: u64 | to: u64 | message_id: u32 | time: u32
/// ```
pub struct FriendNoticeProcessor;

#[async_trait]
impl Processor<NoticeInput, NoticeEvent> for FriendNoticeProcessor {
    fn name(&self) -> &str {
        "friend_notice"
    }

    async fn process(
        &self,
        context: &mut ProcessingContext<'_, NoticeInput, NoticeEvent>,
        data: &NoticeInput,
    ) -> AppResult<()> {
        let NoticeInput::SysNotify { sub_type, body } = data else {
            return Ok(());
        };
        let mut body = body.clone();
        match *sub_type {
            SUB_TYPE_FRIEND_ADDED => {
                context.mark_consumed(self.name());
                ensure_remaining(&body, 10, "friend added notice")?;
                let uin = body.get_u64();
                let nick_len = body.get_u16() as usize;
                ensure_remaining(&body, nick_len, "friend nick")?;
                let nick = String::from_utf8(body.split_to(nick_len).to_vec())
                    .map_err(|e| AppError::MalformedFrame(format!("friend nick: {e}")))?;
                context.collect(NoticeEvent::FriendAdded { uin, nick });
            }
            SUB_TYPE_FRIEND_RECALL => {
                context.mark_consumed(self.name());
                ensure_remaining(&body, 2, "friend recall count")?;
                let count = body.get_u16();
                let self_uin = context.attribute(&KEY_SELF_UIN).copied();
                for _ in 0..count {
                    ensure_remaining(&body, 24, "friend recall entry")?;
                    let operator = body.get_u64();
                    let to = body.get_u64();
                    let message_id = body.get_u32();
                    let time = body.get_u32();
                    // recalls addressed to another account of a multi-device session
                    if self_uin.is_some_and(|uin| uin != to) {
                        trace!(operator, to, "recall not for us, skipped");
                        continue;
                    }
                    context.collect(NoticeEvent::FriendRecall {
                        operator,
                        message_id,
                        time,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// 528 sub types the client knows about but has nothing to report for.
pub struct IgnoredSysNotifyProcessor;

const IGNORED_SUB_TYPES: [u32; 2] = [0x26, 0x111];

#[async_trait]
impl Processor<NoticeInput, NoticeEvent> for IgnoredSysNotifyProcessor {
    fn name(&self) -> &str {
        "ignored_sys_notify"
    }

    async fn process(
        &self,
        context: &mut ProcessingContext<'_, NoticeInput, NoticeEvent>,
        data: &NoticeInput,
    ) -> AppResult<()> {
        if let NoticeInput::SysNotify { sub_type, .. } = data {
            if IGNORED_SUB_TYPES.contains(sub_type) {
                context.mark_consumed(self.name());
            }
        }
        Ok(())
    }
}
