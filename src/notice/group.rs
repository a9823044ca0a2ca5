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
use crate::AppResult;

const KIND_MUTE: u8 = 0x0c;
const KIND_ANONYMOUS_CHAT: u8 = 0x0e;

/// Mute, unmute and mute-all notices (732 / 0x0c).
///
/// ```text
/// operator: u32 | time: u32 | reserved: u16 | target: u32 | seconds: i32
/// ```
///
/// Target 0 switches mute-all. Zero seconds, or -1, lift a member mute. Notices the local
/// account caused are claimed without an event.
pub struct GroupMuteProcessor;

#[async_trait]
impl Processor<NoticeInput, NoticeEvent> for GroupMuteProcessor {
    fn name(&self) -> &str {
        "group_mute"
    }

    async fn process(
        &self,
        context: &mut ProcessingContext<'_, NoticeInput, NoticeEvent>,
        data: &NoticeInput,
    ) -> AppResult<()> {
        let NoticeInput::GroupNotify {
            group_code,
            kind: KIND_MUTE,
            body,
        } = data
        else {
            return Ok(());
        };
        context.mark_consumed(self.name());

        let mut body = body.clone();
        ensure_remaining(&body, 18, "mute notice")?;
        let operator = body.get_u32() as u64;
        let _time = body.get_u32();
        body.advance(2);
        let target = body.get_u32() as u64;
        let seconds = body.get_i32();

        if context.attribute(&KEY_SELF_UIN) == Some(&operator) {
            trace!(group_code, operator, "mute caused by ourselves, skipped");
            return Ok(());
        }

        let group_code = *group_code;
        let event = if target == 0 {
            NoticeEvent::GroupMuteAll {
                group_code,
                operator,
                enabled: seconds != 0,
            }
        } else if seconds == 0 || seconds == -1 {
            NoticeEvent::MemberUnmuted {
                group_code,
                operator,
                target,
            }
        } else {
            NoticeEvent::MemberMuted {
                group_code,
                operator,
                target,
                duration_seconds: seconds.unsigned_abs(),
            }
        };
        context.collect(event);
        Ok(())
    }
}

/// Anonymous chat switched on or off (732 / 0x0e).
///
/// ```text
/// operator: u32 | state: i32 (0 = enabled)
/// ```
pub struct GroupAnonymousChatProcessor;

#[async_trait]
impl Processor<NoticeInput, NoticeEvent> for GroupAnonymousChatProcessor {
    fn name(&self) -> &str {
        "group_anonymous_chat"
    }

    async fn process(
        &self,
        context: &mut ProcessingContext<'_, NoticeInput, NoticeEvent>,
        data: &NoticeInput,
    ) -> AppResult<()> {
        let NoticeInput::GroupNotify {
            group_code,
            kind: KIND_ANONYMOUS_CHAT,
            body,
        } = data
        else {
            return Ok(());
        };
        context.mark_consumed(self.name());

        let mut body = body.clone();
        ensure_remaining(&body, 8, "anonymous chat notice")?;
        let operator = body.get_u32() as u64;
        let enabled = body.get_i32() == 0;
        context.collect(NoticeEvent::AnonymousChatChanged {
            group_code: *group_code,
            operator,
            enabled,
        });
        Ok(())
    }
}
