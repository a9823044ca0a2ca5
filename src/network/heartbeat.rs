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
use tracing::{debug, trace, warn};

use super::handler::HandlerInner;
use super::packet::OutgoingPacket;
use super::state::CloseReason;
use crate::service::{HeartbeatConfig, Shutdown};

/// Keeps an established connection alive. A heartbeat that stays unanswered after all retries
/// closes the handler.
pub(crate) async fn run_heartbeat(
    handler: Arc<HandlerInner>,
    config: HeartbeatConfig,
    period: Duration,
    mut shutdown: Shutdown,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.recv() => return,
        }

        let packet = OutgoingPacket::new(config.command.clone(), Bytes::new());
        let result = tokio::select! {
            result = handler.send_and_expect(packet, config.timeout(), config.retries) => result,
            _ = shutdown.recv() => return,
        };
        match result {
            Ok(_) => trace!(command = %config.command, "heartbeat answered"),
            Err(e) if e.is_closed() => {
                debug!("heartbeat stopped: {}", e);
                return;
            }
            Err(e) => {
                warn!(command = %config.command, "heartbeat failed: {}", e);
                handler.close(CloseReason::HeartbeatFailed(e.to_string()));
                return;
            }
        }
    }
}
