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


use tracing::info;

use super::state::{ConnectionStateSnapshot, StateKind};

/// Notified after every state transition of a handler, on the task that caused it.
pub trait StateObserver: Send + Sync {
    fn state_changed(&self, from: StateKind, to: &ConnectionStateSnapshot);
}

impl<F> StateObserver for F
where
    F: Fn(StateKind, &ConnectionStateSnapshot) + Send + Sync,
{
    fn state_changed(&self, from: StateKind, to: &ConnectionStateSnapshot) {
        self(from, to)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingStateObserver;

impl StateObserver for LoggingStateObserver {
    fn state_changed(&self, from: StateKind, to: &ConnectionStateSnapshot) {
        match &to.close_reason {
            Some(reason) => info!(%from, to = %to.kind, %reason, "connection state changed"),
            None => info!(%from, to = %to.kind, "connection state changed"),
        }
    }
}
