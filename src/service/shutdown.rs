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


use tokio::sync::broadcast;

/// Sending side of a stop signal shared by every task spawned for one
/// established connection (reader, dispatcher, heartbeat).
#[derive(Debug, Clone)]
pub struct ShutdownNotifier {
    tx: broadcast::Sender<()>,
}

impl Default for ShutdownNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        ShutdownNotifier { tx }
    }

    /// Listeners must be created before `notify`, later ones never fire.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown::new(self.tx.subscribe())
    }

    pub fn notify(&self) {
        // no listener left means every task already exited
        let _ = self.tx.send(());
    }
}

#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Resolves once the notifier fired or was dropped.
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}
