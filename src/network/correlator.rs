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


use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::packet::IncomingFrame;
use super::state::CloseReason;
use crate::{AppError, AppResult};

type ResultSlot = oneshot::Sender<AppResult<IncomingFrame>>;

/// Matches replies to requests by sequence number.
///
/// Each in-flight sequence number owns exactly one slot. The sender creates and awaits it, the
/// read path resolves it, `fail_all` resolves whatever is left when the connection closes.
#[derive(Debug)]
pub struct RequestCorrelator {
    pending: DashMap<u32, ResultSlot>,
    next_sequence: AtomicU32,
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCorrelator {
    pub fn new() -> Self {
        RequestCorrelator {
            pending: DashMap::new(),
            // start somewhere random so a reconnecting client does not reuse recent numbers
            next_sequence: AtomicU32::new(rand::random::<u32>() >> 8),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Sends a request and waits for the frame carrying its sequence number.
    ///
    /// `encode` runs once with the assigned sequence number; every retry resends the same bytes
    /// through `send`. Each attempt waits up to `timeout`. A failing `send` ends the request
    /// right away with that error, no resend.
    pub async fn send_and_expect<E, S, Fut>(
        &self,
        command: &str,
        timeout: Duration,
        max_retries: u32,
        encode: E,
        send: S,
    ) -> AppResult<IncomingFrame>
    where
        E: FnOnce(u32) -> AppResult<Bytes>,
        S: Fn(Bytes) -> Fut,
        Fut: Future<Output = AppResult<()>>,
    {
        let (sequence, mut slot) = self.register();
        let _guard = PendingGuard {
            pending: &self.pending,
            sequence,
        };
        let bytes = encode(sequence)?;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                debug!(command, sequence, attempt, "no response in time, resending");
            }
            send(bytes.clone()).await?;
            match tokio::time::timeout(timeout, &mut slot).await {
                Ok(Ok(result)) => return result,
                Ok(Err(_)) => {
                    return Err(AppError::IllegalStateError(format!(
                        "pending request {} dropped without a result",
                        sequence
                    )))
                }
                Err(_) => continue,
            }
        }

        let attempts = total_attempts(max_retries);
        warn!(command, sequence, attempts, "request timed out");
        Err(AppError::Timeout {
            command: command.to_string(),
            sequence,
            attempts,
        })
    }

    /// Resolves the request owning `frame.sequence`. Frames nobody waits for are handed back
    /// for the notice path.
    pub fn complete(&self, frame: IncomingFrame) -> Option<IncomingFrame> {
        let Some(sequence) = frame.sequence else {
            return Some(frame);
        };
        match self.pending.remove(&sequence) {
            Some((_, slot)) => {
                trace!(sequence, command = %frame.command, "response matched");
                if slot.send(Ok(frame)).is_err() {
                    debug!(sequence, "requester gone before its response arrived");
                }
                None
            }
            None => Some(frame),
        }
    }

    /// Fails every pending request with `Closed(reason)`.
    pub fn fail_all(&self, reason: &CloseReason) -> usize {
        let sequences: Vec<u32> = self.pending.iter().map(|e| *e.key()).collect();
        let mut failed = 0;
        for sequence in sequences {
            if let Some((_, slot)) = self.pending.remove(&sequence) {
                let _ = slot.send(Err(AppError::Closed(reason.clone())));
                failed += 1;
            }
        }
        if failed > 0 {
            debug!(failed, %reason, "failed pending requests");
        }
        failed
    }

    fn register(&self) -> (u32, oneshot::Receiver<AppResult<IncomingFrame>>) {
        loop {
            let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            // after wrap-around a slow request may still hold this number
            if let Entry::Vacant(entry) = self.pending.entry(sequence) {
                let (tx, rx) = oneshot::channel();
                entry.insert(tx);
                return (sequence, rx);
            }
        }
    }
}

/// Removes the slot however `send_and_expect` ends, cancellation included.
struct PendingGuard<'a> {
    pending: &'a DashMap<u32, ResultSlot>,
    sequence: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.sequence);
    }
}

/// The first send plus `max_retries` resends.
fn total_attempts(max_retries: u32) -> u32 {
    max_retries.saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn reply(sequence: u32) -> IncomingFrame {
        IncomingFrame::new("Reply", Some(sequence), Bytes::from_static(b"ok"))
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_n_resends_then_timeout() {
        let correlator = RequestCorrelator::new();
        let sends = AtomicUsize::new(0);

        let error = correlator
            .send_and_expect(
                "Silent.Request",
                TIMEOUT,
                3,
                |seq| Ok(Bytes::from(seq.to_be_bytes().to_vec())),
                |_| {
                    sends.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
            )
            .await
            .unwrap_err();

        // one send plus three resends
        assert_eq!(sends.load(Ordering::SeqCst), 4);
        assert!(matches!(error, AppError::Timeout { attempts: 4, .. }));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn attempt_count_saturates() {
        assert_eq!(total_attempts(0), 1);
        assert_eq!(total_attempts(3), 4);
        assert_eq!(total_attempts(u32::MAX), u32::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn resends_identical_bytes() {
        let correlator = RequestCorrelator::new();
        let sent = parking_lot::Mutex::new(Vec::new());

        let _ = correlator
            .send_and_expect(
                "Silent.Request",
                TIMEOUT,
                2,
                |seq| Ok(Bytes::from(seq.to_be_bytes().to_vec())),
                |bytes| {
                    sent.lock().push(bytes);
                    async { Ok(()) }
                },
            )
            .await;

        let sent = sent.into_inner();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|b| *b == sent[0]));
    }

    #[tokio::test]
    async fn response_resolves_the_request() {
        let correlator = Arc::new(RequestCorrelator::new());
        let responder = correlator.clone();

        let frame = correlator
            .send_and_expect(
                "Echo",
                TIMEOUT,
                0,
                |seq| Ok(Bytes::from(seq.to_be_bytes().to_vec())),
                move |bytes| {
                    let responder = responder.clone();
                    async move {
                        let seq = u32::from_be_bytes(bytes[..4].try_into().unwrap());
                        tokio::spawn(async move {
                            assert!(responder.complete(reply(seq)).is_none());
                        });
                        Ok(())
                    }
                },
            )
            .await
            .unwrap();
        assert_eq!(frame.payload, Bytes::from_static(b"ok"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_after_first_timeout_still_counts() {
        let correlator = Arc::new(RequestCorrelator::new());
        let responder = correlator.clone();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let frame = correlator
            .send_and_expect(
                "Slow",
                TIMEOUT,
                2,
                |seq| Ok(Bytes::from(seq.to_be_bytes().to_vec())),
                move |bytes| {
                    let responder = responder.clone();
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        // only the resend gets an answer
                        if attempt == 1 {
                            let seq = u32::from_be_bytes(bytes[..4].try_into().unwrap());
                            responder.complete(reply(seq));
                        }
                        Ok(())
                    }
                },
            )
            .await
            .unwrap();
        assert_eq!(frame.command, "Reply");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn send_failure_is_not_retried() {
        let correlator = RequestCorrelator::new();
        let sends = AtomicUsize::new(0);

        let error = correlator
            .send_and_expect(
                "Broken",
                TIMEOUT,
                5,
                |_| Ok(Bytes::new()),
                |_| {
                    sends.fetch_add(1, Ordering::SeqCst);
                    async { Err(AppError::Transport("reset".to_string())) }
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Transport(_)));
        assert_eq!(sends.load(Ordering::SeqCst), 1);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn fail_all_resolves_every_pending_request() {
        let correlator = Arc::new(RequestCorrelator::new());
        let mut requests = Vec::new();
        for _ in 0..3 {
            let correlator = correlator.clone();
            requests.push(tokio::spawn(async move {
                correlator
                    .send_and_expect(
                        "Pending",
                        Duration::from_secs(3600),
                        0,
                        |_| Ok(Bytes::new()),
                        |_| async { Ok(()) },
                    )
                    .await
            }));
        }
        while correlator.pending_count() < 3 {
            tokio::task::yield_now().await;
        }

        let reason = CloseReason::Explicit("test".to_string());
        assert_eq!(correlator.fail_all(&reason), 3);
        for request in requests {
            let error = request.await.unwrap().unwrap_err();
            assert!(matches!(error, AppError::Closed(CloseReason::Explicit(_))));
        }
    }

    #[test]
    fn unsolicited_and_unknown_frames_are_handed_back() {
        let correlator = RequestCorrelator::new();
        let push = IncomingFrame::new("OnlinePush.ReqPush", None, Bytes::new());
        assert!(correlator.complete(push).is_some());
        assert!(correlator.complete(reply(12345)).is_some());
    }
}
