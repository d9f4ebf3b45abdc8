//! Per-session event channel.
//!
//! Every event gets the next sequence number and is appended to a bounded
//! in-memory log, then fanned out to live subscribers over a broadcast
//! channel. Both happen under one lock, so a subscriber that snapshots the
//! log and attaches to the broadcast in the same critical section sees every
//! event exactly once.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures::Stream;
use journey_common::{Event, EventKind, SessionId};
use tokio::sync::broadcast;

use crate::errors::ReplayError;

/// Default number of trailing events kept for replay.
pub const DEFAULT_RETAINED_EVENTS: usize = 1024;

/// Live fan-out buffer. Slow subscribers that fall further behind resync
/// from the retained log.
const LIVE_BUFFER: usize = 256;

#[derive(Debug)]
struct EventLog {
    next_sequence: u64,
    retained: VecDeque<Event>,
    capacity: usize,
}

impl EventLog {
    fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    fn events_after(&self, after: u64) -> Result<Vec<Event>, ReplayError> {
        let last = self.last_sequence();
        if after > last {
            return Err(ReplayError::CursorAhead {
                requested: after,
                last,
            });
        }
        let oldest = self
            .retained
            .front()
            .map(|e| e.sequence)
            .unwrap_or(self.next_sequence);
        if after + 1 < oldest {
            return Err(ReplayError::CursorExpired {
                requested: after,
                oldest,
            });
        }
        Ok(self
            .retained
            .iter()
            .filter(|e| e.sequence > after)
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
pub struct EventChannel {
    session_id: SessionId,
    log: Mutex<EventLog>,
    live: broadcast::Sender<Event>,
}

impl EventChannel {
    pub fn new(session_id: SessionId, retained: usize) -> Self {
        Self::with_live_buffer(session_id, retained, LIVE_BUFFER)
    }

    pub fn with_live_buffer(session_id: SessionId, retained: usize, live_buffer: usize) -> Self {
        let (live, _) = broadcast::channel(live_buffer.max(1));
        Self {
            session_id,
            log: Mutex::new(EventLog {
                next_sequence: 1,
                retained: VecDeque::new(),
                capacity: retained.max(1),
            }),
            live,
        }
    }

    /// Rebuilds a channel for a loaded session. Numbering continues after
    /// `last_sequence`; `history` becomes the replayable tail.
    pub fn resume(
        session_id: SessionId,
        retained: usize,
        last_sequence: u64,
        history: Vec<Event>,
    ) -> Self {
        let channel = Self::new(session_id, retained);
        {
            let mut log = channel.lock();
            let capacity = log.capacity;
            log.next_sequence = last_sequence + 1;
            log.retained = history
                .into_iter()
                .filter(|e| e.sequence <= last_sequence)
                .collect();
            while log.retained.len() > capacity {
                log.retained.pop_front();
            }
        }
        channel
    }

    fn lock(&self) -> MutexGuard<'_, EventLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn emit(&self, kind: EventKind) -> Event {
        let mut log = self.lock();
        let event = Event {
            sequence: log.next_sequence,
            timestamp: Utc::now(),
            session_id: self.session_id,
            kind,
        };
        log.next_sequence += 1;
        if log.retained.len() == log.capacity {
            log.retained.pop_front();
        }
        log.retained.push_back(event.clone());
        tracing::trace!(
            session_id = %self.session_id,
            sequence = event.sequence,
            event_type = event.type_name(),
            "event emitted"
        );
        // No receivers is fine; the log still has it.
        let _ = self.live.send(event.clone());
        event
    }

    pub fn last_sequence(&self) -> u64 {
        self.lock().last_sequence()
    }

    /// Events with sequence greater than `after`, oldest first.
    pub fn replay(&self, after: u64) -> Result<Vec<Event>, ReplayError> {
        self.lock().events_after(after)
    }

    /// The retained tail, for persistence.
    pub fn retained(&self) -> Vec<Event> {
        self.lock().retained.iter().cloned().collect()
    }

    pub fn subscribe(self: &Arc<Self>, after: u64) -> Result<Subscription, ReplayError> {
        let log = self.lock();
        let backlog = log.events_after(after)?;
        let live = self.live.subscribe();
        drop(log);
        Ok(Subscription {
            channel: Arc::clone(self),
            backlog: backlog.into(),
            live,
            cursor: after,
            ended: false,
        })
    }
}

/// Replay-then-live view of a channel, de-duplicated by sequence number.
/// Ends after `session.ended` or after the first error.
#[derive(Debug)]
pub struct Subscription {
    channel: Arc<EventChannel>,
    backlog: VecDeque<Event>,
    live: broadcast::Receiver<Event>,
    cursor: u64,
    ended: bool,
}

impl Subscription {
    /// Sequence number of the last event handed out.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Next event, waiting for one if necessary. `None` once the session has
    /// ended and its final event was handed out, or once the channel is gone;
    /// `Some(Err)` when a lagging subscriber can no longer resync.
    pub async fn next(&mut self) -> Option<Result<Event, ReplayError>> {
        if self.ended {
            return None;
        }
        loop {
            if let Some(event) = self.backlog.pop_front() {
                if event.sequence > self.cursor {
                    return Some(Ok(self.hand_out(event)));
                }
                continue;
            }
            match self.live.recv().await {
                Ok(event) => {
                    if event.sequence > self.cursor {
                        return Some(Ok(self.hand_out(event)));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(
                        session_id = %self.channel.session_id(),
                        skipped,
                        cursor = self.cursor,
                        "subscriber lagged, resyncing from log"
                    );
                    match self.channel.replay(self.cursor) {
                        Ok(events) => self.backlog.extend(events),
                        Err(e) => {
                            self.ended = true;
                            return Some(Err(e));
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn hand_out(&mut self, event: Event) -> Event {
        self.cursor = event.sequence;
        self.ended = matches!(event.kind, EventKind::SessionEnded { .. });
        event
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Event, ReplayError>> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|item| (item, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use journey_common::{PhaseId, SessionOutcome};

    fn progress(n: usize) -> EventKind {
        EventKind::WorkInProgress {
            phase: PhaseId::from_static("answer"),
            content: format!("chunk {n}"),
        }
    }

    fn channel(retained: usize) -> Arc<EventChannel> {
        Arc::new(EventChannel::new(SessionId::new(), retained))
    }

    #[test]
    fn test_sequences_start_at_one_and_increase() {
        let ch = channel(16);
        let seqs: Vec<u64> = (0..5).map(|n| ch.emit(progress(n)).sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(ch.last_sequence(), 5);
    }

    #[test]
    fn test_replay_after_cursor() {
        let ch = channel(64);
        for n in 0..20 {
            ch.emit(progress(n));
        }
        let replayed: Vec<u64> = ch.replay(7).unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(replayed, (8..=20).collect::<Vec<_>>());
        assert!(ch.replay(20).unwrap().is_empty());
    }

    #[test]
    fn test_expired_and_ahead_cursors() {
        let ch = channel(5);
        for n in 0..10 {
            ch.emit(progress(n));
        }
        assert_eq!(
            ch.replay(2),
            Err(ReplayError::CursorExpired {
                requested: 2,
                oldest: 6
            })
        );
        let tail: Vec<u64> = ch.replay(5).unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(tail, vec![6, 7, 8, 9, 10]);
        assert_eq!(
            ch.replay(11),
            Err(ReplayError::CursorAhead {
                requested: 11,
                last: 10
            })
        );
    }

    #[test]
    fn test_resume_continues_numbering() {
        let first = channel(8);
        for n in 0..4 {
            first.emit(progress(n));
        }
        let resumed = EventChannel::resume(first.session_id(), 8, 4, first.retained());
        assert_eq!(resumed.emit(progress(5)).sequence, 5);
        assert_eq!(resumed.replay(2).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_subscription_replays_then_goes_live() {
        let ch = channel(64);
        for n in 0..3 {
            ch.emit(progress(n));
        }
        let mut sub = ch.subscribe(1).unwrap();
        ch.emit(progress(3));

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(sub.next().await.unwrap().unwrap().sequence);
        }
        assert_eq!(seen, vec![2, 3, 4]);
        assert_eq!(sub.cursor(), 4);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_resyncs_without_gaps() {
        let ch = Arc::new(EventChannel::with_live_buffer(SessionId::new(), 100, 2));
        let mut sub = ch.subscribe(0).unwrap();
        for n in 0..10 {
            ch.emit(progress(n));
        }
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(sub.next().await.unwrap().unwrap().sequence);
        }
        assert_eq!(seen, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_lagging_past_retention_reports_expiry() {
        let ch = Arc::new(EventChannel::with_live_buffer(SessionId::new(), 3, 2));
        let mut sub = ch.subscribe(0).unwrap();
        for n in 0..10 {
            ch.emit(progress(n));
        }
        assert!(matches!(
            sub.next().await,
            Some(Err(ReplayError::CursorExpired { .. }))
        ));
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_subscription_ends_after_session_ended() {
        let ch = channel(64);
        ch.emit(progress(0));
        let mut sub = ch.subscribe(0).unwrap();
        ch.emit(EventKind::SessionEnded {
            phase: PhaseId::from_static("answer"),
            outcome: SessionOutcome::Completed,
            summary: "done".to_string(),
        });
        ch.emit(progress(1));

        assert_eq!(sub.next().await.unwrap().unwrap().sequence, 1);
        assert_eq!(sub.next().await.unwrap().unwrap().type_name(), "session.ended");
        assert!(sub.next().await.is_none());
        assert_eq!(sub.cursor(), 2);

        // Replaying a finished session ends the same way.
        let replayed: Vec<u64> = ch
            .subscribe(0)
            .unwrap()
            .into_stream()
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|item| item.unwrap().sequence)
            .collect();
        assert_eq!(replayed, vec![1, 2]);
    }
}
