//! Outbound notifications of timer state changes.
//!
//! Every successful transition produces a [`TimerUpdate`]. Delivery is
//! best-effort: the engine logs a failed publish and keeps the mutation.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::error::PublishError;
use crate::timer::{TimerId, TimerState};

/// A published state of one timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerUpdate {
    pub timer_id: TimerId,
    pub state: TimerState,
}

/// Fire-and-forget sink for timer updates.
pub trait Publisher: Send + Sync {
    fn publish(&self, timer_id: TimerId, state: &TimerState) -> Result<(), PublishError>;
}

/// Drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn publish(&self, _timer_id: TimerId, _state: &TimerState) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Fans updates out to any number of async subscribers.
///
/// Slow subscribers lag and lose the oldest updates rather than blocking
/// the engine.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<TimerUpdate>,
}

impl BroadcastPublisher {
    pub const DEFAULT_CAPACITY: usize = 100;

    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerUpdate> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, timer_id: TimerId, state: &TimerState) -> Result<(), PublishError> {
        self.tx
            .send(TimerUpdate {
                timer_id,
                state: *state,
            })
            .map(|_| ())
            .map_err(|_| PublishError::NoSubscribers)
    }
}

/// Keeps every update in memory, in publish order.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    updates: Mutex<Vec<TimerUpdate>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<TimerUpdate> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn updates_for(&self, timer_id: TimerId) -> Vec<TimerState> {
        self.updates()
            .into_iter()
            .filter(|u| u.timer_id == timer_id)
            .map(|u| u.state)
            .collect()
    }

    pub fn clear(&self) {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, timer_id: TimerId, state: &TimerState) -> Result<(), PublishError> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TimerUpdate {
                timer_id,
                state: *state,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn state() -> TimerState {
        TimerState::Inactive {
            publish_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn broadcast_without_subscribers_reports_it() {
        let publisher = BroadcastPublisher::default();
        assert_eq!(
            publisher.publish(TimerId::new(), &state()),
            Err(PublishError::NoSubscribers)
        );
    }

    #[test]
    fn broadcast_delivers_to_subscribers() {
        let publisher = BroadcastPublisher::new(4);
        let mut rx = publisher.subscribe();
        let id = TimerId::new();
        publisher.publish(id, &state()).unwrap();
        let update = rx.try_recv().unwrap();
        assert_eq!(update.timer_id, id);
        assert_eq!(update.state, state());
    }

    #[test]
    fn recording_keeps_order_per_timer() {
        let publisher = RecordingPublisher::new();
        let a = TimerId::new();
        let b = TimerId::new();
        publisher.publish(a, &state()).unwrap();
        publisher.publish(b, &state()).unwrap();
        publisher.publish(a, &state()).unwrap();
        assert_eq!(publisher.updates().len(), 3);
        assert_eq!(publisher.updates_for(a).len(), 2);
        publisher.clear();
        assert!(publisher.updates().is_empty());
    }
}
