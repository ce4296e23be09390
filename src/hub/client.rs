//! Per-connection bookkeeping: the hub-side record and the pump-side handle.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::domain::{ConnectionId, Identity, RoomId};

/// Outcome of a non-blocking push onto a client's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The payload was enqueued.
    Delivered,
    /// The queue is full or its reader is gone; the client is not draining.
    Stalled,
}

/// The hub's view of one live connection.
///
/// The hub is the only writer of the outbound queue and the only mutator of
/// the room set; the matching receiver lives in the [`ClientHandle`] owned
/// by the connection's writer loop. Dropping the record closes the queue,
/// which is the termination signal for that loop.
#[derive(Debug)]
pub struct ClientRecord {
    pub identity: Identity,
    pub connected_at: DateTime<Utc>,
    pub rooms: HashSet<RoomId>,
    outbound: mpsc::Sender<String>,
}

impl ClientRecord {
    /// Create a record with a bounded outbound queue of the given capacity.
    ///
    /// Returns the record together with the receiver half for the writer
    /// loop.
    pub fn new(identity: Identity, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let record = Self {
            identity,
            connected_at: Utc::now(),
            rooms: HashSet::new(),
            outbound: tx,
        };
        (record, rx)
    }

    /// Enqueue a payload without blocking.
    ///
    /// A full queue means the consumer stopped draining; a closed queue
    /// means its writer loop already terminated. Both are reported as
    /// [`PushOutcome::Stalled`] so the hub can evict the connection instead
    /// of stalling or buffering without bound.
    pub fn try_push(&self, payload: &str) -> PushOutcome {
        match self.outbound.try_send(payload.to_owned()) {
            Ok(()) => PushOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) | Err(mpsc::error::TrySendError::Closed(_)) => {
                PushOutcome::Stalled
            }
        }
    }
}

/// The pump pair's side of a registered connection.
///
/// Returned by `HubHandle::register`; carries the receiver the writer loop
/// drains. When the hub removes the connection the receiver yields `None`.
#[derive(Debug)]
pub struct ClientHandle {
    pub connection_id: ConnectionId,
    pub identity: Identity,
    pub outbound: mpsc::Receiver<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity_is_delivered() {
        // given:
        let (record, mut rx) = ClientRecord::new(Identity::new(1, "alice"), 2);

        // when:
        let first = record.try_push("a");
        let second = record.try_push("b");

        // then:
        assert_eq!(first, PushOutcome::Delivered);
        assert_eq!(second, PushOutcome::Delivered);
        assert_eq!(rx.try_recv().unwrap(), "a");
        assert_eq!(rx.try_recv().unwrap(), "b");
    }

    #[test]
    fn test_push_beyond_capacity_is_stalled() {
        // given:
        let (record, _rx) = ClientRecord::new(Identity::new(1, "alice"), 2);
        record.try_push("a");
        record.try_push("b");

        // when:
        let third = record.try_push("c");

        // then:
        assert_eq!(third, PushOutcome::Stalled);
    }

    #[test]
    fn test_push_to_dropped_receiver_is_stalled() {
        // given:
        let (record, rx) = ClientRecord::new(Identity::new(1, "alice"), 2);
        drop(rx);

        // when:
        let outcome = record.try_push("a");

        // then:
        assert_eq!(outcome, PushOutcome::Stalled);
    }

    #[test]
    fn test_dropping_record_closes_queue() {
        // given:
        let (record, mut rx) = ClientRecord::new(Identity::new(1, "alice"), 2);
        record.try_push("a");

        // when:
        drop(record);

        // then: buffered payloads drain, then the queue reports closed
        assert_eq!(rx.try_recv().unwrap(), "a");
        assert!(rx.try_recv().is_err());
    }
}
