//! Bounded, ordered buffer between the fetch cycle and the emit path
//!
//! The only flow-control point in the engine: once `capacity` messages are
//! buffered, `try_push` hands the message back and `push` waits until the
//! emit side makes room. Closing the queue wakes every waiter, and waiting
//! operations then return [`ConsumerError::QueueClosed`].

use crate::error::{ConsumerError, ConsumerResult};
use crate::message::BufferedMessage;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

/// Order in which buffered messages are handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Ascending broker offset; arrival order breaks ties between
    /// attempts of the same offset
    #[default]
    Offset,
    /// First in, first out
    Arrival,
    /// Lexicographic by payload bytes. Unrelated to partition order; only
    /// for consumers that want payload-sorted delivery.
    Payload,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Offset(i64),
    Arrival,
    Payload(Vec<u8>),
}

impl OrderingPolicy {
    fn key_for(&self, message: &BufferedMessage) -> SortKey {
        match self {
            OrderingPolicy::Offset => SortKey::Offset(message.offset()),
            OrderingPolicy::Arrival => SortKey::Arrival,
            OrderingPolicy::Payload => SortKey::Payload(message.payload.clone()),
        }
    }
}

/// Rejected `try_push`; the message is handed back to the caller
#[derive(Debug, Error)]
pub enum PushError {
    #[error("Delivery queue full")]
    Full(BufferedMessage),
    #[error("Delivery queue closed")]
    Closed(BufferedMessage),
}

impl PushError {
    pub fn into_inner(self) -> BufferedMessage {
        match self {
            PushError::Full(message) | PushError::Closed(message) => message,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, PushError::Full(_))
    }
}

struct QueueState {
    items: BTreeMap<(SortKey, u64), BufferedMessage>,
    next_seq: u64,
    closed: bool,
}

pub struct DeliveryQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    policy: OrderingPolicy,
    not_empty: Notify,
    not_full: Notify,
}

impl DeliveryQueue {
    pub fn new(capacity: usize, policy: OrderingPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: BTreeMap::new(),
                next_seq: 0,
                closed: false,
            }),
            capacity: capacity.max(1),
            policy,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OrderingPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Enqueue without waiting
    pub fn try_push(&self, message: BufferedMessage) -> Result<(), PushError> {
        {
            let mut state = self.state.lock();

            if state.closed {
                return Err(PushError::Closed(message));
            }
            if state.items.len() >= self.capacity {
                return Err(PushError::Full(message));
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            let key = self.policy.key_for(&message);
            state.items.insert((key, seq), message);
        }

        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueue, waiting for capacity if the queue is full
    pub async fn push(&self, mut message: BufferedMessage) -> ConsumerResult<()> {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(message) {
                Ok(()) => return Ok(()),
                Err(PushError::Closed(_)) => return Err(ConsumerError::QueueClosed),
                Err(PushError::Full(returned)) => {
                    debug!(capacity = self.capacity, "Delivery queue full, waiting");
                    message = returned;
                    notified.await;
                }
            }
        }
    }

    /// Dequeue the next message per the ordering policy, if any.
    ///
    /// Still drains buffered messages after `close`.
    pub fn try_pop(&self) -> Option<BufferedMessage> {
        let message = self
            .state
            .lock()
            .items
            .pop_first()
            .map(|(_, message)| message);

        if message.is_some() {
            self.not_full.notify_one();
        }
        message
    }

    /// Dequeue, waiting for a message. Returns `QueueClosed` once the queue
    /// is closed and drained.
    pub async fn pop(&self) -> ConsumerResult<BufferedMessage> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_pop() {
                return Ok(message);
            }
            if self.is_closed() {
                return Err(ConsumerError::QueueClosed);
            }

            notified.await;
        }
    }

    /// Reject further pushes and wake every waiting producer and consumer
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageIdentity, MessageType};
    use std::sync::Arc;
    use std::time::Duration;

    fn msg(offset: i64, payload: &str) -> BufferedMessage {
        BufferedMessage::new(
            payload.as_bytes().to_vec(),
            MessageIdentity::new(offset, MessageType::Primary),
        )
    }

    fn drain(queue: &DeliveryQueue) -> Vec<i64> {
        std::iter::from_fn(|| queue.try_pop())
            .map(|m| m.offset())
            .collect()
    }

    #[test]
    fn test_offset_ordering() {
        let queue = DeliveryQueue::new(10, OrderingPolicy::Offset);
        queue.try_push(msg(12, "zzz")).unwrap();
        queue.try_push(msg(3, "yyy")).unwrap();
        queue.try_push(msg(7, "aaa")).unwrap();

        assert_eq!(drain(&queue), vec![3, 7, 12]);
    }

    #[test]
    fn test_offset_ordering_same_offset_keeps_arrival_order() {
        let queue = DeliveryQueue::new(10, OrderingPolicy::Offset);
        let first = msg(5, "first");
        let second = msg(5, "second");
        queue.try_push(first.clone()).unwrap();
        queue.try_push(second.clone()).unwrap();

        assert_eq!(queue.try_pop(), Some(first));
        assert_eq!(queue.try_pop(), Some(second));
    }

    #[test]
    fn test_arrival_ordering() {
        let queue = DeliveryQueue::new(10, OrderingPolicy::Arrival);
        queue.try_push(msg(12, "a")).unwrap();
        queue.try_push(msg(3, "b")).unwrap();
        queue.try_push(msg(7, "c")).unwrap();

        assert_eq!(drain(&queue), vec![12, 3, 7]);
    }

    #[test]
    fn test_payload_ordering() {
        let queue = DeliveryQueue::new(10, OrderingPolicy::Payload);
        queue.try_push(msg(1, "http://zeta.example")).unwrap();
        queue.try_push(msg(2, "http://alpha.example")).unwrap();
        queue.try_push(msg(3, "http://mid.example")).unwrap();

        assert_eq!(drain(&queue), vec![2, 3, 1]);
    }

    #[test]
    fn test_try_push_full_returns_message() {
        let queue = DeliveryQueue::new(2, OrderingPolicy::Offset);
        queue.try_push(msg(1, "a")).unwrap();
        queue.try_push(msg(2, "b")).unwrap();
        assert_eq!(queue.remaining_capacity(), 0);

        let err = queue.try_push(msg(3, "c")).unwrap_err();
        assert!(err.is_full());
        assert_eq!(err.into_inner().offset(), 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_closed_queue_rejects_push_but_drains() {
        let queue = DeliveryQueue::new(4, OrderingPolicy::Offset);
        queue.try_push(msg(1, "a")).unwrap();
        queue.close();

        let err = queue.try_push(msg(2, "b")).unwrap_err();
        assert!(matches!(err, PushError::Closed(_)));
        assert_eq!(queue.try_pop().map(|m| m.offset()), Some(1));
        assert_eq!(queue.try_pop(), None);
    }

    #[tokio::test]
    async fn test_push_waits_for_capacity() {
        let queue = Arc::new(DeliveryQueue::new(1, OrderingPolicy::Offset));
        queue.try_push(msg(1, "a")).unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(msg(2, "b")).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.try_pop().map(|m| m.offset()), Some(1));
        producer.await.unwrap().unwrap();
        assert_eq!(queue.try_pop().map(|m| m.offset()), Some(2));
    }

    #[tokio::test]
    async fn test_pop_waits_for_message() {
        let queue = Arc::new(DeliveryQueue::new(4, OrderingPolicy::Offset));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.try_push(msg(9, "late")).unwrap();

        let message = consumer.await.unwrap().unwrap();
        assert_eq!(message.offset(), 9);
    }

    #[test]
    fn test_push_wakes_pending_pop() {
        use tokio_test::{assert_pending, assert_ready_ok, task};

        let queue = DeliveryQueue::new(4, OrderingPolicy::Offset);
        let mut pop = task::spawn(queue.pop());

        assert_pending!(pop.poll());
        queue.try_push(msg(4, "woken")).unwrap();

        assert!(pop.is_woken());
        let message = assert_ready_ok!(pop.poll());
        assert_eq!(message.offset(), 4);
    }

    #[tokio::test]
    async fn test_close_interrupts_waiters() {
        let queue = Arc::new(DeliveryQueue::new(1, OrderingPolicy::Offset));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.close();

        let result = consumer.await.unwrap();
        assert!(matches!(result, Err(ConsumerError::QueueClosed)));
    }

    #[tokio::test]
    async fn test_close_interrupts_blocked_producer() {
        let queue = Arc::new(DeliveryQueue::new(1, OrderingPolicy::Offset));
        queue.try_push(msg(1, "a")).unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(msg(2, "b")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.close();

        let result = producer.await.unwrap();
        assert!(result.unwrap_err().is_interrupt());
    }
}
