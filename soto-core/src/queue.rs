//! Bounded MPSC queue with an explicit end-of-stream marker (§4.F).
//!
//! Built on [`std::sync::Condvar`] in the style of this crate's other
//! background-thread utilities rather than an external channel crate: the
//! queue needs bounded capacity, an explicit `Closed` state distinct from
//! "empty", and FIFO-fair waiters, none of which `std::sync::mpsc` gives us
//! directly.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Error returned by [`Queue::insert`] once the queue has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

impl fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is closed")
    }
}

impl std::error::Error for QueueClosed {}

/// Result of [`Queue::extract`] / [`Queue::try_extract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extracted<T> {
    Value(T),
    EndOfStream,
}

/// Result of [`Queue::try_extract`], which additionally may find nothing
/// without blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryExtracted<T> {
    Value(T),
    Empty,
    EndOfStream,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
    next_producer_ticket: u64,
    next_producer_turn: u64,
    next_consumer_ticket: u64,
    next_consumer_turn: u64,
}

/// A bounded, multi-producer, single-consumer-contract queue. The "single
/// consumer" contract is the dispatcher/consumer-task convention used
/// throughout this crate; nothing here prevents multiple threads from
/// calling `extract`, but fairness between them follows the same FIFO
/// ticketing as producers.
pub struct Queue<T> {
    capacity: usize,
    state: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> Queue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Queue {
            capacity,
            state: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                next_producer_ticket: 0,
                next_producer_turn: 0,
                next_consumer_ticket: 0,
                next_consumer_turn: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Block until there is room, then enqueue `value`. Returns
    /// [`QueueClosed`] if the queue was (or became) closed before room was
    /// available.
    pub fn insert(&self, value: T) -> Result<(), QueueClosed> {
        let mut state = self.state.lock().unwrap();
        let my_ticket = state.next_producer_ticket;
        state.next_producer_ticket += 1;

        state = self
            .not_full
            .wait_while(state, |s| {
                !s.closed && (s.items.len() >= self.capacity || s.next_producer_turn != my_ticket)
            })
            .unwrap();

        if state.closed {
            // Still advance the turn counter so later waiters aren't stuck
            // behind a ticket that will never be served.
            state.next_producer_turn = state.next_producer_turn.max(my_ticket + 1);
            self.not_full.notify_all();
            return Err(QueueClosed);
        }

        state.items.push_back(value);
        state.next_producer_turn = my_ticket + 1;
        self.not_full.notify_all();
        self.not_empty.notify_all();
        Ok(())
    }

    /// Block until an item is available or the queue drains after being
    /// closed.
    pub fn extract(&self) -> Extracted<T> {
        let mut state = self.state.lock().unwrap();
        let my_ticket = state.next_consumer_ticket;
        state.next_consumer_ticket += 1;

        state = self
            .not_empty
            .wait_while(state, |s| {
                !s.closed && (s.items.is_empty() || s.next_consumer_turn != my_ticket)
            })
            .unwrap();

        state.next_consumer_turn = my_ticket + 1;
        match state.items.pop_front() {
            Some(value) => {
                self.not_full.notify_all();
                self.not_empty.notify_all();
                Extracted::Value(value)
            }
            None => {
                self.not_empty.notify_all();
                Extracted::EndOfStream
            }
        }
    }

    /// Non-blocking variant of [`Queue::extract`].
    pub fn try_extract(&self) -> TryExtracted<T> {
        let mut state = self.state.lock().unwrap();
        match state.items.pop_front() {
            Some(value) => {
                self.not_full.notify_all();
                TryExtracted::Value(value)
            }
            None if state.closed => TryExtracted::EndOfStream,
            None => TryExtracted::Empty,
        }
    }

    /// Close the queue. Idempotent; wakes every waiter.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn close_then_insert_is_refused() {
        let q: Queue<i32> = Queue::new(4);
        q.close();
        assert_eq!(q.insert(1), Err(QueueClosed));
    }

    #[test]
    fn close_then_drain_then_end_of_stream() {
        let q: Queue<i32> = Queue::new(4);
        q.insert(1).unwrap();
        q.insert(2).unwrap();
        q.close();
        assert_eq!(q.extract(), Extracted::Value(1));
        assert_eq!(q.extract(), Extracted::Value(2));
        assert_eq!(q.extract(), Extracted::EndOfStream);
        assert_eq!(q.extract(), Extracted::EndOfStream);
    }

    #[test]
    fn try_extract_never_blocks_when_empty() {
        let q: Queue<i32> = Queue::new(4);
        assert_eq!(q.try_extract(), TryExtracted::Empty);
    }

    #[test]
    fn try_extract_reports_end_of_stream_once_closed_and_drained() {
        let q: Queue<i32> = Queue::new(4);
        q.insert(7).unwrap();
        q.close();
        assert_eq!(q.try_extract(), TryExtracted::Value(7));
        assert_eq!(q.try_extract(), TryExtracted::EndOfStream);
    }

    #[test]
    fn insert_blocks_while_full_and_unblocks_on_extract() {
        let q: Arc<Queue<i32>> = Arc::new(Queue::new(1));
        q.insert(1).unwrap();

        let q2 = q.clone();
        let inserter = std::thread::spawn(move || q2.insert(2));

        std::thread::sleep(Duration::from_millis(20));
        assert!(!inserter.is_finished(), "insert must block while the queue is full");

        assert_eq!(q.extract(), Extracted::Value(1));
        assert!(inserter.join().unwrap().is_ok());
        assert_eq!(q.extract(), Extracted::Value(2));
    }
}
