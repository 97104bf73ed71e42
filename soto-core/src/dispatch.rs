//! One-to-many broadcast dispatcher (§4.E), built atop [`crate::queue`].
//!
//! A dedicated thread drains an input queue and fans each item out to every
//! registered output queue, duplicating all but the last delivery (the last
//! output receives the original, owned value, saving one copy per item —
//! see [`Dispatcher::run`]).

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::queue::{Extracted, Queue};

/// Error returned by [`Dispatcher::new_output`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStopped;

impl fmt::Display for DispatchStopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dispatcher has already stopped")
    }
}

impl std::error::Error for DispatchStopped {}

/// A duplication strategy for items fanned out to all but the last output.
/// Defaults to [`Clone::clone`] — the Rust expression of the source's
/// identity-vs-duplicator choice (§9): the default duplicator is the
/// cheapest thing that still gives every non-last consumer its own owned
/// value, and callers needing a different notion of "copy" (e.g. a deep
/// clone of a buffer with reset state) can supply their own.
pub type Duplicator<T> = Arc<dyn Fn(&T) -> T + Send + Sync>;

struct State<T> {
    outputs: Vec<Arc<Queue<T>>>,
    active: bool,
}

/// Fan-out of one producer queue to N dynamically created consumer queues.
pub struct Dispatcher<T: Clone + Send + 'static> {
    input: Arc<Queue<T>>,
    duplicator: Duplicator<T>,
    state: Mutex<State<T>>,
}

impl<T: Clone + Send + 'static> Dispatcher<T> {
    /// Create a dispatcher pulling from `input`. `duplicator` defaults to
    /// `Clone::clone` when `None`.
    pub fn new(input: Arc<Queue<T>>, duplicator: Option<Duplicator<T>>) -> Self {
        Dispatcher {
            input,
            duplicator: duplicator.unwrap_or_else(|| Arc::new(|item: &T| item.clone())),
            state: Mutex::new(State {
                outputs: Vec::new(),
                active: true,
            }),
        }
    }

    /// Register a new output queue. Refused once the dispatcher has stopped
    /// (input closed and drained). The new queue only receives items
    /// arriving after its addition.
    pub fn new_output(&self, capacity: usize) -> Result<Arc<Queue<T>>, DispatchStopped> {
        let mut state = self.state.lock().unwrap();
        if !state.active {
            return Err(DispatchStopped);
        }
        let queue = Arc::new(Queue::new(capacity));
        state.outputs.push(queue.clone());
        Ok(queue)
    }

    /// Drain the input queue until end-of-stream, fanning each item out to
    /// every registered output. Intended to run on its own dedicated thread
    /// (see [`Dispatcher::spawn`]); blocks for the dispatcher's whole
    /// lifetime.
    pub fn run(&self) {
        loop {
            match self.input.extract() {
                Extracted::Value(item) => self.dispatch_one(item),
                Extracted::EndOfStream => {
                    let mut state = self.state.lock().unwrap();
                    state.active = false;
                    for output in &state.outputs {
                        output.close();
                    }
                    break;
                }
            }
        }
    }

    fn dispatch_one(&self, item: T) {
        // Held for the whole fan-out: membership changes (new_output) must
        // not interleave with an in-flight delivery (§5).
        let state = self.state.lock().unwrap();
        let n = state.outputs.len();
        if n == 0 {
            return;
        }
        for output in &state.outputs[..n - 1] {
            let copy = (self.duplicator)(&item);
            if output.insert(copy).is_err() {
                log::error!("dispatcher output queue refused an insert; this is a bug, not a transient condition");
                std::process::abort();
            }
        }
        if state.outputs[n - 1].insert(item).is_err() {
            log::error!("dispatcher output queue refused an insert; this is a bug, not a transient condition");
            std::process::abort();
        }
    }
}

impl<T: Clone + Send + 'static> Dispatcher<T> {
    /// Spawn the dispatcher's dedicated thread.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        std::thread::spawn(move || self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Extracted as Ex;

    #[test]
    fn two_outputs_identity_duplicator_both_see_full_sequence() {
        let input = Arc::new(Queue::new(8));
        let dispatcher = Arc::new(Dispatcher::new(input.clone(), None));
        let q1 = dispatcher.new_output(8).unwrap();
        let q2 = dispatcher.new_output(8).unwrap();

        let handle = dispatcher.clone().spawn();

        input.insert(1).unwrap();
        input.insert(2).unwrap();
        input.insert(3).unwrap();
        input.close();

        handle.join().unwrap();

        for q in [&q1, &q2] {
            assert_eq!(q.extract(), Ex::Value(1));
            assert_eq!(q.extract(), Ex::Value(2));
            assert_eq!(q.extract(), Ex::Value(3));
            assert_eq!(q.extract(), Ex::EndOfStream);
        }
    }

    #[test]
    fn new_output_refused_after_dispatcher_stops() {
        let input = Arc::new(Queue::new(8));
        let dispatcher = Arc::new(Dispatcher::<i32>::new(input.clone(), None));
        input.close();
        let handle = dispatcher.clone().spawn();
        handle.join().unwrap();

        assert_eq!(dispatcher.new_output(4), Err(DispatchStopped));
    }

    #[test]
    fn duplicator_runs_once_per_non_last_output() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let input = Arc::new(Queue::new(8));
        let dispatcher = Arc::new(Dispatcher::new(
            input.clone(),
            Some(Arc::new(move |v: &i32| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                *v
            })),
        ));
        let q1 = dispatcher.new_output(8).unwrap();
        let q2 = dispatcher.new_output(8).unwrap();
        let q3 = dispatcher.new_output(8).unwrap();

        let handle = dispatcher.clone().spawn();
        input.insert(42).unwrap();
        input.close();
        handle.join().unwrap();

        // Two non-last outputs get a duplicated copy; the last gets the
        // original directly, so the duplicator runs exactly twice.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(q1.extract(), Ex::Value(42));
        assert_eq!(q2.extract(), Ex::Value(42));
        assert_eq!(q3.extract(), Ex::Value(42));
    }
}
