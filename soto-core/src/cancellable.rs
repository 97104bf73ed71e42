//! Cancellable task wrapper (§4.C), built entirely atop [`crate::pool`].
//!
//! Gives every task an external kill handle without leaking scheduler
//! details: the pool only ever sees a neutral [`pool::TaskSpec`] whose
//! context is this module's own [`WrapperContext`]. There is no "up-cast"
//! from a pool task to a cancellable one — per §9, the two handle types are
//! distinct, composed rather than inherited.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::pool::{self, Pool, PoolError, RtStatsRef, WorkOutcome};

/// Error returned by [`TaskHandle::send_kill`].
#[derive(Debug)]
pub enum CancelError {
    /// The task was already inactive (never started, or already killed).
    NotActive,
}

impl fmt::Display for CancelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task is not active")
    }
}

impl std::error::Error for CancelError {}

/// Description of a cancellable task, analogous to [`pool::TaskSpec`] but
/// without scheduler coupling. Consumed by [`subscribe`].
pub struct CancellableSpec<C> {
    period: Duration,
    startup_delay: Duration,
    init: Option<Box<dyn FnMut(&mut C) -> bool + Send>>,
    work: Box<dyn FnMut(&mut C) -> WorkOutcome + Send>,
    finalize: Option<Box<dyn FnMut(&mut C) + Send>>,
    context: C,
}

impl<C> CancellableSpec<C> {
    pub fn new(period: Duration, context: C, work: impl FnMut(&mut C) -> WorkOutcome + Send + 'static) -> Self {
        CancellableSpec {
            period,
            startup_delay: Duration::ZERO,
            init: None,
            work: Box::new(work),
            finalize: None,
            context,
        }
    }

    pub fn with_startup_delay(mut self, startup_delay: Duration) -> Self {
        self.startup_delay = startup_delay;
        self
    }

    pub fn with_init(mut self, init: impl FnMut(&mut C) -> bool + Send + 'static) -> Self {
        self.init = Some(Box::new(init));
        self
    }

    pub fn with_finalize(mut self, finalize: impl FnMut(&mut C) + Send + 'static) -> Self {
        self.finalize = Some(Box::new(finalize));
        self
    }
}

/// Internal context installed into the pool in place of the user's own.
/// Owns the user's init/work/finalize and the shared cancellation flag.
pub struct WrapperContext<C> {
    active: Arc<AtomicBool>,
    thread_id: Arc<Mutex<Option<std::thread::ThreadId>>>,
    context: Arc<Mutex<C>>,
    user_init: Option<Box<dyn FnMut(&mut C) -> bool + Send>>,
    user_work: Box<dyn FnMut(&mut C) -> WorkOutcome + Send>,
    user_finalize: Option<Box<dyn FnMut(&mut C) + Send>>,
}

/// External opaque handle returned by [`subscribe`]. Carries the shared
/// cancellation flag, the OS thread id (populated once the task's own init
/// has run), and joint ownership of the user's context.
pub struct TaskHandle<C> {
    active: Arc<AtomicBool>,
    thread_id: Arc<Mutex<Option<std::thread::ThreadId>>>,
    context: Arc<Mutex<C>>,
}

impl<C> TaskHandle<C> {
    /// Flip the cancellation token. The target thread observes this at its
    /// next test point (immediately after its work body returns) and exits
    /// after running `finalize`. Idempotent: a second call returns
    /// [`CancelError::NotActive`].
    pub fn send_kill(&self) -> Result<(), CancelError> {
        match self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(_) => Err(CancelError::NotActive),
        }
    }

    /// Borrow the user's context. Blocks if the task thread currently holds
    /// the same lock while running `init`, `work`, or `finalize`.
    pub fn get_context(&self) -> MutexGuard<'_, C> {
        self.context.lock().unwrap()
    }

    /// The OS thread identifier, populated once the task has started. `None`
    /// before the pool runs this task's init.
    pub fn thread_id(&self) -> Option<std::thread::ThreadId> {
        *self.thread_id.lock().unwrap()
    }
}

/// Subscribe a cancellable task to `pool`. Returns the external handle and a
/// shared reference to the task's statistics, or an error if the pool has
/// already started.
pub fn subscribe<C: Send + 'static>(
    pool: &Pool<WrapperContext<C>>,
    spec: CancellableSpec<C>,
) -> Result<(TaskHandle<C>, RtStatsRef), PoolError> {
    let active = Arc::new(AtomicBool::new(false));
    let thread_id = Arc::new(Mutex::new(None));
    let context = Arc::new(Mutex::new(spec.context));

    let handle = TaskHandle {
        active: active.clone(),
        thread_id: thread_id.clone(),
        context: context.clone(),
    };

    let wrapper = WrapperContext {
        active,
        thread_id,
        context,
        user_init: spec.init,
        user_work: spec.work,
        user_finalize: spec.finalize,
    };

    let pool_spec = pool::TaskSpec::new(spec.period, wrapper, wrapper_work)
        .with_startup_delay(spec.startup_delay)
        .with_init(wrapper_init)
        .with_finalize(wrapper_finalize);

    let stats = pool.add(pool_spec)?;
    Ok((handle, stats))
}

fn wrapper_init<C>(wc: &mut WrapperContext<C>) -> bool {
    wc.active.store(true, Ordering::Release);
    *wc.thread_id.lock().unwrap() = Some(std::thread::current().id());
    match wc.user_init.as_mut() {
        Some(init) => {
            let mut guard = wc.context.lock().unwrap();
            init(&mut guard)
        }
        None => true,
    }
}

fn wrapper_work<C>(wc: &mut WrapperContext<C>) -> WorkOutcome {
    let outcome = {
        let mut guard = wc.context.lock().unwrap();
        (wc.user_work)(&mut guard)
    };
    if outcome == WorkOutcome::Stop {
        return WorkOutcome::Stop;
    }
    // The single, well-defined cancellation test point (§4.C): checked once
    // per iteration, right after the user's work body returns.
    if !wc.active.load(Ordering::Acquire) {
        return WorkOutcome::Stop;
    }
    WorkOutcome::Continue
}

fn wrapper_finalize<C>(wc: &mut WrapperContext<C>) {
    wc.active.store(false, Ordering::Release);
    if let Some(finalize) = wc.user_finalize.as_mut() {
        let mut guard = wc.context.lock().unwrap();
        finalize(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn send_kill_is_idempotent() {
        let pool: Pool<WrapperContext<()>> = Pool::new(0);
        let (handle, _stats) = subscribe(
            &pool,
            CancellableSpec::new(Duration::from_millis(5), (), |_| WorkOutcome::Continue),
        )
        .unwrap();
        pool.start().unwrap();

        // Give the task a moment to run its init and set `active`.
        std::thread::sleep(Duration::from_millis(20));

        assert!(handle.send_kill().is_ok());
        assert!(handle.send_kill().is_err());

        pool.destroy();
    }

    #[test]
    fn kill_triggers_finalize_and_thread_is_joined_within_one_period() {
        let finalized = Arc::new(AtomicBool::new(false));
        let finalized_clone = finalized.clone();

        let pool: Pool<WrapperContext<()>> = Pool::new(0);
        let (handle, _stats) = subscribe(
            &pool,
            CancellableSpec::new(Duration::from_millis(10), (), |_| WorkOutcome::Continue)
                .with_finalize(move |_| finalized_clone.store(true, Ordering::SeqCst)),
        )
        .unwrap();
        pool.start().unwrap();

        std::thread::sleep(Duration::from_millis(20));
        handle.send_kill().unwrap();

        pool.destroy();
        assert!(finalized.load(Ordering::SeqCst));
    }

    #[test]
    fn get_context_observes_mutations_made_by_work() {
        let pool: Pool<WrapperContext<Arc<AtomicUsize>>> = Pool::new(0);
        let counter = Arc::new(AtomicUsize::new(0));
        let (handle, _stats) = subscribe(
            &pool,
            CancellableSpec::new(Duration::from_millis(5), counter, |ctx| {
                ctx.fetch_add(1, Ordering::SeqCst);
                WorkOutcome::Continue
            }),
        )
        .unwrap();
        pool.start().unwrap();

        std::thread::sleep(Duration::from_millis(30));
        let seen = handle.get_context().load(Ordering::SeqCst);
        assert!(seen > 0);

        handle.send_kill().unwrap();
        pool.destroy();
    }
}
