// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Per-thread execution of actor futures.
//!
//! Each actor runs on its own OS thread. The thread drives the actor's future
//! and sleeps whenever the future is pending. The shared [`Activity`] records
//! how many actors are alive and how many are asleep with no wake-up pending,
//! which is what the [`Engine`](crate::engine::Engine) uses to decide that the
//! network has quiesced.
//!
//! The idle count is decremented by the waker, not by the woken thread, so it
//! never includes a task that has a wake-up pending.

use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::task::{ArcWake, waker};

use crate::types::{SimError, SimResult, lock};

thread_local! {
    static CURRENT: RefCell<Option<Arc<Activity>>> = const { RefCell::new(None) };
}

/// Whether the network of the current actor thread is being torn down.
///
/// Always false when called from outside an actor thread.
pub fn is_halting() -> bool {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(|activity| activity.halting.load(Ordering::Acquire))
    })
}

#[derive(Default)]
struct ActivityState {
    live: usize,
    idle: usize,
    generation: u64,
    error: Option<SimError>,
}

#[derive(Default)]
pub(crate) struct Activity {
    state: Mutex<ActivityState>,
    changed: Condvar,
    halting: AtomicBool,
}

fn wait<'a, T>(condvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    match condvar.wait(guard) {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Activity {
    pub(crate) fn start(&self, num_tasks: usize) {
        lock(&self.state).live += num_tasks;
    }

    fn suspend(&self) {
        let mut state = lock(&self.state);
        state.idle += 1;
        self.changed.notify_all();
    }

    fn resume(&self) {
        let mut state = lock(&self.state);
        state.idle -= 1;
        state.generation += 1;
    }

    /// Record that a task has completed.
    ///
    /// The first error seen before the network started halting is kept.
    pub(crate) fn finished(&self, result: SimResult) {
        let mut state = lock(&self.state);
        state.live -= 1;
        if let Err(e) = result {
            if !self.halting.load(Ordering::Acquire) && state.error.is_none() {
                state.error = Some(e);
            }
        }
        self.changed.notify_all();
    }

    /// Block until every live task is asleep with nothing pending, or a task
    /// has failed.
    ///
    /// When `drain` is non-zero the quiescent state must survive that long
    /// without any task being woken.
    pub(crate) fn wait_for_quiescence(&self, drain: Duration) {
        let mut state = lock(&self.state);
        loop {
            while state.error.is_none() && state.idle != state.live {
                state = wait(&self.changed, state);
            }
            if state.error.is_some() || drain.is_zero() {
                return;
            }

            let generation = state.generation;
            drop(state);
            std::thread::sleep(drain);
            state = lock(&self.state);
            if state.error.is_some() || (state.idle == state.live && state.generation == generation)
            {
                return;
            }
        }
    }

    pub(crate) fn halt(&self) {
        self.halting.store(true, Ordering::Release);
    }

    pub(crate) fn take_error(&self) -> Option<SimError> {
        lock(&self.state).error.take()
    }

    pub(crate) fn num_live(&self) -> usize {
        lock(&self.state).live
    }
}

#[derive(Default)]
struct SignalState {
    notified: bool,
    idle: bool,
}

/// The wake-up signal of one actor thread.
pub(crate) struct TaskSignal {
    state: Mutex<SignalState>,
    condvar: Condvar,
    activity: Arc<Activity>,
}

impl TaskSignal {
    pub(crate) fn new(activity: Arc<Activity>) -> Self {
        Self {
            state: Mutex::new(SignalState::default()),
            condvar: Condvar::new(),
            activity,
        }
    }
}

impl ArcWake for TaskSignal {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let mut state = lock(&arc_self.state);
        state.notified = true;
        if state.idle {
            state.idle = false;
            arc_self.activity.resume();
        }
        arc_self.condvar.notify_one();
    }
}

fn drive(mut future: BoxFuture<'static, SimResult>, signal: &Arc<TaskSignal>) -> SimResult {
    let task_waker = waker(signal.clone());
    let mut cx = Context::from_waker(&task_waker);
    loop {
        if let Poll::Ready(result) = future.as_mut().poll(&mut cx) {
            return result;
        }

        let mut state = lock(&signal.state);
        if !state.notified {
            state.idle = true;
            signal.activity.suspend();
            while !state.notified {
                state = wait(&signal.condvar, state);
            }
        }
        state.notified = false;
    }
}

/// The body of an actor thread.
pub(crate) fn run_task(
    name: &str,
    future: BoxFuture<'static, SimResult>,
    signal: Arc<TaskSignal>,
) {
    let activity = signal.activity.clone();
    CURRENT.with(|current| *current.borrow_mut() = Some(activity.clone()));

    let result = match catch_unwind(AssertUnwindSafe(|| drive(future, &signal))) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(SimError(format!("{name} panicked: {msg}")))
        }
    };

    CURRENT.with(|current| *current.borrow_mut() = None);
    activity.finished(result);
}

/// Wake a task regardless of its state.
pub(crate) fn wake(signal: &Arc<TaskSignal>) {
    ArcWake::wake_by_ref(signal);
}
