// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The engine that runs a network of actors.
//!
//! Components register themselves with the [`Engine`] when they are created.
//! [`Engine::run`] starts every actor on its own OS thread and returns once
//! the network has quiesced (or an actor has failed). The network is then torn
//! down: every pending and future port operation resolves to an error, which
//! the actors propagate out of their `run()` loops.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cclo_track::entity::{Entity, toplevel};
use cclo_track::{Tracker, debug, info};
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::executor::{Activity, TaskSignal, run_task, wake};
use crate::traits::Runnable;
use crate::types::{SimError, SimResult, lock};

struct Task {
    name: String,
    future: BoxFuture<'static, SimResult>,
}

pub struct Engine {
    top: Arc<Entity>,
    tracker: Tracker,
    pending: Mutex<Vec<Task>>,
    activity: Arc<Activity>,
    drain: Duration,
}

impl Engine {
    #[must_use]
    pub fn new(tracker: &Tracker) -> Self {
        let top = toplevel(tracker, "top");
        Self {
            top,
            tracker: tracker.clone(),
            pending: Mutex::new(Vec::new()),
            activity: Arc::new(Activity::default()),
            drain: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn top(&self) -> &Arc<Entity> {
        &self.top
    }

    #[must_use]
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Set how long a quiescent network must stay quiescent before the run
    /// is considered complete.
    pub fn set_drain_delay(&mut self, drain: Duration) {
        self.drain = drain;
    }

    /// Register an actor so that it is run by [`Engine::run`].
    pub fn register(&self, runnable: Arc<dyn Runnable>) {
        let mut pending = lock(&self.pending);
        let name = format!("actor-{}", pending.len());
        pending.push(Task {
            name,
            future: async move { runnable.run().await }.boxed(),
        });
    }

    /// Add a free-standing future, typically a test or host driver.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = SimResult> + Send + 'static,
    {
        let mut pending = lock(&self.pending);
        let name = format!("actor-{}", pending.len());
        pending.push(Task {
            name,
            future: future.boxed(),
        });
    }

    /// Run every registered actor until the network quiesces.
    ///
    /// Returns the first error returned by any actor before teardown.
    pub fn run(&mut self) -> SimResult {
        let tasks: Vec<Task> = lock(&self.pending).drain(..).collect();
        let num_tasks = tasks.len();
        info!(self.top ; "Starting {} actors", num_tasks);
        self.activity.start(num_tasks);

        let mut signals = Vec::with_capacity(num_tasks);
        let mut handles = Vec::with_capacity(num_tasks);
        let mut spawn_error = None;
        for task in tasks {
            if spawn_error.is_some() {
                self.activity.finished(Ok(()));
                continue;
            }

            let signal = Arc::new(TaskSignal::new(self.activity.clone()));
            let thread_signal = signal.clone();
            let Task { name, future } = task;
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_task(&name, future, thread_signal));
            match spawned {
                Ok(handle) => {
                    signals.push(signal);
                    handles.push(handle);
                }
                Err(e) => {
                    self.activity.halt();
                    self.activity.finished(Ok(()));
                    spawn_error = Some(SimError(format!("Unable to start actor thread: {e}")));
                }
            }
        }

        if spawn_error.is_none() {
            self.activity.wait_for_quiescence(self.drain);
        }

        debug!(self.top ; "Halting with {} live actors", self.activity.num_live());
        self.activity.halt();
        for signal in &signals {
            wake(signal);
        }
        for handle in handles {
            // Panics are caught inside the thread so the join cannot fail
            let _ = handle.join();
        }
        self.tracker.shutdown();

        if let Some(e) = spawn_error {
            return Err(e);
        }
        match self.activity.take_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
