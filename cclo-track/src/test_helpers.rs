// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! This module provides helper functions for testing logging output
//!
//! The [`TestTracker`] keeps every event in memory so that tests can check
//! which messages a model emitted.

use core::sync::atomic::Ordering;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;

use regex::Regex;

use crate::{Id, Track, lock};

/// A tracker that keeps track events.
pub struct TestTracker {
    events: Mutex<Vec<String>>,

    unique_id: AtomicU64,
}

impl TestTracker {
    /// Create a new [`Tracker`](crate::Tracker) for the tests.
    ///
    /// This keeps the track events in memory for checking later.
    #[must_use]
    pub fn new(initial_id: u64) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            unique_id: AtomicU64::new(initial_id),
        }
    }

    fn add_event(&self, event: String) {
        lock(&self.events).push(event);
    }

    /// Return a copy of all the events seen so far.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    /// Count the events that match a regular expression.
    ///
    /// # Panics
    ///
    /// If `pattern` is not a valid regular expression.
    #[must_use]
    pub fn count_matching(&self, pattern: &str) -> usize {
        let re = Regex::new(pattern).unwrap();
        lock(&self.events).iter().filter(|e| re.is_match(e)).count()
    }
}

impl Track for TestTracker {
    fn unique_id(&self) -> Id {
        let id = self.unique_id.fetch_add(1, Ordering::SeqCst);
        Id(id)
    }

    fn is_entity_enabled(&self, _id: Id, _level: log::Level) -> bool {
        true
    }

    fn add_entity(&self, _id: Id, _entity_name: &str) {
        // Do nothing
    }

    fn create(&self, created_by: Id, id: Id, name: &str) {
        self.add_event(format!("{created_by}: created {id}, {name}"));
    }

    fn connect(&self, connect_from: Id, connect_to: Id) {
        self.add_event(format!("{connect_from}: connect to {connect_to}"));
    }

    fn log(&self, id: Id, level: log::Level, msg: std::fmt::Arguments) {
        self.add_event(format!("{id}:{level}: {msg}"));
    }

    fn shutdown(&self) {
        // Do nothing
    }
}

/// Create a [`TestTracker`] and the [`Tracker`](crate::Tracker) that shares it.
///
/// # Examples
///
/// ```
/// use cclo_track::test_helpers;
///
/// let (test_tracker, tracker) = cclo_track::test_init!(10);
/// let _top = cclo_track::entity::toplevel(&tracker, "top");
/// test_helpers::check_and_clear(&test_tracker, &["0: created 10, top"]);
/// ```
#[macro_export]
macro_rules! test_init {
    ($start_id:expr) => {{
        let test_tracker = std::sync::Arc::new($crate::test_helpers::TestTracker::new($start_id));
        let tracker: $crate::Tracker = test_tracker.clone();
        (test_tracker, tracker)
    }};
}

/// Check and clear the _trace_ and _log_ output
///
/// This function asserts that the logging output lines seen since the start or
/// the last time this function was called match the `expected` regular
/// expressions, and then clears the recorded output.
///
/// # Panics
///
/// If the number of events or any of the events does not match.
pub fn check_and_clear(tracker: &TestTracker, expected: &[&str]) {
    let mut log_contents_ref = lock(&tracker.events);

    assert_eq!(
        expected.len(),
        log_contents_ref.len(),
        "{expected:?} vs {:?}",
        *log_contents_ref
    );

    for (log_expect, actual) in expected.iter().zip(log_contents_ref.iter()) {
        let re = Regex::new(log_expect).unwrap();
        assert!(re.is_match(actual), "{log_expect:?} does not match {actual:?}");
    }

    log_contents_ref.clear();
}
