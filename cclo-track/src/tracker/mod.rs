// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Define the [`Track`] trait a number of [`Tracker`]s.

/// Include the /dev/null tracker.
pub mod dev_null;
/// Include the text-based tracker.
pub mod text;

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use dev_null::DevNullTracker;
use regex::Regex;
pub use text::TextTracker;

use crate::{Id, ROOT, lock};

/// Error used to return configuration errors
#[derive(Debug)]
pub struct TrackConfigError(pub String);

impl std::fmt::Display for TrackConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TrackConfigError {}

/// This is the interface that is supported by all [`Tracker`]s.
pub trait Track {
    /// Allocate a new global ID
    fn unique_id(&self) -> Id;

    /// Determine whether tracking is enabled, and at what level for an
    /// entity looked up by its ID.
    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool;

    /// Record an entity being created.
    fn add_entity(&self, id: Id, entity_name: &str);

    /// Track when an entity with the given ID is created.
    fn create(&self, created_by: Id, created_obj: Id, name: &str);

    /// Track when an entity is connected to another entity
    fn connect(&self, connect_from: Id, connect_to: Id);

    /// Track a log message of the given level.
    fn log(&self, msg_by: Id, level: log::Level, msg: std::fmt::Arguments);

    /// Perform any pre-exit shutdown/cleanup
    fn shutdown(&self);
}

/// The type of a [`Tracker`] that is shared across entities.
pub type Tracker = Arc<dyn Track + Send + Sync>;

/// Create a [`Tracker`] that prints all track events to `stdout`.
#[must_use]
pub fn stdout_tracker(level: log::Level) -> Tracker {
    let entity_manger = EntityManager::new(level);
    let stdout_writer = Box::new(std::io::BufWriter::new(io::stdout()));
    let tracker: Tracker = Arc::new(TextTracker::new(entity_manger, stdout_writer));
    tracker
}

/// Create a [`Tracker`] that suppresses all track events.
#[must_use]
pub fn dev_null_tracker() -> Tracker {
    let tracer: Tracker = Arc::new(DevNullTracker {});
    tracer
}

/// The [`EntityManager`] is responsible for determining entity log levels.
///
/// This manager is also used to allocate unique [`Id`] values.
pub struct EntityManager {
    /// Level of tracking events to output.
    default_entity_level: log::Level,

    /// List of regular expressions mapping entity names to log levels.
    regex_to_entity_level: Vec<(Regex, log::Level)>,

    /// Used to assign unique IDs.
    unique_id: AtomicU64,

    /// Keep track of entities that have log levels different to the default.
    log_entity_lookup: Mutex<HashMap<Id, log::Level>>,
}

impl EntityManager {
    /// Constructor with default [`log::Level`]
    #[must_use]
    pub fn new(default_entity_level: log::Level) -> Self {
        Self {
            default_entity_level,
            regex_to_entity_level: Vec::new(),
            unique_id: AtomicU64::new(ROOT.0 + 1),
            log_entity_lookup: Mutex::new(HashMap::new()),
        }
    }

    fn unique_id(&self) -> Id {
        Id(self.unique_id.fetch_add(1, Ordering::Relaxed))
    }

    fn is_log_enabled_at_level(&self, id: Id, level: log::Level) -> bool {
        match lock(&self.log_entity_lookup).get(&id) {
            None => level <= self.default_entity_level,
            Some(entity_level) => level <= *entity_level,
        }
    }

    fn add_entity(&self, id: Id, entity_name: &str) {
        let entity_level = self.log_level_for(entity_name);
        if entity_level != self.default_entity_level {
            lock(&self.log_entity_lookup).insert(id, entity_level);
        }
    }

    fn log_level_for(&self, entity_name: &str) -> log::Level {
        for (regex, level) in &self.regex_to_entity_level {
            if regex.is_match(entity_name) {
                return *level;
            }
        }
        self.default_entity_level
    }

    /// Add a filter regular expression for setting the level of matching
    /// entities.
    ///
    /// Filters are checked in the order they were added and the first match
    /// wins.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cclo_track::tracker::EntityManager;
    /// let mut manager = EntityManager::new(log::Level::Warn);
    /// manager.add_entity_level_filter(".*dma.*", log::Level::Trace).unwrap();
    /// ```
    pub fn add_entity_level_filter(
        &mut self,
        regex_str: &str,
        level: log::Level,
    ) -> Result<(), TrackConfigError> {
        let regex = Regex::new(regex_str)
            .map_err(|e| TrackConfigError(format!("Failed to parse regex {regex_str}:\n{e}\n")))?;
        self.regex_to_entity_level.push((regex, level));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_paths() -> Vec<&'static str> {
        vec![
            "top",
            "top::rank0",
            "top::rank0::dma0_read",
            "top::rank0::dma1_write",
        ]
    }

    #[test]
    fn no_filters() {
        let manager = EntityManager::new(log::Level::Error);
        for p in entity_paths() {
            assert_eq!(manager.log_level_for(p), log::Level::Error);
        }
    }

    #[test]
    fn first_filter_wins() {
        let mut manager = EntityManager::new(log::Level::Error);
        manager
            .add_entity_level_filter(r".*dma0.*", log::Level::Info)
            .unwrap();
        manager
            .add_entity_level_filter(r".*rank0.*", log::Level::Trace)
            .unwrap();
        manager
            .add_entity_level_filter(r"top.*", log::Level::Warn)
            .unwrap();

        let expected_levels = [
            log::Level::Warn,
            log::Level::Trace,
            log::Level::Info,
            log::Level::Trace,
        ];

        for (i, p) in entity_paths().iter().enumerate() {
            assert_eq!(manager.log_level_for(p), expected_levels[i]);
        }
    }

    #[test]
    fn levels_follow_registered_entities() {
        let mut manager = EntityManager::new(log::Level::Warn);
        manager
            .add_entity_level_filter(r".*write", log::Level::Debug)
            .unwrap();
        let reader = manager.unique_id();
        let writer = manager.unique_id();
        manager.add_entity(reader, "top::rank0::dma0_read");
        manager.add_entity(writer, "top::rank0::dma1_write");

        assert!(!manager.is_log_enabled_at_level(reader, log::Level::Debug));
        assert!(manager.is_log_enabled_at_level(reader, log::Level::Warn));
        assert!(manager.is_log_enabled_at_level(writer, log::Level::Debug));
        assert!(!manager.is_log_enabled_at_level(writer, log::Level::Trace));
    }

    #[test]
    fn bad_regex() {
        let mut manager = EntityManager::new(log::Level::Warn);
        assert!(manager.add_entity_level_filter("(", log::Level::Info).is_err());
    }

    #[test]
    fn ids() {
        let manager = EntityManager::new(log::Level::Error);
        for i in 0..10 {
            assert_eq!(manager.unique_id(), Id(i + ROOT.0 + 1));
        }
    }
}
