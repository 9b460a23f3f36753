// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Named nodes of the emulated system.
//!
//! Every rank, block and port owns an [`Entity`]. Entities form a tree below
//! the one returned by [`toplevel`], so a port is named after the block and
//! rank it belongs to, e.g. `top::rank1::dma0_write::rx`.
//!
//! Actors run on their own threads, so entities are shared as `Arc<Entity>`
//! and all of them hold a clone of the same [`Tracker`].

use std::fmt;
use std::sync::Arc;

use crate::{Id, Tracker, create};

const SEPARATOR: &str = "::";

/// One node of the entity tree.
///
/// Log macros take an entity so that each message carries the [`Id`] of its
/// source and is filtered by the level set for that entity's path.
pub struct Entity {
    pub name: String,

    /// `None` only for the top of the tree.
    pub parent: Option<Arc<Entity>>,

    pub id: Id,

    /// Shared by the whole tree.
    pub tracker: Tracker,

    path: String,
}

impl Entity {
    /// Add a child called `name` below `parent` and report its creation.
    #[must_use]
    pub fn new(parent: &Arc<Entity>, name: &str) -> Self {
        let path = format!("{}{SEPARATOR}{name}", parent.path);
        let tracker = parent.tracker.clone();
        let id = tracker.unique_id();
        tracker.add_entity(id, &path);

        let entity = Self {
            name: name.to_string(),
            parent: Some(parent.clone()),
            id,
            tracker,
            path,
        };
        create!(entity);
        entity
    }

    /// Names from the top of the tree down to this entity.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("path", &self.path)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Create the root of an entity tree. Every other entity descends from it.
pub fn toplevel(tracker: &Tracker, name: &str) -> Arc<Entity> {
    let id = tracker.unique_id();
    tracker.add_entity(id, name);
    let top = Arc::new(Entity {
        name: name.to_string(),
        parent: None,
        id,
        tracker: tracker.clone(),
        path: name.to_string(),
    });
    create!(top);
    top
}
