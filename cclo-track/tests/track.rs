// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::sync::Arc;

use cclo_track::builder::{TrackerConfig, build_tracker};
use cclo_track::entity::{Entity, toplevel};
use cclo_track::test_helpers::check_and_clear;
use cclo_track::{Track, debug, info, test_init, warn};

#[test]
fn hierarchy_names() {
    let (test_tracker, tracker) = test_init!(10);
    let top = toplevel(&tracker, "top");
    let rank = Arc::new(Entity::new(&top, "rank0"));
    let dma = Entity::new(&rank, "dma0_read");

    assert_eq!(dma.path(), "top::rank0::dma0_read");
    assert_eq!(format!("{dma}"), "top::rank0::dma0_read");
    assert_eq!(dma.name, "dma0_read");
    assert_eq!(dma.parent.as_ref().map(|p| p.id), Some(rank.id));
    assert!(top.parent.is_none());
    check_and_clear(
        &test_tracker,
        &[
            "0: created 10, top",
            "10: created 11, top::rank0",
            "11: created 12, top::rank0::dma0_read",
        ],
    );
}

#[test]
fn log_messages_recorded() {
    let (test_tracker, tracker) = test_init!(1);
    let top = toplevel(&tracker, "top");
    check_and_clear(&test_tracker, &["created"]);

    warn!(top ; "seek miss for {}", 3);
    info!(top ; "done");
    check_and_clear(&test_tracker, &["1:WARN: seek miss for 3", "1:INFO: done"]);
}

#[test]
fn text_tracker_filters_by_entity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("emu.log");
    let path_str = path.to_str().unwrap();
    let tracker = build_tracker(&TrackerConfig {
        level: cclo_track::log::Level::Debug,
        filter_regex: ".*dma.*",
        file: Some(path_str),
    })
    .unwrap();

    let top = toplevel(&tracker, "top");
    let dma = Entity::new(&top, "dma1_write");
    let arith = Entity::new(&top, "arith");

    debug!(dma ; "command popped");
    debug!(arith ; "should not appear");
    tracker.shutdown();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("DEBUG: command popped"));
    assert!(!contents.contains("should not appear"));
}

#[test]
fn bad_log_file() {
    let config = TrackerConfig {
        file: Some("/this/directory/does/not/exist/emu.log"),
        ..Default::default()
    };
    assert!(build_tracker(&config).is_err());
}
