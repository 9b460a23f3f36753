// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use cclo_components::connect_port;
use cclo_components::segmenter::{Segmenter, SegmenterCmd, SegmenterStatus};
use cclo_components::sink::Sink;
use cclo_components::source::Source;
use cclo_components::types::StreamWord;
use cclo_engine::run_simulation;
use cclo_engine::test_helpers::start_test;

const WIDTH: usize = 8;

fn lasts(words: &[StreamWord]) -> Vec<usize> {
    words
        .iter()
        .enumerate()
        .filter_map(|(i, w)| w.last.then_some(i))
        .collect()
}

#[test]
fn counted_job_is_split_into_frames() {
    let mut engine = start_test(file!());
    let top = engine.top();

    // One input message of 5 words whose last flag must be ignored
    let words = StreamWord::frame(&[7; 5 * WIDTH], WIDTH, 0);
    let cmds = vec![SegmenterCmd {
        dest: 3,
        num_words: Some(5),
        emit_status: true,
    }];

    let data = Source::new_and_register(&engine, top, "data", Some(Box::new(words.into_iter())));
    let cmd = Source::new_and_register(&engine, top, "cmd", Some(Box::new(cmds.into_iter())));
    let segmenter = Segmenter::new_and_register(&engine, top, "seg", 2).unwrap();
    let sink = Sink::new_and_register(&engine, top, "sink");
    let sts = Sink::new_and_register(&engine, top, "sts");

    connect_port!(data, tx => segmenter, rx);
    connect_port!(cmd, tx => segmenter, cmd);
    connect_port!(segmenter, tx => sink, rx);
    connect_port!(segmenter, sts => sts, rx);

    run_simulation!(engine);

    let out = sink.values();
    assert_eq!(out.len(), 5);
    assert_eq!(lasts(&out), vec![1, 3, 4]);
    assert!(out.iter().all(|w| w.dest == 3));
    assert_eq!(
        sts.values(),
        vec![SegmenterStatus {
            completed: 1,
            words: 5
        }]
    );
    assert_eq!(segmenter.completed(), 1);
}

#[test]
fn message_jobs_follow_input_framing() {
    let mut engine = start_test(file!());
    let top = engine.top();

    let mut words = StreamWord::frame(&[1; 3 * WIDTH], WIDTH, 0);
    words.extend(StreamWord::frame(&[2; 7 * WIDTH], WIDTH, 0));
    let cmds = vec![
        SegmenterCmd {
            dest: 1,
            num_words: None,
            emit_status: false,
        },
        SegmenterCmd {
            dest: 2,
            num_words: None,
            emit_status: true,
        },
    ];

    let data = Source::new_and_register(&engine, top, "data", Some(Box::new(words.into_iter())));
    let cmd = Source::new_and_register(&engine, top, "cmd", Some(Box::new(cmds.into_iter())));
    let segmenter = Segmenter::new_and_register(&engine, top, "seg", 4).unwrap();
    let sink = Sink::new_and_register(&engine, top, "sink");
    let sts = Sink::new_and_register(&engine, top, "sts");

    connect_port!(data, tx => segmenter, rx);
    connect_port!(cmd, tx => segmenter, cmd);
    connect_port!(segmenter, tx => sink, rx);
    connect_port!(segmenter, sts => sts, rx);

    run_simulation!(engine);

    let out = sink.values();
    assert_eq!(out.len(), 10);
    assert_eq!(lasts(&out), vec![2, 6, 9]);
    assert!(out[..3].iter().all(|w| w.dest == 1));
    assert!(out[3..].iter().all(|w| w.dest == 2));

    // Only the second job reports, but both are counted
    assert_eq!(
        sts.values(),
        vec![SegmenterStatus {
            completed: 2,
            words: 7
        }]
    );
}

#[test]
fn zero_frame_size_is_rejected() {
    let engine = start_test(file!());
    assert!(Segmenter::new_and_register(&engine, engine.top(), "seg", 0).is_err());
}
