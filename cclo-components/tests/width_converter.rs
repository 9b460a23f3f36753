// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use cclo_components::connect_port;
use cclo_components::sink::Sink;
use cclo_components::source::Source;
use cclo_components::types::{StreamWord, message_bytes};
use cclo_components::width_converter::WidthConverter;
use cclo_engine::engine::Engine;
use cclo_engine::run_simulation;
use cclo_engine::test_helpers::start_test;
use cclo_track::tracker::dev_null_tracker;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn split(words: &[StreamWord]) -> Vec<Vec<StreamWord>> {
    let mut messages = Vec::new();
    let mut current = Vec::new();
    for word in words {
        current.push(word.clone());
        if word.last {
            messages.push(std::mem::take(&mut current));
        }
    }
    assert!(current.is_empty(), "trailing words without last");
    messages
}

/// Convert messages from `a` to `b` and back again and return what arrives.
fn there_and_back(
    engine: &mut Engine,
    a: usize,
    b: usize,
    messages: &[Vec<u8>],
) -> Vec<StreamWord> {
    let top = engine.top().clone();
    let words: Vec<StreamWord> = messages
        .iter()
        .flat_map(|m| StreamWord::frame(m, a, 0))
        .collect();

    let source =
        Source::new_and_register(engine, &top, "source", Some(Box::new(words.into_iter())));
    let there = WidthConverter::new_and_register(engine, &top, "there", a, b).unwrap();
    let back = WidthConverter::new_and_register(engine, &top, "back", b, a).unwrap();
    let sink = Sink::new_and_register(engine, &top, "sink");

    connect_port!(source, tx => there, rx);
    connect_port!(there, tx => back, rx);
    connect_port!(back, tx => sink, rx);

    engine.run().unwrap();
    sink.values()
}

#[test]
fn up_packs_until_last() {
    let mut engine = start_test(file!());
    let top = engine.top();

    let bytes: Vec<u8> = (0..40).collect();
    let words = StreamWord::frame(&bytes, 8, 6);
    let source =
        Source::new_and_register(&engine, top, "source", Some(Box::new(words.into_iter())));
    let up = WidthConverter::new_and_register(&engine, top, "up", 8, 32).unwrap();
    let sink = Sink::new_and_register(&engine, top, "sink");

    connect_port!(source, tx => up, rx);
    connect_port!(up, tx => sink, rx);

    run_simulation!(engine);

    let out = sink.values();
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].num_valid(), 32);
    assert!(!out[0].last);
    assert_eq!(out[1].num_valid(), 8);
    assert!(out[1].last);
    assert!(out.iter().all(|w| w.dest == 6 && w.width_bytes() == 32));
    assert_eq!(message_bytes(&out), bytes);
}

#[test]
fn down_stops_at_short_slice() {
    let mut engine = start_test(file!());
    let top = engine.top();

    let bytes: Vec<u8> = (0..20).collect();
    let words = StreamWord::frame(&bytes, 64, 2);
    let source =
        Source::new_and_register(&engine, top, "source", Some(Box::new(words.into_iter())));
    let down = WidthConverter::new_and_register(&engine, top, "down", 64, 8).unwrap();
    let sink = Sink::new_and_register(&engine, top, "sink");

    connect_port!(source, tx => down, rx);
    connect_port!(down, tx => sink, rx);

    run_simulation!(engine);

    let out = sink.values();
    assert_eq!(out.len(), 3);
    assert_eq!(out.iter().filter(|w| w.last).count(), 1);
    assert!(out[2].last);
    assert_eq!(out[2].num_valid(), 4);
    assert_eq!(message_bytes(&out), bytes);
}

#[test]
fn converting_there_and_back_is_lossless() {
    let widths = [4, 8, 12, 16, 24, 64];
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for a in widths {
        for b in widths {
            let messages: Vec<Vec<u8>> = (0..4)
                .map(|_| {
                    let len = rng.gen_range(0..200);
                    (0..len).map(|_| rng.r#gen()).collect()
                })
                .collect();

            let mut engine = Engine::new(&dev_null_tracker());
            let received = split(&there_and_back(&mut engine, a, b, &messages));

            assert_eq!(received.len(), messages.len(), "{a}B <=> {b}B");
            for (got, expected) in received.iter().zip(messages.iter()) {
                assert_eq!(&message_bytes(got), expected, "{a}B <=> {b}B");
                assert!(got.iter().all(|w| w.width_bytes() == a));
                assert_eq!(got.len(), StreamWord::frame(expected, a, 0).len());
            }
        }
    }
}

#[test]
fn zero_width_fails_at_setup() {
    let engine = start_test(file!());
    assert!(WidthConverter::new_and_register(&engine, engine.top(), "dwc", 16, 0).is_err());
}
