// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use cclo_components::connect_port;
use cclo_components::mux::Mux;
use cclo_components::sink::Sink;
use cclo_components::source::Source;
use cclo_components::types::StreamWord;
use cclo_engine::run_simulation;
use cclo_engine::test_helpers::start_test;

const WIDTH: usize = 4;

#[test]
fn messages_are_not_interleaved() {
    let mut engine = start_test(file!());
    let top = engine.top();

    const NUM_MESSAGES: usize = 10;
    const MESSAGE_BYTES: usize = 5 * WIDTH;
    let stream = |dest: u64| -> Vec<StreamWord> {
        (0..NUM_MESSAGES)
            .flat_map(|_| StreamWord::frame(&[dest as u8; MESSAGE_BYTES], WIDTH, dest))
            .collect()
    };

    let source0 =
        Source::new_and_register(&engine, top, "source0", Some(Box::new(stream(0).into_iter())));
    let source1 =
        Source::new_and_register(&engine, top, "source1", Some(Box::new(stream(1).into_iter())));
    let mux = Mux::new_and_register(&engine, top, "mux");
    let sink = Sink::new_and_register(&engine, top, "sink");

    connect_port!(source0, tx => mux, rx0);
    connect_port!(source1, tx => mux, rx1);
    connect_port!(mux, tx => sink, rx);

    run_simulation!(engine);

    let words = sink.values();
    assert_eq!(words.len(), 2 * NUM_MESSAGES * 5);
    for message in words.chunks(5) {
        let dest = message[0].dest;
        assert!(message.iter().all(|w| w.dest == dest));
        assert!(message[4].last);
        assert!(message[..4].iter().all(|w| !w.last));
    }
    for dest in 0..2 {
        assert_eq!(words.iter().filter(|w| w.dest == dest).count(), NUM_MESSAGES * 5);
    }
}
