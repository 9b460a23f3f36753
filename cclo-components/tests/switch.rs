// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use cclo_components::connect_port;
use cclo_components::sink::Sink;
use cclo_components::source::Source;
use cclo_components::switch::{DefaultRouter, Switch};
use cclo_components::types::StreamWord;
use cclo_engine::port::{InPort, OutPort};
use cclo_engine::run_simulation;
use cclo_engine::test_helpers::start_test;

const WIDTH: usize = 8;

/// Messages of `dest + 1` words whose payload bytes all equal `marker`.
fn messages(dests: &[u64], marker: u8) -> Vec<StreamWord> {
    dests
        .iter()
        .flat_map(|dest| {
            let len = (*dest as usize + 1) * WIDTH;
            StreamWord::frame(&vec![marker; len], WIDTH, *dest)
        })
        .collect()
}

/// Split a stream of words into messages.
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

#[test]
fn routes_by_saturated_dest() {
    let mut engine = start_test(file!());
    let top = engine.top();

    const NUM_MASTERS: usize = 3;
    let dests_a = [0, 4, 1, 2, 9, 0];
    let dests_b = [2, 2, 0, 7, 1];

    let source_a = Source::new_and_register(
        &engine,
        top,
        "source_a",
        Some(Box::new(messages(&dests_a, 0xa).into_iter())),
    );
    let source_b = Source::new_and_register(
        &engine,
        top,
        "source_b",
        Some(Box::new(messages(&dests_b, 0xb).into_iter())),
    );
    let switch = Switch::new_and_register(
        &engine,
        top,
        "switch",
        2,
        NUM_MASTERS,
        Box::new(DefaultRouter {}),
    )
    .unwrap();
    let sinks: Vec<_> = (0..NUM_MASTERS)
        .map(|i| Sink::new_and_register(&engine, top, &format!("sink{i}")))
        .collect();

    connect_port!(source_a, tx => switch, rx, 0);
    connect_port!(source_b, tx => switch, rx, 1);
    for (i, sink) in sinks.iter().enumerate() {
        connect_port!(switch, tx, i => sink, rx);
    }

    run_simulation!(engine);

    let mut num_messages = 0;
    for (i, sink) in sinks.iter().enumerate() {
        for message in split(&sink.values()) {
            num_messages += 1;
            let dest = message[0].dest;
            assert_eq!((dest as usize).min(NUM_MASTERS - 1), i);
            assert_eq!(message.len(), dest as usize + 1);

            // The words of one message are never mixed with another
            let marker = message[0].data[0];
            assert!(message.iter().all(|w| w.dest == dest));
            assert!(message.iter().all(|w| w.data.iter().all(|b| *b == marker)));
        }
    }
    assert_eq!(num_messages, dests_a.len() + dests_b.len());
}

#[test]
fn per_source_order_is_kept() {
    let mut engine = start_test(file!());
    let top = engine.top();

    let words: Vec<StreamWord> = (0..20u8)
        .map(|i| StreamWord::from_bytes(&[i], WIDTH, true, 1))
        .collect();
    let source =
        Source::new_and_register(&engine, top, "source", Some(Box::new(words.into_iter())));
    let switch =
        Switch::new_and_register(&engine, top, "switch", 1, 2, Box::new(DefaultRouter {})).unwrap();
    let sink0 = Sink::new_and_register(&engine, top, "sink0");
    let sink1 = Sink::new_and_register(&engine, top, "sink1");

    connect_port!(source, tx => switch, rx, 0);
    connect_port!(switch, tx, 0 => sink0, rx);
    connect_port!(switch, tx, 1 => sink1, rx);

    run_simulation!(engine);

    assert_eq!(sink0.num_sunk(), 0);
    let received: Vec<u8> = sink1.values().iter().map(|w| w.data[0]).collect();
    assert_eq!(received, (0..20).collect::<Vec<u8>>());
}

#[test]
fn waiting_slaves_are_served_in_index_order() {
    let mut engine = start_test(file!());
    let top = engine.top().clone();

    let router = Box::new(DefaultRouter {});
    let switch = Switch::new_and_register(&engine, &top, "switch", 3, 1, router).unwrap();
    let mut inputs: Vec<OutPort<StreamWord>> = (0..3)
        .map(|i| OutPort::new(&top, &format!("input{i}")))
        .collect();
    for (i, input) in inputs.iter_mut().enumerate() {
        input.connect(switch.port_rx_i(i));
    }
    let output = InPort::with_capacity(&top, "output", 1);
    switch.connect_port_tx_i(0, output.state());

    let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let driver_received = received.clone();
    engine.spawn(async move {
        // Hold the master with a three word message from the last slave
        for word in StreamWord::frame(&[2; 3 * WIDTH], WIDTH, 0) {
            inputs[2].put(word).await?;
        }
        let mut markers = vec![output.get().await?.data[0]];

        inputs[1].put(StreamWord::from_bytes(&[1], WIDTH, true, 0)).await?;
        inputs[0].put(StreamWord::from_bytes(&[0], WIDTH, true, 0)).await?;
        for _ in 0..4 {
            markers.push(output.get().await?.data[0]);
        }
        *driver_received.lock().unwrap() = markers;
        Ok(())
    });

    run_simulation!(engine);

    assert_eq!(*received.lock().unwrap(), vec![2, 2, 2, 0, 1]);
}

#[test]
fn empty_switch_is_rejected() {
    let engine = start_test(file!());
    let result = Switch::<StreamWord>::new_and_register(
        &engine,
        engine.top(),
        "switch",
        0,
        2,
        Box::new(DefaultRouter {}),
    );
    assert!(result.is_err());
}
