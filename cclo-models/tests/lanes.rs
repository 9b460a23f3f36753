// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use cclo_components::connect_port;
use cclo_components::segmenter::{Segmenter, SegmenterCmd};
use cclo_components::sink::Sink;
use cclo_components::source::Source;
use cclo_components::types::{StreamWord, message_bytes};
use cclo_engine::run_simulation;
use cclo_engine::test_helpers::start_test;
use cclo_models::arithmetic::{ArithOp, ArithmeticLane};
use cclo_models::compression::{CastMode, CompressionLane};
use cclo_models::external_kernel::{AddByte, ExternalKernel};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn i32_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[test]
fn arithmetic_sums_by_type() {
    let mut engine = start_test(file!());
    let top = engine.top().clone();
    const WIDTH: usize = 8;

    let mut op0 = Vec::new();
    let mut op1 = Vec::new();
    op0.extend(StreamWord::frame(&f32_bytes(&[1.0, 2.0]), WIDTH, ArithOp::F32 as u64));
    op1.extend(StreamWord::frame(&f32_bytes(&[3.0, 4.0]), WIDTH, 0));
    // No such operation
    op0.extend(StreamWord::frame(&[1; 16], WIDTH, 9));
    op1.extend(StreamWord::frame(&[1; 16], WIDTH, 0));
    op0.extend(StreamWord::frame(&i32_bytes(&[5, 5]), WIDTH, ArithOp::I32 as u64));
    op1.extend(StreamWord::frame(&i32_bytes(&[2, 3]), WIDTH, 0));

    let source0 = Source::new_and_register(&engine, &top, "op0", Some(Box::new(op0.into_iter())));
    let source1 = Source::new_and_register(&engine, &top, "op1", Some(Box::new(op1.into_iter())));
    let lane = ArithmeticLane::new_and_register(&engine, &top, "arith", WIDTH).unwrap();
    let sink = Sink::new_and_register(&engine, &top, "res");
    connect_port!(source0, tx => lane, op0);
    connect_port!(source1, tx => lane, op1);
    connect_port!(lane, tx => sink, rx);

    run_simulation!(engine);

    let words = sink.values();
    assert_eq!(words.len(), 2);
    assert_eq!(message_bytes(&words[..1]), f32_bytes(&[4.0, 6.0]));
    assert_eq!(message_bytes(&words[1..]), i32_bytes(&[7, 8]));
    assert!(words.iter().all(|w| w.last));
    assert_eq!(lane.num_rejected(), 1);
}

#[test]
fn arithmetic_rejects_odd_widths() {
    let engine = start_test(file!());
    assert!(ArithmeticLane::new_and_register(&engine, engine.top(), "arith", 12).is_err());
}

#[test]
fn upcast_then_downcast_is_identity() {
    let mut engine = start_test(file!());
    let top = engine.top().clone();
    const WIDTH: usize = 32;

    // Sixteen 16-bit slices per word, with a short final word
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let bytes: Vec<u8> = (0..3 * WIDTH + 10).map(|_| rng.r#gen()).collect();
    let words = StreamWord::frame(&bytes, WIDTH, CastMode::Up as u64);

    let cmds = vec![SegmenterCmd {
        dest: CastMode::Down as u64,
        num_words: None,
        emit_status: false,
    }];
    let source =
        Source::new_and_register(&engine, &top, "narrow", Some(Box::new(words.into_iter())));
    let up = CompressionLane::new_and_register(&engine, &top, "up", WIDTH).unwrap();
    let seg_cmd =
        Source::new_and_register(&engine, &top, "seg_cmd", Some(Box::new(cmds.into_iter())));
    let retag = Segmenter::new_and_register(&engine, &top, "retag", 64).unwrap();
    let down = CompressionLane::new_and_register(&engine, &top, "down", WIDTH).unwrap();
    let sink = Sink::new_and_register(&engine, &top, "sink");

    connect_port!(source, tx => up, rx);
    connect_port!(up, tx => retag, rx);
    connect_port!(seg_cmd, tx => retag, cmd);
    connect_port!(retag, tx => down, rx);
    connect_port!(down, tx => sink, rx);

    run_simulation!(engine);

    let out = sink.values();
    assert_eq!(message_bytes(&out), bytes);
    assert_eq!(out.len(), 4);
    assert!(out[3].last);
    assert!(out[..3].iter().all(|w| !w.last));
}

#[test]
fn downcast_keeps_upper_halves() {
    let mut engine = start_test(file!());
    let top = engine.top().clone();
    const WIDTH: usize = 8;

    let a = StreamWord::from_bytes(&[0, 0, 1, 2, 0, 0, 3, 4], WIDTH, false, CastMode::Down as u64);
    let b = StreamWord::from_bytes(&[9, 9, 5, 6, 9, 9, 7, 8], WIDTH, true, CastMode::Down as u64);
    let source =
        Source::new_and_register(&engine, &top, "wide", Some(Box::new(vec![a, b].into_iter())));
    let lane = CompressionLane::new_and_register(&engine, &top, "down", WIDTH).unwrap();
    let sink = Sink::new_and_register(&engine, &top, "sink");
    connect_port!(source, tx => lane, rx);
    connect_port!(lane, tx => sink, rx);

    run_simulation!(engine);

    let out = sink.values();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert!(out[0].last);
}

#[test]
fn compression_drops_unsupported_modes() {
    let mut engine = start_test(file!());
    let top = engine.top().clone();
    const WIDTH: usize = 8;

    let mut words = StreamWord::frame(&[1; 12], WIDTH, 3);
    words.extend(StreamWord::frame(&[2; 12], WIDTH, CastMode::Pass as u64));
    let source =
        Source::new_and_register(&engine, &top, "source", Some(Box::new(words.into_iter())));
    let lane = CompressionLane::new_and_register(&engine, &top, "lane", WIDTH).unwrap();
    let sink = Sink::new_and_register(&engine, &top, "sink");
    connect_port!(source, tx => lane, rx);
    connect_port!(lane, tx => sink, rx);

    run_simulation!(engine);

    assert_eq!(message_bytes(&sink.values()), vec![2; 12]);
    assert_eq!(lane.num_rejected(), 1);
}

#[test]
fn kernel_clears_dest() {
    let mut engine = start_test(file!());
    let top = engine.top().clone();

    let words = StreamWord::frame(&[10, 20, 30, 40, 50], 4, 8);
    let source =
        Source::new_and_register(&engine, &top, "source", Some(Box::new(words.into_iter())));
    let kernel = ExternalKernel::new_and_register(&engine, &top, "kernel", Box::new(AddByte(1)));
    let sink = Sink::new_and_register(&engine, &top, "sink");
    connect_port!(source, tx => kernel, rx);
    connect_port!(kernel, tx => sink, rx);

    run_simulation!(engine);

    let out = sink.values();
    assert_eq!(message_bytes(&out), vec![11, 21, 31, 41, 51]);
    assert!(out.iter().all(|w| w.dest == 0));
    assert!(out[1].last);
}
