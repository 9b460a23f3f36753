// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::sync::Arc;

use cclo_components::connect_port;
use cclo_components::sink::Sink;
use cclo_components::source::Source;
use cclo_components::types::{StreamWord, message_bytes};
use cclo_engine::port::{InPort, OutPort};
use cclo_engine::run_simulation;
use cclo_engine::test_helpers::start_test;
use cclo_models::dma::{DmaCommand, DmaRead, DmaStatus, DmaWrite};
use cclo_models::memory::Memory;

const WIDTH: usize = 16;

/// Write `payload` with a command of `length` bytes and then read back
/// `payload.len()` bytes from the same address.
fn write_then_read(payload: &[u8], length: u32) -> (DmaStatus, Vec<u8>, Vec<u8>) {
    let mut engine = start_test(file!());
    let top = engine.top().clone();
    let memory = Arc::new(Memory::new(4096));

    let dma_write = DmaWrite::new_and_register(&engine, &top, "dma_write", &memory, 4);
    let dma_read = DmaRead::new_and_register(&engine, &top, "dma_read", &memory, WIDTH, 4);
    let read_data = Sink::new_and_register(&engine, &top, "read_data");
    connect_port!(dma_read, tx => read_data, rx);

    let mut write_cmd = OutPort::new(&top, "write_cmd");
    let mut write_data = OutPort::new(&top, "write_data");
    let write_sts = InPort::new(&top, "write_sts");
    let mut read_cmd = OutPort::new(&top, "read_cmd");
    let read_sts = InPort::new(&top, "read_sts");
    write_cmd.connect(dma_write.port_cmd());
    write_data.connect(dma_write.port_rx());
    dma_write.connect_port_sts(write_sts.state());
    read_cmd.connect(dma_read.port_cmd());
    dma_read.connect_port_sts(read_sts.state());

    let result = Arc::new(std::sync::Mutex::new(None));
    let driver_result = result.clone();
    let words = StreamWord::frame(payload, WIDTH, 0);
    let read_len = payload.len() as u32;
    engine.spawn(async move {
        write_cmd.put(DmaCommand::new(0x100, length, 1).unwrap()).await?;
        for word in words {
            write_data.put(word).await?;
        }
        let written = write_sts.get().await?;

        read_cmd.put(DmaCommand::new(0x100, read_len, 2).unwrap()).await?;
        let read = read_sts.get().await?;
        assert!(read.okay);
        assert_eq!(read.tag, 2);
        assert_eq!(read.bytes, read_len);
        *driver_result.lock().unwrap() = Some(written);
        Ok(())
    });

    run_simulation!(engine);

    let written = result.lock().unwrap().take().unwrap();
    let read_back = message_bytes(&read_data.values());
    let stored = memory.read(0x100, payload.len()).unwrap();
    (written, read_back, stored)
}

#[test]
fn full_write_reads_back() {
    let payload: Vec<u8> = (0..64).collect();
    let (written, read_back, stored) = write_then_read(&payload, 64);
    assert!(written.okay);
    assert_eq!(written.bytes, 64);
    assert_eq!(written.tag, 1);
    assert_eq!(read_back, payload);
    assert_eq!(stored, payload);
}

#[test]
fn short_write_ends_at_last() {
    let payload: Vec<u8> = (0..40).map(|i| 200 - i).collect();
    let (written, read_back, _) = write_then_read(&payload, 128);
    assert!(written.okay);
    assert!(written.end_of_packet);
    assert_eq!(written.bytes, 40);
    assert_eq!(read_back, payload);
}

#[test]
fn out_of_range_read_is_a_decode_error() {
    let mut engine = start_test(file!());
    let top = engine.top().clone();
    let memory = Arc::new(Memory::new(256));

    let cmds = vec![DmaCommand::new(200, 100, 3).unwrap()];
    let cmd = Source::new_and_register(&engine, &top, "cmd", Some(Box::new(cmds.into_iter())));
    let dma_read = DmaRead::new_and_register(&engine, &top, "dma_read", &memory, WIDTH, 4);
    let data = Sink::new_and_register(&engine, &top, "data");
    let sts = Sink::new_and_register(&engine, &top, "sts");
    connect_port!(cmd, tx => dma_read, cmd);
    connect_port!(dma_read, tx => data, rx);
    connect_port!(dma_read, sts => sts, rx);

    run_simulation!(engine);

    let words = data.values();
    assert_eq!(words.len(), 7);
    assert!(words.iter().all(|w| w.num_valid() == 0));
    assert!(words[6].last);

    let status = sts.values()[0];
    assert!(!status.okay);
    assert!(status.decerr);
    assert_eq!(status.tag, 3);
    assert_eq!(status.bytes, 0);
}

#[test]
fn write_past_end_of_address_space_is_a_decode_error() {
    let mut engine = start_test(file!());
    let top = engine.top().clone();
    let memory = Arc::new(Memory::new(256));

    let cmds = vec![DmaCommand::new(u64::MAX - 4, 64, 4).unwrap()];
    let payload: Vec<u8> = (0..64).collect();
    let words = StreamWord::frame(&payload, 32, 0);
    let cmd = Source::new_and_register(&engine, &top, "cmd", Some(Box::new(cmds.into_iter())));
    let data = Source::new_and_register(&engine, &top, "data", Some(Box::new(words.into_iter())));
    let dma_write = DmaWrite::new_and_register(&engine, &top, "dma_write", &memory, 4);
    let sts = Sink::new_and_register(&engine, &top, "sts");
    connect_port!(cmd, tx => dma_write, cmd);
    connect_port!(data, tx => dma_write, rx);
    connect_port!(dma_write, sts => sts, rx);

    run_simulation!(engine);

    let statuses = sts.values();
    assert_eq!(statuses.len(), 1);
    assert!(!statuses[0].okay);
    assert!(statuses[0].decerr);
    assert!(statuses[0].end_of_packet);
    assert_eq!(statuses[0].bytes, 64);
    assert_eq!(statuses[0].tag, 4);
}
