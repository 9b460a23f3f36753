// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::io::Write;

use cclo_engine::test_helpers::start_test;
use cclo_platform::System;

#[test]
#[should_panic(expected = "serde_yaml::from_str failed")]
fn unknown_field() {
    let mut engine = start_test(file!());
    System::from_string(
        &mut engine,
        "
datapath_width: 64
ranks: []
",
    )
    .unwrap();
}

#[test]
#[should_panic(expected = "Unable to parse 12Q as Byte string")]
fn bad_byte_string() {
    let mut engine = start_test(file!());
    System::from_string(
        &mut engine,
        "
ranks:
  - ip: 10.0.0.1
    memory_bytes: 12Q
    rx_buffers: { count: 4, bytes: 1KiB, base_address: 0 }
",
    )
    .unwrap();
}

#[test]
#[should_panic(expected = "at least one rank")]
fn no_ranks() {
    let mut engine = start_test(file!());
    System::from_string(&mut engine, "ranks: []\n").unwrap();
}

#[test]
#[should_panic(expected = "10.0.0.1 is used by more than one rank")]
fn duplicate_address() {
    let mut engine = start_test(file!());
    System::from_string(
        &mut engine,
        "
ranks:
  - ip: 10.0.0.1
    memory_bytes: 64KiB
    rx_buffers: { count: 4, bytes: 1KiB, base_address: 0x8000 }
  - ip: 10.0.0.1
    memory_bytes: 64KiB
    rx_buffers: { count: 4, bytes: 1KiB, base_address: 0x8000 }
",
    )
    .unwrap();
}

#[test]
#[should_panic(expected = "invalid address '10.0.0'")]
fn bad_address() {
    let mut engine = start_test(file!());
    System::from_string(
        &mut engine,
        "
ranks:
  - ip: 10.0.0
    memory_bytes: 64KiB
    rx_buffers: { count: 4, bytes: 1KiB, base_address: 0x8000 }
",
    )
    .unwrap();
}

#[test]
#[should_panic(expected = "rank 0: receive buffers of 512B cannot hold a 1024B packet")]
fn buffers_smaller_than_packets() {
    let mut engine = start_test(file!());
    System::from_string(
        &mut engine,
        "
ranks:
  - ip: 10.0.0.1
    memory_bytes: 64KiB
    rx_buffers: { count: 4, bytes: 512, base_address: 0x8000 }
",
    )
    .unwrap();
}

/// Two ranks whose second has `count` 1KiB buffers in the top 16KiB of its
/// memory.
fn buffers_at_top_of_memory(count: u32) -> String {
    format!(
        "
ranks:
  - ip: 10.0.0.1
    memory_bytes: 64KiB
    rx_buffers: {{ count: 4, bytes: 1KiB, base_address: 0xc000 }}
  - ip: 10.0.0.2
    memory_bytes: 64KiB
    rx_buffers: {{ count: {count}, bytes: 1KiB, base_address: 0xc000 }}
"
    )
}

#[test]
#[should_panic(
    expected = "rank 1: 17 receive buffers of 1024B at 0xc000 do not fit in 65536B of memory"
)]
fn buffers_outside_memory() {
    let mut engine = start_test(file!());
    System::from_string(&mut engine, &buffers_at_top_of_memory(17)).unwrap();
}

#[test]
fn buffers_may_fill_memory() {
    let mut engine = start_test(file!());
    let system = System::from_string(&mut engine, &buffers_at_top_of_memory(16)).unwrap();
    assert_eq!(system.num_ranks(), 2);
}

#[test]
#[should_panic(expected = "is not a whole number of 64-bit elements")]
fn datapath_too_narrow_for_arithmetic() {
    let mut engine = start_test(file!());
    System::from_string(
        &mut engine,
        "
datapath_bytes: 28
max_packet_bytes: 252
max_frame_words: 9
ranks:
  - ip: 10.0.0.1
    memory_bytes: 64KiB
    rx_buffers: { count: 4, bytes: 1KiB, base_address: 0x8000 }
",
    )
    .unwrap();
}

#[test]
#[should_panic(expected = "Unable to read")]
fn missing_file() {
    let mut engine = start_test(file!());
    let dir = tempfile::tempdir().unwrap();
    System::from_file(&mut engine, &dir.path().join("missing.yaml")).unwrap();
}

#[test]
fn from_file() {
    let mut engine = start_test(file!());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "
transport: tcp
kernel_bytes: 16
ranks:
  - ip: 10.0.0.1
    memory_bytes: 64KiB
    rx_buffers: {{ count: 4, bytes: 1KiB, base_address: 0x8000 }}
  - ip: 10.0.0.2
    memory_bytes: 64KiB
    rx_buffers: {{ count: 4, bytes: 1KiB, base_address: 0x8000 }}
"
    )
    .unwrap();

    let system = System::from_file(&mut engine, file.path()).unwrap();
    assert_eq!(system.num_ranks(), 2);
    assert!(system.network().is_some());
    assert!(system.rank(1).unwrap().sessions().is_some());
    assert!(system.rank(2).is_err());
    assert_eq!(system.ip(1).unwrap(), 0x0a00_0002);
}
