// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, select_ready};
use cclo_engine::run_simulation;
use cclo_engine::sim_error;
use cclo_engine::test_helpers::start_test;
use cclo_engine::traits::Runnable;
use cclo_engine::types::{SimResult, lock};

fn connected(engine: &Engine, capacity: usize) -> (OutPort<usize>, InPort<usize>) {
    let rx = InPort::with_capacity(engine.top(), "rx", capacity);
    let mut tx = OutPort::new(engine.top(), "tx");
    tx.connect(rx.state());
    (tx, rx)
}

#[test]
fn values_cross_threads_in_order() {
    let mut engine = start_test(file!());
    const NUM_PUTS: usize = 1000;

    let (tx, rx) = connected(&engine, 4);
    let received = Arc::new(Mutex::new(Vec::new()));

    engine.spawn(async move {
        for i in 0..NUM_PUTS {
            tx.put(i).await?;
        }
        Ok(())
    });
    let sink = received.clone();
    engine.spawn(async move {
        loop {
            let value = rx.get().await?;
            lock(&sink).push(value);
        }
    });

    run_simulation!(engine);
    assert_eq!(*lock(&received), (0..NUM_PUTS).collect::<Vec<_>>());
}

#[test]
fn blocked_actors_are_quiescent() {
    let mut engine = start_test(file!());
    // Nothing ever arrives, the actor stays blocked until teardown
    let (_tx, rx) = connected(&engine, 1);
    engine.spawn(async move {
        rx.get().await?;
        Ok(())
    });
    run_simulation!(engine);
}

#[test]
fn full_channel_is_quiescent() {
    let mut engine = start_test(file!());
    let (tx, _rx) = connected(&engine, 2);
    let sent = Arc::new(Mutex::new(0));
    let count = sent.clone();
    engine.spawn(async move {
        for i in 0..10 {
            tx.put(i).await?;
            *lock(&count) += 1;
        }
        Ok(())
    });
    run_simulation!(engine);
    assert_eq!(*lock(&sent), 2);
}

#[test]
fn first_error_is_returned() {
    let mut engine = start_test(file!());
    engine.spawn(async move { sim_error!("bad tag") });
    run_simulation!(engine, "Error: bad tag");
}

#[test]
fn panic_becomes_error() {
    let mut engine = start_test(file!());
    engine.spawn(async move {
        panic!("lane exploded");
    });
    run_simulation!(engine, "Error: actor-0 panicked: lane exploded");
}

#[test]
fn select_waits_for_any_input() {
    let mut engine = start_test(file!());
    let (tx_a, rx_a) = connected(&engine, 8);
    let (tx_b, rx_b) = connected(&engine, 8);
    let order = Arc::new(Mutex::new(Vec::new()));

    engine.spawn(async move {
        tx_b.put(2).await?;
        tx_b.put(3).await?;
        Ok(())
    });
    engine.spawn(async move {
        tx_a.put(1).await?;
        Ok(())
    });
    let seen = order.clone();
    engine.spawn(async move {
        for _ in 0..3 {
            let index = select_ready(&[&rx_a, &rx_b]).await?;
            let value = if index == 0 {
                rx_a.get().await?
            } else {
                rx_b.get().await?
            };
            lock(&seen).push(value);
        }
        Ok(())
    });

    run_simulation!(engine);
    let mut values = lock(&order).clone();
    values.sort_unstable();
    assert_eq!(values, vec![1, 2, 3]);
}

struct Counter {
    rx: Mutex<Option<InPort<usize>>>,
    total: Mutex<usize>,
}

#[async_trait]
impl Runnable for Counter {
    async fn run(&self) -> SimResult {
        let rx = lock(&self.rx).take().unwrap();
        loop {
            let value = rx.get().await?;
            *lock(&self.total) += value;
        }
    }
}

#[test]
fn registered_runnable_with_drain() {
    let mut engine = start_test(file!());
    engine.set_drain_delay(Duration::from_millis(5));
    let (tx, rx) = connected(&engine, 2);
    let counter = Arc::new(Counter {
        rx: Mutex::new(Some(rx)),
        total: Mutex::new(0),
    });
    engine.register(counter.clone());
    engine.spawn(async move {
        for i in 1..=10 {
            tx.put(i).await?;
        }
        Ok(())
    });
    run_simulation!(engine);
    assert_eq!(*lock(&counter.total), 55);
}
