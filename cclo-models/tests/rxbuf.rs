// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::sync::{Arc, Mutex};

use cclo_components::connect_port;
use cclo_components::types::StreamWord;
use cclo_engine::port::{InPort, OutPort};
use cclo_engine::run_simulation;
use cclo_engine::test_helpers::start_test;
use cclo_models::dma::DmaWrite;
use cclo_models::eth::EthHeader;
use cclo_models::memory::Memory;
use cclo_models::rxbuf::{
    RxBufferDescriptor, RxBufferManager, RxBufferState, RxSeekRequest, RxSeekResult, RxStatus,
};

const WIDTH: usize = 32;

#[test]
fn buffer_is_found_after_it_is_landed() {
    let mut engine = start_test(file!());
    let top = engine.top().clone();
    let memory = Arc::new(Memory::new(0x2000));

    let manager = RxBufferManager::new_and_register(&engine, &top, 0x1000, 2, 64).unwrap();
    let dma = DmaWrite::new_and_register(&engine, &top, "dma0_write", &memory, 4);
    connect_port!(manager.enqueue, dma_cmd => dma, cmd);
    connect_port!(manager.enqueue, inflight => manager.dequeue, inflight);
    connect_port!(dma, sts => manager.dequeue, dma_sts);

    let mut data = OutPort::new(&top, "data");
    let mut rx_status = OutPort::new(&top, "rx_status");
    let mut seek_req = OutPort::new(&top, "seek_req");
    let seek_ack = InPort::new(&top, "seek_ack");
    let mut release = OutPort::new(&top, "release");
    data.connect(dma.port_rx());
    rx_status.connect(manager.dequeue.port_rx_status());
    seek_req.connect(manager.seek.port_seek_req());
    manager.seek.connect_port_seek_ack(seek_ack.state());
    release.connect(manager.seek.port_release());

    let payload: Vec<u8> = (0..20).map(|i| i * 3).collect();
    let header = EthHeader {
        count: 20,
        tag: 5,
        src: 1,
        seqn: 0,
        ..EthHeader::default()
    };

    let found: Arc<Mutex<Option<RxBufferDescriptor>>> = Arc::new(Mutex::new(None));
    let driver_found = found.clone();
    let words = StreamWord::frame(&payload, WIDTH, 0);
    engine.spawn(async move {
        let request = RxSeekRequest {
            src: 1,
            tag: 5,
            seqn: 0,
            after_generation: None,
        };
        seek_req.put(request).await?;
        let generation = match seek_ack.get().await? {
            RxSeekResult::NotFound { generation } => generation,
            RxSeekResult::Found(desc) => panic!("unexpected {desc}"),
        };
        assert_eq!(generation, 0);

        // Releasing a buffer that holds nothing is ignored
        release.put(1).await?;

        // Deferred until the packet has landed
        seek_req
            .put(RxSeekRequest {
                after_generation: Some(generation),
                ..request
            })
            .await?;
        for word in words {
            data.put(word).await?;
        }
        rx_status
            .put(RxStatus {
                header,
                bytes: 20,
                ok: true,
                session: None,
            })
            .await?;

        let RxSeekResult::Found(desc) = seek_ack.get().await? else {
            panic!("seek was not answered with a buffer");
        };
        release.put(desc.index).await?;
        *driver_found.lock().unwrap() = Some(desc);
        Ok(())
    });

    run_simulation!(engine);

    let desc = found.lock().unwrap().take().unwrap();
    assert_eq!(desc.index, 0);
    assert_eq!(desc.address, 0x1000);
    assert_eq!(desc.bytes, 20);
    assert!(desc.ok);
    assert_eq!(desc.state, RxBufferState::Sought);
    assert_eq!(memory.read(desc.address, 20).unwrap(), payload);

    // Both buffers are claimed again
    assert_eq!(manager.state(0), Some(RxBufferState::Enqueued));
    assert_eq!(manager.state(1), Some(RxBufferState::Enqueued));
}
