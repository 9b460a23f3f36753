// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Attach connection-oriented packets to receive buffers.
//!
//! On the connectionless path the depacketizer reports an
//! [`RxStatus`] for every packet itself. Here the header arrives as a
//! [`SessionNotification`] instead, and the [`RxSessionAdapter`] turns it
//! into the status the [`RxDequeue`](crate::rxbuf::RxDequeue) expects while
//! recording which rank each session belongs to.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_components::{connect_tx, take_option};
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, PortState};
use cclo_engine::traits::Runnable;
use cclo_engine::types::SimResult;
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::{debug, lock};

use crate::rxbuf::RxStatus;
use crate::tcp::{SessionNotification, SharedSessionTable};

#[derive(EntityGet, EntityDisplay)]
pub struct RxSessionAdapter {
    entity: Arc<Entity>,
    sessions: SharedSessionTable,
    notif: InPort<SessionNotification>,
    rx_status: Mutex<Option<OutPort<RxStatus>>>,
}

impl RxSessionAdapter {
    #[must_use]
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        sessions: &SharedSessionTable,
    ) -> Arc<Self> {
        let entity = Arc::new(Entity::new(parent, name));
        let notif = InPort::new(&entity, "notif");
        let rx_status = OutPort::new(&entity, "rx_status");
        let rc_self = Arc::new(Self {
            entity,
            sessions: sessions.clone(),
            notif,
            rx_status: Mutex::new(Some(rx_status)),
        });
        engine.register(rc_self.clone());
        rc_self
    }

    #[must_use]
    pub fn port_notif(&self) -> Arc<PortState<SessionNotification>> {
        self.notif.state()
    }

    pub fn connect_port_rx_status(&self, port_state: Arc<PortState<RxStatus>>) {
        connect_tx!(self.rx_status, connect ; port_state);
    }
}

#[async_trait]
impl Runnable for RxSessionAdapter {
    async fn run(&self) -> SimResult {
        let rx_status = take_option!(self.rx_status)?;

        loop {
            let SessionNotification { session, header } = self.notif.get().await?;
            lock(&self.sessions).add_receiving(session, header.src);
            debug!(self.entity ; "session {} is rank {}", session, header.src);

            // The landed byte count comes from the DMA status
            rx_status
                .put(RxStatus {
                    header,
                    bytes: header.count,
                    ok: true,
                    session: Some(session),
                })
                .await?;
        }
    }
}
