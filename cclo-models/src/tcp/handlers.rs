// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Bridges between the packetizers and the network stack.
//!
//! The [`TcpTxHandler`] passes each transmit request and its data to the
//! stack and returns the stack's status. The [`TcpRxHandler`] reacts to the
//! stack's notifications by reading the waiting data and passing it on,
//! together with the session it arrived on.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_components::types::StreamWord;
use cclo_components::{connect_tx, take_option};
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, PortState};
use cclo_engine::traits::Runnable;
use cclo_engine::types::SimResult;
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::{trace, warn};

use crate::tcp::{TcpNotification, TcpTxMeta, TcpTxStatus};

/// Forward words up to and including `last`.
async fn forward_frame(rx: &InPort<StreamWord>, tx: &OutPort<StreamWord>) -> SimResult {
    loop {
        let word = rx.get().await?;
        let last = word.last;
        tx.put(word).await?;
        if last {
            return Ok(());
        }
    }
}

#[derive(EntityGet, EntityDisplay)]
pub struct TcpTxHandler {
    entity: Arc<Entity>,
    cmd: InPort<TcpTxMeta>,
    rx: InPort<StreamWord>,
    sts: Mutex<Option<OutPort<TcpTxStatus>>>,
    stack_meta: Mutex<Option<OutPort<TcpTxMeta>>>,
    stack_data: Mutex<Option<OutPort<StreamWord>>>,
    stack_sts: InPort<TcpTxStatus>,
}

impl TcpTxHandler {
    #[must_use]
    pub fn new_and_register(engine: &Engine, parent: &Arc<Entity>, name: &str) -> Arc<Self> {
        let entity = Arc::new(Entity::new(parent, name));
        let cmd = InPort::new(&entity, "cmd");
        let rx = InPort::new(&entity, "rx");
        let sts = OutPort::new(&entity, "sts");
        let stack_meta = OutPort::new(&entity, "stack_meta");
        let stack_data = OutPort::new(&entity, "stack_data");
        let stack_sts = InPort::new(&entity, "stack_sts");
        let rc_self = Arc::new(Self {
            entity,
            cmd,
            rx,
            sts: Mutex::new(Some(sts)),
            stack_meta: Mutex::new(Some(stack_meta)),
            stack_data: Mutex::new(Some(stack_data)),
            stack_sts,
        });
        engine.register(rc_self.clone());
        rc_self
    }

    #[must_use]
    pub fn port_cmd(&self) -> Arc<PortState<TcpTxMeta>> {
        self.cmd.state()
    }

    #[must_use]
    pub fn port_rx(&self) -> Arc<PortState<StreamWord>> {
        self.rx.state()
    }

    pub fn connect_port_sts(&self, port_state: Arc<PortState<TcpTxStatus>>) {
        connect_tx!(self.sts, connect ; port_state);
    }

    pub fn connect_port_stack_meta(&self, port_state: Arc<PortState<TcpTxMeta>>) {
        connect_tx!(self.stack_meta, connect ; port_state);
    }

    pub fn connect_port_stack_data(&self, port_state: Arc<PortState<StreamWord>>) {
        connect_tx!(self.stack_data, connect ; port_state);
    }

    #[must_use]
    pub fn port_stack_sts(&self) -> Arc<PortState<TcpTxStatus>> {
        self.stack_sts.state()
    }
}

#[async_trait]
impl Runnable for TcpTxHandler {
    async fn run(&self) -> SimResult {
        let sts = take_option!(self.sts)?;
        let stack_meta = take_option!(self.stack_meta)?;
        let stack_data = take_option!(self.stack_data)?;

        loop {
            let meta = self.cmd.get().await?;
            trace!(self.entity ; "{}", meta);
            stack_meta.put(meta).await?;
            forward_frame(&self.rx, &stack_data).await?;

            let status = self.stack_sts.get().await?;
            if !status.ok {
                warn!(self.entity ; "send failed {}", status);
            }
            sts.put(status).await?;
        }
    }
}

#[derive(EntityGet, EntityDisplay)]
pub struct TcpRxHandler {
    entity: Arc<Entity>,
    stack_notif: InPort<TcpNotification>,
    stack_meta: InPort<u32>,
    stack_data: InPort<StreamWord>,
    read_pkg: Mutex<Option<OutPort<u32>>>,
    notif: Mutex<Option<OutPort<TcpNotification>>>,
    tx: Mutex<Option<OutPort<StreamWord>>>,
}

impl TcpRxHandler {
    #[must_use]
    pub fn new_and_register(engine: &Engine, parent: &Arc<Entity>, name: &str) -> Arc<Self> {
        let entity = Arc::new(Entity::new(parent, name));
        let stack_notif = InPort::new(&entity, "stack_notif");
        let stack_meta = InPort::new(&entity, "stack_meta");
        let stack_data = InPort::new(&entity, "stack_data");
        let read_pkg = OutPort::new(&entity, "read_pkg");
        let notif = OutPort::new(&entity, "notif");
        let tx = OutPort::new(&entity, "tx");
        let rc_self = Arc::new(Self {
            entity,
            stack_notif,
            stack_meta,
            stack_data,
            read_pkg: Mutex::new(Some(read_pkg)),
            notif: Mutex::new(Some(notif)),
            tx: Mutex::new(Some(tx)),
        });
        engine.register(rc_self.clone());
        rc_self
    }

    #[must_use]
    pub fn port_stack_notif(&self) -> Arc<PortState<TcpNotification>> {
        self.stack_notif.state()
    }

    #[must_use]
    pub fn port_stack_meta(&self) -> Arc<PortState<u32>> {
        self.stack_meta.state()
    }

    #[must_use]
    pub fn port_stack_data(&self) -> Arc<PortState<StreamWord>> {
        self.stack_data.state()
    }

    pub fn connect_port_read_pkg(&self, port_state: Arc<PortState<u32>>) {
        connect_tx!(self.read_pkg, connect ; port_state);
    }

    pub fn connect_port_notif(&self, port_state: Arc<PortState<TcpNotification>>) {
        connect_tx!(self.notif, connect ; port_state);
    }

    pub fn connect_port_tx(&self, port_state: Arc<PortState<StreamWord>>) {
        connect_tx!(self.tx, connect ; port_state);
    }
}

#[async_trait]
impl Runnable for TcpRxHandler {
    async fn run(&self) -> SimResult {
        let read_pkg = take_option!(self.read_pkg)?;
        let notif = take_option!(self.notif)?;
        let tx = take_option!(self.tx)?;

        loop {
            let notification = self.stack_notif.get().await?;
            trace!(self.entity ; "{}", notification);
            read_pkg.put(notification.session).await?;

            let session = self.stack_meta.get().await?;
            notif
                .put(TcpNotification {
                    session,
                    length: notification.length,
                })
                .await?;
            forward_frame(&self.stack_data, &tx).await?;
        }
    }
}
