// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Serves the connection requests of the host.
//!
//! Each request is passed to the network stack and its answer returned to the
//! host. Successful requests are recorded in the rank's [`SessionTable`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_components::{connect_tx, take_option};
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, PortState, select_ready};
use cclo_engine::traits::Runnable;
use cclo_engine::types::SimResult;
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::{info, lock, warn};

use crate::tcp::{
    ListenRequest, ListenStatus, OpenRequest, OpenStatus, SharedSessionTable, SessionTable,
    format_ip,
};

#[derive(EntityGet, EntityDisplay)]
pub struct SessionHandler {
    entity: Arc<Entity>,
    sessions: SharedSessionTable,

    /// Rank of every known peer address.
    peers: HashMap<u32, u32>,

    listen_cmd: InPort<ListenRequest>,
    open_cmd: InPort<OpenRequest>,
    listen_sts: Mutex<Option<OutPort<ListenStatus>>>,
    open_sts: Mutex<Option<OutPort<OpenStatus>>>,

    stack_listen_req: Mutex<Option<OutPort<ListenRequest>>>,
    stack_listen_sts: InPort<ListenStatus>,
    stack_open_req: Mutex<Option<OutPort<u64>>>,
    stack_open_sts: InPort<OpenStatus>,
}

impl SessionHandler {
    #[must_use]
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        sessions: &SharedSessionTable,
        peers: HashMap<u32, u32>,
    ) -> Arc<Self> {
        let entity = Arc::new(Entity::new(parent, name));
        let listen_cmd = InPort::new(&entity, "listen_cmd");
        let open_cmd = InPort::new(&entity, "open_cmd");
        let listen_sts = OutPort::new(&entity, "listen_sts");
        let open_sts = OutPort::new(&entity, "open_sts");
        let stack_listen_req = OutPort::new(&entity, "stack_listen_req");
        let stack_listen_sts = InPort::new(&entity, "stack_listen_sts");
        let stack_open_req = OutPort::new(&entity, "stack_open_req");
        let stack_open_sts = InPort::new(&entity, "stack_open_sts");
        let rc_self = Arc::new(Self {
            entity,
            sessions: sessions.clone(),
            peers,
            listen_cmd,
            open_cmd,
            listen_sts: Mutex::new(Some(listen_sts)),
            open_sts: Mutex::new(Some(open_sts)),
            stack_listen_req: Mutex::new(Some(stack_listen_req)),
            stack_listen_sts,
            stack_open_req: Mutex::new(Some(stack_open_req)),
            stack_open_sts,
        });
        engine.register(rc_self.clone());
        rc_self
    }

    #[must_use]
    pub fn port_listen_cmd(&self) -> Arc<PortState<ListenRequest>> {
        self.listen_cmd.state()
    }

    #[must_use]
    pub fn port_open_cmd(&self) -> Arc<PortState<OpenRequest>> {
        self.open_cmd.state()
    }

    pub fn connect_port_listen_sts(&self, port_state: Arc<PortState<ListenStatus>>) {
        connect_tx!(self.listen_sts, connect ; port_state);
    }

    pub fn connect_port_open_sts(&self, port_state: Arc<PortState<OpenStatus>>) {
        connect_tx!(self.open_sts, connect ; port_state);
    }

    pub fn connect_port_stack_listen_req(&self, port_state: Arc<PortState<ListenRequest>>) {
        connect_tx!(self.stack_listen_req, connect ; port_state);
    }

    #[must_use]
    pub fn port_stack_listen_sts(&self) -> Arc<PortState<ListenStatus>> {
        self.stack_listen_sts.state()
    }

    pub fn connect_port_stack_open_req(&self, port_state: Arc<PortState<u64>>) {
        connect_tx!(self.stack_open_req, connect ; port_state);
    }

    #[must_use]
    pub fn port_stack_open_sts(&self) -> Arc<PortState<OpenStatus>> {
        self.stack_open_sts.state()
    }

    fn record_open(&self, sessions: &mut SessionTable, status: &OpenStatus) {
        match self.peers.get(&status.ip) {
            Some(rank) => sessions.add_open(*rank, status.session),
            None => {
                let ip = format_ip(status.ip);
                warn!(self.entity ; "opened session {} to unknown peer {}", status.session, ip);
            }
        }
    }
}

#[async_trait]
impl Runnable for SessionHandler {
    async fn run(&self) -> SimResult {
        let listen_sts = take_option!(self.listen_sts)?;
        let open_sts = take_option!(self.open_sts)?;
        let stack_listen_req = take_option!(self.stack_listen_req)?;
        let stack_open_req = take_option!(self.stack_open_req)?;

        loop {
            match select_ready(&[&self.listen_cmd, &self.open_cmd]).await? {
                0 => {
                    let req = self.listen_cmd.get().await?;
                    stack_listen_req.put(req).await?;
                    let status = self.stack_listen_sts.get().await?;
                    if status.ok {
                        lock(&self.sessions).add_listening(status.port);
                    } else {
                        warn!(self.entity ; "{} failed", req);
                    }
                    info!(self.entity ; "{}", status);
                    listen_sts.put(status).await?;
                }
                _ => {
                    let req = self.open_cmd.get().await?;
                    stack_open_req.put(req.pack()).await?;
                    let status = self.stack_open_sts.get().await?;
                    if status.ok {
                        self.record_open(&mut lock(&self.sessions), &status);
                    } else {
                        warn!(self.entity ; "{} failed", req);
                    }
                    info!(self.entity ; "{}", status);
                    open_sts.put(status).await?;
                }
            }
        }
    }
}
