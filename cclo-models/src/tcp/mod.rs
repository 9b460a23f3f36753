// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The connection-oriented network path.
//!
//! Sending:
//! `TcpPacketizer => TcpTxHandler => DummyTcpStack => relay`
//!
//! Receiving:
//! `relay => DummyTcpStack => TcpRxHandler => TcpDepacketizer`, after which
//! an [`RxSessionAdapter`](crate::rxbuf_session::RxSessionAdapter) lands the
//! payload in a receive buffer.
//!
//! Connections are set up by the [`SessionHandler`](session_handler::SessionHandler)
//! which serves listen and open requests from the host. All stacks of a
//! system share one [`TcpNetwork`] registry of listening ports and open
//! sessions.

pub mod handlers;
pub mod packetizer;
pub mod session_handler;
pub mod stack;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use cclo_track::lock;

use crate::eth::EthHeader;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenRequest {
    pub port: u16,
}

impl fmt::Display for ListenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listen[{}]", self.port)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenStatus {
    pub port: u16,
    pub ok: bool,
}

impl fmt::Display for ListenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listen_sts[{} ok={}]", self.port, self.ok)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenRequest {
    pub ip: u32,
    pub port: u16,
}

impl OpenRequest {
    /// Pack as `[31:0]` address and `[47:32]` port.
    #[must_use]
    pub fn pack(&self) -> u64 {
        u64::from(self.ip) | (u64::from(self.port) << 32)
    }

    #[must_use]
    pub fn unpack(bits: u64) -> Self {
        Self {
            ip: bits as u32,
            port: (bits >> 32) as u16,
        }
    }
}

impl fmt::Display for OpenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "open[{}:{}]", format_ip(self.ip), self.port)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenStatus {
    pub session: u32,
    pub ip: u32,
    pub port: u16,
    pub ok: bool,
}

impl fmt::Display for OpenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "open_sts[{}:{} session={} ok={}]",
            format_ip(self.ip),
            self.port,
            self.session,
            self.ok
        )
    }
}

/// Dotted form of an address held with the first octet in the top byte.
#[must_use]
pub fn format_ip(ip: u32) -> String {
    let [a, b, c, d] = ip.to_be_bytes();
    format!("{a}.{b}.{c}.{d}")
}

/// Parse a dotted IPv4 address.
pub fn parse_ip(ip: &str) -> Result<u32, String> {
    let octets: Vec<u8> = ip
        .split('.')
        .map(str::parse::<u8>)
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid address '{ip}': {e}"))?;
    match octets.as_slice() {
        [a, b, c, d] => Ok(u32::from_be_bytes([*a, *b, *c, *d])),
        _ => Err(format!("invalid address '{ip}'")),
    }
}

/// Request to transmit `length` bytes on a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpTxMeta {
    pub session: u32,
    pub length: u32,
}

impl fmt::Display for TcpTxMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx_meta[session={} {}B]", self.session, self.length)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpTxStatus {
    pub session: u32,
    pub length: u32,
    pub ok: bool,
}

impl fmt::Display for TcpTxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tx_sts[session={} {}B ok={}]",
            self.session, self.length, self.ok
        )
    }
}

/// Data of `length` bytes is waiting on a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpNotification {
    pub session: u32,
    pub length: u32,
}

impl fmt::Display for TcpNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp_notif[session={} {}B]", self.session, self.length)
    }
}

/// A message header has arrived on a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionNotification {
    pub session: u32,
    pub header: EthHeader,
}

impl fmt::Display for SessionNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session_notif[{} {}]", self.session, self.header)
    }
}

/// Connection records of one rank.
#[derive(Debug, Default)]
pub struct SessionTable {
    listening: HashSet<u16>,

    /// Session used to send to each remote rank.
    open: HashMap<u32, u32>,

    /// Remote rank of every session data has arrived on.
    receiving: HashMap<u32, u32>,
}

impl SessionTable {
    pub fn add_listening(&mut self, port: u16) {
        self.listening.insert(port);
    }

    #[must_use]
    pub fn is_listening(&self, port: u16) -> bool {
        self.listening.contains(&port)
    }

    pub fn add_open(&mut self, rank: u32, session: u32) {
        self.open.insert(rank, session);
    }

    /// The session to send to `rank` on.
    #[must_use]
    pub fn session_to(&self, rank: u32) -> Option<u32> {
        self.open.get(&rank).copied()
    }

    pub fn add_receiving(&mut self, session: u32, rank: u32) {
        self.receiving.insert(session, rank);
    }

    /// The rank at the far end of a session data arrived on.
    #[must_use]
    pub fn rank_of_session(&self, session: u32) -> Option<u32> {
        self.receiving.get(&session).copied()
    }
}

pub type SharedSessionTable = Arc<Mutex<SessionTable>>;

/// Both ends of one open connection, seen from `local_rank`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionRoute {
    pub local_rank: u32,
    pub remote_rank: u32,
    pub remote_session: u32,
}

#[derive(Default)]
struct NetworkState {
    listening: HashSet<(u32, u16)>,
    sessions: HashMap<u32, SessionRoute>,
    next_session: u32,
}

/// The network joining all dummy stacks of a system.
pub struct TcpNetwork {
    /// Rank of every address.
    ranks: HashMap<u32, u32>,
    state: Mutex<NetworkState>,
}

impl TcpNetwork {
    /// Rank `i` has address `ips[i]`.
    #[must_use]
    pub fn new(ips: &[u32]) -> Self {
        Self {
            ranks: ips
                .iter()
                .enumerate()
                .map(|(rank, ip)| (*ip, rank as u32))
                .collect(),
            state: Mutex::new(NetworkState::default()),
        }
    }

    #[must_use]
    pub fn rank_of(&self, ip: u32) -> Option<u32> {
        self.ranks.get(&ip).copied()
    }

    /// Returns false if the port is already being listened on.
    pub fn listen(&self, rank: u32, port: u16) -> bool {
        lock(&self.state).listening.insert((rank, port))
    }

    /// Open a connection from `rank` to `ip:port`, returning the local
    /// session.
    pub fn open(&self, rank: u32, ip: u32, port: u16) -> Result<u32, String> {
        let remote_rank = self
            .rank_of(ip)
            .ok_or_else(|| format!("no host at {}", format_ip(ip)))?;

        let mut state = lock(&self.state);
        if !state.listening.contains(&(remote_rank, port)) {
            return Err(format!("{}:{} is not listening", format_ip(ip), port));
        }

        let local_session = state.next_session;
        let remote_session = state.next_session + 1;
        state.next_session += 2;
        state.sessions.insert(
            local_session,
            SessionRoute {
                local_rank: rank,
                remote_rank,
                remote_session,
            },
        );
        state.sessions.insert(
            remote_session,
            SessionRoute {
                local_rank: remote_rank,
                remote_rank: rank,
                remote_session: local_session,
            },
        );
        Ok(local_session)
    }

    /// The route of a session owned by `rank`.
    #[must_use]
    pub fn route(&self, rank: u32, session: u32) -> Option<SessionRoute> {
        lock(&self.state)
            .sessions
            .get(&session)
            .filter(|route| route.local_rank == rank)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_request_layout() {
        let req = OpenRequest {
            ip: 0x0a00_0001,
            port: 5001,
        };
        assert_eq!(req.pack(), 0x0a00_0001 | (5001 << 32));
        assert_eq!(OpenRequest::unpack(req.pack()), req);
    }

    #[test]
    fn addresses() {
        let ip = parse_ip("10.0.0.7").unwrap();
        assert_eq!(ip, 0x0a00_0007);
        assert_eq!(format_ip(ip), "10.0.0.7");
        assert!(parse_ip("10.0.0").is_err());
        assert!(parse_ip("10.0.0.256").is_err());
    }

    #[test]
    fn connections() {
        let a = parse_ip("10.0.0.1").unwrap();
        let b = parse_ip("10.0.0.2").unwrap();
        let network = TcpNetwork::new(&[a, b]);

        assert!(network.open(0, b, 80).is_err());
        assert!(network.open(0, parse_ip("10.0.0.3").unwrap(), 80).is_err());

        assert!(network.listen(1, 80));
        assert!(!network.listen(1, 80));
        let session = network.open(0, b, 80).unwrap();
        let route = network.route(0, session).unwrap();
        assert_eq!(route.remote_rank, 1);
        assert_eq!(
            network.route(1, route.remote_session).unwrap().remote_session,
            session
        );

        // A session can only be used by its owner
        assert!(network.route(1, session).is_none());

        // A failed open leaves existing sessions intact
        assert!(network.open(1, a, 81).is_err());
        assert!(network.route(0, session).is_some());
    }
}
