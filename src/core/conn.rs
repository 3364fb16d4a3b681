//! Per connection state kept by the transport engine.

use std::fmt::{
    Display,
    Formatter,
    Result as FmtResult,
};
use std::time::Instant;

use {
    Error,
    Result,
};
use core::repr::{
    EthernetAddress,
    Ipv4Address,
    Ipv6Address,
};

/// An IPv4 or IPv6 address, as carried by a connection endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpAddress {
    V4(Ipv4Address),
    V6(Ipv6Address),
}

impl IpAddress {
    pub fn is_unspecified(&self) -> bool {
        match *self {
            IpAddress::V4(addr) => addr.is_unspecified(),
            IpAddress::V6(addr) => addr.is_unspecified(),
        }
    }

    pub fn as_v4(&self) -> Option<Ipv4Address> {
        match *self {
            IpAddress::V4(addr) => Some(addr),
            IpAddress::V6(_) => None,
        }
    }

    pub fn as_v6(&self) -> Option<Ipv6Address> {
        match *self {
            IpAddress::V6(addr) => Some(addr),
            IpAddress::V4(_) => None,
        }
    }
}

impl Display for IpAddress {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match *self {
            IpAddress::V4(addr) => write!(f, "{}", addr),
            IpAddress::V6(addr) => write!(f, "{}", addr),
        }
    }
}

/// An IP address and port pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketAddr {
    pub addr: IpAddress,
    pub port: u16,
}

impl Display for SocketAddr {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Transport protocol of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Proto {
    Tcp,
    Udp,
}

/// What a running timer means when it expires. Priorities are implicit in
/// how the engine arms them; a FIN timer is never preempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    /// Connection has been idle, probe the peer.
    Keepalive,
    /// Peer sent data which has not been acknowledged yet.
    Ack,
    /// ARP or NDP lookup in flight for the peer.
    Resolve,
    /// SYN sent, waiting for the peer to answer.
    Syn,
    /// FIN sent, waiting to finish closing.
    Fin,
}

/// A half open entry in a listener's backlog: a SYN answered with a
/// SYN-ACK whose sequence number encodes the slot, waiting for the ACK.
#[derive(Clone, Copy, Debug)]
pub struct BacklogEntry {
    /// Peer source port, re-checked when the ACK comes back.
    pub port: u16,
    /// MSS the peer announced in its SYN.
    pub mss: u16,
    /// Housekeeping ticks left before the entry is evicted.
    pub age: u8,
}

/// Number of backlog slots per listener.
pub const BACKLOG_LEN: usize = 8;

/// Initial age of a backlog entry in housekeeping ticks.
pub const BACKLOG_AGE: u8 = 2;

/// Events surfaced to the application for one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnEvent {
    /// A listener produced this new connection.
    Accepted,
    /// An initiated connection finished its handshake (or, for UDP,
    /// resolved its peer and may transmit).
    Connected,
    /// Bytes were appended to the receive buffer.
    Read(usize),
    /// The connection failed and will be destroyed.
    Error(&'static str),
    /// The connection closed and will be destroyed.
    Closed,
}

/// The engine's extension state appended to every connection.
#[derive(Debug)]
pub struct ConnState {
    /// Next sequence number to send.
    pub seq: u32,
    /// Next sequence number expected from the peer.
    pub ack: u32,
    /// Last acknowledgement number actually transmitted.
    pub acked: u32,
    /// Received bytes not yet acknowledged, drives the delayed ACK.
    pub unacked: usize,
    /// Peer's MSS from its SYN options.
    pub dmss: u16,
    /// Resolved peer (or gateway) link address.
    pub mac: EthernetAddress,
    /// The single timer and what its expiry means.
    pub timer: Option<Instant>,
    pub timer_kind: TimerKind,
    /// Consecutive unanswered keepalive probes.
    pub keepalive_misses: u8,
    /// Peer sent us a FIN.
    pub fin_rcvd: bool,
    /// Three way closure completed, tear down on the next poll.
    pub three_way_closed: bool,
}

impl ConnState {
    pub fn new() -> ConnState {
        ConnState {
            seq: 0,
            ack: 0,
            acked: 0,
            unacked: 0,
            // RFC-9293 3.7.1 default until options say otherwise.
            dmss: 536,
            mac: EthernetAddress::BROADCAST,
            timer: None,
            timer_kind: TimerKind::Keepalive,
            keepalive_misses: 0,
            fin_rcvd: false,
            three_way_closed: false,
        }
    }
}

/// One TCP or UDP connection, listener or not.
#[derive(Debug)]
pub struct Connection {
    pub proto: Proto,
    pub loc: SocketAddr,
    pub rem: SocketAddr,
    pub state: ConnState,
    /// Pending application data waiting for the peer (TCP only).
    pub send_buf: Vec<u8>,
    /// Received application data waiting for the application.
    pub recv_buf: Vec<u8>,
    /// Half open SYNs, populated on listeners only.
    pub backlog: [Option<BacklogEntry>; BACKLOG_LEN],
    pub is_listening: bool,
    /// Waiting for an ARP/NDP answer before the first transmission.
    pub is_resolving: bool,
    /// SYN sent (TCP) or resolution finished (UDP), handshake not done.
    pub is_connecting: bool,
    /// Application asked to close; FIN goes out once the send buffer drains.
    pub is_draining: bool,
    /// Tear down on the next poll pass.
    pub is_closing: bool,
    /// Came out of a listener's backlog.
    pub is_accepted: bool,
}

impl Connection {
    pub fn new(proto: Proto, loc: SocketAddr, rem: SocketAddr) -> Connection {
        Connection {
            proto,
            loc,
            rem,
            state: ConnState::new(),
            send_buf: Vec::new(),
            recv_buf: Vec::new(),
            backlog: [None; BACKLOG_LEN],
            is_listening: false,
            is_resolving: false,
            is_connecting: false,
            is_draining: false,
            is_closing: false,
            is_accepted: false,
        }
    }

    /// Checks if the connection is settled enough to push payload bytes.
    pub fn can_send(&self) -> bool {
        !self.is_listening && !self.is_resolving && !self.is_connecting && !self.is_closing
    }
}

/// The set of live connections with stable integral handles.
///
/// Timer scans collect handles first and act second, so connections can be
/// torn down mid-scan without invalidating the iteration.
pub struct ConnSet {
    conns: Vec<Option<Connection>>,
}

impl ConnSet {
    pub fn new(capacity: usize) -> ConnSet {
        ConnSet {
            conns: (0 .. capacity).map(|_| None).collect(),
        }
    }

    /// Adds a connection and returns a stable handle.
    pub fn add(&mut self, conn: Connection) -> Result<usize> {
        let handle = (0 .. self.conns.len()).find(|i| self.conns[*i].is_none());

        match handle {
            Some(i) => {
                self.conns[i] = Some(conn);
                Ok(i)
            }
            None => Err(Error::Exhausted),
        }
    }

    pub fn get(&self, handle: usize) -> Option<&Connection> {
        self.conns.get(handle).and_then(|conn| conn.as_ref())
    }

    pub fn get_mut(&mut self, handle: usize) -> Option<&mut Connection> {
        self.conns.get_mut(handle).and_then(|conn| conn.as_mut())
    }

    /// Removes a connection, returning it if the handle was live.
    pub fn remove(&mut self, handle: usize) -> Option<Connection> {
        self.conns.get_mut(handle).and_then(|conn| conn.take())
    }

    /// Returns the live handles, oldest slots first.
    pub fn handles(&self) -> Vec<usize> {
        (0 .. self.conns.len())
            .filter(|i| self.conns[*i].is_some())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.conns
            .iter()
            .enumerate()
            .filter_map(|(i, conn)| conn.as_ref().map(|conn| (i, conn)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        Connection::new(
            Proto::Tcp,
            SocketAddr {
                addr: IpAddress::V4(Ipv4Address::new([10, 0, 0, 1])),
                port: 80,
            },
            SocketAddr {
                addr: IpAddress::V4(Ipv4Address::new([10, 0, 0, 2])),
                port: 4000,
            },
        )
    }

    #[test]
    fn test_add_until_exhausted() {
        let mut set = ConnSet::new(2);
        assert_eq!(set.add(conn()).unwrap(), 0);
        assert_eq!(set.add(conn()).unwrap(), 1);
        assert_matches!(set.add(conn()), Err(Error::Exhausted));
    }

    #[test]
    fn test_handles_stay_stable_across_removal() {
        let mut set = ConnSet::new(4);
        let a = set.add(conn()).unwrap();
        let b = set.add(conn()).unwrap();
        let c = set.add(conn()).unwrap();

        set.remove(b);
        assert!(set.get(a).is_some());
        assert!(set.get(b).is_none());
        assert!(set.get(c).is_some());
        assert_eq!(set.handles(), vec![a, c]);

        // The freed slot is reused without disturbing the others.
        assert_eq!(set.add(conn()).unwrap(), b);
    }

    #[test]
    fn test_can_send_gating() {
        let mut c = conn();
        assert!(c.can_send());
        c.is_resolving = true;
        assert!(!c.can_send());
    }
}
