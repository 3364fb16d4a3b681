//! Packet processing services for different network layers.
//!
//! The `service` modules deal with transmission and reception logic at each
//! layer of the stack, all driven from the single poll entry point below.

pub mod arp;
pub mod dhcp;
pub mod ethernet;
pub mod icmpv4;
pub mod icmpv6;
pub mod ipv4;
pub mod ipv6;
pub mod ndp;
pub mod tcp;
pub mod udp;

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::time::{
    Duration,
    Instant,
};

use rand;

use {
    Error,
    Result,
};
use core::conn::{
    ConnEvent,
    ConnSet,
    Connection,
    IpAddress,
    Proto,
    SocketAddr,
    TimerKind,
};
use core::dev::Driver;
use core::link::Link;
use core::repr::{
    EthernetAddress,
    Ipv4Address,
    Ipv4AddressCidr,
    Ipv6Address,
};
use core::storage::FrameQueue;

/// Lowest ephemeral port handed to outgoing connections.
pub const EPHEMERAL_PORT_BASE: u16 = 32768;

/// Per interface link state machine. The v6 machine never visits
/// `Requesting`, which belongs to the DHCP client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Up,
    Requesting,
    IpBound,
    Ready,
}

/// One discriminated application event. Drained with
/// [`Interface::poll_event`] after each poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// The IPv4 state machine moved.
    StateChange(LinkState),
    /// The IPv6 state machine moved.
    StateChangeV6(LinkState),
    /// The DHCP client learned a DNS server.
    DhcpDns(Ipv4Address),
    /// The DHCP client learned an SNTP server.
    DhcpSntp(Ipv4Address),
    /// An ARP packet was seen on the wire.
    Arp {
        sender: Ipv4Address,
        sender_mac: EthernetAddress,
    },
    /// The once per second housekeeping ran.
    Timer1s,
    /// Posted by a driver through [`Interface::post_event`].
    Driver(u32),
    /// Posted by the application; meaning is application defined.
    User(u32),
    /// Something happened on a connection.
    Conn(usize, ConnEvent),
}

/// Interface configuration handed to [`Interface::new`].
pub struct Config {
    /// Link address; a random locally administered one is derived if unset.
    pub mac: Option<EthernetAddress>,
    /// Static IPv4 address; enables the DHCP client when absent.
    pub ipv4_addr: Option<Ipv4AddressCidr>,
    pub gateway: Ipv4Address,
    pub enable_dhcp_server: bool,
    pub enable_slaac: bool,
    /// Drop frames not addressed to our unicast/broadcast/multicast MAC.
    pub enable_mac_filter: bool,
    /// Verify and strip a trailing CRC-32 on received frames.
    pub enable_crc_filter: bool,
    /// Ask DHCP for a DNS server (option 6).
    pub enable_req_dns: bool,
    /// Ask DHCP for an SNTP server (option 42).
    pub enable_req_sntp: bool,
    /// Make the DHCP server announce itself as the client's router.
    pub enable_announce_gateway: bool,
    /// Host name sent in DHCP requests.
    pub dhcp_name: String,
    pub rx_queue_slots: usize,
    pub max_conns: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            mac: None,
            ipv4_addr: None,
            gateway: Ipv4Address::UNSPECIFIED,
            enable_dhcp_server: false,
            enable_slaac: false,
            enable_mac_filter: true,
            enable_crc_filter: false,
            enable_req_dns: false,
            enable_req_sntp: false,
            enable_announce_gateway: false,
            dhcp_name: "mcu".to_string(),
            rx_queue_slots: 8,
            max_conns: 16,
        }
    }
}

/// An interface for sending and receiving network packets.
///
/// Owns the single reusable transmit buffer: every outbound frame is built
/// in place and handed to the driver before any other transmission can
/// start, which `&mut self` enforces by construction.
pub struct Interface {
    pub link: Link,
    pub driver: Box<dyn Driver>,
    /// The one transmit frame buffer.
    pub tx: Vec<u8>,
    rx_buf: Vec<u8>,
    rx_queue: Arc<FrameQueue>,
    pub conns: ConnSet,

    pub mtu: usize,

    // IPv4 configuration and state.
    pub ipv4_addr: Ipv4AddressCidr,
    pub gateway: Ipv4Address,
    pub gateway_mac: EthernetAddress,
    pub gateway_ready: bool,
    pub state: LinkState,

    // IPv6 configuration and state.
    pub ipv6_link_local: Ipv6Address,
    pub ipv6_global: Ipv6Address,
    pub ipv6_prefix_len: u8,
    pub gateway6: Ipv6Address,
    pub gateway6_mac: EthernetAddress,
    pub gateway6_ready: bool,
    pub state6: LinkState,

    // DHCP client lease.
    pub lease_expire: Option<Instant>,
    pub dhcp_server: Ipv4Address,
    last_renew: Option<Instant>,
    pub dhcp_name: String,

    pub enable_dhcp_client: bool,
    pub enable_dhcp_server: bool,
    pub enable_slaac: bool,
    pub enable_mac_filter: bool,
    pub enable_crc_filter: bool,
    pub enable_req_dns: bool,
    pub enable_req_sntp: bool,
    pub enable_announce_gateway: bool,

    // Frame counters.
    pub nsent: u32,
    pub nrecv: u32,
    pub ndrop: u32,
    pub nerr: u32,

    pub now: Instant,
    timer_1s: Option<Instant>,
    eport: u16,

    events: VecDeque<Event>,
}

impl Interface {
    /// Creates an interface over a link and driver and initializes the
    /// driver. Called once at startup by the embedding application.
    pub fn new(link: Link, mut driver: Box<dyn Driver>, config: Config, now: Instant) -> Result<Interface> {
        let link = match link {
            Link::Ethernet { addr } => {
                let configured = config.mac.or_else(|| {
                    if addr.is_unspecified() {
                        None
                    } else {
                        Some(addr)
                    }
                });
                Link::ethernet(configured)
            }
            Link::Ppp => Link::Ppp,
        };

        driver.init(&link)?;

        let frame_len = link.frame_len();
        let enable_dhcp_client = config.ipv4_addr.is_none();
        let ipv4_addr = config
            .ipv4_addr
            .unwrap_or(Ipv4AddressCidr::new(Ipv4Address::UNSPECIFIED, 0));

        Ok(Interface {
            mtu: link.mtu(),
            tx: vec![0; frame_len],
            rx_buf: vec![0; frame_len],
            rx_queue: Arc::new(FrameQueue::new(config.rx_queue_slots, frame_len)),
            conns: ConnSet::new(config.max_conns),
            link,
            driver,
            ipv4_addr,
            gateway: config.gateway,
            // Best-effort default: broadcast until ARP resolves the router.
            gateway_mac: EthernetAddress::BROADCAST,
            gateway_ready: false,
            state: LinkState::Down,
            ipv6_link_local: Ipv6Address::UNSPECIFIED,
            ipv6_global: Ipv6Address::UNSPECIFIED,
            ipv6_prefix_len: 0,
            gateway6: Ipv6Address::UNSPECIFIED,
            gateway6_mac: EthernetAddress::BROADCAST,
            gateway6_ready: false,
            state6: LinkState::Down,
            lease_expire: None,
            dhcp_server: Ipv4Address::UNSPECIFIED,
            last_renew: None,
            dhcp_name: config.dhcp_name,
            enable_dhcp_client,
            enable_dhcp_server: config.enable_dhcp_server,
            enable_slaac: config.enable_slaac,
            enable_mac_filter: config.enable_mac_filter,
            enable_crc_filter: config.enable_crc_filter,
            enable_req_dns: config.enable_req_dns,
            enable_req_sntp: config.enable_req_sntp,
            enable_announce_gateway: config.enable_announce_gateway,
            nsent: 0,
            nrecv: 0,
            ndrop: 0,
            nerr: 0,
            now,
            timer_1s: None,
            eport: (rand::random::<u16>() | EPHEMERAL_PORT_BASE).max(EPHEMERAL_PORT_BASE),
            events: VecDeque::new(),
        })
    }

    /// Returns the queue interrupt driven drivers enqueue received frames
    /// into. Frames that do not fit are dropped and counted, never blocked.
    pub fn rx_queue(&self) -> Arc<FrameQueue> {
        self.rx_queue.clone()
    }

    /// Drains one queued application event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Posts a driver or user event into the application event stream.
    pub fn post_event(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub(crate) fn push_event(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Total frames dropped so far, including queue overruns.
    pub fn frames_dropped(&self) -> usize {
        self.ndrop as usize + self.rx_queue.dropped()
    }

    pub(crate) fn last_renew_at(&self) -> Option<Instant> {
        self.last_renew
    }

    pub(crate) fn mark_renew_attempt(&mut self) {
        self.last_renew = Some(self.now);
    }

    /// Allocates the next ephemeral port.
    pub(crate) fn next_eport(&mut self) -> u16 {
        if self.eport < EPHEMERAL_PORT_BASE {
            self.eport = EPHEMERAL_PORT_BASE;
        }
        let port = self.eport;
        self.eport = self.eport.wrapping_add(1);
        port
    }

    /// The single entry point: runs housekeeping, drains one received
    /// frame, and fires expired connection timers. Call at least as often
    /// as the shortest timer (about every 100 ms) with the current time.
    pub fn poll(&mut self, now: Instant) {
        self.now = now;

        let tick = match self.timer_1s {
            Some(deadline) if now < deadline => false,
            _ => {
                self.timer_1s = Some(now + Duration::from_secs(1));
                true
            }
        };

        // Gateway resolution is best-effort: a bound interface goes ready
        // after a second even if the router never answered. Order matters,
        // this runs before the transitions below can re-enter IpBound.
        if tick {
            if self.state == LinkState::IpBound {
                self.set_state(LinkState::Ready);
            }
            if self.state6 == LinkState::IpBound {
                self.set_state6(LinkState::Ready);
            }
        }

        let up = self.driver.poll(tick);
        if tick {
            self.link_transitions(up);
            self.push_event(Event::Timer1s);
        }

        if self.state == LinkState::Down && self.state6 == LinkState::Down {
            return;
        }

        if tick {
            dhcp::housekeeping(self);
            ndp::housekeeping(self);
            arp::housekeeping(self);
            tcp::age_backlogs(self);
        }

        self.drain_one_frame();

        tcp::scan_timers(self);
        self.drain_conns();
    }

    /// Physical link state handling, once per second.
    fn link_transitions(&mut self, up: bool) {
        // v4
        let current = self.state != LinkState::Down;
        if !up && self.enable_dhcp_client {
            self.ipv4_addr = Ipv4AddressCidr::new(Ipv4Address::UNSPECIFIED, 0);
        }
        if up != current {
            let state = if !up {
                LinkState::Down
            } else if self.enable_dhcp_client || self.ipv4_addr.is_unspecified() {
                LinkState::Up
            } else {
                LinkState::IpBound
            };
            self.set_state(state);
        } else if !self.enable_dhcp_client && self.state == LinkState::Up
            && !self.ipv4_addr.is_unspecified()
        {
            // The application configured an address after link up.
            self.set_state(LinkState::IpBound);
        }
        if self.state == LinkState::Down {
            error!("network is down");
        }

        // v6
        let current6 = self.state6 != LinkState::Down;
        if up != current6 {
            if !up {
                if self.enable_slaac {
                    self.ipv6_global = Ipv6Address::UNSPECIFIED;
                    self.ipv6_prefix_len = 0;
                }
                self.set_state6(LinkState::Down);
            } else if let Some(iid) = self.link.eui64() {
                self.ipv6_link_local = Ipv6Address::link_local(iid);
                if !self.enable_slaac && !self.ipv6_global.is_unspecified() {
                    self.set_state6(LinkState::IpBound);
                } else {
                    self.set_state6(LinkState::Up);
                }
            }
        }
    }

    pub(crate) fn set_state(&mut self, state: LinkState) {
        if self.state == state {
            return;
        }
        self.state = state;
        match state {
            LinkState::Ready => {
                info!("READY, IP: {}", self.ipv4_addr);
                info!("       GW: {}", self.gateway);
                if let Some(addr) = self.link.addr() {
                    info!("      MAC: {}", addr);
                }
            }
            LinkState::IpBound => {
                // Unsolicited gateway lookup; redone every second until the
                // router answers.
                let gateway = self.gateway;
                if !gateway.is_unspecified() {
                    arp::send_request(self, gateway).ok();
                }
            }
            LinkState::Down => error!("link down"),
            _ => {}
        }
        self.push_event(Event::StateChange(state));
    }

    pub(crate) fn set_state6(&mut self, state: LinkState) {
        if self.state6 == state {
            return;
        }
        self.state6 = state;
        if state == LinkState::Ready {
            info!("READY, IPv6: {}", self.ipv6_global);
        }
        self.push_event(Event::StateChangeV6(state));
    }

    /// Drains one inbound frame, either from a synchronous driver or from
    /// the interrupt fed queue, and dispatches it up the stack.
    fn drain_one_frame(&mut self) {
        let mut buf = mem::replace(&mut self.rx_buf, Vec::new());

        let len = match self.driver.rx(&mut buf) {
            Some(len) => Some(len),
            None => {
                let queue = self.rx_queue.clone();
                queue
                    .dequeue_with(|frame| {
                        let len = frame.len().min(buf.len());
                        buf[.. len].copy_from_slice(&frame[.. len]);
                        len
                    })
                    .ok()
            }
        };

        if let Some(len) = len {
            self.nrecv += 1;
            ethernet::recv_frame(self, &buf[.. len]);
        }

        self.rx_buf = buf;
    }

    /// The per connection pass after RX and timers: flush pending sends,
    /// start closures, and free finished connections.
    fn drain_conns(&mut self) {
        for handle in self.conns.handles() {
            let (writable, start_close, finished) = {
                let conn = match self.conns.get(handle) {
                    Some(conn) => conn,
                    None => continue,
                };
                (
                    conn.can_send() && !conn.send_buf.is_empty() && !conn.is_resolving,
                    conn.is_draining && conn.send_buf.is_empty()
                        && !(conn.state.timer_kind == TimerKind::Fin && conn.state.timer.is_some()),
                    conn.state.three_way_closed || conn.is_closing,
                )
            };

            if writable {
                tcp::write_pending(self, handle);
            }
            if start_close {
                tcp::init_closure(self, handle);
            }
            if finished {
                self.destroy_conn(handle, None);
            }
        }
    }

    /// The generic connection error path: report, then tear down. All
    /// timers die with the connection.
    pub(crate) fn conn_error(&mut self, handle: usize, reason: &'static str) {
        warn!("connection {} error: {}", handle, reason);
        self.destroy_conn(handle, Some(reason));
    }

    fn destroy_conn(&mut self, handle: usize, reason: Option<&'static str>) {
        if self.conns.remove(handle).is_some() {
            let event = match reason {
                Some(reason) => ConnEvent::Error(reason),
                None => ConnEvent::Closed,
            };
            self.push_event(Event::Conn(handle, event));
        }
    }

    // ------------------------------------------------------------------
    // Application surface.
    // ------------------------------------------------------------------

    /// Opens a TCP connection to a remote endpoint. The SYN goes out once
    /// the peer (or gateway) link address resolves.
    pub fn connect_tcp(&mut self, rem: SocketAddr) -> Result<usize> {
        self.connect(Proto::Tcp, rem)
    }

    /// Opens a UDP "connection" to a remote endpoint. A `Connected` event
    /// fires once the peer link address resolves.
    pub fn connect_udp(&mut self, rem: SocketAddr) -> Result<usize> {
        self.connect(Proto::Udp, rem)
    }

    fn connect(&mut self, proto: Proto, rem: SocketAddr) -> Result<usize> {
        match rem.addr {
            IpAddress::V4(_) => {
                if self.state != LinkState::Ready {
                    return Err(Error::NoRoute);
                }
            }
            IpAddress::V6(_) => {
                if self.state6 != LinkState::Ready {
                    return Err(Error::NoRoute);
                }
            }
        }

        let loc = SocketAddr {
            addr: self.local_addr_for(&rem.addr),
            port: self.next_eport(),
        };

        let conn = Connection::new(proto, loc, rem);
        let handle = self.conns.add(conn)?;
        debug!("{} {} -> {}", handle, loc, rem);
        self.start_connect(handle);
        Ok(handle)
    }

    fn local_addr_for(&self, rem: &IpAddress) -> IpAddress {
        match *rem {
            IpAddress::V4(_) => IpAddress::V4(*self.ipv4_addr),
            IpAddress::V6(addr) => IpAddress::V6(if addr.is_link_local()
                || self.ipv6_global.is_unspecified()
            {
                self.ipv6_link_local
            } else {
                self.ipv6_global
            }),
        }
    }

    /// Creates a TCP listener on a local port.
    pub fn listen_tcp(&mut self, port: u16) -> Result<usize> {
        self.listen(Proto::Tcp, port)
    }

    /// Creates a UDP listener on a local port. A single UDP listener
    /// serves every peer; the remote endpoint tracks the latest sender.
    pub fn listen_udp(&mut self, port: u16) -> Result<usize> {
        self.listen(Proto::Udp, port)
    }

    fn listen(&mut self, proto: Proto, port: u16) -> Result<usize> {
        let in_use = self.conns.iter().any(|(_, conn)| {
            conn.proto == proto && conn.is_listening && conn.loc.port == port
        });
        if in_use {
            return Err(Error::InUse);
        }

        let loc = SocketAddr {
            addr: IpAddress::V4(Ipv4Address::UNSPECIFIED),
            port,
        };
        let mut conn = Connection::new(proto, loc, loc);
        conn.is_listening = true;
        let handle = self.conns.add(conn)?;
        debug!("{} listening on port {}", handle, port);
        Ok(handle)
    }

    /// Sends application data. UDP transmits immediately; TCP appends to
    /// the send buffer which drains on subsequent polls.
    pub fn send(&mut self, handle: usize, data: &[u8]) -> Result<()> {
        let (proto, resolving, rem_v4) = {
            let conn = self.conns.get(handle).ok_or(Error::Exhausted)?;
            (
                conn.proto,
                conn.is_resolving || conn.is_connecting,
                conn.rem.addr.as_v4().is_some(),
            )
        };

        if rem_v4 && self.state != LinkState::Ready {
            self.conn_error(handle, "net down");
            return Err(Error::NoRoute);
        }

        match proto {
            Proto::Udp => {
                if resolving {
                    debug!("{} still resolving", handle);
                    return Err(Error::Pending);
                }
                udp::send_from_conn(self, handle, data)
            }
            Proto::Tcp => {
                let conn = self.conns.get_mut(handle).ok_or(Error::Exhausted)?;
                conn.send_buf.extend_from_slice(data);
                Ok(())
            }
        }
    }

    /// Takes whatever has been received on a connection so far.
    pub fn recv(&mut self, handle: usize) -> Vec<u8> {
        match self.conns.get_mut(handle) {
            Some(conn) => mem::replace(&mut conn.recv_buf, Vec::new()),
            None => Vec::new(),
        }
    }

    /// Closes a connection. TCP drains pending data first and then runs
    /// the FIN handshake; UDP and listeners are freed on the next poll.
    pub fn close(&mut self, handle: usize) {
        if let Some(conn) = self.conns.get_mut(handle) {
            if conn.proto == Proto::Tcp && !conn.is_listening && !conn.is_connecting
                && !conn.is_resolving
            {
                conn.is_draining = true;
            } else {
                conn.is_closing = true;
            }
        }
    }

    /// Kicks off link address resolution for a freshly created connection,
    /// then transmits (or arms a timer) as appropriate.
    fn start_connect(&mut self, handle: usize) {
        let rem = match self.conns.get(handle) {
            Some(conn) => conn.rem,
            None => return,
        };

        if self.link.addr().is_none() {
            // Point to point links have no addresses to resolve.
            self.mac_resolved(handle);
            return;
        }

        match rem.addr {
            IpAddress::V4(dst) => self.start_connect_v4(handle, dst),
            IpAddress::V6(dst) => self.start_connect_v6(handle, dst),
        }
    }

    fn start_connect_v4(&mut self, handle: usize, dst: Ipv4Address) {
        let is_udp = self.conns.get(handle).map(|c| c.proto) == Some(Proto::Udp);

        if is_udp && (dst.is_broadcast() || dst == self.ipv4_addr.broadcast()) {
            if let Some(conn) = self.conns.get_mut(handle) {
                conn.state.mac = EthernetAddress::BROADCAST;
            }
            self.mac_resolved(handle);
        } else if dst.is_multicast() {
            let mac = self.link.map_multicast_v4(dst);
            if let Some(conn) = self.conns.get_mut(handle) {
                conn.state.mac = mac;
            }
            self.mac_resolved(handle);
        } else if !self.ipv4_addr.is_unspecified() && self.ipv4_addr.is_member(dst)
            && dst != self.gateway
        {
            // On-link peer: one outstanding lookup, bounded by a timer.
            debug!("{} ARP lookup for {}", handle, dst);
            arp::send_request(self, dst).ok();
            if let Some(conn) = self.conns.get_mut(handle) {
                conn.is_resolving = true;
            }
            tcp::set_timeout(self, handle, TimerKind::Resolve);
        } else {
            // Off-link or the gateway itself: use the (possibly still
            // best-effort) gateway mapping.
            let mac = self.gateway_mac;
            if let Some(conn) = self.conns.get_mut(handle) {
                conn.state.mac = mac;
            }
            self.mac_resolved(handle);
        }
    }

    fn start_connect_v6(&mut self, handle: usize, dst: Ipv6Address) {
        if dst.is_multicast() {
            let mac = self.link.map_multicast_v6(dst);
            if let Some(conn) = self.conns.get_mut(handle) {
                conn.state.mac = mac;
            }
            self.mac_resolved(handle);
        } else if self.ipv6_on_link(dst) && dst != self.gateway6 {
            debug!("{} NDP lookup for {}", handle, dst);
            ndp::send_neighbor_solicit(self, dst).ok();
            if let Some(conn) = self.conns.get_mut(handle) {
                conn.is_resolving = true;
            }
            tcp::set_timeout(self, handle, TimerKind::Resolve);
        } else {
            let mac = self.gateway6_mac;
            if let Some(conn) = self.conns.get_mut(handle) {
                conn.state.mac = mac;
            }
            self.mac_resolved(handle);
        }
    }

    pub(crate) fn ipv6_on_link(&self, dst: Ipv6Address) -> bool {
        if dst.is_link_local() {
            return true;
        }
        if self.ipv6_prefix_len == 0 || self.ipv6_global.is_unspecified() {
            return false;
        }
        let probe = Ipv6Address::from_prefix(&dst, self.ipv6_prefix_len, [0; 8]);
        let ours = Ipv6Address::from_prefix(&self.ipv6_global, self.ipv6_prefix_len, [0; 8]);
        probe == ours
    }

    /// Called when a connection's peer link address is known: UDP becomes
    /// connected, TCP transmits its SYN and waits.
    pub(crate) fn mac_resolved(&mut self, handle: usize) {
        let proto = match self.conns.get_mut(handle) {
            Some(conn) => {
                conn.is_resolving = false;
                conn.proto
            }
            None => return,
        };

        match proto {
            Proto::Udp => {
                if let Some(conn) = self.conns.get_mut(handle) {
                    conn.is_connecting = false;
                }
                self.push_event(Event::Conn(handle, ConnEvent::Connected));
            }
            Proto::Tcp => {
                if let Some(conn) = self.conns.get_mut(handle) {
                    conn.is_connecting = true;
                }
                tcp::send_syn(self, handle);
                tcp::set_timeout(self, handle, TimerKind::Syn);
            }
        }
    }
}
