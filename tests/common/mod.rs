//! Shared test harness: an interface wired to a scripted in-memory driver.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{
    Duration,
    Instant,
};

use mcunet::Result;
use mcunet::core::dev::Driver;
use mcunet::core::link::Link;
use mcunet::core::repr::{
    eth_types,
    ipv4_protocols,
    ArpPacket,
    ArpRepr,
    EthernetAddress,
    EthernetFrame,
    Ipv4Address,
    Ipv4AddressCidr,
    Ipv4Packet,
    Ipv4Repr,
    TcpPacket,
    TcpRepr,
    UdpPacket,
    UdpRepr,
};
use mcunet::core::service::{
    Config,
    Event,
    Interface,
};

pub const OUR_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
pub const PEER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];

pub fn our_mac() -> EthernetAddress {
    EthernetAddress::new(OUR_MAC)
}

pub fn peer_mac() -> EthernetAddress {
    EthernetAddress::new(PEER_MAC)
}

/// A scripted driver: frames pushed into `rx` arrive one per poll, frames
/// the engine transmits land in `tx`.
pub struct TestDriver {
    pub up: Rc<RefCell<bool>>,
    pub tx: Rc<RefCell<Vec<Vec<u8>>>>,
    pub rx: Rc<RefCell<VecDeque<Vec<u8>>>>,
}

impl Driver for TestDriver {
    fn init(&mut self, _link: &Link) -> Result<()> {
        Ok(())
    }

    fn tx(&mut self, frame: &[u8]) -> Result<usize> {
        self.tx.borrow_mut().push(frame.to_vec());
        Ok(frame.len())
    }

    fn rx(&mut self, buffer: &mut [u8]) -> Option<usize> {
        let frame = self.rx.borrow_mut().pop_front()?;
        buffer[.. frame.len()].copy_from_slice(&frame);
        Some(frame.len())
    }

    fn poll(&mut self, _tick: bool) -> bool {
        *self.up.borrow()
    }
}

pub struct Harness {
    pub iface: Interface,
    pub now: Instant,
    pub up: Rc<RefCell<bool>>,
    pub tx: Rc<RefCell<Vec<Vec<u8>>>>,
    pub rx: Rc<RefCell<VecDeque<Vec<u8>>>>,
}

impl Harness {
    pub fn new(config: Config) -> Harness {
        let up = Rc::new(RefCell::new(true));
        let tx = Rc::new(RefCell::new(Vec::new()));
        let rx = Rc::new(RefCell::new(VecDeque::new()));

        let driver = TestDriver {
            up: up.clone(),
            tx: tx.clone(),
            rx: rx.clone(),
        };

        let now = Instant::now();
        let iface = Interface::new(
            Link::ethernet(Some(our_mac())),
            Box::new(driver),
            config,
            now,
        ).unwrap();

        Harness {
            iface,
            now,
            up,
            tx,
            rx,
        }
    }

    /// A harness with a static address, polled up to READY.
    pub fn ready(mut config: Config) -> Harness {
        config.ipv4_addr = Some(Ipv4AddressCidr::new(Ipv4Address::new([10, 0, 0, 1]), 24));
        config.gateway = Ipv4Address::new([10, 0, 0, 254]);
        let mut harness = Harness::new(config);
        harness.poll();
        harness.advance(Duration::from_secs(1));
        harness.poll();
        harness.sent(); // discard the gateway lookup
        harness.events();
        harness
    }

    pub fn poll(&mut self) {
        let now = self.now;
        self.iface.poll(now);
    }

    pub fn advance(&mut self, delta: Duration) {
        self.now += delta;
    }

    pub fn inject(&mut self, frame: Vec<u8>) {
        self.rx.borrow_mut().push_back(frame);
    }

    /// Drains everything the engine transmitted since the last call.
    pub fn sent(&mut self) -> Vec<Vec<u8>> {
        self.tx.borrow_mut().drain(..).collect()
    }

    pub fn events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.iface.poll_event() {
            events.push(event);
        }
        events
    }

    /// Polls until the injected queue drains, collecting transmissions.
    pub fn run(&mut self) -> Vec<Vec<u8>> {
        while !self.rx.borrow().is_empty() {
            self.poll();
        }
        self.sent()
    }
}

// ---------------------------------------------------------------------
// Frame builders for the scripted peer.
// ---------------------------------------------------------------------

pub fn eth_frame(dst: EthernetAddress, src: EthernetAddress, proto: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0; EthernetFrame::<&[u8]>::buffer_len(payload.len())];
    {
        let mut eth = EthernetFrame::try_new(&mut frame[..]).unwrap();
        eth.set_dst_addr(dst);
        eth.set_src_addr(src);
        eth.set_payload_type(proto);
        eth.payload_mut().copy_from_slice(payload);
    }
    frame
}

pub fn arp_frame(op: u16, sha: EthernetAddress, spa: Ipv4Address, tha: EthernetAddress, tpa: Ipv4Address) -> Vec<u8> {
    let mut packet = vec![0; ArpRepr::buffer_len()];
    {
        let mut arp = ArpPacket::try_new(&mut packet[..]).unwrap();
        ArpRepr {
            op,
            sender_hw_addr: sha,
            sender_proto_addr: spa,
            target_hw_addr: tha,
            target_proto_addr: tpa,
        }.serialize(&mut arp);
    }
    eth_frame(EthernetAddress::BROADCAST, sha, eth_types::ARP, &packet)
}

pub fn ipv4_frame(
    src_mac: EthernetAddress,
    src: Ipv4Address,
    dst: Ipv4Address,
    protocol: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut packet = vec![0; Ipv4Packet::<&[u8]>::buffer_len(payload.len())];
    {
        let mut ip = Ipv4Packet::try_new(&mut packet[..]).unwrap();
        Ipv4Repr {
            src_addr: src,
            dst_addr: dst,
            protocol,
            payload_len: payload.len() as u16,
        }.serialize(&mut ip);
        ip.payload_mut().copy_from_slice(payload);
    }
    eth_frame(EthernetAddress::new(OUR_MAC), src_mac, eth_types::IPV4, &packet)
}

pub fn udp_frame(
    src_mac: EthernetAddress,
    src: Ipv4Address,
    src_port: u16,
    dst: Ipv4Address,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let udp_len = UdpPacket::<&[u8]>::buffer_len(payload.len());
    let mut packet = vec![0; udp_len];
    {
        let mut udp = UdpPacket::try_new(&mut packet[..]).unwrap();
        UdpRepr {
            src_port,
            dst_port,
            length: udp_len as u16,
        }.serialize(&mut udp);
        udp.payload_mut().copy_from_slice(payload);
        udp.fill_checksum(src.as_bytes(), dst.as_bytes());
    }
    ipv4_frame(src_mac, src, dst, ipv4_protocols::UDP, &packet)
}

pub fn tcp_frame(
    src: Ipv4Address,
    src_port: u16,
    dst: Ipv4Address,
    dst_port: u16,
    seq_num: u32,
    ack_num: u32,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let seg_len = TcpPacket::<&[u8]>::buffer_len(payload.len(), false);
    let mut packet = vec![0; seg_len];
    {
        let mut tcp = TcpPacket::try_new(&mut packet[..]).unwrap();
        TcpRepr {
            src_port,
            dst_port,
            seq_num,
            ack_num,
            flags,
            window_size: 4096,
            mss: None,
        }.serialize(&mut tcp);
        tcp.payload_mut().copy_from_slice(payload);
        tcp.fill_checksum(src.as_bytes(), dst.as_bytes());
    }
    ipv4_frame(peer_mac(), src, dst, ipv4_protocols::TCP, &packet)
}

/// A decoded TCP segment the engine transmitted.
#[derive(Debug)]
pub struct SentTcp {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub mss: Option<u16>,
    pub payload: Vec<u8>,
}

/// Decodes every TCP segment among the transmitted frames.
pub fn sent_tcp(frames: &[Vec<u8>]) -> Vec<SentTcp> {
    frames
        .iter()
        .filter_map(|frame| {
            let eth = EthernetFrame::try_new(&frame[..]).ok()?;
            if eth.payload_type() != eth_types::IPV4 {
                return None;
            }
            let ip = Ipv4Packet::try_new(eth.payload()).ok()?;
            ip.check_encoding().ok()?;
            if ip.protocol() != ipv4_protocols::TCP {
                return None;
            }
            let tcp = TcpPacket::try_new(ip.payload()).ok()?;
            tcp.check_encoding(ip.src_addr().as_bytes(), ip.dst_addr().as_bytes())
                .ok()?;
            Some(SentTcp {
                src_port: tcp.src_port(),
                dst_port: tcp.dst_port(),
                seq: tcp.seq_num(),
                ack: tcp.ack_num(),
                flags: tcp.flags(),
                mss: tcp.mss(),
                payload: tcp.payload().to_vec(),
            })
        })
        .collect()
}

/// Decodes every UDP datagram among the transmitted frames into
/// (src_port, dst_port, dst_addr, payload).
pub fn sent_udp(frames: &[Vec<u8>]) -> Vec<(u16, u16, Ipv4Address, Vec<u8>)> {
    frames
        .iter()
        .filter_map(|frame| {
            let eth = EthernetFrame::try_new(&frame[..]).ok()?;
            if eth.payload_type() != eth_types::IPV4 {
                return None;
            }
            let ip = Ipv4Packet::try_new(eth.payload()).ok()?;
            ip.check_encoding().ok()?;
            if ip.protocol() != ipv4_protocols::UDP {
                return None;
            }
            let udp = UdpPacket::try_new(ip.payload()).ok()?;
            udp.check_encoding(ip.src_addr().as_bytes(), ip.dst_addr().as_bytes())
                .ok()?;
            Some((
                udp.src_port(),
                udp.dst_port(),
                ip.dst_addr(),
                udp.payload().to_vec(),
            ))
        })
        .collect()
}
