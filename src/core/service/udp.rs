use {
    Error,
    Result,
};
use core::conn::{
    ConnEvent,
    IpAddress,
    Proto,
    SocketAddr,
};
use core::packet::ParsedPacket;
use core::repr::{
    ipv4_protocols,
    ipv6_next_headers,
    EthernetAddress,
    UdpPacket,
    UdpRepr,
};
use core::service::{
    ipv4,
    ipv6,
    Event,
    Interface,
};

/// Received bytes a single connection may buffer before the engine calls
/// it an error.
pub const MAX_RECV_BUFFER: usize = 1024 * 1024;

/// Sends a UDP datagram.
pub fn send_packet(
    interface: &mut Interface,
    dst_mac: EthernetAddress,
    src_addr: IpAddress,
    src_port: u16,
    dst: SocketAddr,
    payload: &[u8],
) -> Result<usize> {
    let udp_len = UdpPacket::<&[u8]>::buffer_len(payload.len());

    let udp_repr = UdpRepr {
        src_port,
        dst_port: dst.port,
        length: udp_len as u16,
    };

    match (src_addr, dst.addr) {
        (IpAddress::V4(src), IpAddress::V4(dst_ip)) => ipv4::send_packet(
            interface,
            dst_mac,
            ipv4_protocols::UDP,
            src,
            dst_ip,
            udp_len,
            |buffer| {
                let mut packet = UdpPacket::try_new(buffer).unwrap();
                udp_repr.serialize(&mut packet);
                packet.payload_mut().copy_from_slice(payload);
                packet.fill_checksum(src.as_bytes(), dst_ip.as_bytes());
            },
        ),
        (IpAddress::V6(src), IpAddress::V6(dst_ip)) => ipv6::send_packet(
            interface,
            dst_mac,
            ipv6_next_headers::UDP,
            64,
            src,
            dst_ip,
            udp_len,
            |buffer| {
                let mut packet = UdpPacket::try_new(buffer).unwrap();
                udp_repr.serialize(&mut packet);
                packet.payload_mut().copy_from_slice(payload);
                packet.fill_checksum(src.as_bytes(), dst_ip.as_bytes());
            },
        ),
        _ => Err(Error::NoRoute),
    }
}

/// Transmits application data on a UDP connection, trimming the payload
/// to what the transmit buffer and MTU allow.
pub fn send_from_conn(interface: &mut Interface, handle: usize, data: &[u8]) -> Result<()> {
    let (mac, loc, rem) = {
        let conn = interface.conns.get(handle).ok_or(Error::Exhausted)?;
        (conn.state.mac, conn.loc, conn.rem)
    };

    let headers = 14 + 24 + UdpPacket::<&[u8]>::HEADER_LEN;
    let space = interface
        .tx
        .len()
        .min(interface.mtu + 14)
        .saturating_sub(headers);
    let len = data.len().min(space);
    if len < data.len() {
        error!("UDP datagram exceeds MTU, truncating");
    }

    // Refresh the local address: the lease may have changed since connect.
    let src_addr = match rem.addr {
        IpAddress::V4(_) => IpAddress::V4(*interface.ipv4_addr),
        IpAddress::V6(_) => loc.addr,
    };

    send_packet(interface, mac, src_addr, loc.port, rem, &data[.. len]).map(|_| ())
}

/// Receives a UDP datagram: demultiplexes on the destination port, learns
/// the sender as the connection's remote endpoint, and buffers the payload.
pub fn recv_packet(interface: &mut Interface, parsed: &ParsedPacket) {
    let (src_port, dst_port) = match parsed.udp {
        Some(ref udp) => (udp.src_port(), udp.dst_port()),
        None => return,
    };

    let src_addr = if let Some(ref ip) = parsed.ipv4 {
        IpAddress::V4(ip.src_addr())
    } else if let Some(ref ip6) = parsed.ipv6 {
        IpAddress::V6(ip6.src_addr())
    } else {
        return;
    };

    let handle = interface
        .conns
        .iter()
        .find(|&(_, conn)| conn.proto == Proto::Udp && conn.loc.port == dst_port)
        .map(|(handle, _)| handle);

    let handle = match handle {
        Some(handle) => handle,
        None => {
            // No listener on this port. An ICMP port-unreachable would be
            // polite; stay silent like the rest of the engine.
            debug!("no UDP connection for port {}", dst_port);
            interface.ndrop += 1;
            return;
        }
    };

    let payload_len = parsed.payload.len();
    let overflow = {
        let conn = match interface.conns.get_mut(handle) {
            Some(conn) => conn,
            None => return,
        };
        conn.rem = SocketAddr {
            addr: src_addr,
            port: src_port,
        };
        if let Some(sender) = parsed.sender {
            conn.state.mac = sender;
        }

        if conn.recv_buf.len() + payload_len > MAX_RECV_BUFFER {
            true
        } else {
            conn.recv_buf.extend_from_slice(parsed.payload);
            false
        }
    };

    if overflow {
        interface.conn_error(handle, "receive buffer full");
    } else {
        interface.push_event(Event::Conn(handle, ConnEvent::Read(payload_len)));
    }
}
