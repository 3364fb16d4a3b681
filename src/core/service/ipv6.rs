use Result;
use core::packet::ParsedPacket;
use core::repr::{
    eth_types,
    icmpv6_msg_types,
    EthernetAddress,
    Ipv6Address,
    Ipv6Packet,
    Ipv6Repr,
};
use core::service::{
    ethernet,
    icmpv6,
    ndp,
    tcp,
    udp,
    Interface,
};

/// Sends an IPv6 packet via the interface.
///
/// The closure fills in **only** the IP payload. NDP messages pass hop
/// limit 255 per RFC 4861; everything else uses 64.
pub fn send_packet<F>(
    interface: &mut Interface,
    dst_mac: EthernetAddress,
    next_header: u8,
    hop_limit: u8,
    src_addr: Ipv6Address,
    dst_addr: Ipv6Address,
    payload_len: usize,
    f: F,
) -> Result<usize>
where
    F: FnOnce(&mut [u8]),
{
    let ip_len = Ipv6Packet::<&[u8]>::buffer_len(payload_len);

    ethernet::send_frame(interface, dst_mac, eth_types::IPV6, ip_len, |ip_buffer| {
        let mut packet = Ipv6Packet::try_new(ip_buffer).unwrap();
        Ipv6Repr {
            src_addr,
            dst_addr,
            next_header,
            hop_limit,
            payload_len: payload_len as u16,
        }.serialize(&mut packet);
        f(packet.payload_mut());
    })
}

/// Receives an IPv6 packet and dispatches it to ICMPv6/NDP, UDP, or TCP.
pub fn recv_packet(interface: &mut Interface, parsed: &ParsedPacket) {
    if parsed.fragment {
        // Same policy as v4: fragments are rejected, not reassembled.
        interface.nerr += 1;
        debug!("dropping fragmented IPv6 datagram");
        return;
    }

    if let Some(ref icmp) = parsed.icmpv6 {
        match icmp.msg_type() {
            icmpv6_msg_types::ECHO_REQUEST => icmpv6::recv_packet(interface, parsed),
            icmpv6_msg_types::ROUTER_SOLICIT
            | icmpv6_msg_types::ROUTER_ADVERT
            | icmpv6_msg_types::NEIGHBOR_SOLICIT
            | icmpv6_msg_types::NEIGHBOR_ADVERT => ndp::recv_packet(interface, parsed),
            msg_type => {
                debug!("ignoring ICMPv6 message type {}", msg_type);
                interface.ndrop += 1;
            }
        }
    } else if parsed.udp.is_some() {
        udp::recv_packet(interface, parsed);
    } else if parsed.tcp.is_some() {
        tcp::recv_packet(interface, parsed);
    } else if let Some(ref ip6) = parsed.ipv6 {
        debug!("ignoring IPv6 packet with next header {}", ip6.next_header());
        interface.ndrop += 1;
    }
}

/// Picks the source address for a destination: link local traffic and an
/// unconfigured interface use the link local address.
pub fn src_for(interface: &Interface, dst: Ipv6Address) -> Ipv6Address {
    if dst.is_link_local() || dst.is_multicast() || interface.ipv6_global.is_unspecified() {
        interface.ipv6_link_local
    } else {
        interface.ipv6_global
    }
}
