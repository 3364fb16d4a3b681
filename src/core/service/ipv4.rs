use Result;
use core::conn::Proto;
use core::packet::ParsedPacket;
use core::repr::{
    dhcp_ports,
    eth_types,
    ipv4_protocols,
    EthernetAddress,
    Ipv4Address,
    Ipv4Packet,
    Ipv4Repr,
};
use core::service::{
    dhcp,
    ethernet,
    icmpv4,
    tcp,
    udp,
    Interface,
};

/// Sends an IPv4 packet via the interface.
///
/// This takes care of serializing the header and computing its checksum;
/// the closure fills in **only** the IP payload.
pub fn send_packet<F>(
    interface: &mut Interface,
    dst_mac: EthernetAddress,
    protocol: u8,
    src_addr: Ipv4Address,
    dst_addr: Ipv4Address,
    payload_len: usize,
    f: F,
) -> Result<usize>
where
    F: FnOnce(&mut [u8]),
{
    let ip_len = Ipv4Packet::<&[u8]>::buffer_len(payload_len);

    ethernet::send_frame(interface, dst_mac, eth_types::IPV4, ip_len, |ip_buffer| {
        let mut packet = Ipv4Packet::try_new(ip_buffer).unwrap();
        Ipv4Repr {
            src_addr,
            dst_addr,
            protocol,
            payload_len: payload_len as u16,
        }.serialize(&mut packet);
        f(packet.payload_mut());
    })
}

/// Receives an IPv4 packet and dispatches it to ICMP, DHCP, UDP, or TCP.
///
/// Fragments are never delivered: the owning connection, when one can be
/// identified from the transport header, observes an error instead.
pub fn recv_packet(interface: &mut Interface, parsed: &ParsedPacket) {
    if parsed.fragment {
        reject_fragment(interface, parsed);
        return;
    }

    let protocol = match parsed.ipv4 {
        Some(ref ip) => ip.protocol(),
        None => return,
    };

    match protocol {
        ipv4_protocols::ICMP => icmpv4::recv_packet(interface, parsed),
        ipv4_protocols::UDP => {
            let dst_port = parsed.udp.as_ref().map(|udp| udp.dst_port());
            match dst_port {
                Some(dhcp_ports::CLIENT) if interface.enable_dhcp_client => {
                    dhcp::recv_client(interface, parsed)
                }
                Some(dhcp_ports::SERVER) if interface.enable_dhcp_server => {
                    dhcp::recv_server(interface, parsed)
                }
                _ => udp::recv_packet(interface, parsed),
            }
        }
        ipv4_protocols::TCP => tcp::recv_packet(interface, parsed),
        protocol => {
            debug!("ignoring IPv4 packet with protocol {}", protocol);
            interface.ndrop += 1;
        }
    }
}

fn reject_fragment(interface: &mut Interface, parsed: &ParsedPacket) {
    let handle = parsed
        .udp
        .as_ref()
        .map(|udp| (Proto::Udp, udp.src_port(), udp.dst_port()))
        .or_else(|| {
            parsed
                .tcp
                .as_ref()
                .map(|tcp| (Proto::Tcp, tcp.src_port(), tcp.dst_port()))
        })
        .and_then(|(proto, src_port, dst_port)| {
            interface
                .conns
                .iter()
                .find(|&(_, conn)| {
                    conn.proto == proto && !conn.is_listening && conn.loc.port == dst_port
                        && (proto == Proto::Udp || conn.rem.port == src_port)
                })
                .map(|(handle, _)| handle)
        });

    interface.nerr += 1;
    if let Some(handle) = handle {
        interface.conn_error(handle, "received fragmented packet");
    } else {
        debug!("dropping fragment with no owning connection");
    }
}
