use Result;
use core::conn::IpAddress;
use core::packet::ParsedPacket;
use core::repr::{
    arp_ops,
    eth_types,
    ArpPacket,
    ArpRepr,
    EthernetAddress,
    Ipv4Address,
};
use core::service::{
    ethernet,
    Interface,
    LinkState,
};

/// Broadcasts an ARP request for an IPv4 address.
pub fn send_request(interface: &mut Interface, target: Ipv4Address) -> Result<usize> {
    let link_addr = match interface.link.addr() {
        Some(addr) => addr,
        None => return Ok(0),
    };

    let repr = ArpRepr {
        op: arp_ops::REQUEST,
        sender_hw_addr: link_addr,
        sender_proto_addr: *interface.ipv4_addr,
        target_hw_addr: EthernetAddress::BROADCAST,
        target_proto_addr: target,
    };

    debug!("ARP request for {}", target);
    send_packet(interface, &repr, EthernetAddress::BROADCAST)
}

/// Sends an ARP packet to a link destination.
pub fn send_packet(
    interface: &mut Interface,
    arp_repr: &ArpRepr,
    dst: EthernetAddress,
) -> Result<usize> {
    ethernet::send_frame(
        interface,
        dst,
        eth_types::ARP,
        ArpRepr::buffer_len(),
        |payload| {
            let mut packet = ArpPacket::try_new(payload).unwrap();
            arp_repr.serialize(&mut packet);
        },
    )
}

/// Retries the gateway lookup once per second, indefinitely, while the
/// router's link address is unresolved.
pub fn housekeeping(interface: &mut Interface) {
    let bound = interface.state == LinkState::IpBound || interface.state == LinkState::Ready;
    let gateway = interface.gateway;
    if bound && !gateway.is_unspecified() && !interface.gateway_ready {
        send_request(interface, gateway).ok();
    }
}

/// Receives an ARP packet: answers requests for our address and feeds
/// replies into gateway and connection resolution.
pub fn recv_packet(interface: &mut Interface, parsed: &ParsedPacket) {
    let arp = match parsed.arp {
        Some(ref arp) => arp,
        None => return,
    };

    match arp.op() {
        arp_ops::REQUEST => {
            if arp.target_proto_addr() != *interface.ipv4_addr
                || interface.ipv4_addr.is_unspecified()
            {
                return;
            }

            let link_addr = match interface.link.addr() {
                Some(addr) => addr,
                None => return,
            };

            let reply = ArpRepr {
                op: arp_ops::REPLY,
                sender_hw_addr: link_addr,
                sender_proto_addr: *interface.ipv4_addr,
                target_hw_addr: arp.sender_hw_addr(),
                target_proto_addr: arp.sender_proto_addr(),
            };

            debug!(
                "ARP: telling {} we are {}",
                reply.target_proto_addr, link_addr
            );
            send_packet(interface, &reply, reply.target_hw_addr).ok();
        }
        arp_ops::REPLY => {
            // A reply not targeted at our hardware address is not ours.
            if Some(arp.target_hw_addr()) != interface.link.addr() {
                return;
            }

            if arp.sender_proto_addr() == interface.gateway {
                interface.gateway_mac = arp.sender_hw_addr();
                interface.gateway_ready = true;
                if interface.state == LinkState::IpBound {
                    interface.set_state(LinkState::Ready);
                }
                return;
            }

            // Resume any connection waiting on this peer.
            let waiting = interface
                .conns
                .iter()
                .find(|&(_, conn)| {
                    conn.is_resolving
                        && conn.rem.addr == IpAddress::V4(arp.sender_proto_addr())
                })
                .map(|(handle, _)| handle);

            if let Some(handle) = waiting {
                let mac = arp.sender_hw_addr();
                debug!(
                    "{} ARP resolved {} -> {}",
                    handle,
                    arp.sender_proto_addr(),
                    mac
                );
                if let Some(conn) = interface.conns.get_mut(handle) {
                    conn.state.mac = mac;
                }
                interface.mac_resolved(handle);
            }
        }
        _ => {}
    }
}
