//! IPv6 Neighbor Discovery and stateless address autoconfiguration.

use Result;
use core::conn::IpAddress;
use core::packet::ParsedPacket;
use core::repr::{
    icmpv6_msg_types as msg_types,
    ipv6_next_headers,
    na_flags,
    ndp_opt_types,
    EthernetAddress,
    Icmpv6Packet,
    Ipv6Address,
    NdpOption,
};
use core::service::{
    ipv6,
    Interface,
    LinkState,
};

/// Sends a neighbor solicitation for a target address to its solicited
/// node multicast group, carrying our source link layer address.
pub fn send_neighbor_solicit(interface: &mut Interface, target: Ipv6Address) -> Result<usize> {
    let link_opt = interface.link.link_addr_opt()?;
    let dst = target.solicited_node();
    let dst_mac = interface.link.map_multicast_v6(dst);
    let src = interface.ipv6_link_local;

    debug!("NDP solicit for {}", target);
    ipv6::send_packet(
        interface,
        dst_mac,
        ipv6_next_headers::ICMPV6,
        255,
        src,
        dst,
        Icmpv6Packet::<&[u8]>::NEIGHBOR_LEN + 8,
        |buffer| {
            let mut ns = Icmpv6Packet::try_new(buffer).unwrap();
            ns.set_msg_type(msg_types::NEIGHBOR_SOLICIT);
            ns.set_code(0);
            ns.set_target_addr(target);
            {
                let body = ns.body_mut();
                body[0 .. 4].copy_from_slice(&[0; 4]); // reserved
                body[20] = ndp_opt_types::SOURCE_LINK_ADDR;
                body[21] = 1;
                body[22 .. 28].copy_from_slice(&link_opt);
            }
            ns.fill_checksum(&src, &dst);
        },
    )
}

/// Sends a router solicitation to the all-routers group.
pub fn send_router_solicit(interface: &mut Interface) -> Result<usize> {
    let link_opt = interface.link.link_addr_opt()?;
    let dst = Ipv6Address::ALL_ROUTERS;
    let dst_mac = interface.link.map_multicast_v6(dst);
    let src = interface.ipv6_link_local;

    ipv6::send_packet(
        interface,
        dst_mac,
        ipv6_next_headers::ICMPV6,
        255,
        src,
        dst,
        Icmpv6Packet::<&[u8]>::ROUTER_SOLICIT_LEN + 8,
        |buffer| {
            let mut rs = Icmpv6Packet::try_new(buffer).unwrap();
            rs.set_msg_type(msg_types::ROUTER_SOLICIT);
            rs.set_code(0);
            {
                let body = rs.body_mut();
                body[0 .. 4].copy_from_slice(&[0; 4]); // reserved
                body[4] = ndp_opt_types::SOURCE_LINK_ADDR;
                body[5] = 1;
                body[6 .. 12].copy_from_slice(&link_opt);
            }
            rs.fill_checksum(&src, &dst);
        },
    )
}

fn send_neighbor_advert(
    interface: &mut Interface,
    target: Ipv6Address,
    dst: Ipv6Address,
    dst_mac: EthernetAddress,
) -> Result<usize> {
    let link_opt = interface.link.link_addr_opt()?;
    let src = ipv6::src_for(interface, dst);

    ipv6::send_packet(
        interface,
        dst_mac,
        ipv6_next_headers::ICMPV6,
        255,
        src,
        dst,
        Icmpv6Packet::<&[u8]>::NEIGHBOR_LEN + 8,
        |buffer| {
            let mut na = Icmpv6Packet::try_new(buffer).unwrap();
            na.set_msg_type(msg_types::NEIGHBOR_ADVERT);
            na.set_code(0);
            na.set_na_flags(na_flags::SOLICITED | na_flags::OVERRIDE);
            na.set_target_addr(target);
            {
                let body = na.body_mut();
                body[20] = ndp_opt_types::TARGET_LINK_ADDR;
                body[21] = 1;
                body[22 .. 28].copy_from_slice(&link_opt);
            }
            na.fill_checksum(&src, &dst);
        },
    )
}

/// Once per second: solicit routers while autoconfiguring, and keep
/// re-soliciting an unresolved v6 gateway.
pub fn housekeeping(interface: &mut Interface) {
    if interface.link.addr().is_none() {
        return;
    }

    if interface.state6 == LinkState::Up && interface.enable_slaac {
        send_router_solicit(interface).ok();
    }

    let bound = interface.state6 == LinkState::IpBound || interface.state6 == LinkState::Ready;
    let gateway6 = interface.gateway6;
    if bound && !gateway6.is_unspecified() && !interface.gateway6_ready {
        send_neighbor_solicit(interface, gateway6).ok();
    }
}

/// Receives one of the four NDP messages.
pub fn recv_packet(interface: &mut Interface, parsed: &ParsedPacket) {
    let (ip_src, _ip_dst) = match parsed.ipv6 {
        Some(ref ip) => (ip.src_addr(), ip.dst_addr()),
        None => return,
    };
    let icmp = match parsed.icmpv6 {
        Some(ref icmp) => icmp,
        None => return,
    };

    match icmp.msg_type() {
        msg_types::NEIGHBOR_SOLICIT => {
            let target = icmp.target_addr();
            if target.is_unspecified()
                || (target != interface.ipv6_link_local && target != interface.ipv6_global)
            {
                return;
            }

            // Prefer the sender's advertised link address over the frame
            // source.
            let sender_mac = icmp.ndp_options()
                .find_map(|opt| match opt {
                    NdpOption::SourceLinkAddr(raw) => interface.link.link_addr_from_opt(raw),
                    _ => None,
                })
                .or(parsed.sender);

            if let Some(sender_mac) = sender_mac {
                debug!("NDP: answering solicit for {}", target);
                send_neighbor_advert(interface, target, ip_src, sender_mac).ok();
            }
        }
        msg_types::NEIGHBOR_ADVERT => {
            let target = icmp.target_addr();
            let mac = icmp.ndp_options()
                .find_map(|opt| match opt {
                    NdpOption::TargetLinkAddr(raw) => interface.link.link_addr_from_opt(raw),
                    _ => None,
                })
                .or(parsed.sender);

            let mac = match mac {
                Some(mac) => mac,
                None => return,
            };

            if target == interface.gateway6 && !interface.gateway6.is_unspecified() {
                interface.gateway6_mac = mac;
                interface.gateway6_ready = true;
                if interface.state6 == LinkState::IpBound {
                    interface.set_state6(LinkState::Ready);
                }
                return;
            }

            let waiting = interface
                .conns
                .iter()
                .find(|&(_, conn)| {
                    conn.is_resolving && conn.rem.addr == IpAddress::V6(target)
                })
                .map(|(handle, _)| handle);

            if let Some(handle) = waiting {
                debug!("{} NDP resolved {} -> {}", handle, target, mac);
                if let Some(conn) = interface.conns.get_mut(handle) {
                    conn.state.mac = mac;
                }
                interface.mac_resolved(handle);
            }
        }
        msg_types::ROUTER_ADVERT => recv_router_advert(interface, parsed, ip_src),
        // We are a host; solicitations from other hosts are not answered.
        msg_types::ROUTER_SOLICIT => {}
        _ => {}
    }
}

/// Handles a router advertisement: learns the router and its link address,
/// applies the advertised MTU, autoconfigures a global address from the
/// prefix, and solicits the router before the interface goes ready.
fn recv_router_advert(interface: &mut Interface, parsed: &ParsedPacket, router: Ipv6Address) {
    if !interface.enable_slaac {
        return;
    }
    if interface.state6 != LinkState::Up && interface.state6 != LinkState::IpBound {
        return;
    }
    let icmp = match parsed.icmpv6 {
        Some(ref icmp) => icmp,
        None => return,
    };

    interface.gateway6 = router;

    for option in icmp.ndp_options() {
        match option {
            NdpOption::SourceLinkAddr(raw) => {
                if let Some(mac) = interface.link.link_addr_from_opt(raw) {
                    interface.gateway6_mac = mac;
                }
            }
            NdpOption::Mtu(mtu) => {
                let mtu = mtu as usize;
                if mtu >= 1280 && mtu <= interface.link.mtu() {
                    interface.mtu = mtu;
                }
            }
            NdpOption::PrefixInfo { prefix_len, prefix } => {
                if let Some(global) = interface.link.gen_global_ip6(&prefix, prefix_len) {
                    if interface.ipv6_global != global {
                        info!("SLAAC address {} (prefix {}/{})", global, prefix, prefix_len);
                    }
                    interface.ipv6_global = global;
                    interface.ipv6_prefix_len = prefix_len;
                }
            }
            NdpOption::TargetLinkAddr(_) => {}
        }
    }

    if !interface.ipv6_global.is_unspecified() && interface.state6 == LinkState::Up {
        interface.set_state6(LinkState::IpBound);
        // Resolve the router before the 1 second promotion to ready.
        send_neighbor_solicit(interface, router).ok();
    }
}
