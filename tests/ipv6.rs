extern crate mcunet;

mod common;

use std::time::Duration;

use mcunet::core::repr::{
    eth_types,
    icmpv6_msg_types,
    ipv6_next_headers,
    EthernetFrame,
    Icmpv6Packet,
    Ipv6Address,
    Ipv6Packet,
    Ipv6Repr,
};
use mcunet::core::service::{
    Config,
    LinkState,
};

use common::{
    eth_frame,
    our_mac,
    Harness,
};

const ROUTER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x99];

fn router_ll() -> Ipv6Address {
    Ipv6Address::link_local([0x00, 0x00, 0x00, 0xFF, 0xFE, 0x00, 0x00, 0x99])
}

/// Our EUI-64 derived link local address (MAC 02:00:00:00:00:01).
fn our_ll() -> Ipv6Address {
    Ipv6Address::link_local([0x00, 0x00, 0x00, 0xFF, 0xFE, 0x00, 0x00, 0x01])
}

fn prefix() -> Ipv6Address {
    Ipv6Address::new([0x20, 0x01, 0x0D, 0xB8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0])
}

fn slaac_config() -> Config {
    let mut config = Config::default();
    config.enable_slaac = true;
    config
}

fn ipv6_eth_frame(
    src: Ipv6Address,
    dst: Ipv6Address,
    hop_limit: u8,
    icmp: &[u8],
) -> Vec<u8> {
    let mut packet = vec![0; Ipv6Packet::<&[u8]>::buffer_len(icmp.len())];
    {
        let mut ip6 = Ipv6Packet::try_new(&mut packet[..]).unwrap();
        Ipv6Repr {
            src_addr: src,
            dst_addr: dst,
            next_header: ipv6_next_headers::ICMPV6,
            hop_limit,
            payload_len: icmp.len() as u16,
        }.serialize(&mut ip6);
        ip6.payload_mut().copy_from_slice(icmp);
    }
    eth_frame(
        our_mac(),
        mcunet::core::repr::EthernetAddress::new(ROUTER_MAC),
        eth_types::IPV6,
        &packet,
    )
}

/// A router advertisement with SLLA, MTU, and a /64 prefix option.
fn router_advert(src: Ipv6Address, dst: Ipv6Address) -> Vec<u8> {
    let mut icmp = vec![0; 16 + 8 + 8 + 32];
    icmp[0] = icmpv6_msg_types::ROUTER_ADVERT;
    icmp[4] = 64; // hop limit hint
    // source link layer address
    icmp[16] = 1;
    icmp[17] = 1;
    icmp[18 .. 24].copy_from_slice(&ROUTER_MAC);
    // mtu
    icmp[24] = 5;
    icmp[25] = 1;
    icmp[28 .. 32].copy_from_slice(&[0, 0, 0x05, 0xDC]);
    // prefix information, /64; the prefix itself sits 16 bytes into the
    // option body
    icmp[32] = 3;
    icmp[33] = 4;
    icmp[34] = 64;
    icmp[48 .. 64].copy_from_slice(prefix().as_bytes());

    {
        let mut packet = Icmpv6Packet::try_new(&mut icmp[..]).unwrap();
        packet.fill_checksum(&src, &dst);
    }
    ipv6_eth_frame(src, dst, 255, &icmp)
}

fn neighbor_advert(target: Ipv6Address, src: Ipv6Address, dst: Ipv6Address) -> Vec<u8> {
    let mut icmp = vec![0; 24 + 8];
    icmp[0] = icmpv6_msg_types::NEIGHBOR_ADVERT;
    icmp[4] = 0x60; // solicited + override
    icmp[8 .. 24].copy_from_slice(target.as_bytes());
    icmp[24] = 2; // target link layer address
    icmp[25] = 1;
    icmp[26 .. 32].copy_from_slice(&ROUTER_MAC);
    {
        let mut packet = Icmpv6Packet::try_new(&mut icmp[..]).unwrap();
        packet.fill_checksum(&src, &dst);
    }
    ipv6_eth_frame(src, dst, 255, &icmp)
}

fn neighbor_solicit(target: Ipv6Address, src: Ipv6Address) -> Vec<u8> {
    let dst = target.solicited_node();
    let mut icmp = vec![0; 24 + 8];
    icmp[0] = icmpv6_msg_types::NEIGHBOR_SOLICIT;
    icmp[8 .. 24].copy_from_slice(target.as_bytes());
    icmp[24] = 1; // source link layer address
    icmp[25] = 1;
    icmp[26 .. 32].copy_from_slice(&ROUTER_MAC);
    {
        let mut packet = Icmpv6Packet::try_new(&mut icmp[..]).unwrap();
        packet.fill_checksum(&src, &dst);
    }
    ipv6_eth_frame(src, dst, 255, &icmp)
}

/// Decodes transmitted ICMPv6 messages into (type, src, dst, raw body).
fn sent_icmpv6(frames: &[Vec<u8>]) -> Vec<(u8, Ipv6Address, Ipv6Address, Vec<u8>)> {
    frames
        .iter()
        .filter_map(|frame| {
            let eth = EthernetFrame::try_new(&frame[..]).ok()?;
            if eth.payload_type() != eth_types::IPV6 {
                return None;
            }
            let ip6 = Ipv6Packet::try_new(eth.payload()).ok()?;
            ip6.check_encoding().ok()?;
            if ip6.next_header() != ipv6_next_headers::ICMPV6 {
                return None;
            }
            let icmp = Icmpv6Packet::try_new(ip6.payload()).ok()?;
            icmp.check_encoding(&ip6.src_addr(), &ip6.dst_addr()).ok()?;
            Some((
                icmp.msg_type(),
                ip6.src_addr(),
                ip6.dst_addr(),
                ip6.payload().to_vec(),
            ))
        })
        .collect()
}

#[test]
fn link_up_derives_link_local_and_solicits_routers() {
    let mut harness = Harness::new(slaac_config());
    harness.poll();

    assert_eq!(harness.iface.state6, LinkState::Up);
    assert_eq!(harness.iface.ipv6_link_local, our_ll());

    let messages = sent_icmpv6(&harness.sent());
    let rs: Vec<_> = messages
        .iter()
        .filter(|&&(msg_type, _, _, _)| msg_type == icmpv6_msg_types::ROUTER_SOLICIT)
        .collect();
    assert_eq!(rs.len(), 1);
    assert_eq!(rs[0].2, Ipv6Address::ALL_ROUTERS);
}

#[test]
fn router_advert_drives_slaac_to_ready() {
    let mut harness = Harness::new(slaac_config());
    harness.poll();
    harness.sent();

    harness.inject(router_advert(router_ll(), Ipv6Address::ALL_NODES));
    let frames = harness.run();

    // The global address combines the prefix with our EUI-64 identifier.
    let expected = Ipv6Address::new([
        0x20, 0x01, 0x0D, 0xB8, 0, 0, 0, 0, 0x00, 0x00, 0x00, 0xFF, 0xFE, 0x00, 0x00, 0x01,
    ]);
    assert_eq!(harness.iface.ipv6_global, expected);
    assert_eq!(harness.iface.ipv6_prefix_len, 64);
    assert_eq!(harness.iface.state6, LinkState::IpBound);
    assert_eq!(harness.iface.gateway6, router_ll());
    assert_eq!(harness.iface.mtu, 1500);

    // The router is solicited before the interface goes ready.
    let ns: Vec<_> = sent_icmpv6(&frames)
        .into_iter()
        .filter(|&(msg_type, _, _, _)| msg_type == icmpv6_msg_types::NEIGHBOR_SOLICIT)
        .collect();
    assert_eq!(ns.len(), 1);
    assert_eq!(ns[0].2, router_ll().solicited_node());

    // Its advertisement marks the gateway ready and promotes the state.
    harness.inject(neighbor_advert(router_ll(), router_ll(), our_ll()));
    harness.run();
    assert!(harness.iface.gateway6_ready);
    assert_eq!(
        harness.iface.gateway6_mac,
        mcunet::core::repr::EthernetAddress::new(ROUTER_MAC)
    );
    assert_eq!(harness.iface.state6, LinkState::Ready);
}

#[test]
fn ready_follows_after_a_second_even_without_the_router() {
    let mut harness = Harness::new(slaac_config());
    harness.poll();
    harness.inject(router_advert(router_ll(), Ipv6Address::ALL_NODES));
    harness.run();
    assert_eq!(harness.iface.state6, LinkState::IpBound);

    harness.advance(Duration::from_secs(1));
    harness.poll();
    assert_eq!(harness.iface.state6, LinkState::Ready);
    assert!(!harness.iface.gateway6_ready);
}

#[test]
fn neighbor_solicit_for_our_address_is_answered() {
    let mut harness = Harness::new(slaac_config());
    harness.poll();
    harness.sent();

    harness.inject(neighbor_solicit(our_ll(), router_ll()));
    let frames = harness.run();

    let na: Vec<_> = sent_icmpv6(&frames)
        .into_iter()
        .filter(|&(msg_type, _, _, _)| msg_type == icmpv6_msg_types::NEIGHBOR_ADVERT)
        .collect();
    assert_eq!(na.len(), 1);
    let (_, src, dst, body) = na[0].clone();
    assert_eq!(src, our_ll());
    assert_eq!(dst, router_ll());
    // Target address sits at bytes 8..24 of the advertisement.
    assert_eq!(&body[8 .. 24], our_ll().as_bytes());
    // Solicited and override flags are set.
    assert_eq!(body[4] & 0x60, 0x60);
}

#[test]
fn icmpv6_echo_request_is_echoed() {
    let mut harness = Harness::new(slaac_config());
    harness.poll();
    harness.sent();

    let mut icmp = vec![0; 8 + 4];
    icmp[0] = icmpv6_msg_types::ECHO_REQUEST;
    icmp[4] = 0x12;
    icmp[5] = 0x34;
    icmp[7] = 0x09;
    icmp[8 .. 12].copy_from_slice(b"abcd");
    {
        let mut packet = Icmpv6Packet::try_new(&mut icmp[..]).unwrap();
        packet.fill_checksum(&router_ll(), &our_ll());
    }
    harness.inject(ipv6_eth_frame(router_ll(), our_ll(), 64, &icmp));
    let frames = harness.run();

    let replies: Vec<_> = sent_icmpv6(&frames)
        .into_iter()
        .filter(|&(msg_type, _, _, _)| msg_type == icmpv6_msg_types::ECHO_REPLY)
        .collect();
    assert_eq!(replies.len(), 1);
    let (_, src, dst, body) = replies[0].clone();
    assert_eq!(src, our_ll());
    assert_eq!(dst, router_ll());
    assert_eq!(&body[4 .. 8], &[0x12, 0x34, 0x00, 0x09]);
    assert_eq!(&body[8 ..], b"abcd");
}
